//! Endpoint identity resolution.
//!
//! Each lineage row describes an edge between two endpoints. The `Source`
//! role is the row's own Fabric item; the `Target` role is what it points at,
//! read from the `Source *` columns. Resolution order, first match wins:
//!
//! 1. a workspace name without an item name resolves to a workspace, keyed by name;
//! 2. an item name with an item type resolves to an item keyed by
//!    `(workspace, name, type)`, and its workspace is resolved as its parent;
//! 3. a connection string resolves to an external source keyed by the trimmed string;
//! 4. anything else is [`ResolveError::UnresolvableEndpoint`].
//!
//! Workspace names are compared exactly. `Sales` and `sales` are two workspaces.

use ahash::AHashMap as HashMap;
use serde::Serialize;
use serde_json::Value;

use crate::connection::Connection;
use crate::error::ResolveError;
use crate::ingest::{Field, RawRow};
use crate::model::{node_id, Metadata, Node, NodeType};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Source,
    Target,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum NaturalKey {
    Workspace(String),
    Item {
        workspace: String,
        name: String,
        kind: String,
    },
    External(String),
}

/// What an endpoint resolves to, computed without touching resolver state.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Plan<'r> {
    Workspace {
        name: &'r str,
        id: Option<&'r str>,
    },
    Item {
        workspace: &'r str,
        workspace_id: Option<&'r str>,
        name: &'r str,
        kind: &'r str,
        id: Option<&'r str>,
    },
    External {
        key: &'r str,
        connection: &'r Connection,
        source_type: Option<&'r str>,
    },
}

struct Endpoint<'r> {
    workspace: Option<&'r str>,
    workspace_id: Option<&'r str>,
    item: Option<&'r str>,
    item_id: Option<&'r str>,
    item_type: Option<&'r str>,
}

impl<'r> Endpoint<'r> {
    fn of(row: &'r RawRow, role: Role) -> Self {
        match role {
            Role::Source => Self {
                workspace: row.get(Field::WorkspaceName),
                workspace_id: row.get(Field::WorkspaceId),
                item: row.get(Field::ItemName),
                item_id: row.get(Field::ItemId),
                item_type: row.get(Field::ItemType),
            },
            Role::Target => {
                let item = row.get(Field::SourceItemName);
                let explicit = row.get(Field::SourceWorkspaceName);
                // an upstream item with no workspace lives next to the row's item
                let (workspace, workspace_id) = match (explicit, item) {
                    (Some(ws), _) => (Some(ws), None),
                    (None, Some(_)) => (
                        row.get(Field::WorkspaceName),
                        row.get(Field::WorkspaceId),
                    ),
                    (None, None) => (None, None),
                };
                Self {
                    workspace,
                    workspace_id,
                    item,
                    item_id: None,
                    item_type: row.get(Field::SourceItemType),
                }
            }
        }
    }
}

pub(crate) fn plan(row: &RawRow, role: Role) -> Result<Plan<'_>, ResolveError> {
    let ep = Endpoint::of(row, role);

    match (ep.workspace, ep.item, ep.item_type) {
        (Some(name), None, _) => {
            return Ok(Plan::Workspace {
                name,
                id: ep.workspace_id,
            })
        }
        (Some(workspace), Some(name), Some(kind)) => {
            return Ok(Plan::Item {
                workspace,
                workspace_id: ep.workspace_id,
                name,
                kind,
                id: ep.item_id,
            })
        }
        _ => {}
    }

    if role == Role::Target {
        if let (Some(key), Some(connection)) =
            (row.get(Field::SourceConnection), row.connection())
        {
            return Ok(Plan::External {
                key,
                connection,
                source_type: row.get(Field::SourceType),
            });
        }
    }

    Err(ResolveError::UnresolvableEndpoint {
        line: row.line,
        role,
    })
}

/// Memoizing node factory. Lives for exactly one build.
#[derive(Debug, Default)]
pub struct EntityResolver {
    nodes: Vec<Node>,
    index: HashMap<NaturalKey, usize>,
}

impl EntityResolver {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_capacity(rows: usize) -> Self {
        Self {
            nodes: Vec::with_capacity(rows),
            index: HashMap::with_capacity(rows),
        }
    }

    /// Resolves one endpoint of `row`. The flag is true when the node was created by this call.
    pub fn resolve(&mut self, row: &RawRow, role: Role) -> Result<(&Node, bool), ResolveError> {
        let plan = plan(row, role)?;
        let (idx, is_new) = self.commit(&plan);
        Ok((&self.nodes[idx], is_new))
    }

    pub(crate) fn commit(&mut self, plan: &Plan<'_>) -> (usize, bool) {
        match *plan {
            Plan::Workspace { name, id } => {
                let (idx, is_new) = self.intern(NaturalKey::Workspace(name.to_string()), || Node {
                    id: node_id(NodeType::Workspace, &[name]),
                    kind: NodeType::Workspace,
                    label: name.to_string(),
                    parent_id: None,
                    metadata: Metadata::new(),
                });
                self.fill(idx, "workspaceId", id);
                (idx, is_new)
            }
            Plan::Item {
                workspace,
                workspace_id,
                name,
                kind,
                id,
            } => {
                let (ws_idx, _) = self.commit(&Plan::Workspace {
                    name: workspace,
                    id: workspace_id,
                });
                let parent = self.nodes[ws_idx].id.clone();

                let key = NaturalKey::Item {
                    workspace: workspace.to_string(),
                    name: name.to_string(),
                    kind: kind.to_string(),
                };
                let (idx, is_new) = self.intern(key, || {
                    let mut metadata = Metadata::new();
                    metadata.insert("itemType".into(), Value::from(kind));
                    metadata.insert("workspace".into(), Value::from(workspace));
                    Node {
                        id: node_id(NodeType::Item, &[workspace, name, kind]),
                        kind: NodeType::Item,
                        label: name.to_string(),
                        parent_id: Some(parent),
                        metadata,
                    }
                });
                self.fill(idx, "itemId", id);
                (idx, is_new)
            }
            Plan::External {
                key,
                connection,
                source_type,
            } => {
                let (idx, is_new) = self.intern(NaturalKey::External(key.to_string()), || {
                    let mut metadata = Metadata::new();
                    metadata.insert("connection".into(), connection.to_metadata());
                    if let Some(kind) = connection.kind() {
                        metadata.insert("connectionKind".into(), Value::from(kind));
                    }
                    Node {
                        id: node_id(NodeType::ExternalSource, &[key]),
                        kind: NodeType::ExternalSource,
                        label: connection.display_label(),
                        parent_id: None,
                        metadata,
                    }
                });
                self.fill(idx, "sourceType", source_type);
                (idx, is_new)
            }
        }
    }

    fn intern(&mut self, key: NaturalKey, make: impl FnOnce() -> Node) -> (usize, bool) {
        if let Some(&idx) = self.index.get(&key) {
            return (idx, false);
        }
        let idx = self.nodes.len();
        self.nodes.push(make());
        self.index.insert(key, idx);
        (idx, true)
    }

    /// Metadata is additive: later rows may supply a field an earlier row lacked.
    fn fill(&mut self, idx: usize, key: &str, value: Option<&str>) {
        if let Some(value) = value {
            self.nodes[idx]
                .metadata
                .entry(key.to_string())
                .or_insert_with(|| Value::from(value));
        }
    }

    #[must_use]
    pub fn node(&self, idx: usize) -> &Node {
        &self.nodes[idx]
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    #[must_use]
    pub fn into_nodes(self) -> Vec<Node> {
        self.nodes
    }
}
