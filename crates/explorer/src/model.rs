use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Auxiliary node and edge fields. Never part of identity.
pub type Metadata = BTreeMap<String, serde_json::Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum NodeType {
    Workspace,
    Item,
    ExternalSource,
}

impl NodeType {
    pub const ALL: [NodeType; 3] = [NodeType::Workspace, NodeType::Item, NodeType::ExternalSource];

    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            NodeType::Workspace => "workspace",
            NodeType::Item => "item",
            NodeType::ExternalSource => "externalSource",
        }
    }

    const fn id_prefix(&self) -> &'static str {
        match self {
            NodeType::Workspace => "ws",
            NodeType::Item => "item",
            NodeType::ExternalSource => "src",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: NodeType,
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    #[serde(default, skip_serializing_if = "Metadata::is_empty")]
    pub metadata: Metadata,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Edge {
    pub id: String,
    pub source: String,
    pub target: String,
    pub label: String,
    /// Number of lineage rows merged into this edge.
    pub occurrences: u32,
    #[serde(default, skip_serializing_if = "Metadata::is_empty")]
    pub metadata: Metadata,
}

/// A fully built lineage graph. Never mutated after construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LineageGraph {
    pub nodes: Vec<Node>,
    pub edges: Vec<Edge>,
    pub total_items: usize,
    pub total_connections: usize,
}

impl LineageGraph {
    #[must_use]
    pub fn new(nodes: Vec<Node>, edges: Vec<Edge>) -> Self {
        let total_items = nodes.iter().filter(|n| n.kind == NodeType::Item).count();
        let total_connections = edges.len();

        Self {
            nodes,
            edges,
            total_items,
            total_connections,
        }
    }

    #[must_use]
    pub fn empty() -> Self {
        Self::new(Vec::new(), Vec::new())
    }

    pub fn nodes_of(&self, kind: NodeType) -> impl Iterator<Item = &Node> {
        self.nodes.iter().filter(move |n| n.kind == kind)
    }

    /// Looks a node up by id. Linear scan over `nodes`; callers doing many
    /// lookups should build their own index.
    #[must_use]
    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.id == id)
    }
}

/// Deterministic id: type prefix plus the first 8 bytes of SHA-256 over the key parts.
#[must_use]
pub fn node_id(kind: NodeType, key: &[&str]) -> String {
    format!("{}-{}", kind.id_prefix(), digest(key))
}

#[must_use]
pub fn edge_id(source: &str, target: &str, label: &str) -> String {
    format!("edge-{}", digest(&[source, target, label]))
}

fn digest(parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for (i, part) in parts.iter().enumerate() {
        if i > 0 {
            // unit separator keeps ("ab", "c") distinct from ("a", "bc")
            hasher.update([0x1f]);
        }
        hasher.update(part.as_bytes());
    }
    hex::encode(&hasher.finalize()[..8])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_stable_and_typed() {
        let a = node_id(NodeType::Workspace, &["Sales"]);
        let b = node_id(NodeType::Workspace, &["Sales"]);
        let c = node_id(NodeType::Item, &["Sales"]);

        assert_eq!(a, b);
        assert!(a.starts_with("ws-"));
        assert_eq!(a.len(), "ws-".len() + 16);
        assert_ne!(a, c);
    }

    #[test]
    fn key_parts_do_not_run_together() {
        assert_ne!(
            node_id(NodeType::Item, &["ab", "c"]),
            node_id(NodeType::Item, &["a", "bc"])
        );
    }

    #[test]
    fn node_serializes_camel_case() {
        let node = Node {
            id: "item-1".into(),
            kind: NodeType::ExternalSource,
            label: "db1".into(),
            parent_id: Some("ws-1".into()),
            metadata: Metadata::new(),
        };
        let v = serde_json::to_value(&node).unwrap();

        assert_eq!(v["type"], "externalSource");
        assert_eq!(v["parentId"], "ws-1");
        assert!(v.get("metadata").is_none());
    }

    #[test]
    fn totals_are_computed_at_construction() {
        let nodes = vec![
            Node {
                id: "ws-1".into(),
                kind: NodeType::Workspace,
                label: "Sales".into(),
                parent_id: None,
                metadata: Metadata::new(),
            },
            Node {
                id: "item-1".into(),
                kind: NodeType::Item,
                label: "Report1".into(),
                parent_id: Some("ws-1".into()),
                metadata: Metadata::new(),
            },
        ];
        let graph = LineageGraph::new(nodes, Vec::new());

        assert_eq!(graph.total_items, 1);
        assert_eq!(graph.total_connections, 0);
        assert_eq!(graph.nodes_of(NodeType::Workspace).count(), 1);
    }
}
