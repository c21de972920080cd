use std::collections::BTreeMap;

use ahash::AHashMap as HashMap;
use serde::{Deserialize, Serialize};

use crate::model::{LineageGraph, NodeType};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkspaceSummary {
    pub id: String,
    pub name: String,
    pub item_count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphStats {
    pub total_nodes: usize,
    pub total_edges: usize,
    /// Lineage rows represented by the edges, counting merged duplicates.
    pub total_edge_occurrences: u64,
    pub nodes_by_type: BTreeMap<String, usize>,
    pub items_by_type: BTreeMap<String, usize>,
    pub sources_by_type: BTreeMap<String, usize>,
    pub edges_by_label: BTreeMap<String, usize>,
    pub workspaces: Vec<WorkspaceSummary>,
}

/// Aggregates over a built graph. Pure; the graph is only read.
#[must_use]
pub fn compute_stats(graph: &LineageGraph) -> GraphStats {
    let mut nodes_by_type: BTreeMap<String, usize> = NodeType::ALL
        .iter()
        .map(|t| (t.as_str().to_string(), 0))
        .collect();
    let mut items_by_type = BTreeMap::new();
    let mut sources_by_type = BTreeMap::new();

    for node in &graph.nodes {
        *nodes_by_type.entry(node.kind.as_str().to_string()).or_default() += 1;

        let (bucket, key) = match node.kind {
            NodeType::Item => (&mut items_by_type, "itemType"),
            NodeType::ExternalSource => (&mut sources_by_type, "sourceType"),
            NodeType::Workspace => continue,
        };
        let subtype = node
            .metadata
            .get(key)
            .and_then(|v| v.as_str())
            .unwrap_or("Unknown");
        *bucket.entry(subtype.to_string()).or_default() += 1;
    }

    let mut edges_by_label = BTreeMap::new();
    let mut total_edge_occurrences = 0u64;
    for edge in &graph.edges {
        *edges_by_label.entry(edge.label.clone()).or_default() += 1;
        total_edge_occurrences += u64::from(edge.occurrences);
    }

    GraphStats {
        total_nodes: graph.nodes.len(),
        total_edges: graph.edges.len(),
        total_edge_occurrences,
        nodes_by_type,
        items_by_type,
        sources_by_type,
        edges_by_label,
        workspaces: workspace_summaries(graph),
    }
}

/// Workspaces with their item counts, sorted by name then id.
#[must_use]
pub fn workspace_summaries(graph: &LineageGraph) -> Vec<WorkspaceSummary> {
    let mut counts: HashMap<&str, usize> = HashMap::default();
    for item in graph.nodes_of(NodeType::Item) {
        if let Some(parent) = &item.parent_id {
            *counts.entry(parent.as_str()).or_default() += 1;
        }
    }

    let mut out: Vec<WorkspaceSummary> = graph
        .nodes_of(NodeType::Workspace)
        .map(|ws| WorkspaceSummary {
            id: ws.id.clone(),
            name: ws.label.clone(),
            item_count: counts.get(ws.id.as_str()).copied().unwrap_or(0),
        })
        .collect();
    out.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));
    out
}
