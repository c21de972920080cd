use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use anyhow::{Context, Result};
use serde::Serialize;

use crate::model::LineageGraph;
use crate::stats::GraphStats;

#[derive(Serialize)]
struct Export<'a> {
    #[serde(flatten)]
    graph: &'a LineageGraph,
    stats: &'a GraphStats,
}

/// Writes `graph` and its `stats` to `path` as pretty-printed JSON.
pub fn export_graph_to_json(graph: &LineageGraph, stats: &GraphStats, path: &Path) -> Result<()> {
    let file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
    let mut out = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut out, &Export { graph, stats })
        .with_context(|| format!("writing {}", path.display()))?;
    out.write_all(b"\n")?;
    out.flush()
        .with_context(|| format!("flushing {}", path.display()))?;
    Ok(())
}
