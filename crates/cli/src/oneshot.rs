use std::fmt::Write as _;
use std::path::PathBuf;

use anyhow::{Context, Result};
use lineage_explorer::builder::{build_graph_from_csv, BuildReport};
use lineage_explorer::export::export_graph_to_json;
use lineage_explorer::locator;
use lineage_explorer::stats::{compute_stats, GraphStats};
use lineage_explorer::{load_config, Overrides};
use tracing::{info, warn};

#[derive(Debug)]
pub struct BuildOptions {
    pub config: Option<PathBuf>,
    pub overrides: Overrides,
    pub out: Option<PathBuf>,
}

pub fn build(opts: BuildOptions) -> Result<()> {
    let report = load_and_build(opts.config.as_ref(), &opts.overrides)?;
    let stats = compute_stats(&report.graph);

    if let Some(out) = &opts.out {
        export_graph_to_json(&report.graph, &stats, out)?;
        info!(path = %out.display(), "graph exported");
    }

    println!(
        "{} items, {} connections ({} rows read, {} skipped)",
        report.graph.total_items,
        report.graph.total_connections,
        report.rows_read,
        report.row_errors.total()
    );
    Ok(())
}

pub fn stats(config: Option<PathBuf>, overrides: Overrides, json: bool) -> Result<()> {
    let report = load_and_build(config.as_ref(), &overrides)?;
    let stats = compute_stats(&report.graph);

    if json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
    } else {
        print!("{}", render_stats(&stats));
    }
    Ok(())
}

fn load_and_build(config: Option<&PathBuf>, overrides: &Overrides) -> Result<BuildReport> {
    let cfg = load_config(config, overrides)?;
    let path = locator::from_config(&cfg.source)
        .locate()
        .context("locating lineage CSV")?;
    info!(path = %path.display(), "building lineage graph");

    let report = build_graph_from_csv(&path, &cfg.columns, &cfg.placeholders)?;
    if report.row_errors.total() > 0 {
        warn!(
            malformed = report.row_errors.malformed,
            unresolvable = report.row_errors.unresolvable,
            "some rows were skipped"
        );
    }
    Ok(report)
}

fn render_stats(stats: &GraphStats) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "nodes: {}  edges: {}  edge occurrences: {}",
        stats.total_nodes, stats.total_edges, stats.total_edge_occurrences
    );

    for (title, counts) in [
        ("nodes by type", &stats.nodes_by_type),
        ("items by type", &stats.items_by_type),
        ("sources by type", &stats.sources_by_type),
        ("edges by label", &stats.edges_by_label),
    ] {
        let _ = writeln!(out, "\n{title}:");
        for (key, n) in counts {
            let _ = writeln!(out, "  {key:<24} {n}");
        }
    }

    let _ = writeln!(out, "\nworkspaces:");
    for ws in &stats.workspaces {
        let _ = writeln!(out, "  {:<24} {}", ws.name, ws.item_count);
    }
    out
}
