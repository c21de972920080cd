use std::fs::File;
use std::path::Path;

use ahash::AHashMap as HashMap;
use anyhow::{Context, Result};
use lineage_shared::columns::{ColumnMap, Placeholders};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::ResolveError;
use crate::ingest::{read_rows, Field, RawRow, RowSet};
use crate::model::{edge_id, Edge, LineageGraph, Metadata};
use crate::resolver::{plan, EntityResolver, Plan, Role};

/// Rows skipped during a build, by cause.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RowErrors {
    pub malformed: usize,
    pub unresolvable: usize,
}

impl RowErrors {
    #[must_use]
    pub const fn total(&self) -> usize {
        self.malformed + self.unresolvable
    }

    fn record(&mut self, err: &ResolveError) {
        match err {
            ResolveError::MalformedRow { .. } => self.malformed += 1,
            ResolveError::UnresolvableEndpoint { .. } => self.unresolvable += 1,
        }
    }
}

#[derive(Debug, Clone)]
pub struct BuildReport {
    pub graph: LineageGraph,
    pub rows_read: usize,
    pub row_errors: RowErrors,
}

pub struct GraphBuilder<'a> {
    placeholders: &'a Placeholders,
}

impl<'a> GraphBuilder<'a> {
    #[must_use]
    pub const fn new(placeholders: &'a Placeholders) -> Self {
        Self { placeholders }
    }

    /// Builds a graph from rows. Never fails: rows that cannot be used are
    /// skipped and counted in the report.
    pub fn build<'r, I>(&self, rows: I) -> BuildReport
    where
        I: IntoIterator<Item = &'r RawRow>,
    {
        let rows = rows.into_iter();
        let mut resolver = EntityResolver::with_capacity(rows.size_hint().0);
        let mut edges: Vec<Edge> = Vec::new();
        let mut edge_index: HashMap<(usize, usize, String), usize> = HashMap::default();
        let mut row_errors = RowErrors::default();
        let mut rows_read = 0;

        for row in rows {
            rows_read += 1;

            // both endpoints are planned before either is inserted, so a
            // skipped row leaves no nodes behind
            let (source, target) = match plan_row(row) {
                Ok(plans) => plans,
                Err(err) => {
                    debug!(target = "builder", error = %err, "skipping lineage row");
                    row_errors.record(&err);
                    continue;
                }
            };
            let (src, _) = resolver.commit(&source);
            let (dst, _) = resolver.commit(&target);

            let label = row.get_or(Field::SourceType, &self.placeholders.source_type);
            let shortcut = row.get_or(Field::ShortcutName, &self.placeholders.shortcut_name);

            match edge_index.get(&(src, dst, label.to_string())) {
                Some(&idx) => {
                    let edge = &mut edges[idx];
                    edge.occurrences += 1;
                    add_shortcut(&mut edge.metadata, shortcut);
                }
                None => {
                    let source_id = resolver.node(src).id.clone();
                    let target_id = resolver.node(dst).id.clone();
                    let mut metadata = Metadata::new();
                    add_shortcut(&mut metadata, shortcut);

                    edge_index.insert((src, dst, label.to_string()), edges.len());
                    edges.push(Edge {
                        id: edge_id(&source_id, &target_id, label),
                        source: source_id,
                        target: target_id,
                        label: label.to_string(),
                        occurrences: 1,
                        metadata,
                    });
                }
            }
        }

        if row_errors.total() > 0 {
            warn!(
                target = "builder",
                malformed = row_errors.malformed,
                unresolvable = row_errors.unresolvable,
                rows_read,
                "skipped lineage rows"
            );
        }

        BuildReport {
            graph: LineageGraph::new(resolver.into_nodes(), edges),
            rows_read,
            row_errors,
        }
    }

    /// Like [`build`](Self::build), also counting records the CSV reader rejected as malformed.
    pub fn build_rows(&self, set: &RowSet) -> BuildReport {
        let mut report = self.build(&set.rows);
        report.rows_read += set.undecodable;
        report.row_errors.malformed += set.undecodable;
        report
    }
}

fn plan_row(row: &RawRow) -> Result<(Plan<'_>, Plan<'_>), ResolveError> {
    let missing = row.missing_mandatory();
    if !missing.is_empty() {
        return Err(ResolveError::MalformedRow {
            line: row.line,
            missing,
        });
    }
    Ok((plan(row, Role::Source)?, plan(row, Role::Target)?))
}

fn add_shortcut(metadata: &mut Metadata, name: &str) {
    let names = metadata
        .entry("shortcutNames".to_string())
        .or_insert_with(|| Value::Array(Vec::new()));
    if let Value::Array(names) = names {
        if !names.iter().any(|n| n == name) {
            names.push(Value::from(name));
        }
    }
}

/// One-shot build straight from a CSV file, outside of any cache.
pub fn build_graph_from_csv(
    path: &Path,
    columns: &ColumnMap,
    placeholders: &Placeholders,
) -> Result<BuildReport> {
    let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    let set = read_rows(file, columns).with_context(|| format!("reading {}", path.display()))?;

    Ok(GraphBuilder::new(placeholders).build_rows(&set))
}
