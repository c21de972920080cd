use thiserror::Error;

use crate::ingest::Field;
use crate::resolver::Role;

/// Per-row failures. The row is skipped and counted; the build continues.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveError {
    #[error("row {line}: {role:?} endpoint has no workspace, item or connection to key on")]
    UnresolvableEndpoint { line: usize, role: Role },

    #[error("row {line}: missing mandatory column(s) {missing:?}")]
    MalformedRow { line: usize, missing: Vec<Field> },
}

/// Failures of a whole build, surfaced to callers of the graph cache.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CacheError {
    #[error("no lineage source file found: {0}")]
    SourceUnavailable(String),

    #[error("failed to build lineage graph: {0}")]
    BuildFailure(String),
}

impl CacheError {
    #[must_use]
    pub const fn is_source_unavailable(&self) -> bool {
        matches!(self, CacheError::SourceUnavailable(_))
    }
}
