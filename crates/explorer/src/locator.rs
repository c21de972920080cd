use std::fmt::Debug;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use lineage_shared::source::{Selection, SourceConfig};

use crate::error::CacheError;

/// Tells the graph cache which file to build from.
pub trait SourceLocator: Send + Sync + Debug {
    fn locate(&self) -> Result<PathBuf, CacheError>;
}

#[derive(Debug, Clone)]
pub struct FixedPath(pub PathBuf);

impl SourceLocator for FixedPath {
    fn locate(&self) -> Result<PathBuf, CacheError> {
        if self.0.is_file() {
            Ok(self.0.clone())
        } else {
            Err(CacheError::SourceUnavailable(format!(
                "{} does not exist",
                self.0.display()
            )))
        }
    }
}

/// Searches directories for the lineage export. Patterns are tried in order
/// across all directories; the first pattern with any match decides.
#[derive(Debug, Clone)]
pub struct SearchDirs {
    pub dirs: Vec<PathBuf>,
    pub patterns: Vec<String>,
    pub select: Selection,
}

impl SourceLocator for SearchDirs {
    fn locate(&self) -> Result<PathBuf, CacheError> {
        for dir in self.dirs.iter().filter(|d| d.is_dir()) {
            for pattern in &self.patterns {
                let candidates = matches(dir, pattern);
                if let Some(best) = pick(candidates, self.select) {
                    return Ok(best);
                }
            }
        }

        Err(CacheError::SourceUnavailable(format!(
            "no lineage CSV found in {:?}",
            self.dirs
        )))
    }
}

fn matches(dir: &Path, pattern: &str) -> Vec<(PathBuf, fs::Metadata)> {
    let full = dir.join(pattern);
    let Some(full) = full.to_str() else {
        return Vec::new();
    };
    let Ok(paths) = glob::glob(full) else {
        tracing::warn!(target = "locator", pattern, "invalid source pattern");
        return Vec::new();
    };

    paths
        .filter_map(Result::ok)
        .filter_map(|p| {
            let meta = fs::metadata(&p).ok()?;
            meta.is_file().then_some((p, meta))
        })
        .collect()
}

fn pick(candidates: Vec<(PathBuf, fs::Metadata)>, select: Selection) -> Option<PathBuf> {
    let best = match select {
        Selection::Largest => candidates
            .into_iter()
            .max_by(|(pa, a), (pb, b)| a.len().cmp(&b.len()).then_with(|| pa.cmp(pb))),
        Selection::Newest => candidates.into_iter().max_by(|(pa, a), (pb, b)| {
            let ma = a.modified().unwrap_or(SystemTime::UNIX_EPOCH);
            let mb = b.modified().unwrap_or(SystemTime::UNIX_EPOCH);
            ma.cmp(&mb).then_with(|| pa.cmp(pb))
        }),
    };
    best.map(|(p, _)| p)
}

/// Explicit path when configured, directory search otherwise.
#[must_use]
pub fn from_config(cfg: &SourceConfig) -> Box<dyn SourceLocator> {
    match &cfg.path {
        Some(path) => Box::new(FixedPath(path.clone())),
        None => Box::new(SearchDirs {
            dirs: cfg.search_dirs.clone(),
            patterns: cfg.patterns.clone(),
            select: cfg.select,
        }),
    }
}
