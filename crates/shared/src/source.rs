use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Where the lineage CSV comes from. An explicit `path` wins over the search.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    #[serde(default)]
    pub path: Option<PathBuf>,

    #[serde(default = "default_search_dirs")]
    pub search_dirs: Vec<PathBuf>,

    /// File-name globs tried in order; the first pattern with matches wins.
    #[serde(default = "default_patterns")]
    pub patterns: Vec<String>,

    #[serde(default)]
    pub select: Selection,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            path: None,
            search_dirs: default_search_dirs(),
            patterns: default_patterns(),
            select: Selection::default(),
        }
    }
}

/// Tie-break between several matching files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Selection {
    /// Real exports are larger than test fixtures.
    #[default]
    Largest,
    Newest,
}

fn default_search_dirs() -> Vec<PathBuf> {
    vec!["exports/lineage".into()]
}

fn default_patterns() -> Vec<String> {
    vec!["mirrored_lineage_*.csv".to_string(), "*.csv".to_string()]
}
