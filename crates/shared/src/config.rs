use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;

pub mod cache;
pub mod columns;
pub mod server;
pub mod source;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: server::ServerConfig,

    #[serde(default)]
    pub source: source::SourceConfig,

    #[serde(default)]
    pub cache: cache::CacheConfig,

    #[serde(default)]
    pub columns: columns::ColumnMap,

    #[serde(default)]
    pub placeholders: columns::Placeholders,
}

impl Config {
    pub fn from_file(path: &Path) -> Result<Self> {
        let bytes = fs::read(path).with_context(|| format!("reading {}", path.display()))?;
        let cfg = serde_yaml::from_slice(&bytes)
            .with_context(|| format!("parsing YAML {}", path.display()))?;

        Ok(cfg)
    }

    pub const fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache.ttl_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::FingerprintMode;
    use crate::source::Selection;

    #[test]
    fn empty_document_uses_defaults() {
        let cfg: Config = serde_yaml::from_str("{}").unwrap();

        assert_eq!(cfg.server.bind_address.port(), 8000);
        assert_eq!(cfg.server.api_prefix, "/api");
        assert!(cfg.source.path.is_none());
        assert_eq!(cfg.source.patterns[0], "mirrored_lineage_*.csv");
        assert_eq!(cfg.source.select, Selection::Largest);
        assert_eq!(cfg.cache_ttl(), Duration::from_secs(300));
        assert_eq!(cfg.cache.fingerprint, FingerprintMode::Mtime);
        assert_eq!(cfg.columns.item_type, "Item Type");
        assert_eq!(cfg.placeholders.shortcut_name, "N/A");
    }

    #[test]
    fn overrides_are_applied() {
        let yaml = r#"
server:
  bind_address: 0.0.0.0:9100
  api_prefix: ""
source:
  path: /data/lineage.csv
  select: newest
cache:
  ttl_secs: 30
  fingerprint: sha256
columns:
  item_type: ItemKind
placeholders:
  source_type: "(none)"
"#;
        let cfg: Config = serde_yaml::from_str(yaml).unwrap();

        assert_eq!(cfg.server.bind_address.port(), 9100);
        assert_eq!(cfg.server.api_prefix, "");
        assert_eq!(
            cfg.source.path.as_deref(),
            Some(Path::new("/data/lineage.csv"))
        );
        assert_eq!(cfg.source.select, Selection::Newest);
        assert_eq!(cfg.cache_ttl(), Duration::from_secs(30));
        assert_eq!(cfg.cache.fingerprint, FingerprintMode::Sha256);
        assert_eq!(cfg.columns.item_type, "ItemKind");
        assert_eq!(cfg.columns.item_name, "Item Name");
        assert_eq!(cfg.placeholders.source_type, "(none)");
    }
}
