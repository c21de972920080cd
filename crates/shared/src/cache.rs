use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,

    #[serde(default)]
    pub fingerprint: FingerprintMode,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_ttl_secs(),
            fingerprint: FingerprintMode::default(),
        }
    }
}

/// How a source file change is detected without re-parsing it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FingerprintMode {
    /// Modification time plus length.
    #[default]
    Mtime,
    /// SHA-256 of the file contents.
    Sha256,
}

const fn default_ttl_secs() -> u64 {
    5 * 60
}
