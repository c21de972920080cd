use std::net::SocketAddr;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_address")]
    pub bind_address: SocketAddr,

    /// Path prefix the API routes are mounted under. Empty mounts them at the root.
    #[serde(default = "default_api_prefix")]
    pub api_prefix: String,

    /// Where to expose Prometheus metrics. Disabled when unset.
    #[serde(default)]
    pub prometheus_bind: Option<SocketAddr>,

    /// Build the graph before accepting requests.
    #[serde(default = "default_preload")]
    pub preload: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            api_prefix: default_api_prefix(),
            prometheus_bind: None,
            preload: default_preload(),
        }
    }
}

fn default_bind_address() -> SocketAddr {
    "127.0.0.1:8000"
        .parse()
        .expect("default bind address should be valid")
}

fn default_api_prefix() -> String {
    "/api".to_string()
}

const fn default_preload() -> bool {
    true
}
