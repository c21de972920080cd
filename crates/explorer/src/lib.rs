use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, register_int_gauge,
    Histogram, IntCounter, IntCounterVec, IntGauge,
};
use tracing::{info, warn};

use lineage_shared::Config;

use crate::cache::GraphCache;

pub mod builder;
pub mod cache;
pub mod connection;
pub mod error;
pub mod export;
pub mod ingest;
pub mod locator;
pub mod model;
pub mod resolver;
pub mod server;
pub mod stats;

lazy_static::lazy_static! {
    pub static ref GRAPH_BUILDS_TOTAL: IntCounter =
        register_int_counter!("lineage_graph_builds_total", "Successful lineage graph builds").unwrap();

    pub static ref GRAPH_BUILD_FAILURES_TOTAL: IntCounter =
        register_int_counter!("lineage_graph_build_failures_total", "Failed lineage graph builds").unwrap();

    pub static ref GRAPH_BUILD_SECONDS: Histogram = register_histogram!(
        "lineage_graph_build_seconds",
        "Lineage graph build latency (sec)",
        vec![0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]
    ).unwrap();

    pub static ref ROWS_SKIPPED_TOTAL: IntCounterVec = register_int_counter_vec!(
        "lineage_rows_skipped_total",
        "Lineage rows skipped during builds",
        &["reason"]
    ).unwrap();

    pub static ref CACHE_HITS_TOTAL: IntCounter =
        register_int_counter!("lineage_cache_hits_total", "Graph requests served from cache").unwrap();

    pub static ref GRAPH_NODES: IntGauge =
        register_int_gauge!("lineage_graph_nodes", "Nodes in the published graph").unwrap();
}

/// Command-line values that take precedence over the config file.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub csv: Option<PathBuf>,
    pub host: Option<String>,
    pub port: Option<u16>,
}

impl Overrides {
    pub fn apply(&self, cfg: &mut Config) -> Result<()> {
        if let Some(csv) = &self.csv {
            cfg.source.path = Some(csv.clone());
        }
        if let Some(host) = &self.host {
            let ip = host
                .parse()
                .with_context(|| format!("invalid host address {host:?}"))?;
            cfg.server.bind_address.set_ip(ip);
        }
        if let Some(port) = self.port {
            cfg.server.bind_address.set_port(port);
        }
        Ok(())
    }
}

/// Loads `path` when given, defaults otherwise, then applies `overrides`.
pub fn load_config(path: Option<&PathBuf>, overrides: &Overrides) -> Result<Config> {
    let mut cfg = match path {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    };
    overrides.apply(&mut cfg)?;
    Ok(cfg)
}

/// Serves the lineage API until ctrl-c or SIGTERM.
pub async fn run(cfg: Config) -> Result<()> {
    let _exporter_guard = cfg
        .server
        .prometheus_bind
        .map(|addr: SocketAddr| {
            prometheus_exporter::start(addr)
                .with_context(|| format!("starting prometheus exporter on {addr}"))
        })
        .transpose()?;

    tracing::info!(target = "startup", config = ?cfg);

    let cache = Arc::new(GraphCache::from_config(&cfg));

    if cfg.server.preload {
        match cache.get(false).await {
            Ok(entry) => info!(
                target = "startup",
                items = entry.graph.total_items,
                edges = entry.graph.total_connections,
                "lineage graph preloaded"
            ),
            Err(e) => warn!(target = "startup", error = %e, "preload failed; serving anyway"),
        }
    }

    let app = server::router(Arc::clone(&cache), &cfg.server.api_prefix);
    let listener = tokio::net::TcpListener::bind(cfg.server.bind_address)
        .await
        .with_context(|| format!("binding {}", cfg.server.bind_address))?;
    info!(
        target = "startup",
        addr = %cfg.server.bind_address,
        prefix = %cfg.server.api_prefix,
        "lineage explorer listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = wait_for_shutdown_signal().await {
                warn!(error = %e, "failed to install signal handlers");
            }
            info!("received shutdown signal...");
        })
        .await
        .context("serving HTTP")?;

    Ok(())
}

pub async fn wait_for_shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal;
        use tokio::signal::unix::{signal as unix_signal, SignalKind};
        let mut term = unix_signal(SignalKind::terminate())?;
        tokio::select! {
            _ = signal::ctrl_c() => {},
            _ = term.recv() => {},
        }
        Ok(())
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        Ok(())
    }
}
