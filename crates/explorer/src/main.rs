use anyhow::Result;
use clap::Parser;
use lineage_explorer::{load_config, run, Overrides};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(version, about = "Serve the Fabric lineage graph over HTTP")]
struct Args {
    /// Path to YAML config
    #[arg(long)]
    config: Option<PathBuf>,

    /// Lineage CSV to serve instead of searching for one
    #[arg(long)]
    csv: Option<PathBuf>,

    #[arg(long)]
    host: Option<String>,

    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let (nb, _guard) = tracing_appender::non_blocking(std::io::stderr());
    tracing_subscriber::fmt()
        .with_writer(nb)
        .with_env_filter(filter)
        .init();

    let args = Args::parse();
    let overrides = Overrides {
        csv: args.csv,
        host: args.host,
        port: args.port,
    };
    let cfg = load_config(args.config.as_ref(), &overrides)?;

    run(cfg).await
}
