use std::path::PathBuf;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use lineage_explorer::{load_config, Overrides};

mod oneshot;

#[derive(Parser, Debug)]
#[command(name = "lineage", version, about = "Fabric lineage graph tools")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Debug)]
struct SourceArgs {
    /// Path to YAML config
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Lineage CSV; skips the directory search
    #[arg(long, value_name = "FILE")]
    csv: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Serve the lineage API
    Serve {
        #[command(flatten)]
        source: SourceArgs,

        #[arg(long)]
        host: Option<String>,

        #[arg(long)]
        port: Option<u16>,
    },

    /// Build the graph once and optionally export it as JSON
    Build {
        #[command(flatten)]
        source: SourceArgs,

        /// Write graph and stats JSON here
        #[arg(long, value_name = "FILE")]
        out: Option<PathBuf>,
    },

    /// Print graph statistics
    Stats {
        #[command(flatten)]
        source: SourceArgs,

        #[arg(long, default_value_t = false)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { source, host, port } => {
            let overrides = Overrides {
                csv: source.csv,
                host,
                port,
            };
            let cfg = load_config(source.config.as_ref(), &overrides)?;
            lineage_explorer::run(cfg).await?
        }
        Commands::Build { source, out } => oneshot::build(oneshot::BuildOptions {
            config: source.config,
            overrides: Overrides {
                csv: source.csv,
                ..Overrides::default()
            },
            out,
        })?,
        Commands::Stats { source, json } => oneshot::stats(
            source.config,
            Overrides {
                csv: source.csv,
                ..Overrides::default()
            },
            json,
        )?,
    }

    Ok(())
}
