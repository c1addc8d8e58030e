//! Fuse Node Binary

use clap::{Parser, Subcommand};
use fuse_core::NodeConfig;
use fuse_node::{execute, NodeBuilder, StoreCommand};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "fuse-node")]
#[command(about = "Fuse Node - Versioned state store with snapshots and locks")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Data directory
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the node until Ctrl-C
    Run {
        /// Lock lifetime in milliseconds
        #[arg(long)]
        lock_timeout_ms: Option<u64>,

        /// Snapshot interval in milliseconds
        #[arg(long)]
        snapshot_interval_ms: Option<u64>,
    },

    #[command(flatten)]
    Store(StoreCommand),

    /// Print the effective configuration
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let file_config = match &cli.config {
        Some(path) => NodeConfig::from_file(path)?,
        None => NodeConfig::default(),
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&file_config.log_level)),
        )
        .with_target(false)
        .init();

    let mut builder = NodeBuilder::new().config(file_config);
    if let Some(dir) = cli.data_dir {
        builder = builder.data_dir(dir);
    }

    match cli.command {
        Commands::Run {
            lock_timeout_ms,
            snapshot_interval_ms,
        } => {
            if let Some(ms) = lock_timeout_ms {
                builder = builder.lock_timeout_ms(ms);
            }
            if let Some(ms) = snapshot_interval_ms {
                builder = builder.snapshot_interval_ms(ms);
            }
            builder.effective_config().state.validate()?;

            info!("Starting Fuse node...");
            let node = builder.build()?;
            node.start().await?;
        }

        Commands::Config => {
            println!("{}", serde_json::to_string_pretty(builder.effective_config())?);
        }

        Commands::Store(command) => {
            let node = builder.build()?;
            node.initialize().await?;
            let output = execute(&node, command).await?;
            if !output.is_empty() {
                println!("{}", output);
            }
        }
    }

    Ok(())
}
