//! shardlet CLI
//!
//! Plans device assignments and launches one worker process per device set.

mod commands;

use clap::{Parser, Subcommand};
use shardlet_core::ServingConfig;
use std::path::PathBuf;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

/// shardlet - device-partitioned worker pool for batched inference
#[derive(Parser, Debug)]
#[command(name = "shardlet")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Serving configuration file (TOML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log level (overrides the configuration file)
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Number of workers (overrides the configuration file)
    #[arg(long, global = true)]
    workers: Option<u32>,

    /// Devices per worker (overrides the configuration file)
    #[arg(long, global = true)]
    devices_per_worker: Option<u32>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Show the device set each worker would receive
    Plan,

    /// Show devices detected on this host
    Devices {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Launch one worker process per assigned device set
    Launch {
        /// Worker executable
        #[arg(long)]
        program: PathBuf,

        /// Arguments passed to every worker
        #[arg(last = true)]
        args: Vec<String>,
    },
}

fn parse_level(level: &str) -> Level {
    match level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    }
}

fn load_config(cli: &Cli) -> anyhow::Result<ServingConfig> {
    let mut config = match &cli.config {
        Some(path) => ServingConfig::from_file(path)?,
        None => ServingConfig::default(),
    };

    if let Some(workers) = cli.workers {
        config.pool.worker_count = workers;
    }
    if let Some(per_worker) = cli.devices_per_worker {
        config.pool.devices_per_worker = per_worker;
    }
    if let Some(level) = &cli.log_level {
        config.logging.level = level.clone();
    }

    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli)?;

    // Initialize logging
    let subscriber = FmtSubscriber::builder()
        .with_max_level(parse_level(&config.logging.level))
        .with_target(false)
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);

    match cli.command {
        Commands::Plan => {
            commands::plan(&config)?;
        }
        Commands::Devices { json } => {
            commands::devices(&config, json)?;
        }
        Commands::Launch { program, args } => {
            commands::launch(&config, program, args).await?;
        }
    }

    Ok(())
}
