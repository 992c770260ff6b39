//! tillsync CLI
//!
//! Command-line tools for synchronizing a till's local store with the
//! server store.
//!
//! # Commands
//!
//! - `sync` - Run a sync (upload, download, or both)
//! - `pending` - Show records waiting to upload
//! - `history` - Show recent sync runs
//! - `cleanup` - Drop old history entries
//! - `conflicts` - List conflicts waiting for a decision
//! - `resolve` - Apply a decision to a conflict
//! - `check` - Test the server connection
//! - `watch` - Sync on a timer until interrupted
//! - `seed` - Record sample sales in the client store

mod catalog;
mod commands;
mod workspace;

use clap::{Parser, Subcommand};
use commands::sync::Direction;
use commands::Format;
use std::path::PathBuf;
use std::time::Duration;
use tillsync_protocol::{ConflictResolution, ConflictResolutionStrategy};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;
use workspace::Workspace;

/// Offline-first sync tools for a point-of-sale till.
#[derive(Parser)]
#[command(name = "tillsync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Directory holding the client store, history and sync.json
    #[arg(global = true, short, long, default_value = "tillsync-data")]
    data_dir: PathBuf,

    /// Server store file (defaults to server.json in the data directory)
    #[arg(global = true, long)]
    server: Option<PathBuf>,

    /// Configuration file (defaults to sync.json in the data directory)
    #[arg(global = true, short, long)]
    config: Option<PathBuf>,

    /// Override the conflict strategy
    #[arg(global = true, long)]
    strategy: Option<ConflictResolutionStrategy>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a sync
    Sync {
        /// Direction (defaults to the configured mode)
        #[arg(value_enum)]
        direction: Option<Direction>,

        /// Output format
        #[arg(short, long, value_enum, default_value_t = Format::Text)]
        format: Format,
    },

    /// Show records waiting to upload
    Pending {
        /// Output format
        #[arg(short, long, value_enum, default_value_t = Format::Text)]
        format: Format,
    },

    /// Show recent sync runs, newest first
    History {
        /// Maximum number of runs to show
        #[arg(short = 'n', long, default_value = "20")]
        count: usize,

        /// Output format
        #[arg(short, long, value_enum, default_value_t = Format::Text)]
        format: Format,
    },

    /// Drop history entries older than the given number of days
    Cleanup {
        /// Days of history to keep
        #[arg(long, default_value = "30")]
        keep_days: u32,
    },

    /// List conflicts waiting for a decision
    Conflicts {
        /// Output format
        #[arg(short, long, value_enum, default_value_t = Format::Text)]
        format: Format,
    },

    /// Apply a decision to a conflict
    Resolve {
        /// Conflict id as shown by `conflicts`
        id: Uuid,

        /// local, remote, merge or skip
        resolution: ConflictResolution,
    },

    /// Test the server connection
    Check,

    /// Sync on a timer until Ctrl-C
    Watch {
        /// Seconds between runs (defaults to AutoSyncIntervalMinutes)
        #[arg(short, long)]
        interval: Option<u64>,
    },

    /// Record sample sales in the client store
    Seed {
        /// Number of sales
        #[arg(short = 'n', long, default_value = "1")]
        count: u32,
    },

    /// Show version information
    Version,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let workspace = Workspace::new(&cli.data_dir, cli.server.clone());
    let mut config = workspace.load_config(cli.config.as_deref()).await?;
    if let Some(strategy) = cli.strategy {
        config.conflict_resolution = strategy;
    }

    match cli.command {
        Commands::Sync { direction, format } => {
            let orchestrator = workspace.orchestrator(config).await?;
            commands::sync::run(&orchestrator, direction, format).await?;
        }
        Commands::Pending { format } => {
            let orchestrator = workspace.orchestrator(config).await?;
            commands::pending::run(&orchestrator, format).await?;
        }
        Commands::History { count, format } => {
            let orchestrator = workspace.orchestrator(config).await?;
            commands::history::run(&orchestrator, count, format).await?;
        }
        Commands::Cleanup { keep_days } => {
            let orchestrator = workspace.orchestrator(config).await?;
            commands::cleanup::run(&orchestrator, keep_days).await?;
        }
        Commands::Conflicts { format } => {
            let orchestrator = workspace.orchestrator(config).await?;
            commands::conflicts::run(&orchestrator, format).await?;
        }
        Commands::Resolve { id, resolution } => {
            let orchestrator = workspace.orchestrator(config).await?;
            commands::resolve::run(&orchestrator, id, resolution).await?;
        }
        Commands::Check => {
            let orchestrator = workspace.orchestrator(config).await?;
            commands::check::run(&orchestrator).await?;
        }
        Commands::Watch { interval } => {
            config.enable_auto_sync = true;
            let orchestrator = workspace.orchestrator(config).await?;
            commands::watch::run(orchestrator, interval.map(Duration::from_secs)).await?;
        }
        Commands::Seed { count } => {
            let client = workspace.client().await?;
            commands::seed::run(&client, count).await?;
        }
        Commands::Version => {
            println!("tillsync CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("data directory: {}", workspace.dir().display());
        }
    }

    Ok(())
}
