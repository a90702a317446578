//! # KMP Indexer CLI (`kmpi`)
//!
//! ## Usage
//!
//! ```bash
//! kmpi --config ./config/kmpi.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `kmpi init` | Create the SQLite database and run schema migrations |
//! | `kmpi discover` | Queue KMP artifacts published since the last checkpoint |
//! | `kmpi versions <g:a>` | List every published version of one artifact |
//! | `kmpi refresh` | Queue versions missing from the package store |
//! | `kmpi drain` | Index queued requests |
//! | `kmpi enqueue <g:a:v>` | Queue one version by hand |
//! | `kmpi ban <group>` | Exclude a group or artifact from indexing |
//! | `kmpi stats` | Queue and index health |
//! | `kmpi worker` | Run discover, refresh, and drain on their intervals |

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use kmp_indexer::{commands, config, migrate, stats, telemetry};

/// KMP Indexer CLI: discovery and indexing of Kotlin Multiplatform
/// libraries on Maven repositories.
#[derive(Parser)]
#[command(
    name = "kmpi",
    about = "Discover and index Kotlin Multiplatform libraries published to Maven repositories",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/kmpi.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Safe to run repeatedly.
    Init,

    /// Queue KMP artifacts published since the stored checkpoint.
    Discover {
        /// Scan from this date instead of the checkpoint (YYYY-MM-DD or RFC 3339).
        #[arg(long)]
        since: Option<String>,
    },

    /// List every published version of one artifact.
    Versions {
        /// Coordinate as `group:artifact`.
        coordinate: String,

        /// Also queue every version found.
        #[arg(long)]
        enqueue: bool,
    },

    /// Queue versions listed in repository metadata but missing locally.
    Refresh,

    /// Claim and index queued requests.
    Drain {
        /// Maximum number of indexing attempts (default: queue.drain_batch_size).
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Queue a single version.
    Enqueue {
        /// Coordinate as `group:artifact:version`.
        gav: String,

        /// Index again even if the version is already indexed.
        #[arg(long)]
        reindex: bool,
    },

    /// Ban a whole group, or one artifact with `--artifact`.
    Ban {
        group: String,

        #[arg(long)]
        artifact: Option<String>,
    },

    /// Show queue and index statistics.
    Stats,

    /// Run all jobs on their configured intervals until Ctrl+C.
    Worker,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    telemetry::init_logging(&cfg.logging);
    telemetry::init_metrics(&cfg.metrics)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Discover { since } => {
            commands::run_discover(&cfg, since).await?;
        }
        Commands::Versions {
            coordinate,
            enqueue,
        } => {
            commands::run_versions(&cfg, &coordinate, enqueue).await?;
        }
        Commands::Refresh => {
            commands::run_refresh(&cfg).await?;
        }
        Commands::Drain { limit } => {
            commands::run_drain(&cfg, limit).await?;
        }
        Commands::Enqueue { gav, reindex } => {
            commands::run_enqueue(&cfg, &gav, reindex).await?;
        }
        Commands::Ban { group, artifact } => {
            commands::run_ban(&cfg, &group, artifact).await?;
        }
        Commands::Stats => {
            stats::run_stats(&cfg).await?;
        }
        Commands::Worker => {
            commands::run_worker(&cfg).await?;
        }
    }

    Ok(())
}
