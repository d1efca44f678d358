//! # Adesua CLI (`adesua`)
//!
//! The `adesua` binary drives the content service: database initialization,
//! bulk dictionary population, and the JSON HTTP server.
//!
//! ## Usage
//!
//! ```bash
//! adesua --config ./config/adesua.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `adesua init` | Create the SQLite database and run schema migrations |
//! | `adesua populate` | Bulk-generate unique dictionary entries |
//! | `adesua serve` | Start the JSON HTTP server |

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use adesua::config;
use adesua::db;
use adesua::generator;
use adesua::migrate;
use adesua::populate::GenerationEngine;
use adesua::server;
use adesua::store;

/// Adesua — an AI-assisted content and learning backend for the Akan (Twi)
/// language.
#[derive(Parser)]
#[command(
    name = "adesua",
    about = "Adesua — AI-assisted content backend for the Akan (Twi) language",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/adesua.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file and all required tables. This command
    /// is idempotent — running it multiple times is safe.
    Init,

    /// Bulk-generate dictionary entries.
    ///
    /// Runs the generation loop until the requested number of unique entries
    /// is accepted or the attempt cap is hit, then persists the batch.
    /// Ctrl-C stops the run between iterations and keeps the partial batch.
    Populate {
        /// Number of unique entries to accept (defaults to
        /// `content.populate_count` from the config).
        #[arg(long)]
        count: Option<usize>,
    },

    /// Start the JSON HTTP server.
    Serve,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&config).await?;
            println!("Initialized database at {}", config.db.path.display());
        }
        Commands::Populate { count } => {
            run_populate(&config, count).await?;
        }
        Commands::Serve => {
            server::run_server(&config).await?;
        }
    }

    Ok(())
}

async fn run_populate(config: &config::Config, count: Option<usize>) -> anyhow::Result<()> {
    let provider = generator::create_provider(&config.generation)?;
    let pool = db::connect(config).await?;
    let engine = GenerationEngine::new(config, provider);

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        });
    }

    let count = count.unwrap_or(config.content.populate_count);
    let outcome = engine.populate_dictionary(&pool, count, &cancel).await?;
    let total = store::entry_count(&pool).await?;

    println!("populate dictionary");
    println!("  requested: {}", outcome.requested);
    println!("  inserted: {}", outcome.accepted.len());
    println!("  attempts: {}", outcome.attempts);
    println!("  duplicates skipped: {}", outcome.duplicates);
    println!("  parse failures skipped: {}", outcome.parse_failures);
    println!("  entries in store: {}", total);
    println!(
        "  quota remaining: {}/{} (resets in {}s)",
        outcome.quota.remaining,
        outcome.quota.limit,
        outcome.quota.reset_in.as_secs()
    );
    println!("ok");

    pool.close().await;
    Ok(())
}
