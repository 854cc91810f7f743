//! # VendorIQ CLI (`viq`)
//!
//! The `viq` binary is the primary interface for VendorIQ. It provides
//! commands for database initialization, vendor knowledge ingestion,
//! question answering, spend analytics, and starting the HTTP server.
//!
//! ## Usage
//!
//! ```bash
//! viq --config ./config/viq.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `viq init` | Create the SQLite database and run schema migrations |
//! | `viq load` | Ingest vendor records, chunk, embed, and index them |
//! | `viq ask "<question>"` | Answer a question with ranked sources |
//! | `viq analytics` | Spend insights, trends, and a narrative summary |
//! | `viq stats` | Vector store size summary |
//! | `viq reset` | Delete all indexed knowledge |
//! | `viq serve` | Start the JSON HTTP server |

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use vendoriq::config;
use vendoriq::db;
use vendoriq::engine::{Engine, LoadSource};
use vendoriq::migrate;
use vendoriq::server;

/// VendorIQ CLI — vendor invoice knowledge retrieval and answer synthesis.
#[derive(Parser)]
#[command(
    name = "viq",
    about = "VendorIQ — vendor invoice knowledge retrieval and answer synthesis engine",
    version,
    long_about = "VendorIQ ingests vendor invoice records, embeds them into a SQLite-backed \
    vector store, and answers natural-language questions about vendor spend with ranked source \
    attribution, spend analytics, and a JSON HTTP server."
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/viq.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file and the chunks table. This command
    /// is idempotent — running it multiple times is safe.
    Init,

    /// Ingest vendor records: load, chunk, embed, and index.
    ///
    /// Reads vendor JSON files from `[data].vendor_dir` (or the remote
    /// record store with `--source remote`), builds summary and invoice
    /// chunks, embeds them, and upserts them into the vector store.
    Load {
        /// Skip chunks whose content-derived ids are already indexed.
        #[arg(long)]
        incremental: bool,

        /// Record source: `local` (JSON directory) or `remote` (HTTP API).
        #[arg(long, default_value = "local")]
        source: String,
    },

    /// Answer a question about vendor spend.
    ///
    /// Routes the question by intent: spend rankings and exhaustive invoice
    /// listings are answered deterministically from stored metadata; other
    /// questions go through retrieval and LLM synthesis.
    Ask {
        /// The question to answer.
        question: String,

        /// Pin the answer to one vendor (or `ALL` to force aggregate scope).
        #[arg(long)]
        vendor: Option<String>,

        /// Number of retrieved sources (capped by `[retrieval].max_k`).
        #[arg(long)]
        k: Option<usize>,
    },

    /// Spend analytics over the indexed corpus.
    Analytics {
        /// Trend window: `month`, `quarter`, `year`, or `all`.
        #[arg(long, default_value = "all")]
        period: String,
    },

    /// Vector store size summary.
    Stats,

    /// Delete all indexed vendor knowledge.
    Reset,

    /// Start the JSON HTTP server on `[server].bind`.
    Serve,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            let pool = db::connect(&cfg.db.path).await?;
            migrate::run_migrations(&pool).await?;
            println!("Database initialized successfully.");
        }
        Commands::Load {
            incremental,
            source,
        } => {
            let source = match source.as_str() {
                "local" => LoadSource::Local,
                "remote" => LoadSource::Remote,
                other => anyhow::bail!("Unknown source '{}': must be local or remote", other),
            };
            let engine = Engine::new(cfg).await?;
            let outcome = engine.load(incremental, source).await;
            println!("{}", serde_json::to_string_pretty(&outcome)?);
            if !outcome.success {
                std::process::exit(1);
            }
        }
        Commands::Ask {
            question,
            vendor,
            k,
        } => {
            let engine = Engine::new(cfg).await?;
            let outcome = engine.answer(&question, vendor.as_deref(), k).await;
            println!("{}", serde_json::to_string_pretty(&outcome)?);
            if !outcome.success {
                std::process::exit(1);
            }
        }
        Commands::Analytics { period } => {
            let engine = Engine::new(cfg).await?;
            let report = engine.analytics(&period).await;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Commands::Stats => {
            let engine = Engine::new(cfg).await?;
            let stats = engine.stats().await;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
        Commands::Reset => {
            let engine = Engine::new(cfg).await?;
            let outcome = engine.reset().await;
            println!("{}", serde_json::to_string_pretty(&outcome)?);
            if !outcome.success {
                std::process::exit(1);
            }
        }
        Commands::Serve => {
            let engine = Engine::new(cfg).await?;
            server::run_server(engine).await?;
        }
    }

    Ok(())
}
