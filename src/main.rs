//! # Sewer Query CLI (`sewerq`)
//!
//! The `sewerq` binary loads sewer-inspection shards, samples them, and
//! answers natural-language questions about the sample, either once on the
//! command line or over HTTP.
//!
//! ## Usage
//!
//! ```bash
//! sewerq --config ./config/sewerq.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `sewerq load` | Ingest all shards and print a summary |
//! | `sewerq sample` | Ingest, sample, and print the sampled rows |
//! | `sewerq ask "<query>"` | Answer one question and exit |
//! | `sewerq serve` | Start the HTTP query service |
//!
//! ## Examples
//!
//! ```bash
//! # Check that every shard loads
//! sewerq load --config ./config/sewerq.toml
//!
//! # Draw exactly 20 rows with the configured seed
//! sewerq sample --n 20
//!
//! # Ask a question against a local Ollama
//! sewerq ask "Which city had the most inspections?"
//!
//! # Serve the React front-end's backend
//! RUST_LOG=sewer_query=debug sewerq serve
//! ```

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use sewer_query::progress::ProgressMode;
use sewer_query::{config, context, ingest, sample, server};

/// Sewer Query CLI: natural-language questions over sewer-inspection data.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/sewerq.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "sewerq",
    about = "Sewer Query: natural-language questions over sewer-inspection data",
    version,
    long_about = "Sewer Query loads sewer-inspection JSON-lines shards (fetching missing ones from \
    a remote store), draws a reproducible sample, and answers natural-language questions about it \
    with an LLM-backed table agent, on the command line or over HTTP."
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/sewerq.toml`. When the default file does not
    /// exist, built-in defaults are used.
    #[arg(long, global = true, default_value = DEFAULT_CONFIG)]
    config: PathBuf,

    /// Ingest progress on stderr: off, human, or json.
    ///
    /// Defaults to human when stderr is a terminal, otherwise off.
    #[arg(long, global = true, value_enum)]
    progress: Option<ProgressMode>,

    /// Log at debug level (overridden by `RUST_LOG`).
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

const DEFAULT_CONFIG: &str = "./config/sewerq.toml";

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Ingest all shards and print a summary.
    ///
    /// Missing shards are fetched from `[data].remote_base_url` when set,
    /// otherwise skipped. A malformed line in any present shard fails the
    /// command.
    Load {
        /// Number of leading rows to print after the summary.
        #[arg(long, default_value_t = 5)]
        head: usize,
    },

    /// Ingest, sample, and print the sampled rows as JSON lines.
    ///
    /// Uses `[sampling].fraction` and `[sampling].seed`, so repeated runs
    /// print the same rows.
    Sample {
        /// Draw exactly this many rows instead of the configured fraction.
        #[arg(long)]
        n: Option<usize>,
    },

    /// Answer one natural-language query and exit.
    Ask {
        /// The question to ask about the sampled table.
        query: String,
    },

    /// Start the HTTP query service.
    ///
    /// Binds to `[server].bind` and serves `POST /query`.
    Serve,
}

fn init_tracing(verbose: bool) {
    let default = if verbose {
        "sewer_query=debug"
    } else {
        "sewer_query=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    // Only the implicit default path may be absent
    let cfg = if !cli.config.exists() && cli.config == PathBuf::from(DEFAULT_CONFIG) {
        tracing::debug!("no config at {}, using defaults", DEFAULT_CONFIG);
        config::Config::minimal()
    } else {
        config::load_config(&cli.config)?
    };

    let progress = cli
        .progress
        .unwrap_or_else(ProgressMode::default_for_tty)
        .reporter();

    match cli.command {
        Commands::Load { head } => {
            ingest::run_load(&cfg, progress.as_ref(), head).await?;
        }
        Commands::Sample { n } => {
            sample::run_sample(&cfg, progress.as_ref(), n).await?;
        }
        Commands::Ask { query } => {
            context::run_ask(&cfg, progress.as_ref(), &query).await?;
        }
        Commands::Serve => {
            server::run_server(&cfg, progress.as_ref()).await?;
        }
    }

    Ok(())
}
