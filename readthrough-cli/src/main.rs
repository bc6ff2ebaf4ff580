//! # readthrough CLI
//!
//! Page through a JSON data file via the read-through resource cache.

mod commands;
mod config;
mod source;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "readthrough")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(long, default_value = "readthrough.yml")]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Read a single page
    Page {
        /// Page number, starting at 1
        page: u64,

        /// Rows per page (defaults to the configured page size)
        #[arg(long)]
        size: Option<u64>,

        /// Query filter as key=value (repeatable)
        #[arg(short, long)]
        query: Vec<String>,

        /// Show per-row read status
        #[arg(long)]
        meta: bool,

        /// Return JSON for machine consumption
        #[arg(long)]
        json: bool,
    },

    /// Read every page and report cache statistics
    Scan {
        /// Rows per page (defaults to the configured page size)
        #[arg(long)]
        size: Option<u64>,

        /// Query filter as key=value (repeatable)
        #[arg(short, long)]
        query: Vec<String>,

        /// Return JSON for machine consumption
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr so JSON output stays parseable
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(if cli.verbose {
                tracing::Level::DEBUG.into()
            } else {
                tracing::Level::WARN.into()
            }),
        )
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command {
        Commands::Page {
            page,
            size,
            query,
            meta,
            json,
        } => {
            let opts = commands::PageOptions {
                page,
                size,
                query,
                meta,
                json,
            };
            commands::show_page(&cli.config, opts).await
        }
        Commands::Scan { size, query, json } => {
            commands::scan_pages(&cli.config, size, &query, json).await
        }
    }
}
