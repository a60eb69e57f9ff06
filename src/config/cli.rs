use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Clone, Parser)]
#[command(name = "signal-harvest")]
#[command(about = "Aggregate, deduplicate and enrich multilingual news signals")]
#[command(version)]
pub struct Cli {
    /// TOML 設定檔
    #[arg(short, long, global = true, default_value = "harvest.toml")]
    pub config: PathBuf,

    #[arg(short, long, global = true, help = "Enable verbose output")]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Run one aggregation pass over every enabled feed
    Aggregate,

    /// Fill missing language bodies for incomplete signals
    Enrich {
        #[arg(long, help = "Maximum signals to process (defaults to enrichment.default_batch_limit)")]
        limit: Option<usize>,
    },

    /// Enrich one signal by its source identifier, ignoring the retry ceiling
    EnrichOne {
        id: String,
    },

    /// Run a single outlet scraper
    Outlet {
        name: String,
    },

    /// Run every enabled outlet scraper, or list them with --list
    Outlets {
        #[arg(long)]
        list: bool,
    },

    /// Print processing and scraping statistics
    Stats,

    /// Export signals to CSV (one row per signal and language)
    Export {
        #[arg(short, long, default_value = "signals.csv")]
        output: PathBuf,
    },
}
