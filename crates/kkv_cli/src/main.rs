//! kkv CLI
//!
//! Command-line tools for kkvdb built segments.
//!
//! # Commands
//!
//! - `inspect` - Display segment footers and key counts
//! - `verify` - Check every chunk checksum
//! - `get` - Look up the values of a pkey across all segments

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// kkvdb segment tools.
#[derive(Parser)]
#[command(name = "kkv")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to a segment directory or an index directory of segments
    #[arg(global = true, short, long)]
    path: Option<PathBuf>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Display segment metadata
    Inspect {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Read every chunk and check its checksum
    Verify,

    /// Look up the values of a pkey
    Get {
        /// Primary key hash
        #[arg(long)]
        pkey: u64,

        /// Wanted skey (repeatable; all skeys if omitted)
        #[arg(long = "skey")]
        skeys: Vec<u64>,

        /// Time-to-live in seconds
        #[arg(long)]
        ttl: Option<u64>,

        /// Query time in seconds (defaults to the current time)
        #[arg(long)]
        now: Option<u64>,

        /// Maximum number of rows
        #[arg(short, long)]
        quota: Option<usize>,

        /// Rows per batch
        #[arg(short, long)]
        batch: Option<usize>,

        /// Read segments in parallel tasks
        #[arg(short, long)]
        concurrent: bool,

        /// Keep segment order instead of skey order
        #[arg(long)]
        keep_sort_order: bool,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Inspect { format } => {
            let path = cli.path.ok_or("Segment path required for inspect")?;
            commands::inspect::run(&path, &format)?;
        }
        Commands::Verify => {
            let path = cli.path.ok_or("Segment path required for verify")?;
            commands::verify::run(&path)?;
        }
        Commands::Get {
            pkey,
            skeys,
            ttl,
            now,
            quota,
            batch,
            concurrent,
            keep_sort_order,
            format,
        } => {
            let path = cli.path.ok_or("Index path required for get")?;
            let options = commands::get::GetOptions {
                pkey,
                skeys,
                ttl,
                now,
                quota,
                batch,
                concurrent,
                keep_sort_order,
            };
            commands::get::run(&path, &options, &format)?;
        }
        Commands::Version => {
            println!("kkv CLI v{}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}
