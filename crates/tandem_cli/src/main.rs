//! Tandem CLI
//!
//! Command-line tools for operating tandem replication.
//!
//! # Commands
//!
//! - `inspect` - Summarize a failure log
//! - `dump` - Print failure records
//! - `export` - Regroup failure records into a change set for manual replay
//! - `config` - Show the configuration resolved from the environment

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Tandem replication operator tools.
#[derive(Parser)]
#[command(name = "tandem")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the JSON Lines failure log
    #[arg(global = true, short, long)]
    log: Option<PathBuf>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Summarize failures per entity kind and operation
    Inspect {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Print failure records
    Dump {
        /// Only records of this entity kind
        #[arg(short, long)]
        kind: Option<String>,

        /// Maximum number of records to print
        #[arg(short = 'n', long)]
        limit: Option<usize>,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Write failure records as a change set document
    Export {
        /// Output file
        #[arg(short, long)]
        out: PathBuf,
    },

    /// Show the configuration resolved from TANDEM_* variables
    Config {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Inspect { format } => {
            let log = cli.log.ok_or("Failure log path required for inspect")?;
            commands::inspect::run(&log, &format)?;
        }
        Commands::Dump {
            kind,
            limit,
            format,
        } => {
            let log = cli.log.ok_or("Failure log path required for dump")?;
            commands::dump::run(&log, kind.as_deref(), limit, &format)?;
        }
        Commands::Export { out } => {
            let log = cli.log.ok_or("Failure log path required for export")?;
            commands::export::run(&log, &out)?;
        }
        Commands::Config { format } => {
            commands::config::run(&format)?;
        }
        Commands::Version => {
            println!("Tandem CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("Tandem Engine v{}", tandem_engine::VERSION);
        }
    }

    Ok(())
}
