//! Telepipe CLI
//!
//! Command-line tools for looking into a Telepipe storage root.
//!
//! # Commands
//!
//! - `inspect` - Summarize features, batches and datastore entries
//! - `dump` - Print the events of a feature's batches
//! - `verify` - Check every batch and datastore file for damage
//! - `datastore` - List or read datastore entries

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Telepipe storage tools.
#[derive(Parser)]
#[command(name = "telepipe")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the storage root
    #[arg(global = true, short, long)]
    path: Option<PathBuf>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    /// File holding the 32-byte key of encrypted features
    #[arg(global = true, short, long)]
    key_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Summarize features, batches and datastore entries
    Inspect {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Print the events of a feature's batches
    Dump {
        /// Feature name
        feature: String,

        /// Read batches still waiting for consent
        #[arg(long)]
        pending: bool,

        /// Maximum number of batches to print
        #[arg(short, long)]
        limit: Option<usize>,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Check every batch and datastore file for damage
    Verify {
        /// Only check this feature
        #[arg(long)]
        feature: Option<String>,
    },

    /// List or read datastore entries
    Datastore {
        /// Feature name
        feature: String,

        /// Print this entry instead of listing all keys
        #[arg(long)]
        key: Option<String>,

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
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let encryption = commands::load_encryption(cli.key_file.as_deref())?;

    match cli.command {
        Commands::Inspect { format } => {
            let path = cli.path.ok_or("Storage path required for inspect")?;
            commands::inspect::run(&path, &format)?;
        }
        Commands::Dump {
            feature,
            pending,
            limit,
            format,
        } => {
            let path = cli.path.ok_or("Storage path required for dump")?;
            commands::dump::run(&path, &feature, pending, limit, &format, encryption)?;
        }
        Commands::Verify { feature } => {
            let path = cli.path.ok_or("Storage path required for verify")?;
            commands::verify::run(&path, feature.as_deref(), encryption)?;
        }
        Commands::Datastore {
            feature,
            key,
            format,
        } => {
            let path = cli.path.ok_or("Storage path required for datastore")?;
            commands::datastore::run(&path, &feature, key.as_deref(), &format, encryption)?;
        }
        Commands::Version => {
            println!("Telepipe CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("Telepipe Core v{}", telepipe_core::VERSION);
        }
    }

    Ok(())
}
