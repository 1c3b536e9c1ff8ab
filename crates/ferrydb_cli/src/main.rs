//! FerryDB CLI
//!
//! Command-line tools for FerryDB replication.
//!
//! # Commands
//!
//! - `simulate` - Replicate between a seeded local collection and an
//!   in-memory remote and print the event stream
//! - `endpoint-hash` - Print the endpoint hash a session would use
//! - `version` - Show version information

mod commands;

use clap::{Parser, Subcommand};
use commands::simulate::{Directions, Format, SimulateOptions};
use tracing_subscriber::EnvFilter;

/// FerryDB command-line replication tools.
#[derive(Parser)]
#[command(name = "ferrydb")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a replication against an in-memory remote
    Simulate {
        /// Documents seeded on the remote
        #[arg(long, default_value = "20")]
        remote_docs: usize,

        /// Documents seeded locally
        #[arg(long, default_value = "10")]
        local_docs: usize,

        /// Batch size for pull and push
        #[arg(short, long, default_value = "5")]
        batch_size: usize,

        /// Directions to replicate
        #[arg(short, long, value_enum, default_value = "both")]
        direction: Directions,

        /// Stay live for this many seconds instead of running once
        #[arg(long)]
        live_seconds: Option<u64>,

        /// Transport calls that fail before the remote answers
        #[arg(long, default_value = "0")]
        failures: usize,

        /// Extra remote document as `ID=JSON`, e.g. `a={"title":"x"}`
        #[arg(long = "remote-doc", value_name = "ID=JSON")]
        remote_doc: Vec<String>,

        /// Output format
        #[arg(short, long, value_enum, default_value = "text")]
        format: Format,
    },

    /// Print the endpoint hash for a collection and remote identifier
    EndpointHash {
        /// Collection name
        collection: String,

        /// Remote identifier
        identifier: String,

        /// Database name
        #[arg(long, default_value = "ferrydb")]
        database: String,
    },

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Logs go to stderr so JSON output stays parseable.
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
        Commands::Simulate {
            remote_docs,
            local_docs,
            batch_size,
            direction,
            live_seconds,
            failures,
            remote_doc,
            format,
        } => {
            commands::simulate::run(SimulateOptions {
                remote_docs,
                local_docs,
                batch_size,
                directions: direction,
                live_seconds,
                failures,
                extra_remote_docs: remote_doc,
                format,
            })?;
        }
        Commands::EndpointHash {
            collection,
            identifier,
            database,
        } => {
            commands::endpoint_hash::run(&database, &collection, &identifier);
        }
        Commands::Version => {
            println!("FerryDB CLI v{}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}
