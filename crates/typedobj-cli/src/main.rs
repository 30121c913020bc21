//! typedobj CLI - validate, relabel and canonicalize typed object documents.

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;
mod output;

use commands::{canonicalize, checksum, validate};

#[derive(Parser)]
#[command(name = "typedobj")]
#[command(about = "Typed object validation and canonicalization CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate documents against a schema, resolve their ids and canonicalize them
    Validate {
        /// Path to the schema JSON file
        #[arg(long)]
        schema: String,
        /// Resolve ids of a type from a map file, as TYPE=MAP.json (repeatable)
        #[arg(long = "ids")]
        ids: Vec<String>,
        /// Pass ids of a type through unchanged (repeatable)
        #[arg(long = "identity")]
        identity: Vec<String>,
        /// Documents to validate
        #[arg(required = true)]
        documents: Vec<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
        /// Canonical bytes kept in memory before spilling to a temp file
        #[arg(long)]
        max_memory: Option<u64>,
        /// Engine options JSON file
        #[arg(long)]
        config: Option<String>,
    },
    /// Show canonical bytes for input JSON
    Canonicalize {
        /// Input JSON file (or stdin if not provided)
        input: Option<String>,
        /// Canonical bytes kept in memory before spilling to a temp file
        #[arg(long)]
        max_memory: Option<u64>,
    },
    /// Show the checksum, size and sortedness of input JSON
    Checksum {
        /// Input JSON file (or stdin if not provided)
        input: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
        /// Canonical bytes kept in memory before spilling to a temp file
        #[arg(long)]
        max_memory: Option<u64>,
    },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Validate {
            schema,
            ids,
            identity,
            documents,
            json,
            max_memory,
            config,
        } => validate::run(validate::Args {
            schema,
            ids,
            identity,
            documents,
            json,
            max_memory,
            config,
        }),
        Commands::Canonicalize { input, max_memory } => canonicalize::run(input, max_memory),
        Commands::Checksum {
            input,
            json,
            max_memory,
        } => checksum::run(input, json, max_memory),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
