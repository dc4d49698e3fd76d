//! volstore CLI
//!
//! Command-line tools for volstore metadata databases.
//!
//! # Commands
//!
//! - `inspect` - Display schema version and row counts
//! - `list` - List volumes, snapshots or connections
//! - `export` - Write a backend dump as JSON or CBOR
//! - `import` - Load a transport document and save it
//! - `kv` - Read and modify key/value pairs

mod commands;

use clap::{Parser, Subcommand};
use commands::{Format, ListTarget, StoreArgs};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// volstore command-line metadata tools.
#[derive(Parser)]
#[command(name = "volstore")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(flatten)]
    store: StoreArgs,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Display schema version and row counts
    Inspect {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// List stored entities
    List {
        /// What to list
        #[arg(value_enum)]
        target: ListTarget,

        /// Only the entity with this id
        #[arg(long)]
        id: Option<String>,

        /// Only volumes or snapshots with this display name
        #[arg(long)]
        name: Option<String>,

        /// Only volumes of this backend
        #[arg(long)]
        backend: Option<String>,

        /// Only snapshots or connections of this volume
        #[arg(long)]
        volume_id: Option<String>,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Write a backend dump
    Export {
        /// Only volumes of this backend
        #[arg(short, long)]
        backend: Option<String>,

        /// Encoding of the dump
        #[arg(short, long, value_enum, default_value = "json")]
        format: Format,

        /// Output file (stdout if omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Load a transport document and save it
    Import {
        /// Document to load
        file: PathBuf,

        /// Encoding of the document (guessed from the extension if omitted)
        #[arg(short, long, value_enum)]
        format: Option<Format>,

        /// Decode and report without saving
        #[arg(long)]
        dry_run: bool,
    },

    /// Key/value pairs
    Kv {
        #[command(subcommand)]
        command: KvCommand,
    },

    /// Show version information
    Version,
}

#[derive(Subcommand)]
enum KvCommand {
    /// Print one pair, or every pair without a key
    Get {
        /// Key to look up
        key: Option<String>,
    },
    /// Insert or overwrite a pair
    Set {
        /// Key
        key: String,
        /// Value (null if omitted)
        value: Option<String>,
    },
    /// Remove a pair
    Delete {
        /// Key
        key: String,
    },
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
            commands::inspect::run(&cli.store, &format)?;
        }
        Commands::List {
            target,
            id,
            name,
            backend,
            volume_id,
            format,
        } => {
            let filters = commands::list::Filters {
                id,
                name,
                backend,
                volume_id,
            };
            commands::list::run(&cli.store, target, &filters, &format)?;
        }
        Commands::Export {
            backend,
            format,
            output,
        } => {
            commands::transfer::export(&cli.store, backend.as_deref(), format, output.as_deref())?;
        }
        Commands::Import {
            file,
            format,
            dry_run,
        } => {
            commands::transfer::import(&cli.store, &file, format, !dry_run)?;
        }
        Commands::Kv { command } => match command {
            KvCommand::Get { key } => commands::kv::get(&cli.store, key.as_deref())?,
            KvCommand::Set { key, value } => commands::kv::set(&cli.store, &key, value)?,
            KvCommand::Delete { key } => commands::kv::delete(&cli.store, &key)?,
        },
        Commands::Version => {
            println!("volstore CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("schema v{}", volstore_core::MigrationManager::standard().latest());
        }
    }

    Ok(())
}
