//! kvfile CLI
//!
//! Inspect and edit store files from the command line.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use kvfile::store::compact_store_file;
use kvfile::{Config, StoreRegistry};
use tracing_subscriber::{fmt, EnvFilter};

/// kvfile CLI
#[derive(Parser, Debug)]
#[command(name = "kvfile-cli")]
#[command(about = "Inspect and edit kvfile store files")]
#[command(version)]
struct Args {
    /// Store file
    path: PathBuf,

    /// Do not compact the file when opening it
    #[arg(long)]
    no_compact: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Compact the store file and report its size
    Compact,

    /// List collection names
    Collections,

    /// Get a value by key
    Get {
        collection: String,
        key: String,
    },

    /// Set a key-value pair
    Set {
        collection: String,
        key: String,
        value: String,
    },

    /// Delete a key
    Delete {
        collection: String,
        key: String,
    },

    /// Print every key and value of a collection
    Dump {
        collection: String,

        /// Start at this key
        #[arg(long, default_value = "")]
        from: String,
    },
}

fn main() -> ExitCode {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{}", e);
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> kvfile::Result<()> {
    let config = Config::builder()
        .compact_on_open(!args.no_compact)
        .build();

    if let Commands::Compact = args.command {
        let report = compact_store_file(&args.path, &config)?;
        println!(
            "{}: {} -> {} bytes",
            args.path.display(),
            report.original_bytes,
            report.compacted_bytes
        );
        return Ok(());
    }

    let registry = StoreRegistry::new(config);
    let store = registry.open(&args.path)?;

    let result = match args.command {
        Commands::Compact => Ok(()),
        Commands::Collections => store.collection_names().map(|names| {
            for name in names {
                println!("{}", name);
            }
        }),
        Commands::Get { collection, key } => match store.get_collection(&collection)? {
            Some(collection) => match collection.get(key.as_bytes())? {
                Some(value) => {
                    println!("{}", String::from_utf8_lossy(&value));
                    Ok(())
                }
                None => {
                    println!("(nil)");
                    Ok(())
                }
            },
            None => {
                println!("(no such collection)");
                Ok(())
            }
        },
        Commands::Set {
            collection,
            key,
            value,
        } => store
            .set_collection(&collection, None)?
            .set(key.as_bytes(), value.as_bytes())
            .map(|()| println!("OK")),
        Commands::Delete { collection, key } => match store.get_collection(&collection)? {
            Some(collection) => collection
                .delete(key.as_bytes())
                .map(|existed| println!("{}", if existed { 1 } else { 0 })),
            None => {
                println!("0");
                Ok(())
            }
        },
        Commands::Dump { collection, from } => match store.get_collection(&collection)? {
            Some(collection) => collection.visit_items_ascend(from.as_bytes(), |item| {
                println!(
                    "{}\t{}",
                    String::from_utf8_lossy(&item.key),
                    String::from_utf8_lossy(&item.val)
                );
                true
            }),
            None => Ok(()),
        },
    };

    let closed = registry.shutdown();
    result.and(closed)
}
