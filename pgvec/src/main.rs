mod commands;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use pgvec_core::PgVectorService;

use crate::commands::Chunking;

#[derive(Parser)]
#[command(name = "pgvec")]
#[command(about = "Manage pgvector collections and run similarity search")]
#[command(version)]
struct Cli {
    /// Path to config.toml (defaults to the user config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Split a text file and store it as a collection
    Load {
        file: PathBuf,
        #[arg(long)]
        collection: String,
        #[arg(long, default_value_t = 2000)]
        chunk_size: usize,
        #[arg(long, default_value_t = 0)]
        chunk_overlap: usize,
        /// Measure chunk size in tokens of this model instead of characters
        #[arg(long, value_name = "MODEL")]
        tokens: Option<String>,
        /// Drop the collection first if it already exists
        #[arg(long)]
        overwrite: bool,
    },
    /// Replace the full contents of a collection with a text file
    Update {
        file: PathBuf,
        #[arg(long)]
        collection: String,
        #[arg(long, default_value_t = 2000)]
        chunk_size: usize,
        #[arg(long, default_value_t = 0)]
        chunk_overlap: usize,
        /// Measure chunk size in tokens of this model instead of characters
        #[arg(long, value_name = "MODEL")]
        tokens: Option<String>,
    },
    /// Similarity search, across all collections unless one is given
    Search {
        query: String,
        #[arg(short, default_value_t = 4)]
        k: usize,
        #[arg(long)]
        collection: Option<String>,
    },
    /// List collection names
    List,
    /// Delete one or more collections
    Delete { names: Vec<String> },
    /// Run a search repeatedly and report the average execution time
    Bench {
        query: String,
        #[arg(short, default_value_t = 4)]
        k: usize,
        #[arg(long, default_value_t = 10)]
        runs: usize,
        #[arg(long)]
        collection: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = commands::load_config(cli.config.as_deref())?;
    let mut service = PgVectorService::connect(&config)
        .await
        .context("Failed to set up vector collection service")?;

    match cli.command {
        Commands::Load {
            file,
            collection,
            chunk_size,
            chunk_overlap,
            tokens,
            overwrite,
        } => {
            let chunking = Chunking::new(chunk_size, chunk_overlap).with_tokens(tokens);
            commands::load_collection(&service, &file, &collection, &chunking, overwrite).await?;
        }
        Commands::Update {
            file,
            collection,
            chunk_size,
            chunk_overlap,
            tokens,
        } => {
            let chunking = Chunking::new(chunk_size, chunk_overlap).with_tokens(tokens);
            commands::update_collection(&service, &file, &collection, &chunking).await?;
        }
        Commands::Search { query, k, collection } => {
            service.set_collection(collection);
            commands::search(&service, &query, k).await?;
        }
        Commands::List => commands::list_collections(&service).await?,
        Commands::Delete { names } => commands::delete_collections(&service, &names).await?,
        Commands::Bench {
            query,
            k,
            runs,
            collection,
        } => {
            service.set_collection(collection);
            commands::bench(&service, &query, k, runs).await?;
        }
    }

    Ok(())
}
