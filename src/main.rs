//! # Lectern CLI (`lectern`)
//!
//! The `lectern` binary manages a course-materials question answering
//! pipeline: initialize the database, serve the HTTP API, and run ingestion
//! and search from the command line.
//!
//! ## Usage
//!
//! ```bash
//! lectern --config ./config/lectern.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `lectern init` | Create the SQLite database and run schema migrations |
//! | `lectern serve` | Start the HTTP API (uploads, documents, search) |
//! | `lectern ingest <id>` | Run the ingestion pipeline for a queued document |
//! | `lectern search <course-id> "<question>"` | Ask a question against a course |
//! | `lectern get <id>` | Print a document record with its status |

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use lectern::config;
use lectern::db;
use lectern::embedding::create_embedder;
use lectern::ingest;
use lectern::migrate;
use lectern::search;
use lectern::server;
use lectern::store;

/// Lectern — a document ingestion and retrieval pipeline for course
/// materials, answering questions with page-level citations.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/lectern.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "lectern",
    about = "Lectern — course-materials ingestion and cited question answering",
    version,
    long_about = "Lectern ingests uploaded course documents (PDF, DOCX, PPTX, plain text), \
    extracts page-anchored text, chunks and embeds it into a course-scoped vector index, \
    and answers questions with citations back to document and page."
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/lectern.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file and all required tables (documents,
    /// chunks, chunk_vectors, search_logs, events). Idempotent.
    Init,

    /// Start the HTTP API server.
    ///
    /// Binds to the address configured in `[server].bind`, runs migrations,
    /// and starts the background ingest workers.
    Serve,

    /// Run the ingestion pipeline for one document.
    ///
    /// The document must already exist (uploaded via the API) and be in
    /// `queued` state. Prints the resulting page and chunk counts.
    Ingest {
        /// Document UUID.
        document_id: String,
    },

    /// Ask a question against one course's indexed materials.
    ///
    /// Prints the composed answer and its citations as JSON.
    Search {
        /// Course identifier.
        course_id: i64,

        /// The question to ask.
        query: String,

        /// Maximum number of citations to return.
        #[arg(long)]
        top_k: Option<usize>,
    },

    /// Print a document record by its UUID.
    Get {
        /// Document UUID.
        document_id: String,
    },
}

fn truncate(text: &str, max_chars: usize) -> String {
    let flat = text.replace('\n', " ");
    if flat.chars().count() <= max_chars {
        flat
    } else {
        let cut: String = flat.chars().take(max_chars).collect();
        format!("{}...", cut)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            let pool = db::connect(&cfg).await?;
            migrate::run_migrations(&pool).await?;
            println!("Database initialized successfully.");
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
        Commands::Ingest { document_id } => {
            let pool = db::connect(&cfg).await?;
            migrate::run_migrations(&pool).await?;
            let embedder = create_embedder(&cfg.embedding)?;
            let outcome =
                ingest::ingest_document(&cfg, &pool, embedder.as_ref(), &document_id).await?;
            println!(
                "Indexed {} ({} pages, {} chunks)",
                document_id, outcome.pages, outcome.chunk_count
            );
        }
        Commands::Search {
            course_id,
            query,
            top_k,
        } => {
            let pool = db::connect(&cfg).await?;
            migrate::run_migrations(&pool).await?;
            let embedder = create_embedder(&cfg.embedding)?;
            let result =
                search::answer(&cfg, &pool, embedder.as_ref(), course_id, &query, top_k).await?;
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        Commands::Get { document_id } => {
            let pool = db::connect(&cfg).await?;
            migrate::run_migrations(&pool).await?;
            match store::get_document(&pool, &document_id).await? {
                Some(doc) => {
                    println!("{}", serde_json::to_string_pretty(&doc)?);
                    let chunks = store::get_chunks(&pool, &document_id).await?;
                    println!("\n{} chunk(s):", chunks.len());
                    for c in &chunks {
                        println!(
                            "  #{:<4} pages {}-{}  chars {}-{}  {}",
                            c.chunk_index,
                            c.start_page,
                            c.end_page,
                            c.start_char,
                            c.end_char,
                            truncate(&c.text, 60)
                        );
                    }
                }
                None => anyhow::bail!("no document with id {}", document_id),
            }
        }
    }

    Ok(())
}
