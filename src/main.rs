//! # Chat RAG CLI (`chat-rag`)
//!
//! ## Usage
//!
//! ```bash
//! chat-rag --config ./config/chat-rag.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `chat-rag serve` | Start the HTTP API |
//! | `chat-rag index <FILE>` | Index a CSV or Parquet chat export |
//! | `chat-rag index <FILE> --dry-run` | Print extracted thread documents as JSON lines |
//! | `chat-rag query "<question>"` | Answer a question from indexed threads |
//! | `chat-rag clear` | Delete every indexed thread |
//! | `chat-rag health` | Check vector store readiness |

use anyhow::{bail, Context, Result};
use bytes::Bytes;
use chat_rag::config::{self, Config};
use chat_rag::pipeline::{self, BatchSizes, QueryOptions, Services};
use chat_rag::{embedding, loader, logging, server};
use chat_rag_core::store::VectorStore;
use chat_rag_core::thread::prepare_documents;
use clap::{Parser, Subcommand};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Retrieval-augmented question answering over exported chat threads.
#[derive(Parser)]
#[command(
    name = "chat-rag",
    about = "Chat RAG: index chat exports and answer questions about them",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// A missing file means defaults plus environment overrides.
    #[arg(long, global = true, default_value = "./config/chat-rag.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP server at `[server].bind`.
    Serve,

    /// Index a CSV or Parquet file with one chat thread per row.
    Index {
        /// Path to a `.csv` or `.parquet` file.
        file: PathBuf,

        /// Print extracted documents as JSON lines without embedding or storing them.
        #[arg(long)]
        dry_run: bool,
    },

    /// Ask a question against the indexed threads.
    Query {
        /// The question.
        text: String,

        /// Number of threads to retrieve.
        #[arg(long)]
        top_k: Option<usize>,
    },

    /// Delete the vector store class and all indexed threads.
    Clear,

    /// Check vector store readiness; exits non-zero when not ready.
    Health,
}

#[tokio::main]
async fn main() -> Result<()> {
    logging::init();
    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Serve => server::run_server(&cfg).await?,
        Commands::Index { file, dry_run } => run_index(&cfg, &file, dry_run).await?,
        Commands::Query { text, top_k } => run_query(&cfg, &text, top_k).await?,
        Commands::Clear => {
            let store = require_store(&cfg).await?;
            pipeline::clear_index(store.as_ref()).await?;
            println!("clear");
            println!("  class: {}", cfg.vector_store.class_name);
            println!("  status: cleared");
        }
        Commands::Health => {
            let store = pipeline::create_store(&cfg.vector_store, &cfg.ingest.index_field)?;
            let ready = store.is_ready().await;
            println!("health");
            println!("  backend: {}", store.name());
            println!("  url: {}", cfg.vector_store.url);
            println!("  ready: {}", ready);
            if !ready {
                bail!("vector store is not ready");
            }
        }
    }

    Ok(())
}

async fn require_store(cfg: &Config) -> Result<Arc<dyn VectorStore>> {
    match pipeline::connect_store(cfg).await? {
        Some(store) => Ok(store),
        None => bail!("vector store at {} is not ready", cfg.vector_store.url),
    }
}

async fn run_index(cfg: &Config, file: &Path, dry_run: bool) -> Result<()> {
    let file_name = file
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    let data = std::fs::read(file).with_context(|| format!("Failed to read {}", file.display()))?;
    let table = loader::load_file(&file_name, Bytes::from(data))?;
    let options = cfg.ingest.extract_options();

    if dry_run {
        let documents = prepare_documents(&table, &options)?;
        let stdout = std::io::stdout();
        let mut out = stdout.lock();
        for document in &documents {
            writeln!(out, "{}", serde_json::to_string(document)?)?;
        }
        tracing::info!(
            rows = table.len(),
            documents = documents.len(),
            "dry run, nothing indexed"
        );
        return Ok(());
    }

    let store = require_store(cfg).await?;
    let embedder = embedding::create_embedder(&cfg.embedding)?;
    let sizes = BatchSizes {
        embedding: cfg.embedding.batch_size,
        store: cfg.vector_store.batch_size,
    };
    let report =
        pipeline::index_table(store.as_ref(), embedder.as_ref(), &table, &options, sizes).await?;

    println!("index {}", file.display());
    println!("  rows: {}", report.rows);
    println!("  documents: {}", report.documents);
    println!("  indexed: {}", report.indexed);
    println!("  failed: {}", report.failed);
    Ok(())
}

async fn run_query(cfg: &Config, text: &str, top_k: Option<usize>) -> Result<()> {
    let top_k = top_k.unwrap_or(cfg.retrieval.default_top_k);
    if top_k == 0 {
        bail!("--top-k must be >= 1");
    }

    let services = Services::connect(cfg).await?;
    let store = match services.store.clone() {
        Some(store) => store,
        None => bail!("vector store at {} is not ready", cfg.vector_store.url),
    };
    let options = QueryOptions {
        top_k,
        preview_chars: cfg.retrieval.preview_chars,
        reply_language: &cfg.completion.reply_language,
    };
    let answer = pipeline::ask(&services, store.as_ref(), text, options).await?;

    println!("{}", answer.answer);
    if answer.retrieved_contexts.is_empty() {
        return Ok(());
    }

    println!();
    println!("Retrieved contexts:");
    for (i, ctx) in answer.retrieved_contexts.iter().enumerate() {
        println!(
            "{}. row {}  distance {}  {}",
            i + 1,
            ctx.row_index
                .map_or_else(|| "N/A".to_string(), |r| r.to_string()),
            ctx.distance
                .map_or_else(|| "N/A".to_string(), |d| format!("{:.4}", d)),
            format_span(ctx.start_time, ctx.end_time),
        );
        println!("    {}", ctx.content_preview.replace('\n', "\n    "));
    }
    Ok(())
}

fn format_timestamp(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M UTC").to_string())
        .unwrap_or_else(|| ts.to_string())
}

fn format_span(start: Option<i64>, end: Option<i64>) -> String {
    match (start, end) {
        (Some(start), Some(end)) if start == end => format_timestamp(start),
        (Some(start), Some(end)) => {
            format!("{} .. {}", format_timestamp(start), format_timestamp(end))
        }
        (Some(ts), None) | (None, Some(ts)) => format_timestamp(ts),
        (None, None) => "no timestamps".to_string(),
    }
}
