//! raglab — compare RAG techniques on one corpus and score the results.
//!
//! Exit codes for `ask`: 0 when every technique succeeded, 1 when at least
//! one technique failed but the request completed, 2 on request-level
//! failure (unknown technique, missing session, backend unreachable).

mod commands;
mod settings;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use settings::Settings;

#[derive(Parser)]
#[command(name = "raglab", version, about = "Multi-technique RAG evaluation orchestrator")]
struct Cli {
    /// SQLite database path (overrides RAGLAB_DB_PATH).
    #[arg(long, global = true)]
    db: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Chunk, embed and store text files.
    Ingest {
        /// Text files to ingest.
        files: Vec<PathBuf>,
        /// Document id; defaults to the file stem.
        #[arg(long)]
        document_id: Option<String>,
        /// Chunk size in characters.
        #[arg(long, default_value_t = 800)]
        chunk_size: usize,
        /// Overlap between neighbouring chunks in characters.
        #[arg(long, default_value_t = 150)]
        chunk_overlap: usize,
    },

    /// Run techniques against a query and persist the results.
    Ask {
        /// The user query.
        query: String,
        /// Techniques to run, comma separated.
        #[arg(long, value_delimiter = ',', default_value = "baseline")]
        techniques: Vec<String>,
        /// Restrict retrieval to these document ids (default: all).
        #[arg(long, value_delimiter = ',')]
        documents: Vec<String>,
        /// Existing session id; a new session is created when absent.
        #[arg(long)]
        session: Option<String>,
        /// Extra per-query configuration as a JSON object.
        #[arg(long)]
        config: Option<String>,
        /// Final context size.
        #[arg(long)]
        top_k: Option<usize>,
    },

    /// Score persisted QA records.
    Evaluate {
        /// QA record ids, comma separated.
        #[arg(long, value_delimiter = ',', required = true)]
        records: Vec<i64>,
        /// Skip the dimensional LLM judge.
        #[arg(long)]
        skip_llm: bool,
        /// Skip the reference-metric evaluator.
        #[arg(long)]
        skip_reference: bool,
        /// Evaluation concurrency (max 5).
        #[arg(long, default_value_t = 2)]
        concurrency: usize,
    },

    /// Show per-technique comparison statistics.
    Stats,

    /// List known techniques.
    Techniques,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let mut settings = Settings::from_env();
    if let Some(db) = cli.db {
        settings.db_path = db;
    }

    let outcome = match cli.command {
        Command::Ingest { files, document_id, chunk_size, chunk_overlap } => {
            commands::ingest(&settings, &files, document_id, chunk_size, chunk_overlap).await
        }
        Command::Ask { query, techniques, documents, session, config, top_k } => {
            return commands::ask(&settings, query, techniques, documents, session, config, top_k)
                .await;
        }
        Command::Evaluate { records, skip_llm, skip_reference, concurrency } => {
            commands::evaluate(&settings, &records, !skip_llm, !skip_reference, concurrency).await
        }
        Command::Stats => commands::stats(&settings).await,
        Command::Techniques => {
            commands::techniques();
            Ok(())
        }
    };

    match outcome {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::from(2)
        }
    }
}
