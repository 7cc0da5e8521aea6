//! Command implementations.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{bail, Context};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use raglab_core::{EmbeddedChunk, QueryConfig, TechniqueResult};
use raglab_eval::{EvalDispatcher, EvalOptions};
use raglab_index::{
    EmbeddingProvider, FixedSizeChunker, HttpEmbeddingProvider, InMemoryVectorIndex, VectorIndex,
};
use raglab_model::OpenAiChatModel;
use raglab_store::SqliteStore;
use raglab_techniques::{
    FanoutDispatcher, FanoutError, FanoutRequest, TechniqueDeps, TechniqueRegistry,
};

use crate::settings::Settings;

fn embedder(settings: &Settings) -> Arc<HttpEmbeddingProvider> {
    Arc::new(HttpEmbeddingProvider::new(
        &settings.embedding_base_url,
        &settings.embedding_api_key,
        &settings.embedding_model,
        settings.embedding_dimensions,
    ))
}

fn model(settings: &Settings) -> Arc<OpenAiChatModel> {
    Arc::new(OpenAiChatModel::new(
        &settings.llm_base_url,
        &settings.llm_api_key,
        &settings.llm_model,
    ))
}

/// Rebuild the in-memory index from the persisted vector chunks.
async fn warm_index(
    settings: &Settings,
    store: &SqliteStore,
) -> anyhow::Result<Arc<InMemoryVectorIndex>> {
    let index = Arc::new(InMemoryVectorIndex::new(settings.embedding_dimensions));
    let chunks = store.load_chunks().await.context("loading persisted chunks")?;
    if !chunks.is_empty() {
        let count = chunks.len();
        index.upsert(chunks).await.context("warming the vector index")?;
        info!(chunks = count, "vector index warmed from store");
    }
    Ok(index)
}

pub async fn ingest(
    settings: &Settings,
    files: &[PathBuf],
    document_id: Option<String>,
    chunk_size: usize,
    chunk_overlap: usize,
) -> anyhow::Result<()> {
    if files.is_empty() {
        bail!("no files given");
    }
    if files.len() > 1 && document_id.is_some() {
        bail!("--document-id only applies to a single file");
    }

    let store = SqliteStore::connect(&settings.db_path).await?;
    let embedder = embedder(settings);
    let chunker = FixedSizeChunker::new(chunk_size, chunk_overlap);

    for file in files {
        let text = tokio::fs::read_to_string(file)
            .await
            .with_context(|| format!("reading {}", file.display()))?;
        let doc_id = document_id.clone().unwrap_or_else(|| file_stem(file));
        let metadata = HashMap::from([(
            "filename".to_string(),
            file.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default(),
        )]);

        let chunks = chunker.chunk(&doc_id, &text, &metadata);
        if chunks.is_empty() {
            warn!(document = %doc_id, "file produced no chunks, skipping");
            continue;
        }

        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let vectors = embedder.embed(&texts).await.context("embedding chunks")?;
        let embedded: Vec<EmbeddedChunk> = chunks
            .into_iter()
            .zip(vectors)
            .map(|(chunk, embedding)| EmbeddedChunk { chunk, embedding })
            .collect();

        store.save_chunks(&embedded).await?;
        println!("{doc_id}: {} chunk(s) ingested", embedded.len());
    }
    Ok(())
}

fn file_stem(path: &Path) -> String {
    path.file_stem().map(|s| s.to_string_lossy().into_owned()).unwrap_or_else(|| "doc".to_string())
}

pub async fn ask(
    settings: &Settings,
    query: String,
    techniques: Vec<String>,
    documents: Vec<String>,
    session: Option<String>,
    config_json: Option<String>,
    top_k: Option<usize>,
) -> ExitCode {
    match run_ask(settings, query, techniques, documents, session, config_json, top_k).await {
        Ok(results) => {
            if results.iter().all(TechniqueResult::is_success) {
                ExitCode::SUCCESS
            } else {
                ExitCode::from(1)
            }
        }
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::from(2)
        }
    }
}

async fn run_ask(
    settings: &Settings,
    query: String,
    techniques: Vec<String>,
    documents: Vec<String>,
    session: Option<String>,
    config_json: Option<String>,
    top_k: Option<usize>,
) -> anyhow::Result<Vec<TechniqueResult>> {
    let store = Arc::new(SqliteStore::connect(&settings.db_path).await?);
    let index = warm_index(settings, &store).await?;

    let session = match session {
        Some(id) => store
            .get_session(&id)
            .await?
            .with_context(|| format!("session {id} not found"))?,
        None => {
            let title: String = query.chars().take(60).collect();
            store.create_session(&title).await?
        }
    };

    let mut config = match &config_json {
        Some(raw) => {
            let value: serde_json::Value =
                serde_json::from_str(raw).context("--config is not valid JSON")?;
            QueryConfig::from_json(&value)
        }
        None => QueryConfig::default(),
    };
    if let Some(top_k) = top_k {
        config.top_k = top_k;
    }

    let deps = TechniqueDeps {
        index: index as Arc<dyn VectorIndex>,
        embedder: embedder(settings) as Arc<dyn EmbeddingProvider>,
        model: model(settings),
    };
    let dispatcher = FanoutDispatcher::new(deps).with_sink(store.clone());

    // Ctrl-C cancels cooperatively: in-flight techniques notice between
    // outbound calls and return with error_kind = canceled.
    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, canceling in-flight techniques");
            signal_cancel.cancel();
        }
    });

    let request = FanoutRequest {
        query: query.clone(),
        document_ids: documents,
        technique_names: techniques,
        config,
    };
    let outcome = match dispatcher.run(&session.id, request, cancel).await {
        Ok(outcome) => outcome,
        Err(FanoutError::UnknownTechnique(name)) => {
            bail!(
                "unknown technique '{name}' (known: {})",
                TechniqueRegistry::names().join(", ")
            )
        }
    };

    println!("session: {}", session.id);
    if outcome.persistence_failed {
        eprintln!("warning: persistence failed; results were not recorded");
    }
    for (i, result) in outcome.results.iter().enumerate() {
        let record = outcome
            .qa_record_ids
            .get(i)
            .map(|id| format!(" [record {id}]"))
            .unwrap_or_default();
        match result.error_kind {
            None => {
                println!(
                    "\n=== {}{record} ({} ms, {} chunk(s)) ===\n{}",
                    result.technique_name,
                    result.total_time_ms,
                    result.retrieved_chunks.len(),
                    result.answer
                );
            }
            Some(kind) => {
                println!(
                    "\n=== {}{record} FAILED ({kind}) after {} ms ===",
                    result.technique_name, result.total_time_ms
                );
            }
        }
    }

    Ok(outcome.results)
}

pub async fn evaluate(
    settings: &Settings,
    records: &[i64],
    use_llm: bool,
    use_reference: bool,
    concurrency: usize,
) -> anyhow::Result<()> {
    if !use_llm && !use_reference {
        bail!("nothing to do: both tracks skipped");
    }

    let store = Arc::new(SqliteStore::connect(&settings.db_path).await?);
    let dispatcher = EvalDispatcher::new(model(settings), embedder(settings), store, concurrency);

    let options = EvalOptions { use_llm, use_reference, reference_answers: HashMap::new() };
    let mut evaluations = dispatcher.evaluate_batch(records, &options).await;
    evaluations.sort_by_key(|e| e.qa_record_id);

    for evaluation in &evaluations {
        match &evaluation.error_kind {
            Some(kind) => println!("record {}: FAILED ({kind})", evaluation.qa_record_id),
            None => {
                for score in &evaluation.scores {
                    let dims: Vec<String> = score
                        .dimensions
                        .iter()
                        .map(|(name, value)| format!("{name}={value:.2}"))
                        .collect();
                    println!(
                        "record {}: {} overall={} {}",
                        evaluation.qa_record_id,
                        score.score_type.as_str(),
                        score.overall.map(|o| format!("{o:.2}")).unwrap_or_else(|| "-".into()),
                        dims.join(" ")
                    );
                }
            }
        }
    }
    Ok(())
}

pub async fn stats(settings: &Settings) -> anyhow::Result<()> {
    let store = SqliteStore::connect(&settings.db_path).await?;
    let stats = store.technique_stats().await?;
    if stats.is_empty() {
        println!("no persisted runs yet");
        return Ok(());
    }

    println!("{:<22} {:>6} {:>7} {:>12} {:>9}", "technique", "runs", "failed", "avg_time_ms", "avg_score");
    for row in stats {
        println!(
            "{:<22} {:>6} {:>7} {:>12.0} {:>9}",
            row.technique_name,
            row.total_runs,
            row.failed_runs,
            row.avg_total_time_ms,
            row.avg_overall_score.map(|s| format!("{s:.2}")).unwrap_or_else(|| "-".into()),
        );
    }
    Ok(())
}

pub fn techniques() {
    for name in TechniqueRegistry::names() {
        println!("{name}");
    }
}
