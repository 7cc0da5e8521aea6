//! The SQLite store.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use tracing::{debug, info};
use uuid::Uuid;

use raglab_core::{
    Chunk, EmbeddedChunk, ErrorKind, EvaluationScore, QaRecord, RetrievedChunk, ScoreType,
    Session, TechniqueResult, TraceEvent,
};
use raglab_eval::dispatcher::{EvalRecord, RecordStore, StoreError as EvalStoreError};
use raglab_techniques::{QaRecordSink, SinkError};

use crate::error::{Result, StoreError};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS sessions (
    id          TEXT PRIMARY KEY,
    title       TEXT NOT NULL,
    create_time TEXT NOT NULL,
    update_time TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS qa_records (
    id                  INTEGER PRIMARY KEY AUTOINCREMENT,
    session_id          TEXT NOT NULL REFERENCES sessions(id),
    technique_name      TEXT NOT NULL,
    query               TEXT NOT NULL,
    answer              TEXT NOT NULL,
    retrieved_chunks_json TEXT NOT NULL,
    trace_json          TEXT NOT NULL,
    retrieval_time_ms   INTEGER NOT NULL,
    generation_time_ms  INTEGER NOT NULL,
    total_time_ms       INTEGER NOT NULL,
    error_kind          TEXT,
    create_time         TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_qa_records_session ON qa_records(session_id);
CREATE TABLE IF NOT EXISTS evaluations (
    id            INTEGER PRIMARY KEY AUTOINCREMENT,
    qa_record_id  INTEGER NOT NULL REFERENCES qa_records(id),
    score_type    TEXT NOT NULL,
    relevance     REAL,
    faithfulness  REAL,
    coherence     REAL,
    fluency       REAL,
    conciseness   REAL,
    overall       REAL,
    evaluator     TEXT NOT NULL,
    feedback      TEXT,
    metadata_json TEXT NOT NULL DEFAULT '{}',
    create_time   TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_evaluations_record ON evaluations(qa_record_id);
CREATE TABLE IF NOT EXISTS vector_chunks (
    chunk_id       TEXT PRIMARY KEY,
    document_id    TEXT NOT NULL,
    ordinal        INTEGER NOT NULL,
    text           TEXT NOT NULL,
    metadata_json  TEXT NOT NULL,
    embedding_json TEXT NOT NULL,
    UNIQUE(document_id, ordinal)
);
";

/// Per-technique aggregate over all persisted runs.
#[derive(Debug, Clone, PartialEq)]
pub struct TechniqueStats {
    /// Registry name.
    pub technique_name: String,
    /// Number of persisted runs.
    pub total_runs: i64,
    /// Runs with an error kind.
    pub failed_runs: i64,
    /// Mean total wall clock over all runs.
    pub avg_total_time_ms: f64,
    /// Mean overall evaluation score, when any evaluations exist.
    pub avg_overall_score: Option<f64>,
}

/// SQLite-backed persistence for sessions, QA records and evaluations.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (or create) the database at `path` and apply the schema.
    pub async fn connect(path: &str) -> Result<Self> {
        let options = SqliteConnectOptions::new().filename(path).create_if_missing(true);
        let pool = SqlitePoolOptions::new().max_connections(5).connect_with(options).await?;
        let store = Self { pool };
        store.migrate().await?;
        info!(path, "store ready");
        Ok(store)
    }

    /// An in-memory database, for tests.
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(SqliteConnectOptions::new().in_memory(true))
            .await?;
        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> Result<()> {
        for statement in SCHEMA.split(';').map(str::trim).filter(|s| !s.is_empty()) {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    // ── Sessions ───────────────────────────────────────────────────

    /// Create a new session with a generated UUID.
    pub async fn create_session(&self, title: &str) -> Result<Session> {
        let session = Session {
            id: Uuid::new_v4().to_string(),
            title: title.to_string(),
            create_time: Utc::now(),
            update_time: Utc::now(),
        };
        sqlx::query(
            "INSERT INTO sessions (id, title, create_time, update_time) VALUES (?, ?, ?, ?)",
        )
        .bind(&session.id)
        .bind(&session.title)
        .bind(session.create_time)
        .bind(session.update_time)
        .execute(&self.pool)
        .await?;
        Ok(session)
    }

    /// Load a session by id.
    pub async fn get_session(&self, id: &str) -> Result<Option<Session>> {
        let row = sqlx::query(
            "SELECT id, title, create_time, update_time FROM sessions WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|row| Session {
            id: row.get("id"),
            title: row.get("title"),
            create_time: row.get("create_time"),
            update_time: row.get("update_time"),
        }))
    }

    /// List sessions, most recently updated first.
    pub async fn list_sessions(&self, limit: i64) -> Result<Vec<Session>> {
        let rows = sqlx::query(
            "SELECT id, title, create_time, update_time FROM sessions \
             ORDER BY update_time DESC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|row| Session {
                id: row.get("id"),
                title: row.get("title"),
                create_time: row.get("create_time"),
                update_time: row.get("update_time"),
            })
            .collect())
    }

    // ── QA records ─────────────────────────────────────────────────

    /// Persist every result of one fan-out in a single transaction,
    /// returning row ids in result order. The owning session must exist.
    pub async fn insert_fanout(
        &self,
        session_id: &str,
        query: &str,
        results: &[TechniqueResult],
    ) -> Result<Vec<i64>> {
        if self.get_session(session_id).await?.is_none() {
            return Err(StoreError::NotFound(format!("session {session_id}")));
        }

        let mut tx = self.pool.begin().await?;
        let now = Utc::now();
        let mut ids = Vec::with_capacity(results.len());
        for result in results {
            let inserted = sqlx::query(
                "INSERT INTO qa_records (session_id, technique_name, query, answer, \
                 retrieved_chunks_json, trace_json, retrieval_time_ms, generation_time_ms, \
                 total_time_ms, error_kind, create_time) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(session_id)
            .bind(&result.technique_name)
            .bind(query)
            .bind(&result.answer)
            .bind(serde_json::to_string(&result.retrieved_chunks)?)
            .bind(serde_json::to_string(&result.trace)?)
            .bind(result.retrieval_time_ms as i64)
            .bind(result.generation_time_ms as i64)
            .bind(result.total_time_ms as i64)
            .bind(result.error_kind.map(|k| k.as_str()))
            .bind(now)
            .execute(&mut *tx)
            .await?;
            ids.push(inserted.last_insert_rowid());
        }
        sqlx::query("UPDATE sessions SET update_time = ? WHERE id = ?")
            .bind(now)
            .bind(session_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        debug!(session_id, records = ids.len(), "fan-out persisted");
        Ok(ids)
    }

    /// Load one QA record by id.
    pub async fn load_qa_record(&self, id: i64) -> Result<Option<QaRecord>> {
        let row = sqlx::query("SELECT * FROM qa_records WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|row| self.row_to_record(row)).transpose()
    }

    /// All QA records of a session, oldest first.
    pub async fn session_records(&self, session_id: &str) -> Result<Vec<QaRecord>> {
        let rows = sqlx::query("SELECT * FROM qa_records WHERE session_id = ? ORDER BY id")
            .bind(session_id)
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(|row| self.row_to_record(row)).collect()
    }

    fn row_to_record(&self, row: SqliteRow) -> Result<QaRecord> {
        let retrieved_chunks: Vec<RetrievedChunk> =
            serde_json::from_str(row.get::<String, _>("retrieved_chunks_json").as_str())?;
        let trace: Vec<TraceEvent> =
            serde_json::from_str(row.get::<String, _>("trace_json").as_str())?;
        let error_kind =
            row.get::<Option<String>, _>("error_kind").as_deref().and_then(ErrorKind::parse);
        Ok(QaRecord {
            id: row.get("id"),
            session_id: row.get("session_id"),
            query: row.get("query"),
            create_time: row.get("create_time"),
            result: TechniqueResult {
                technique_name: row.get("technique_name"),
                answer: row.get("answer"),
                retrieved_chunks,
                trace,
                retrieval_time_ms: row.get::<i64, _>("retrieval_time_ms") as u64,
                generation_time_ms: row.get::<i64, _>("generation_time_ms") as u64,
                total_time_ms: row.get::<i64, _>("total_time_ms") as u64,
                error_kind,
            },
        })
    }

    // ── Evaluations ────────────────────────────────────────────────

    /// Persist one evaluation row; the referenced record must exist.
    pub async fn insert_evaluation(&self, score: &EvaluationScore) -> Result<i64> {
        if self.load_qa_record(score.qa_record_id).await?.is_none() {
            return Err(StoreError::NotFound(format!("qa_record {}", score.qa_record_id)));
        }
        let inserted = sqlx::query(
            "INSERT INTO evaluations (qa_record_id, score_type, relevance, faithfulness, \
             coherence, fluency, conciseness, overall, evaluator, feedback, metadata_json, \
             create_time) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(score.qa_record_id)
        .bind(score.score_type.as_str())
        .bind(score.dimensions.get("relevance").copied())
        .bind(score.dimensions.get("faithfulness").copied())
        .bind(score.dimensions.get("coherence").copied())
        .bind(score.dimensions.get("fluency").copied())
        .bind(score.dimensions.get("conciseness").copied())
        .bind(score.overall)
        .bind(&score.evaluator)
        .bind(&score.feedback)
        .bind(serde_json::to_string(&score.metadata)?)
        .bind(score.create_time)
        .execute(&self.pool)
        .await?;
        Ok(inserted.last_insert_rowid())
    }

    /// All evaluation rows for a record, newest first. The latest row per
    /// `(score_type, evaluator)` is the effective one; earlier rows are
    /// history.
    pub async fn record_evaluations(&self, qa_record_id: i64) -> Result<Vec<EvaluationScore>> {
        let rows = sqlx::query(
            "SELECT * FROM evaluations WHERE qa_record_id = ? ORDER BY id DESC",
        )
        .bind(qa_record_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(row_to_score).collect()
    }

    // ── Stats ──────────────────────────────────────────────────────

    /// Per-technique comparison aggregates.
    pub async fn technique_stats(&self) -> Result<Vec<TechniqueStats>> {
        let rows = sqlx::query(
            "SELECT q.technique_name, \
                    COUNT(DISTINCT q.id) AS total_runs, \
                    COUNT(DISTINCT CASE WHEN q.error_kind IS NOT NULL THEN q.id END) AS failed_runs, \
                    AVG(q.total_time_ms) AS avg_total_time_ms, \
                    AVG(e.overall) AS avg_overall_score \
             FROM qa_records q \
             LEFT JOIN evaluations e ON e.qa_record_id = q.id \
             GROUP BY q.technique_name \
             ORDER BY q.technique_name",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|row| TechniqueStats {
                technique_name: row.get("technique_name"),
                total_runs: row.get("total_runs"),
                failed_runs: row.get("failed_runs"),
                avg_total_time_ms: row.get::<Option<f64>, _>("avg_total_time_ms").unwrap_or(0.0),
                avg_overall_score: row.get("avg_overall_score"),
            })
            .collect())
    }

    // ── Vector chunks (index warm-up) ──────────────────────────────

    /// Persist embedded chunks so the in-memory index can be rebuilt on
    /// the next process start.
    pub async fn save_chunks(&self, chunks: &[EmbeddedChunk]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for chunk in chunks {
            sqlx::query(
                "INSERT INTO vector_chunks (chunk_id, document_id, ordinal, text, \
                 metadata_json, embedding_json) VALUES (?, ?, ?, ?, ?, ?) \
                 ON CONFLICT(chunk_id) DO UPDATE SET text = excluded.text, \
                 metadata_json = excluded.metadata_json, embedding_json = excluded.embedding_json",
            )
            .bind(&chunk.chunk.chunk_id)
            .bind(&chunk.chunk.document_id)
            .bind(chunk.chunk.ordinal as i64)
            .bind(&chunk.chunk.text)
            .bind(serde_json::to_string(&chunk.chunk.metadata)?)
            .bind(serde_json::to_string(&chunk.embedding)?)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// Load every persisted chunk.
    pub async fn load_chunks(&self) -> Result<Vec<EmbeddedChunk>> {
        let rows =
            sqlx::query("SELECT * FROM vector_chunks ORDER BY document_id, ordinal")
                .fetch_all(&self.pool)
                .await?;
        rows.into_iter()
            .map(|row| {
                Ok(EmbeddedChunk {
                    chunk: Chunk {
                        chunk_id: row.get("chunk_id"),
                        document_id: row.get("document_id"),
                        ordinal: row.get::<i64, _>("ordinal") as u32,
                        text: row.get("text"),
                        metadata: serde_json::from_str(
                            row.get::<String, _>("metadata_json").as_str(),
                        )?,
                    },
                    embedding: serde_json::from_str(
                        row.get::<String, _>("embedding_json").as_str(),
                    )?,
                })
            })
            .collect()
    }

    /// Remove one document's chunks; returns how many rows went away.
    pub async fn delete_document_chunks(&self, document_id: &str) -> Result<u64> {
        let deleted = sqlx::query("DELETE FROM vector_chunks WHERE document_id = ?")
            .bind(document_id)
            .execute(&self.pool)
            .await?;
        Ok(deleted.rows_affected())
    }

    /// Distinct document ids present in the vector store.
    pub async fn document_ids(&self) -> Result<Vec<String>> {
        let rows = sqlx::query("SELECT DISTINCT document_id FROM vector_chunks ORDER BY document_id")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(|row| row.get("document_id")).collect())
    }
}

fn row_to_score(row: SqliteRow) -> Result<EvaluationScore> {
    let score_type = ScoreType::parse(row.get::<String, _>("score_type").as_str())
        .unwrap_or(ScoreType::Human);
    let metadata: serde_json::Value =
        serde_json::from_str(row.get::<String, _>("metadata_json").as_str())?;

    let mut dimensions = BTreeMap::new();
    for name in ["relevance", "faithfulness", "coherence", "fluency", "conciseness"] {
        if let Some(value) = row.get::<Option<f64>, _>(name) {
            dimensions.insert(name.to_string(), value);
        }
    }
    // Reference rows carry their full metric set in the metadata map.
    if let Some(reference_scores) = metadata.get("reference_scores").and_then(|v| v.as_object()) {
        for (name, value) in reference_scores {
            if let Some(value) = value.as_f64() {
                dimensions.insert(name.clone(), value);
            }
        }
    }

    Ok(EvaluationScore {
        qa_record_id: row.get("qa_record_id"),
        score_type,
        dimensions,
        overall: row.get("overall"),
        evaluator: row.get("evaluator"),
        feedback: row.get("feedback"),
        metadata,
        create_time: row.get("create_time"),
    })
}

// ── Seam implementations ───────────────────────────────────────────

#[async_trait]
impl QaRecordSink for SqliteStore {
    async fn record_fanout(
        &self,
        session_id: &str,
        query: &str,
        results: &[TechniqueResult],
    ) -> std::result::Result<Vec<i64>, SinkError> {
        self.insert_fanout(session_id, query, results).await.map_err(Into::into)
    }
}

#[async_trait]
impl RecordStore for SqliteStore {
    async fn load_eval_record(
        &self,
        id: i64,
    ) -> std::result::Result<Option<EvalRecord>, EvalStoreError> {
        let record = self.load_qa_record(id).await.map_err(EvalStoreError::from)?;
        Ok(record.map(|record| EvalRecord {
            id: record.id,
            query: record.query,
            answer: record.result.answer,
            contexts: record.result.retrieved_chunks.into_iter().map(|c| c.text).collect(),
        }))
    }

    async fn save_score(
        &self,
        score: &EvaluationScore,
    ) -> std::result::Result<i64, EvalStoreError> {
        self.insert_evaluation(score).await.map_err(Into::into)
    }
}
