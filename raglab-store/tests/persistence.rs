//! Round-trip and transactional behavior of the SQLite store.

use std::collections::{BTreeMap, HashMap};

use chrono::Utc;
use serde_json::json;

use raglab_core::{
    Chunk, EmbeddedChunk, ErrorKind, EvaluationScore, RetrievedChunk, ScoreType, TechniqueResult,
    TraceEvent,
};
use raglab_store::{SqliteStore, StoreError};

fn sample_result(name: &str, error_kind: Option<ErrorKind>) -> TechniqueResult {
    TechniqueResult {
        technique_name: name.to_string(),
        answer: if error_kind.is_none() { "Paris.".to_string() } else { String::new() },
        retrieved_chunks: vec![RetrievedChunk {
            chunk_id: "doc_0".into(),
            text: "Paris is the capital of France.".into(),
            metadata: HashMap::from([("filename".to_string(), "france.txt".to_string())]),
            score: 0.91,
            sub_scores: BTreeMap::from([("vector_score".to_string(), 0.91)]),
        }],
        trace: vec![TraceEvent {
            seq: 0,
            step: "init".into(),
            message: "query: What is the capital of France?".into(),
            details: json!({ "top_k": 2 }),
            at: Utc::now(),
        }],
        retrieval_time_ms: 12,
        generation_time_ms: 730,
        total_time_ms: 745,
        error_kind,
    }
}

#[tokio::test]
async fn fanout_round_trips_on_all_non_timestamp_fields() {
    let store = SqliteStore::in_memory().await.unwrap();
    let session = store.create_session("round trip").await.unwrap();

    let results =
        vec![sample_result("baseline", None), sample_result("fusion", Some(ErrorKind::Timeout))];
    let ids = store.insert_fanout(&session.id, "What is the capital of France?", &results).await.unwrap();
    assert_eq!(ids.len(), 2);

    for (id, original) in ids.iter().zip(&results) {
        let loaded = store.load_qa_record(*id).await.unwrap().expect("record exists");
        assert_eq!(loaded.session_id, session.id);
        assert_eq!(loaded.query, "What is the capital of France?");
        assert_eq!(&loaded.result, original);
    }
}

#[tokio::test]
async fn fanout_requires_an_existing_session() {
    let store = SqliteStore::in_memory().await.unwrap();
    let err = store
        .insert_fanout("missing-session", "q", &[sample_result("baseline", None)])
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::NotFound(_)));
}

#[tokio::test]
async fn evaluations_keep_history_with_the_latest_first() {
    let store = SqliteStore::in_memory().await.unwrap();
    let session = store.create_session("eval history").await.unwrap();
    let ids = store.insert_fanout(&session.id, "q", &[sample_result("baseline", None)]).await.unwrap();
    let record_id = ids[0];

    for overall in [6.0, 8.0] {
        let score = EvaluationScore {
            qa_record_id: record_id,
            score_type: ScoreType::LlmDimensional,
            dimensions: BTreeMap::from([
                ("relevance".to_string(), overall),
                ("coherence".to_string(), overall),
            ]),
            overall: Some(overall),
            evaluator: "llm_judge:test".into(),
            feedback: Some("fine".into()),
            metadata: json!({}),
            create_time: Utc::now(),
        };
        store.insert_evaluation(&score).await.unwrap();
    }

    let history = store.record_evaluations(record_id).await.unwrap();
    assert_eq!(history.len(), 2, "prior rows remain as history");
    assert_eq!(history[0].overall, Some(8.0), "latest row first");
    assert_eq!(history[0].dimensions["relevance"], 8.0);
}

#[tokio::test]
async fn reference_rows_restore_their_metric_set_from_metadata() {
    let store = SqliteStore::in_memory().await.unwrap();
    let session = store.create_session("reference").await.unwrap();
    let ids = store.insert_fanout(&session.id, "q", &[sample_result("baseline", None)]).await.unwrap();

    let score = EvaluationScore {
        qa_record_id: ids[0],
        score_type: ScoreType::ReferenceMetric,
        dimensions: BTreeMap::from([
            ("faithfulness".to_string(), 0.75),
            ("answer_relevancy".to_string(), 0.9),
        ]),
        overall: Some(0.825),
        evaluator: "reference_metrics:test".into(),
        feedback: None,
        metadata: json!({
            "reference_scores": { "faithfulness": 0.75, "answer_relevancy": 0.9 }
        }),
        create_time: Utc::now(),
    };
    store.insert_evaluation(&score).await.unwrap();

    let loaded = store.record_evaluations(ids[0]).await.unwrap();
    assert_eq!(loaded[0].dimensions["answer_relevancy"], 0.9);
    assert_eq!(loaded[0].dimensions["faithfulness"], 0.75);
    assert_eq!(loaded[0].metadata["reference_scores"]["faithfulness"], 0.75);
}

#[tokio::test]
async fn evaluation_requires_an_existing_record() {
    let store = SqliteStore::in_memory().await.unwrap();
    let score = EvaluationScore {
        qa_record_id: 12345,
        score_type: ScoreType::Human,
        dimensions: BTreeMap::new(),
        overall: Some(5.0),
        evaluator: "human".into(),
        feedback: None,
        metadata: json!({}),
        create_time: Utc::now(),
    };
    assert!(matches!(store.insert_evaluation(&score).await, Err(StoreError::NotFound(_))));
}

#[tokio::test]
async fn technique_stats_aggregate_runs_and_scores() {
    let store = SqliteStore::in_memory().await.unwrap();
    let session = store.create_session("stats").await.unwrap();
    let ids = store
        .insert_fanout(
            &session.id,
            "q",
            &[
                sample_result("baseline", None),
                sample_result("baseline", Some(ErrorKind::LlmFailed)),
                sample_result("fusion", None),
            ],
        )
        .await
        .unwrap();

    let score = EvaluationScore {
        qa_record_id: ids[0],
        score_type: ScoreType::LlmDimensional,
        dimensions: BTreeMap::new(),
        overall: Some(7.5),
        evaluator: "llm_judge:test".into(),
        feedback: None,
        metadata: json!({}),
        create_time: Utc::now(),
    };
    store.insert_evaluation(&score).await.unwrap();

    let stats = store.technique_stats().await.unwrap();
    assert_eq!(stats.len(), 2);
    let baseline = stats.iter().find(|s| s.technique_name == "baseline").unwrap();
    assert_eq!(baseline.total_runs, 2);
    assert_eq!(baseline.failed_runs, 1);
    assert_eq!(baseline.avg_overall_score, Some(7.5));
    let fusion = stats.iter().find(|s| s.technique_name == "fusion").unwrap();
    assert_eq!(fusion.avg_overall_score, None);
}

#[tokio::test]
async fn vector_chunks_survive_a_round_trip_and_document_delete() {
    let store = SqliteStore::in_memory().await.unwrap();
    let chunks: Vec<EmbeddedChunk> = (0..3)
        .map(|i| EmbeddedChunk {
            chunk: Chunk::new("guide", i, format!("chunk {i}"), HashMap::new()),
            embedding: vec![i as f32, 1.0 - i as f32],
        })
        .collect();
    store.save_chunks(&chunks).await.unwrap();
    store
        .save_chunks(&[EmbeddedChunk {
            chunk: Chunk::new("other", 0, "unrelated", HashMap::new()),
            embedding: vec![0.5, 0.5],
        }])
        .await
        .unwrap();

    let loaded = store.load_chunks().await.unwrap();
    assert_eq!(loaded.len(), 4);
    assert_eq!(store.document_ids().await.unwrap(), vec!["guide", "other"]);

    assert_eq!(store.delete_document_chunks("guide").await.unwrap(), 3);
    assert_eq!(store.load_chunks().await.unwrap().len(), 1);
}

#[tokio::test]
async fn sessions_update_time_moves_with_writes() {
    let store = SqliteStore::in_memory().await.unwrap();
    let session = store.create_session("activity").await.unwrap();
    let before = store.get_session(&session.id).await.unwrap().unwrap().update_time;

    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    store.insert_fanout(&session.id, "q", &[sample_result("baseline", None)]).await.unwrap();

    let after = store.get_session(&session.id).await.unwrap().unwrap().update_time;
    assert!(after > before);

    let listed = store.list_sessions(10).await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(store.session_records(&session.id).await.unwrap().len(), 1);
}
