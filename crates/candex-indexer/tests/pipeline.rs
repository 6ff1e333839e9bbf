//! End-to-end pipeline behavior over in-memory backends

use std::sync::Arc;

use candex_core::{CandidateId, CandidateRecord, Distance, ExecutionStatus};
use candex_embedding::{EmbeddingError, EmbeddingGenerator, MockEmbeddingProvider};
use candex_indexer::{
    CandidateSource, ExecutionLog, InMemoryCandidateSource, InMemoryExecutionLog, Loader, Orchestrator,
    PipelineError, RetryPolicy, SearchService, TransformError, Transformer,
};
use candex_vector::{CollectionConfig, InMemoryVectorStore, VectorStore};
use chrono::{Duration, Utc};
use tokio_test::{assert_err, assert_ok};

const DIM: usize = 32;

fn candidate(id: CandidateId) -> CandidateRecord {
    CandidateRecord {
        id,
        name: Some(format!("Candidate {id}")),
        summary: Some("Backend engineer focused on data pipelines".into()),
        skills: Some("Rust, PostgreSQL, Kafka".into()),
        experience: Some("6 years".into()),
        updated_at: Utc::now() - Duration::minutes(5),
        last_indexed_at: None,
    }
}

struct World {
    source: Arc<InMemoryCandidateSource>,
    store: Arc<InMemoryVectorStore>,
    log: Arc<InMemoryExecutionLog>,
    provider: Arc<MockEmbeddingProvider>,
    orchestrator: Orchestrator,
}

async fn world_with(records: Vec<CandidateRecord>, provider_dim: usize, configured_dim: usize) -> World {
    let source = Arc::new(InMemoryCandidateSource::with_records(records).await);
    let store = Arc::new(InMemoryVectorStore::new(CollectionConfig::new(
        "candidates",
        configured_dim,
        Distance::Cosine,
    )));
    let log = Arc::new(InMemoryExecutionLog::new(10));
    let provider = Arc::new(MockEmbeddingProvider::new(provider_dim));
    let generator = EmbeddingGenerator::new(provider.clone(), configured_dim);

    let orchestrator = Orchestrator::new(
        source.clone(),
        Transformer::new(generator, RetryPolicy::none()),
        Loader::new(store.clone(), source.clone(), RetryPolicy::none()),
        log.clone(),
    );
    World {
        source,
        store,
        log,
        provider,
        orchestrator,
    }
}

async fn world(records: Vec<CandidateRecord>) -> World {
    world_with(records, DIM, DIM).await
}

#[tokio::test]
async fn second_sync_without_changes_processes_nothing() {
    let w = world(vec![candidate(1), candidate(2), candidate(3)]).await;

    let first = assert_ok!(w.orchestrator.run_sync().await);
    assert_eq!(first.processed, 3);

    let calls_after_first = w.provider.calls();
    let second = assert_ok!(w.orchestrator.run_sync().await);
    assert_eq!(second.processed, 0);
    assert_eq!(w.provider.calls(), calls_after_first);
    assert_eq!(w.store.count().await.unwrap(), 3);
}

#[tokio::test]
async fn invalid_row_is_skipped_and_stays_stale() {
    let mut missing_summary = candidate(2);
    missing_summary.summary = Some(String::new());
    let w = world(vec![candidate(1), missing_summary, candidate(3)]).await;

    let report = assert_ok!(w.orchestrator.run_sync().await);

    assert_eq!(report.processed, 2);
    assert_eq!(report.skipped, 1);
    assert_eq!(w.store.ids().await, vec![1, 3]);
    assert!(w.source.get(1).await.unwrap().last_indexed_at.is_some());
    assert!(w.source.get(2).await.unwrap().last_indexed_at.is_none());
    assert!(w.source.get(3).await.unwrap().last_indexed_at.is_some());

    let history = w.log.history(10).await.unwrap();
    let last = history.last().unwrap();
    assert_eq!(last.status, ExecutionStatus::Completed);
    assert_eq!(last.processed, 2);
    assert_eq!(w.log.last_success().await.unwrap().unwrap().processed, 2);

    let stale: Vec<_> = w.source.fetch_stale().await.unwrap().iter().map(|r| r.id).collect();
    assert_eq!(stale, vec![2]);
}

#[tokio::test]
async fn provider_outage_with_a_stale_invalid_row_fails_the_run() {
    let mut missing_summary = candidate(1);
    missing_summary.summary = Some(String::new());
    let w = world(vec![missing_summary, candidate(2), candidate(3)]).await;
    w.provider.fail_when_contains(
        "Backend engineer",
        EmbeddingError::HttpStatus {
            status: 503,
            body: "unavailable".into(),
        },
    );

    let err = assert_err!(w.orchestrator.run_sync().await);
    assert!(matches!(
        err,
        PipelineError::Transform(TransformError::ProviderDown { attempted: 2, .. })
    ));
    assert!(err.is_retryable());

    let last = w.log.last_status().await.unwrap().unwrap();
    assert_eq!(last.status, ExecutionStatus::Failed);
    assert!(w.log.last_success().await.unwrap().is_none());
    assert_eq!(w.source.fetch_stale().await.unwrap().len(), 3);
}

#[tokio::test]
async fn edited_candidate_is_reindexed_on_next_sync() {
    let w = world(vec![candidate(1), candidate(2)]).await;
    assert_ok!(w.orchestrator.run_sync().await);
    let before = w.store.get(1).await.unwrap().unwrap();

    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    w.source
        .touch(1, |r| r.skills = Some("Go, Kubernetes".into()))
        .await;

    let report = assert_ok!(w.orchestrator.run_sync().await);
    assert_eq!(report.processed, 1);

    let after = w.store.get(1).await.unwrap().unwrap();
    assert_ne!(before.vector, after.vector);
    assert!(after.payload.text_content.contains("Go, Kubernetes"));
}

#[tokio::test]
async fn dimension_mismatch_fails_the_run_and_marks_nothing() {
    let w = world_with(vec![candidate(1)], 512, 1024).await;

    let err = assert_err!(w.orchestrator.run_sync().await);
    assert!(matches!(
        err,
        PipelineError::Transform(TransformError::Config(EmbeddingError::DimensionMismatch {
            expected: 1024,
            actual: 512
        }))
    ));
    assert!(!err.is_retryable());

    assert!(w.source.get(1).await.unwrap().last_indexed_at.is_none());
    let last = w.log.last_status().await.unwrap().unwrap();
    assert_eq!(last.status, ExecutionStatus::Failed);
}

#[tokio::test]
async fn failed_upsert_leaves_rows_stale_for_the_next_run() {
    let w = world(vec![candidate(1), candidate(2)]).await;
    w.store.ensure_collection().await.unwrap();
    w.store.fail_next_upserts(1);

    assert_err!(w.orchestrator.run_sync().await);
    assert_eq!(w.source.fetch_stale().await.unwrap().len(), 2);

    let retried = assert_ok!(w.orchestrator.run_sync().await);
    assert_eq!(retried.processed, 2);
}

#[tokio::test]
async fn indexed_point_round_trips_through_the_store() {
    let w = world(vec![candidate(7)]).await;
    w.orchestrator.index_one(7).await.unwrap();

    let point = w.store.get(7).await.unwrap().unwrap();
    assert_eq!(point.vector.len(), DIM);
    assert_eq!(point.payload.name, "Candidate 7");
    assert!(point.payload.text_content.starts_with("Candidate 7 | Backend engineer"));

    let again = w.store.get(7).await.unwrap().unwrap();
    assert_eq!(point, again);
}

#[tokio::test]
async fn repeated_single_index_converges() {
    let w = world(vec![candidate(4)]).await;
    w.orchestrator.index_one(4).await.unwrap();
    let once = w.store.get(4).await.unwrap().unwrap();

    w.orchestrator.index_one(4).await.unwrap();
    let twice = w.store.get(4).await.unwrap().unwrap();

    assert_eq!(once, twice);
    assert_eq!(w.store.count().await.unwrap(), 1);
}

#[tokio::test]
async fn deleting_twice_is_not_an_error() {
    let w = world(vec![candidate(9)]).await;
    assert_ok!(w.orchestrator.run_sync().await);

    w.orchestrator.delete_point(9).await.unwrap();
    w.orchestrator.delete_point(9).await.unwrap();
    assert!(w.store.get(9).await.unwrap().is_none());
}

#[tokio::test]
async fn similar_lookup_for_unindexed_id_is_none() {
    let w = world(vec![candidate(1), candidate(2)]).await;
    assert_ok!(w.orchestrator.run_sync().await);

    let search = SearchService::new(w.store.clone(), EmbeddingGenerator::new(w.provider.clone(), DIM));
    assert!(search.find_similar(404, 5, 0.0).await.unwrap().is_none());

    let similar = search.find_similar(1, 5, 0.0).await.unwrap().unwrap();
    assert!(similar.iter().all(|hit| hit.id != 1));
}
