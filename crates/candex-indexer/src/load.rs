//! Load stage: write points to the collection and close the staleness loop

use std::sync::Arc;

use candex_core::CandidateId;
use candex_vector::{point_id, IndexPoint, VectorError, VectorStore};
use thiserror::Error;
use tracing::{debug, info};

use crate::extract::{CandidateSource, SourceError};
use crate::metrics;
use crate::retry::RetryPolicy;

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("vector store: {0}")]
    Vector(#[from] VectorError),

    #[error("candidate source: {0}")]
    Source(#[from] SourceError),
}

/// Writes to the vector collection and marks source rows as indexed.
///
/// Calls to the vector store run under the retry policy. Marking is only
/// done for ids whose points were written.
#[derive(Clone)]
pub struct Loader {
    store: Arc<dyn VectorStore>,
    source: Arc<dyn CandidateSource>,
    retry: RetryPolicy,
}

impl Loader {
    pub fn new(store: Arc<dyn VectorStore>, source: Arc<dyn CandidateSource>, retry: RetryPolicy) -> Self {
        Self { store, source, retry }
    }

    pub fn store(&self) -> &Arc<dyn VectorStore> {
        &self.store
    }

    /// Create the collection when absent. Safe to call on every run.
    pub async fn ensure_collection(&self) -> Result<(), LoadError> {
        let created = self
            .retry
            .run("ensure_collection", || self.store.ensure_collection(), VectorError::is_transient)
            .await?;
        if created {
            let collection = self.store.collection();
            info!(
                collection = %collection.name,
                dimension = collection.dimension,
                distance = %collection.distance,
                "Created vector collection"
            );
        }
        Ok(())
    }

    /// Upsert `points`, overwriting existing ids.
    pub async fn upsert(&self, points: Vec<IndexPoint>) -> Result<usize, LoadError> {
        if points.is_empty() {
            return Ok(0);
        }
        let written = self
            .retry
            .run("upsert", || self.store.upsert(points.clone()), VectorError::is_transient)
            .await?;
        debug!(points = written, "Upserted points");
        Ok(written)
    }

    /// Set `last_indexed_at` for exactly `ids`.
    pub async fn mark_indexed(&self, ids: &[CandidateId]) -> Result<u64, LoadError> {
        Ok(self.source.mark_indexed(ids).await?)
    }

    /// Upsert `points` and then mark their ids. Returns the marked ids.
    pub async fn load(&self, points: Vec<IndexPoint>) -> Result<Vec<CandidateId>, LoadError> {
        let ids: Vec<CandidateId> = points.iter().filter_map(IndexPoint::candidate_id).collect();
        self.upsert(points).await?;
        self.mark_indexed(&ids).await?;
        metrics::RECORDS_INDEXED.inc_by(ids.len() as u64);
        Ok(ids)
    }

    /// Remove the point of a candidate. Absent points are not an error.
    pub async fn delete(&self, id: CandidateId) -> Result<(), LoadError> {
        self.retry
            .run("delete", || self.store.delete(point_id(id)), VectorError::is_transient)
            .await?;
        metrics::POINTS_DELETED.inc();
        Ok(())
    }

    /// Drop every point and recreate the empty collection.
    pub async fn rebuild(&self) -> Result<(), LoadError> {
        self.retry
            .run("rebuild_collection", || self.store.recreate_collection(), VectorError::is_transient)
            .await?;
        info!(collection = %self.store.collection().name, "Rebuilt vector collection");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::InMemoryCandidateSource;
    use candex_core::{CandidateRecord, Distance};
    use candex_vector::{CollectionConfig, InMemoryVectorStore, PointPayload};
    use chrono::Utc;
    use std::time::Duration;

    fn point(id: u64) -> IndexPoint {
        IndexPoint {
            id,
            vector: vec![1.0, 0.0, 0.0],
            payload: PointPayload {
                name: format!("c{id}"),
                text_content: "text".into(),
                update_at: Utc::now().to_rfc3339(),
            },
        }
    }

    fn row(id: CandidateId) -> CandidateRecord {
        CandidateRecord {
            id,
            name: Some("n".into()),
            summary: Some("s".into()),
            skills: Some("k".into()),
            experience: Some("e".into()),
            updated_at: Utc::now(),
            last_indexed_at: None,
        }
    }

    async fn loader() -> (Loader, Arc<InMemoryVectorStore>, Arc<InMemoryCandidateSource>) {
        let store = Arc::new(InMemoryVectorStore::new(CollectionConfig::new("candidates", 3, Distance::Cosine)));
        let source = Arc::new(InMemoryCandidateSource::with_records([row(1), row(2), row(3)]).await);
        let retry = RetryPolicy::new(3, Duration::from_millis(1), Duration::from_millis(2));
        (Loader::new(store.clone(), source.clone(), retry), store, source)
    }

    #[tokio::test]
    async fn load_marks_only_written_ids() {
        let (loader, store, source) = loader().await;
        loader.ensure_collection().await.unwrap();

        let marked = loader.load(vec![point(1), point(3)]).await.unwrap();

        assert_eq!(marked, vec![1, 3]);
        assert_eq!(store.ids().await, vec![1, 3]);
        let stale: Vec<_> = source.fetch_stale().await.unwrap().iter().map(|r| r.id).collect();
        assert_eq!(stale, vec![2]);
    }

    #[tokio::test]
    async fn empty_load_touches_nothing() {
        let (loader, _store, source) = loader().await;
        assert!(loader.load(Vec::new()).await.unwrap().is_empty());
        assert_eq!(source.queries(), 0);
    }

    #[tokio::test]
    async fn transient_upsert_failures_are_retried() {
        let (loader, store, _source) = loader().await;
        loader.ensure_collection().await.unwrap();
        store.fail_next_upserts(2);

        assert_eq!(loader.upsert(vec![point(1)]).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn exhausted_retries_surface_the_error() {
        let (loader, store, source) = loader().await;
        loader.ensure_collection().await.unwrap();
        store.fail_next_upserts(3);

        let err = loader.load(vec![point(1)]).await.unwrap_err();
        assert!(matches!(err, LoadError::Vector(VectorError::Backend { .. })));
        assert_eq!(source.queries(), 0);
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let (loader, store, _source) = loader().await;
        loader.ensure_collection().await.unwrap();
        loader.upsert(vec![point(4)]).await.unwrap();

        loader.delete(4).await.unwrap();
        loader.delete(4).await.unwrap();
        assert!(store.ids().await.is_empty());
    }

    #[tokio::test]
    async fn rebuild_empties_the_collection() {
        let (loader, store, _source) = loader().await;
        loader.ensure_collection().await.unwrap();
        loader.upsert(vec![point(1), point(2)]).await.unwrap();

        loader.rebuild().await.unwrap();
        assert!(store.exists().await);
        assert_eq!(store.count().await.unwrap(), 0);
    }
}
