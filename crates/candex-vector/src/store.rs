//! Vector store trait and in-memory implementation

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::error::{VectorError, VectorResult};
use crate::types::{score, within_threshold, CollectionConfig, IndexPoint, ScoredPoint, SearchQuery};

/// Vector store bound to one collection
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Create the collection if it does not exist. Returns `true` when it
    /// was created by this call.
    async fn ensure_collection(&self) -> VectorResult<bool>;

    /// Drop the collection with all its points and create it empty.
    async fn recreate_collection(&self) -> VectorResult<()>;

    /// Insert or overwrite points by id. Returns the number written.
    async fn upsert(&self, points: Vec<IndexPoint>) -> VectorResult<usize>;

    /// Fetch a point with its vector and payload. A collection that does
    /// not exist yet holds no points.
    async fn get(&self, id: u64) -> VectorResult<Option<IndexPoint>>;

    /// Remove a point. Removing an absent point succeeds.
    async fn delete(&self, id: u64) -> VectorResult<()>;

    /// Nearest neighbours of the query vector, best first.
    async fn search(&self, query: SearchQuery) -> VectorResult<Vec<ScoredPoint>>;

    /// Number of points in the collection.
    async fn count(&self) -> VectorResult<usize>;

    /// Collection this store writes to.
    fn collection(&self) -> &CollectionConfig;

    fn backend_name(&self) -> &'static str;
}

pub(crate) fn check_dimension(collection: &CollectionConfig, points: &[IndexPoint]) -> VectorResult<()> {
    match points.iter().find(|p| p.vector.len() != collection.dimension) {
        Some(bad) => Err(VectorError::InvalidDimension {
            expected: collection.dimension,
            actual: bad.vector.len(),
        }),
        None => Ok(()),
    }
}

/// In-memory vector store for tests and local runs
///
/// The collection starts absent, mirroring a fresh remote backend, so writes
/// before `ensure_collection` fail with [`VectorError::CollectionNotFound`].
pub struct InMemoryVectorStore {
    points: Arc<RwLock<Option<HashMap<u64, IndexPoint>>>>,
    collection: CollectionConfig,
    failing_upserts: AtomicU32,
}

impl InMemoryVectorStore {
    /// Create a new in-memory store
    pub fn new(collection: CollectionConfig) -> Self {
        Self {
            points: Arc::new(RwLock::new(None)),
            collection,
            failing_upserts: AtomicU32::new(0),
        }
    }

    /// Make the next `n` upserts fail with a transient backend error.
    pub fn fail_next_upserts(&self, n: u32) {
        self.failing_upserts.store(n, Ordering::SeqCst);
    }

    pub async fn exists(&self) -> bool {
        self.points.read().await.is_some()
    }

    /// Ids currently stored, sorted.
    pub async fn ids(&self) -> Vec<u64> {
        let mut ids: Vec<u64> = self
            .points
            .read()
            .await
            .as_ref()
            .map(|m| m.keys().copied().collect())
            .unwrap_or_default();
        ids.sort_unstable();
        ids
    }

    fn missing(&self) -> VectorError {
        VectorError::CollectionNotFound(self.collection.name.clone())
    }

    fn take_injected_failure(&self) -> bool {
        self.failing_upserts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    async fn ensure_collection(&self) -> VectorResult<bool> {
        let mut guard = self.points.write().await;
        if guard.is_some() {
            return Ok(false);
        }
        *guard = Some(HashMap::new());
        Ok(true)
    }

    async fn recreate_collection(&self) -> VectorResult<()> {
        *self.points.write().await = Some(HashMap::new());
        Ok(())
    }

    async fn upsert(&self, points: Vec<IndexPoint>) -> VectorResult<usize> {
        check_dimension(&self.collection, &points)?;
        if self.take_injected_failure() {
            return Err(VectorError::backend("memory", "injected upsert failure"));
        }
        let mut guard = self.points.write().await;
        let map = guard.as_mut().ok_or_else(|| self.missing())?;
        let written = points.len();
        for point in points {
            map.insert(point.id, point);
        }
        Ok(written)
    }

    async fn get(&self, id: u64) -> VectorResult<Option<IndexPoint>> {
        Ok(self
            .points
            .read()
            .await
            .as_ref()
            .and_then(|m| m.get(&id).cloned()))
    }

    async fn delete(&self, id: u64) -> VectorResult<()> {
        if let Some(map) = self.points.write().await.as_mut() {
            map.remove(&id);
        }
        Ok(())
    }

    async fn search(&self, query: SearchQuery) -> VectorResult<Vec<ScoredPoint>> {
        query
            .validate(self.collection.dimension)
            .map_err(VectorError::InvalidQuery)?;

        let distance = self.collection.distance;
        let guard = self.points.read().await;
        let Some(map) = guard.as_ref() else {
            return Err(self.missing());
        };

        let mut results: Vec<ScoredPoint> = map
            .values()
            .filter(|p| query.filter.matches(p.id, &p.payload))
            .map(|p| ScoredPoint {
                id: p.id,
                score: score(distance, &query.vector, &p.vector),
                payload: p.payload.clone(),
            })
            .filter(|r| {
                query
                    .score_threshold
                    .map_or(true, |t| within_threshold(distance, r.score, t))
            })
            .collect();

        results.sort_by(|a, b| {
            let ord = b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal);
            match distance {
                candex_core::Distance::Euclid => ord.reverse(),
                _ => ord,
            }
        });
        results.truncate(query.limit);

        Ok(results)
    }

    async fn count(&self) -> VectorResult<usize> {
        self.points
            .read()
            .await
            .as_ref()
            .map(HashMap::len)
            .ok_or_else(|| self.missing())
    }

    fn collection(&self) -> &CollectionConfig {
        &self.collection
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}
