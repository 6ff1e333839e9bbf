//! Extract stage: access to the candidate system of record
//!
//! [`CandidateSource`] is the only way the pipeline touches the relational
//! store. It reads candidate rows and updates nothing but `last_indexed_at`.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use candex_core::{CandidateId, CandidateRecord};
use chrono::Utc;
use thiserror::Error;
use tokio::sync::RwLock;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("data source unavailable: {0}")]
    Unavailable(String),

    #[error("query timed out after {0:?}")]
    Timeout(Duration),

    #[cfg(feature = "postgres")]
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

pub type SourceResult<T> = Result<T, SourceError>;

#[async_trait]
pub trait CandidateSource: Send + Sync {
    /// Every record that was never indexed or was edited after its last
    /// indexing (`last_indexed_at IS NULL OR updated_at > last_indexed_at`).
    async fn fetch_stale(&self) -> SourceResult<Vec<CandidateRecord>>;

    /// One record regardless of staleness.
    async fn fetch_by_id(&self, id: CandidateId) -> SourceResult<Option<CandidateRecord>>;

    /// Set `last_indexed_at` to now for exactly `ids`. An empty slice issues
    /// no query. Returns the number of rows updated.
    async fn mark_indexed(&self, ids: &[CandidateId]) -> SourceResult<u64>;

    /// Clear `last_indexed_at` on every record, making all of them stale.
    async fn reset_all_indexed(&self) -> SourceResult<u64>;
}

/// In-memory candidate table for tests and local runs.
///
/// Counts every query it serves so callers can assert that no-op paths do
/// not touch the store.
#[derive(Debug, Default)]
pub struct InMemoryCandidateSource {
    rows: RwLock<BTreeMap<CandidateId, CandidateRecord>>,
    queries: AtomicUsize,
    failing_queries: AtomicU32,
}

impl InMemoryCandidateSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn with_records(records: impl IntoIterator<Item = CandidateRecord>) -> Self {
        let source = Self::new();
        for record in records {
            source.insert(record).await;
        }
        source
    }

    /// Insert or replace a row.
    pub async fn insert(&self, record: CandidateRecord) {
        self.rows.write().await.insert(record.id, record);
    }

    pub async fn remove(&self, id: CandidateId) -> Option<CandidateRecord> {
        self.rows.write().await.remove(&id)
    }

    /// Apply an edit and bump `updated_at`, the way the CRUD layer does.
    pub async fn touch(&self, id: CandidateId, edit: impl FnOnce(&mut CandidateRecord)) -> bool {
        let mut rows = self.rows.write().await;
        match rows.get_mut(&id) {
            Some(record) => {
                edit(record);
                record.updated_at = Utc::now();
                true
            }
            None => false,
        }
    }

    pub async fn get(&self, id: CandidateId) -> Option<CandidateRecord> {
        self.rows.read().await.get(&id).cloned()
    }

    /// Queries served since creation.
    pub fn queries(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }

    /// Make the next `n` queries fail as if the store were unreachable.
    pub fn fail_next_queries(&self, n: u32) {
        self.failing_queries.store(n, Ordering::SeqCst);
    }

    fn begin_query(&self) -> SourceResult<()> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .failing_queries
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(SourceError::Unavailable("injected failure".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl CandidateSource for InMemoryCandidateSource {
    async fn fetch_stale(&self) -> SourceResult<Vec<CandidateRecord>> {
        self.begin_query()?;
        Ok(self
            .rows
            .read()
            .await
            .values()
            .filter(|r| r.is_stale())
            .cloned()
            .collect())
    }

    async fn fetch_by_id(&self, id: CandidateId) -> SourceResult<Option<CandidateRecord>> {
        self.begin_query()?;
        Ok(self.rows.read().await.get(&id).cloned())
    }

    async fn mark_indexed(&self, ids: &[CandidateId]) -> SourceResult<u64> {
        if ids.is_empty() {
            return Ok(0);
        }
        self.begin_query()?;
        let now = Utc::now();
        let mut rows = self.rows.write().await;
        let mut updated = 0;
        for id in ids {
            if let Some(record) = rows.get_mut(id) {
                record.last_indexed_at = Some(now);
                updated += 1;
            }
        }
        Ok(updated)
    }

    async fn reset_all_indexed(&self) -> SourceResult<u64> {
        self.begin_query()?;
        let mut rows = self.rows.write().await;
        for record in rows.values_mut() {
            record.last_indexed_at = None;
        }
        Ok(rows.len() as u64)
    }
}
