//! PostgreSQL candidate source.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use candex_core::{CandidateId, CandidateRecord};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Row};
use tracing::{debug, warn};

use crate::extract::{CandidateSource, SourceError, SourceResult};

const CANDIDATE_COLUMNS: &str = "id, name, summary, skills, experience, updated_at, last_indexed_at";

pub const DEFAULT_QUERY_TIMEOUT: Duration = Duration::from_secs(10);

/// Create a PostgreSQL connection pool.
pub async fn init_pool(database_url: &str, max_connections: u32) -> SourceResult<PgPool> {
    Ok(PgPoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(DEFAULT_QUERY_TIMEOUT)
        .connect(database_url)
        .await?)
}

#[derive(Debug, Clone)]
pub struct PgCandidateSource {
    pool: PgPool,
    query_timeout: Duration,
}

impl PgCandidateSource {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            query_timeout: DEFAULT_QUERY_TIMEOUT,
        }
    }

    pub fn with_query_timeout(mut self, query_timeout: Duration) -> Self {
        self.query_timeout = query_timeout;
        self
    }

    async fn bounded<T>(&self, query: impl Future<Output = Result<T, sqlx::Error>>) -> SourceResult<T> {
        tokio::time::timeout(self.query_timeout, query)
            .await
            .map_err(|_| SourceError::Timeout(self.query_timeout))?
            .map_err(SourceError::from)
    }

    fn map_row(row: &PgRow) -> Result<CandidateRecord, sqlx::Error> {
        Ok(CandidateRecord {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            summary: row.try_get("summary")?,
            skills: row.try_get("skills")?,
            experience: row.try_get("experience")?,
            updated_at: row.try_get("updated_at")?,
            last_indexed_at: row.try_get("last_indexed_at")?,
        })
    }

    /// Map rows, dropping the ones whose columns do not decode.
    fn map_rows(rows: &[PgRow]) -> Vec<CandidateRecord> {
        rows.iter()
            .filter_map(|row| match Self::map_row(row) {
                Ok(record) => Some(record),
                Err(e) => {
                    let id: Option<i32> = row.try_get("id").ok();
                    warn!(candidate_id = ?id, error = %e, "Rejecting candidate row that failed to map");
                    None
                }
            })
            .collect()
    }
}

#[async_trait]
impl CandidateSource for PgCandidateSource {
    async fn fetch_stale(&self) -> SourceResult<Vec<CandidateRecord>> {
        let sql = format!(
            "SELECT {CANDIDATE_COLUMNS} FROM candidates \
             WHERE last_indexed_at IS NULL OR updated_at > last_indexed_at"
        );
        let rows = self.bounded(sqlx::query(&sql).fetch_all(&self.pool)).await?;
        let records = Self::map_rows(&rows);
        debug!(rows = rows.len(), mapped = records.len(), "Fetched stale candidates");
        Ok(records)
    }

    async fn fetch_by_id(&self, id: CandidateId) -> SourceResult<Option<CandidateRecord>> {
        let sql = format!("SELECT {CANDIDATE_COLUMNS} FROM candidates WHERE id = $1");
        let row = self
            .bounded(sqlx::query(&sql).bind(id).fetch_optional(&self.pool))
            .await?;
        Ok(row.as_ref().and_then(|row| Self::map_rows(std::slice::from_ref(row)).pop()))
    }

    async fn mark_indexed(&self, ids: &[CandidateId]) -> SourceResult<u64> {
        if ids.is_empty() {
            return Ok(0);
        }
        let result = self
            .bounded(
                sqlx::query("UPDATE candidates SET last_indexed_at = NOW() WHERE id = ANY($1)")
                    .bind(ids)
                    .execute(&self.pool),
            )
            .await?;
        Ok(result.rows_affected())
    }

    async fn reset_all_indexed(&self) -> SourceResult<u64> {
        let result = self
            .bounded(sqlx::query("UPDATE candidates SET last_indexed_at = NULL").execute(&self.pool))
            .await?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEST_SCHEMA: &str = r"
CREATE TABLE IF NOT EXISTS candidates (
    id INTEGER PRIMARY KEY,
    name TEXT,
    summary TEXT,
    skills TEXT,
    experience TEXT,
    updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    last_indexed_at TIMESTAMPTZ
);";

    fn database_url() -> Option<String> {
        std::env::var("CANDEX_TEST_DATABASE_URL").ok()
    }

    #[tokio::test]
    async fn pg_source_follows_staleness_contract() {
        let Some(url) = database_url() else {
            eprintln!("Skipping PostgreSQL test: set CANDEX_TEST_DATABASE_URL to enable");
            return;
        };

        let pool = init_pool(&url, 2).await.unwrap();
        sqlx::query(TEST_SCHEMA).execute(&pool).await.unwrap();
        sqlx::query("DELETE FROM candidates WHERE id IN (9001, 9002)")
            .execute(&pool)
            .await
            .unwrap();
        sqlx::query(
            "INSERT INTO candidates (id, name, summary, skills, experience, updated_at, last_indexed_at) VALUES \
             (9001, 'A', 's', 'rust', 'x', NOW() - INTERVAL '1 hour', NULL), \
             (9002, 'B', 's', 'go', 'x', NOW() - INTERVAL '1 hour', NOW())",
        )
        .execute(&pool)
        .await
        .unwrap();

        let source = PgCandidateSource::new(pool.clone());
        let stale: Vec<_> = source.fetch_stale().await.unwrap().into_iter().map(|r| r.id).collect();
        assert!(stale.contains(&9001));
        assert!(!stale.contains(&9002));

        assert_eq!(source.mark_indexed(&[]).await.unwrap(), 0);
        assert_eq!(source.mark_indexed(&[9001]).await.unwrap(), 1);
        let record = source.fetch_by_id(9001).await.unwrap().unwrap();
        assert!(!record.is_stale());
        assert!(source.fetch_by_id(-1).await.unwrap().is_none());

        sqlx::query("DELETE FROM candidates WHERE id IN (9001, 9002)")
            .execute(&pool)
            .await
            .unwrap();
    }
}
