//! Execution log: per-run status, bounded history and the last-success pointer
//!
//! Keys (with the configured prefix, `etl` by default):
//! - `{prefix}:job:{run_id}`  latest record of one run, expires after [`RUN_STATUS_TTL`]
//! - `{prefix}:last_status`   latest record of any run
//! - `{prefix}:last_success`  latest completed record
//! - `{prefix}:executions`    terminal records, oldest first, trimmed to the bound

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use candex_core::{ExecutionRecord, RunId};
use thiserror::Error;
use tokio::sync::RwLock;

#[derive(Debug, Error)]
pub enum StatusError {
    #[error("failed to encode execution record: {0}")]
    Serialization(#[from] serde_json::Error),

    #[cfg(feature = "redis")]
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
}

pub type StatusResult<T> = Result<T, StatusError>;

/// Lifetime of a per-run status record.
pub const RUN_STATUS_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

#[async_trait]
pub trait ExecutionLog: Send + Sync {
    /// Store `record` under its run key and as the last status.
    async fn record_status(&self, run_id: &RunId, record: &ExecutionRecord) -> StatusResult<()>;

    /// Append a terminal record to the bounded history.
    async fn append_history(&self, record: &ExecutionRecord) -> StatusResult<()>;

    async fn mark_success(&self, record: &ExecutionRecord) -> StatusResult<()>;

    async fn run_status(&self, run_id: &RunId) -> StatusResult<Option<ExecutionRecord>>;

    async fn last_status(&self) -> StatusResult<Option<ExecutionRecord>>;

    async fn last_success(&self) -> StatusResult<Option<ExecutionRecord>>;

    /// Up to `limit` most recent history entries, oldest first.
    async fn history(&self, limit: usize) -> StatusResult<Vec<ExecutionRecord>>;
}

#[derive(Debug, Default)]
struct LogState {
    runs: HashMap<RunId, ExecutionRecord>,
    /// Run ids in first-seen order, for evicting the oldest.
    run_order: VecDeque<RunId>,
    last_status: Option<ExecutionRecord>,
    last_success: Option<ExecutionRecord>,
    history: VecDeque<ExecutionRecord>,
}

/// Process-local execution log. Per-run records are kept for as many runs
/// as the history holds.
#[derive(Debug)]
pub struct InMemoryExecutionLog {
    state: RwLock<LogState>,
    history_limit: usize,
}

impl InMemoryExecutionLog {
    pub fn new(history_limit: usize) -> Self {
        Self {
            state: RwLock::new(LogState::default()),
            history_limit: history_limit.max(1),
        }
    }
}

impl Default for InMemoryExecutionLog {
    fn default() -> Self {
        Self::new(candex_core::config::DEFAULT_HISTORY_LIMIT)
    }
}

#[async_trait]
impl ExecutionLog for InMemoryExecutionLog {
    async fn record_status(&self, run_id: &RunId, record: &ExecutionRecord) -> StatusResult<()> {
        let mut state = self.state.write().await;
        if state.runs.insert(run_id.clone(), record.clone()).is_none() {
            state.run_order.push_back(run_id.clone());
            while state.run_order.len() > self.history_limit {
                if let Some(oldest) = state.run_order.pop_front() {
                    state.runs.remove(&oldest);
                }
            }
        }
        state.last_status = Some(record.clone());
        Ok(())
    }

    async fn append_history(&self, record: &ExecutionRecord) -> StatusResult<()> {
        let mut state = self.state.write().await;
        state.history.push_back(record.clone());
        while state.history.len() > self.history_limit {
            state.history.pop_front();
        }
        Ok(())
    }

    async fn mark_success(&self, record: &ExecutionRecord) -> StatusResult<()> {
        self.state.write().await.last_success = Some(record.clone());
        Ok(())
    }

    async fn run_status(&self, run_id: &RunId) -> StatusResult<Option<ExecutionRecord>> {
        Ok(self.state.read().await.runs.get(run_id).cloned())
    }

    async fn last_status(&self) -> StatusResult<Option<ExecutionRecord>> {
        Ok(self.state.read().await.last_status.clone())
    }

    async fn last_success(&self) -> StatusResult<Option<ExecutionRecord>> {
        Ok(self.state.read().await.last_success.clone())
    }

    async fn history(&self, limit: usize) -> StatusResult<Vec<ExecutionRecord>> {
        let state = self.state.read().await;
        let skip = state.history.len().saturating_sub(limit);
        Ok(state.history.iter().skip(skip).cloned().collect())
    }
}

#[cfg(feature = "redis")]
pub use self::redis_log::RedisExecutionLog;

#[cfg(feature = "redis")]
mod redis_log {
    use super::{ExecutionLog, StatusResult, RUN_STATUS_TTL};
    use async_trait::async_trait;
    use candex_core::{ExecutionRecord, RunId};
    use redis::aio::ConnectionManager;
    use redis::AsyncCommands;

    /// Execution log stored in Redis so external pollers can read it.
    #[derive(Clone)]
    pub struct RedisExecutionLog {
        conn: ConnectionManager,
        prefix: String,
        history_limit: usize,
    }

    impl RedisExecutionLog {
        pub fn new(conn: ConnectionManager, prefix: impl Into<String>, history_limit: usize) -> Self {
            Self {
                conn,
                prefix: prefix.into(),
                history_limit: history_limit.max(1),
            }
        }

        fn key(&self, suffix: &str) -> String {
            format!("{}:{suffix}", self.prefix)
        }

        async fn read(&self, key: String) -> StatusResult<Option<ExecutionRecord>> {
            let mut conn = self.conn.clone();
            let raw: Option<String> = conn.get(key).await?;
            raw.map(|s| serde_json::from_str(&s)).transpose().map_err(Into::into)
        }
    }

    #[async_trait]
    impl ExecutionLog for RedisExecutionLog {
        async fn record_status(&self, run_id: &RunId, record: &ExecutionRecord) -> StatusResult<()> {
            let json = serde_json::to_string(record)?;
            let mut conn = self.conn.clone();
            redis::pipe()
                .set_ex(self.key(&format!("job:{run_id}")), &json, RUN_STATUS_TTL.as_secs())
                .ignore()
                .set(self.key("last_status"), &json)
                .ignore()
                .query_async::<()>(&mut conn)
                .await?;
            Ok(())
        }

        async fn append_history(&self, record: &ExecutionRecord) -> StatusResult<()> {
            let json = serde_json::to_string(record)?;
            let key = self.key("executions");
            let keep = isize::try_from(self.history_limit).unwrap_or(isize::MAX);
            let mut conn = self.conn.clone();
            redis::pipe()
                .rpush(&key, json)
                .ignore()
                .ltrim(&key, -keep, -1)
                .ignore()
                .query_async::<()>(&mut conn)
                .await?;
            Ok(())
        }

        async fn mark_success(&self, record: &ExecutionRecord) -> StatusResult<()> {
            let json = serde_json::to_string(record)?;
            let mut conn = self.conn.clone();
            conn.set::<_, _, ()>(self.key("last_success"), json).await?;
            Ok(())
        }

        async fn run_status(&self, run_id: &RunId) -> StatusResult<Option<ExecutionRecord>> {
            self.read(self.key(&format!("job:{run_id}"))).await
        }

        async fn last_status(&self) -> StatusResult<Option<ExecutionRecord>> {
            self.read(self.key("last_status")).await
        }

        async fn last_success(&self) -> StatusResult<Option<ExecutionRecord>> {
            self.read(self.key("last_success")).await
        }

        async fn history(&self, limit: usize) -> StatusResult<Vec<ExecutionRecord>> {
            if limit == 0 {
                return Ok(Vec::new());
            }
            let start = isize::try_from(limit).map_or(0, |n| -n);
            let mut conn = self.conn.clone();
            let raw: Vec<String> = conn.lrange(self.key("executions"), start, -1).await?;
            let mut records = Vec::with_capacity(raw.len());
            for entry in raw {
                match serde_json::from_str(&entry) {
                    Ok(record) => records.push(record),
                    Err(e) => tracing::warn!(error = %e, "Skipping unreadable execution history entry"),
                }
            }
            Ok(records)
        }
    }

}

#[cfg(test)]
mod tests {
    use super::*;
    use candex_core::ExecutionStatus;

    #[tokio::test]
    async fn tracks_run_and_last_status() {
        let log = InMemoryExecutionLog::default();
        let run = RunId::new();

        log.record_status(&run, &ExecutionRecord::new(run.clone(), ExecutionStatus::Extracting))
            .await
            .unwrap();
        let done = ExecutionRecord::completed(run.clone(), 4, 1);
        log.record_status(&run, &done).await.unwrap();

        assert_eq!(log.run_status(&run).await.unwrap(), Some(done.clone()));
        assert_eq!(log.last_status().await.unwrap(), Some(done));
        assert!(log.last_success().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn per_run_records_are_bounded() {
        let log = InMemoryExecutionLog::new(2);
        let runs: Vec<RunId> = (0..3).map(|_| RunId::new()).collect();
        for run in &runs {
            log.record_status(run, &ExecutionRecord::new(run.clone(), ExecutionStatus::Extracting))
                .await
                .unwrap();
            log.record_status(run, &ExecutionRecord::completed(run.clone(), 1, 0))
                .await
                .unwrap();
        }

        assert!(log.run_status(&runs[0]).await.unwrap().is_none());
        assert!(log.run_status(&runs[1]).await.unwrap().is_some());
        assert!(log.run_status(&runs[2]).await.unwrap().is_some());
        assert_eq!(log.state.read().await.runs.len(), 2);
    }

    #[tokio::test]
    async fn history_is_bounded_and_chronological() {
        let log = InMemoryExecutionLog::new(3);
        for processed in 0..5 {
            log.append_history(&ExecutionRecord::completed(RunId::new(), processed, 0))
                .await
                .unwrap();
        }

        let all: Vec<_> = log.history(10).await.unwrap().iter().map(|r| r.processed).collect();
        assert_eq!(all, vec![2, 3, 4]);
        let recent: Vec<_> = log.history(2).await.unwrap().iter().map(|r| r.processed).collect();
        assert_eq!(recent, vec![3, 4]);
    }
}
