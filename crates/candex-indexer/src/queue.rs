//! Durable job queue carrying [`IndexJob`] messages as JSON

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use candex_core::{IndexJob, JobError};
use thiserror::Error;
use tokio::sync::{Mutex, Notify};

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("invalid job: {0}")]
    Job(#[from] JobError),

    #[cfg(feature = "redis")]
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
}

pub type QueueResult<T> = Result<T, QueueError>;

#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Append a job to the tail.
    async fn push(&self, job: &IndexJob) -> QueueResult<()>;

    /// Take the raw payload at the head, waiting up to `timeout`.
    async fn pop(&self, timeout: Duration) -> QueueResult<Option<String>>;

    async fn len(&self) -> QueueResult<usize>;

    fn name(&self) -> &str;
}

/// Process-local queue.
#[derive(Debug, Default)]
pub struct InMemoryJobQueue {
    name: String,
    items: Mutex<VecDeque<String>>,
    notify: Notify,
}

impl InMemoryJobQueue {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Push a payload as is, including ones that are not valid jobs.
    pub async fn push_raw(&self, payload: impl Into<String>) {
        self.items.lock().await.push_back(payload.into());
        self.notify.notify_one();
    }

    /// Snapshot of queued payloads, head first.
    pub async fn payloads(&self) -> Vec<String> {
        self.items.lock().await.iter().cloned().collect()
    }
}

#[async_trait]
impl JobQueue for InMemoryJobQueue {
    async fn push(&self, job: &IndexJob) -> QueueResult<()> {
        self.push_raw(job.to_json()?).await;
        Ok(())
    }

    async fn pop(&self, timeout: Duration) -> QueueResult<Option<String>> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let notified = self.notify.notified();
            if let Some(item) = self.items.lock().await.pop_front() {
                return Ok(Some(item));
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(None);
            }
        }
    }

    async fn len(&self) -> QueueResult<usize> {
        Ok(self.items.lock().await.len())
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(feature = "redis")]
pub use self::redis_queue::RedisJobQueue;

#[cfg(feature = "redis")]
mod redis_queue {
    use super::{JobQueue, QueueResult};
    use async_trait::async_trait;
    use candex_core::IndexJob;
    use redis::aio::ConnectionManager;
    use redis::AsyncCommands;
    use std::time::Duration;

    /// Redis list used as a queue: producers `RPUSH`, the worker `BLPOP`s.
    #[derive(Clone)]
    pub struct RedisJobQueue {
        conn: ConnectionManager,
        key: String,
    }

    impl RedisJobQueue {
        pub fn new(conn: ConnectionManager, key: impl Into<String>) -> Self {
            Self { conn, key: key.into() }
        }
    }

    #[async_trait]
    impl JobQueue for RedisJobQueue {
        async fn push(&self, job: &IndexJob) -> QueueResult<()> {
            let payload = job.to_json()?;
            let mut conn = self.conn.clone();
            conn.rpush::<_, _, ()>(&self.key, payload).await?;
            Ok(())
        }

        async fn pop(&self, timeout: Duration) -> QueueResult<Option<String>> {
            let mut conn = self.conn.clone();
            let popped: Option<(String, String)> = conn.blpop(&self.key, timeout.as_secs_f64()).await?;
            Ok(popped.map(|(_, payload)| payload))
        }

        async fn len(&self) -> QueueResult<usize> {
            let mut conn = self.conn.clone();
            Ok(conn.llen(&self.key).await?)
        }

        fn name(&self) -> &str {
            &self.key
        }
    }

}
