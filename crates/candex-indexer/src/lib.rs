//! Candex Indexer - keeps the candidate vector collection in step with the
//! relational system of record
//!
//! This crate provides:
//! - Extract, transform and load stages over pluggable backends
//! - The pipeline orchestrator and its execution log
//! - A job queue and the consumer that drives the pipeline from it
//! - The search read path
//! - PostgreSQL (`postgres` feature) and Redis (`redis` feature) backends

pub mod consumer;
pub mod extract;
pub mod load;
pub mod metrics;
pub mod pipeline;
pub mod queue;
pub mod retry;
pub mod search;
pub mod status;
pub mod transform;

#[cfg(feature = "postgres")]
pub mod postgres;

pub use consumer::{JobConsumer, JobOutcome};
pub use extract::{CandidateSource, InMemoryCandidateSource, SourceError, SourceResult};
pub use load::{LoadError, Loader};
pub use pipeline::{Orchestrator, PipelineError, PipelineReport, SingleIndexOutcome};
pub use queue::{InMemoryJobQueue, JobQueue, QueueError, QueueResult};
pub use retry::RetryPolicy;
pub use search::{SearchError, SearchHit, SearchRequest, SearchService};
pub use status::{ExecutionLog, InMemoryExecutionLog, StatusError, StatusResult};
pub use transform::{Prepared, SkipReason, TransformError, TransformedBatch, Transformer};

#[cfg(feature = "postgres")]
pub use postgres::PgCandidateSource;
#[cfg(feature = "redis")]
pub use queue::RedisJobQueue;
#[cfg(feature = "redis")]
pub use status::RedisExecutionLog;

/// Open a reconnecting Redis connection shared by the queue and the
/// execution log.
#[cfg(feature = "redis")]
pub async fn connect_redis(url: &str) -> redis::RedisResult<redis::aio::ConnectionManager> {
    let client = redis::Client::open(url)?;
    redis::aio::ConnectionManager::new(client).await
}
