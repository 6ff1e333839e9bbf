//! Job consumer: pulls jobs off the queue and dispatches them to the pipeline

use std::sync::Arc;
use std::time::Duration;

use candex_core::{IndexJob, JobCommand, JobType};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::metrics;
use crate::pipeline::{Orchestrator, PipelineError, SingleIndexOutcome};
use crate::queue::JobQueue;

const POLL_TIMEOUT: Duration = Duration::from_secs(5);
const QUEUE_ERROR_BACKOFF: Duration = Duration::from_secs(1);

/// What happened to one delivered message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Completed,
    /// Put back on the queue for another delivery.
    Requeued { attempts: u32 },
    /// Not processable. Logged and discarded.
    Dropped(String),
    /// Failed on its last allowed delivery.
    Failed(String),
}

impl JobOutcome {
    fn label(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Requeued { .. } => "requeued",
            Self::Dropped(_) => "dropped",
            Self::Failed(_) => "failed",
        }
    }
}

pub struct JobConsumer {
    queue: Arc<dyn JobQueue>,
    orchestrator: Orchestrator,
    max_attempts: u32,
    poll_timeout: Duration,
}

impl JobConsumer {
    pub fn new(queue: Arc<dyn JobQueue>, orchestrator: Orchestrator, max_attempts: u32) -> Self {
        Self {
            queue,
            orchestrator,
            max_attempts: max_attempts.max(1),
            poll_timeout: POLL_TIMEOUT,
        }
    }

    /// How long one pop waits. Bounds shutdown latency.
    #[must_use]
    pub fn with_poll_timeout(mut self, poll_timeout: Duration) -> Self {
        self.poll_timeout = poll_timeout;
        self
    }

    /// Process jobs one at a time until `cancel` fires. A job already taken
    /// off the queue is finished before returning.
    pub async fn run(&self, cancel: CancellationToken) {
        info!(queue = self.queue.name(), max_attempts = self.max_attempts, "Job consumer started");

        while !cancel.is_cancelled() {
            match self.queue.pop(self.poll_timeout).await {
                Ok(Some(raw)) => {
                    self.handle(&raw).await;
                }
                Ok(None) => {}
                Err(e) => {
                    error!(queue = self.queue.name(), error = %e, "Failed to read from job queue");
                    tokio::select! {
                        () = cancel.cancelled() => break,
                        () = tokio::time::sleep(QUEUE_ERROR_BACKOFF) => {}
                    }
                }
            }
        }

        info!(queue = self.queue.name(), "Job consumer stopped");
    }

    /// Handle one raw queue message.
    pub async fn handle(&self, raw: &str) -> JobOutcome {
        let job = match IndexJob::parse(raw) {
            Ok(job) => job,
            Err(e) => {
                error!(error = %e, payload = raw, "Dropping malformed job");
                return record("invalid", JobOutcome::Dropped(e.to_string()));
            }
        };
        let job_type = match &job.job_type {
            JobType::Unknown(_) => "unknown",
            known => known.as_str(),
        };

        let command = match job.command() {
            Ok(command) => command,
            Err(e) => {
                error!(job_type = %job.job_type, error = %e, "Dropping unprocessable job");
                return record(job_type, JobOutcome::Dropped(e.to_string()));
            }
        };

        debug!(
            job_type,
            candidate_id = ?job.candidate_id,
            requested_by = ?job.requested_by,
            attempts = job.attempts,
            "Processing job"
        );

        let outcome = match self.execute(command).await {
            Ok(()) => JobOutcome::Completed,
            Err(e) => self.on_failure(&job, &e).await,
        };
        record(job_type, outcome)
    }

    async fn execute(&self, command: JobCommand) -> Result<(), PipelineError> {
        match command {
            JobCommand::SingleIndex(id) => match self.orchestrator.index_one(id).await? {
                SingleIndexOutcome::Skipped(reason) => {
                    warn!(candidate_id = id, reason = %reason, "Candidate left unindexed");
                    Ok(())
                }
                SingleIndexOutcome::Indexed | SingleIndexOutcome::Missing => Ok(()),
            },
            JobCommand::DeletePoint(id) => self.orchestrator.delete_point(id).await,
            JobCommand::EtlSync => self.orchestrator.run_sync().await.map(drop),
            JobCommand::FullReindex => self.orchestrator.full_reindex().await.map(drop),
        }
    }

    async fn on_failure(&self, job: &IndexJob, err: &PipelineError) -> JobOutcome {
        let delivery = job.attempts.saturating_add(1);
        if !err.is_retryable() || delivery >= self.max_attempts {
            error!(
                job_type = %job.job_type,
                candidate_id = ?job.candidate_id,
                delivery,
                error = %err,
                "Job failed, giving up"
            );
            return JobOutcome::Failed(err.to_string());
        }

        let retry = job.next_attempt();
        match self.queue.push(&retry).await {
            Ok(()) => {
                warn!(
                    job_type = %job.job_type,
                    candidate_id = ?job.candidate_id,
                    delivery,
                    error = %err,
                    "Job failed, re-enqueued"
                );
                metrics::JOBS_REQUEUED.inc();
                JobOutcome::Requeued {
                    attempts: retry.attempts,
                }
            }
            Err(push_err) => {
                error!(job_type = %job.job_type, error = %push_err, "Failed to re-enqueue job");
                JobOutcome::Failed(err.to_string())
            }
        }
    }
}

fn record(job_type: &str, outcome: JobOutcome) -> JobOutcome {
    metrics::JOBS_PROCESSED
        .with_label_values(&[job_type, outcome.label()])
        .inc();
    outcome
}
