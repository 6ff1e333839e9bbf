//! Pipeline orchestrator: extract, transform and load as one unit of work
//!
//! A sync run moves through `extracting -> transforming -> loading ->
//! completed`, or to `failed` from any of them. Every transition is written
//! to the execution log. Runs are safe to repeat: staleness is recomputed on
//! each run and upsert plus mark overwrite rather than accumulate.

use std::sync::Arc;
use std::time::Instant;

use candex_core::{CandidateId, ExecutionRecord, ExecutionStatus, RunId};
use thiserror::Error;
use tracing::{error, info, warn};

use crate::extract::{CandidateSource, SourceError};
use crate::load::{LoadError, Loader};
use crate::metrics;
use crate::status::ExecutionLog;
use crate::transform::{Prepared, SkipReason, TransformError, Transformer};

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("extract failed: {0}")]
    Extract(#[from] SourceError),

    #[error("transform failed: {0}")]
    Transform(#[from] TransformError),

    #[error("load failed: {0}")]
    Load(#[from] LoadError),
}

impl PipelineError {
    /// Whether running the same job again later may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Extract(_) => true,
            Self::Transform(TransformError::ProviderDown { .. }) => true,
            Self::Transform(TransformError::Config(_)) => false,
            Self::Load(LoadError::Vector(e)) => e.is_transient(),
            Self::Load(LoadError::Source(_)) => true,
        }
    }
}

/// Outcome of a completed sync run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineReport {
    pub run_id: RunId,
    /// Ids upserted and marked indexed.
    pub processed: usize,
    pub skipped: usize,
}

/// Outcome of indexing one candidate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SingleIndexOutcome {
    Indexed,
    Skipped(SkipReason),
    /// The row no longer exists.
    Missing,
}

#[derive(Clone)]
pub struct Orchestrator {
    source: Arc<dyn CandidateSource>,
    transformer: Transformer,
    loader: Loader,
    log: Arc<dyn ExecutionLog>,
}

impl Orchestrator {
    pub fn new(
        source: Arc<dyn CandidateSource>,
        transformer: Transformer,
        loader: Loader,
        log: Arc<dyn ExecutionLog>,
    ) -> Self {
        Self {
            source,
            transformer,
            loader,
            log,
        }
    }

    pub fn loader(&self) -> &Loader {
        &self.loader
    }

    pub fn execution_log(&self) -> &Arc<dyn ExecutionLog> {
        &self.log
    }

    /// Index every stale candidate.
    pub async fn run_sync(&self) -> Result<PipelineReport, PipelineError> {
        self.tracked("etl_sync", RunId::new(), |run_id| self.sync(run_id)).await
    }

    /// Make every candidate stale, rebuild the collection, then sync.
    pub async fn full_reindex(&self) -> Result<PipelineReport, PipelineError> {
        self.tracked("full_reindex", RunId::new(), |run_id| async move {
            let reset = self.source.reset_all_indexed().await?;
            info!(run_id = %run_id, reset, "Reset indexing state of all candidates");
            self.loader.rebuild().await?;
            self.sync(run_id).await
        })
        .await
    }

    /// Index one candidate regardless of staleness.
    ///
    /// An invalid row is a successful skip. A provider failure is an error
    /// so the job can be delivered again.
    pub async fn index_one(&self, id: CandidateId) -> Result<SingleIndexOutcome, PipelineError> {
        let Some(record) = self.source.fetch_by_id(id).await? else {
            warn!(candidate_id = id, "Candidate not found, nothing to index");
            return Ok(SingleIndexOutcome::Missing);
        };

        let point = match self.transformer.prepare(&record).await? {
            Prepared::Point(point) => point,
            Prepared::Skipped(SkipReason::Embedding(last)) => {
                return Err(TransformError::ProviderDown { attempted: 1, last }.into());
            }
            Prepared::Skipped(reason) => return Ok(SingleIndexOutcome::Skipped(reason)),
        };

        self.loader.ensure_collection().await?;
        self.loader.load(vec![point]).await?;
        info!(candidate_id = id, "Indexed candidate");
        Ok(SingleIndexOutcome::Indexed)
    }

    /// Remove one candidate from the collection.
    pub async fn delete_point(&self, id: CandidateId) -> Result<(), PipelineError> {
        self.loader.delete(id).await?;
        info!(candidate_id = id, "Deleted candidate point");
        Ok(())
    }

    async fn sync(&self, run_id: RunId) -> Result<PipelineReport, PipelineError> {
        self.loader.ensure_collection().await?;

        let records = self.source.fetch_stale().await?;
        if records.is_empty() {
            info!(run_id = %run_id, "No stale candidates");
            return Ok(PipelineReport {
                run_id,
                processed: 0,
                skipped: 0,
            });
        }
        info!(run_id = %run_id, stale = records.len(), "Extracted stale candidates");

        self.set_status(&run_id, ExecutionStatus::Transforming).await;
        let batch = self.transformer.prepare_batch(&records).await?;
        let skipped = batch.skipped.len();

        self.set_status(&run_id, ExecutionStatus::Loading).await;
        let marked = self.loader.load(batch.points).await?;

        Ok(PipelineReport {
            run_id,
            processed: marked.len(),
            skipped,
        })
    }

    /// Wrap a run with status transitions, history, and duration metrics.
    async fn tracked<F, Fut>(&self, kind: &'static str, run_id: RunId, run: F) -> Result<PipelineReport, PipelineError>
    where
        F: FnOnce(RunId) -> Fut,
        Fut: std::future::Future<Output = Result<PipelineReport, PipelineError>>,
    {
        let started = Instant::now();
        info!(run_id = %run_id, kind, "Pipeline run started");
        self.set_status(&run_id, ExecutionStatus::Extracting).await;

        let result = run(run_id.clone()).await;
        let elapsed = started.elapsed();

        match &result {
            Ok(report) => {
                let record = ExecutionRecord::completed(run_id.clone(), report.processed, report.skipped);
                self.finish(&run_id, &record, true).await;
                info!(
                    run_id = %run_id,
                    kind,
                    processed = report.processed,
                    skipped = report.skipped,
                    elapsed_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
                    "Pipeline run completed"
                );
            }
            Err(e) => {
                let record = ExecutionRecord::failed(run_id.clone(), 0, e.to_string());
                self.finish(&run_id, &record, false).await;
                error!(run_id = %run_id, kind, error = %e, "Pipeline run failed");
            }
        }

        let status = if result.is_ok() { "completed" } else { "failed" };
        metrics::RUN_DURATION
            .with_label_values(&[kind, status])
            .observe(elapsed.as_secs_f64());
        result
    }

    async fn set_status(&self, run_id: &RunId, status: ExecutionStatus) {
        let record = ExecutionRecord::new(run_id.clone(), status);
        if let Err(e) = self.log.record_status(run_id, &record).await {
            warn!(run_id = %run_id, status = %status, error = %e, "Failed to record pipeline status");
        }
    }

    async fn finish(&self, run_id: &RunId, record: &ExecutionRecord, success: bool) {
        if let Err(e) = self.log.record_status(run_id, record).await {
            warn!(run_id = %run_id, error = %e, "Failed to record pipeline status");
        }
        if let Err(e) = self.log.append_history(record).await {
            warn!(run_id = %run_id, error = %e, "Failed to append execution history");
        }
        if success {
            if let Err(e) = self.log.mark_success(record).await {
                warn!(run_id = %run_id, error = %e, "Failed to update last success");
            }
        }
    }
}
