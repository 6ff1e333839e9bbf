//! Transform stage: validate a candidate row and turn it into an index point

use candex_core::{CandidateId, CandidateRecord, ValidationError};
use candex_embedding::{EmbeddingError, EmbeddingGenerator, InputType};
use candex_vector::IndexPoint;
use thiserror::Error;
use tracing::{error, warn};

use crate::metrics;
use crate::retry::RetryPolicy;

/// Why a row was left out of the batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    Invalid(ValidationError),
    Embedding(EmbeddingError),
}

impl SkipReason {
    /// Metric label.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Invalid(e) => e.reason(),
            Self::Embedding(_) => "embedding",
        }
    }
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Invalid(e) => write!(f, "{e}"),
            Self::Embedding(e) => write!(f, "{e}"),
        }
    }
}

/// Result of preparing one row.
#[derive(Debug, Clone, PartialEq)]
pub enum Prepared {
    Point(IndexPoint),
    Skipped(SkipReason),
}

impl Prepared {
    pub fn point(self) -> Option<IndexPoint> {
        match self {
            Self::Point(point) => Some(point),
            Self::Skipped(_) => None,
        }
    }
}

/// Failures that abort the whole batch instead of a single row.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TransformError {
    #[error("embedding configuration error: {0}")]
    Config(EmbeddingError),

    #[error("embedding provider failed for all {attempted} valid records: {last}")]
    ProviderDown { attempted: usize, last: EmbeddingError },
}

/// Points of a batch plus the rows that were skipped.
#[derive(Debug, Default)]
pub struct TransformedBatch {
    pub points: Vec<IndexPoint>,
    pub skipped: Vec<(CandidateId, SkipReason)>,
}

impl TransformedBatch {
    pub fn ids(&self) -> Vec<CandidateId> {
        self.points.iter().filter_map(IndexPoint::candidate_id).collect()
    }
}

#[derive(Debug, Clone)]
pub struct Transformer {
    generator: EmbeddingGenerator,
    retry: RetryPolicy,
}

impl Transformer {
    pub fn new(generator: EmbeddingGenerator, retry: RetryPolicy) -> Self {
        Self { generator, retry }
    }

    pub fn dimension(&self) -> usize {
        self.generator.dimension()
    }

    /// Validate `record` and embed its context text as a document.
    ///
    /// Validation and provider failures skip the row. A dimension mismatch
    /// means the deployment is misconfigured and is returned as an error.
    pub async fn prepare(&self, record: &CandidateRecord) -> Result<Prepared, TransformError> {
        let candidate = match record.validate() {
            Ok(candidate) => candidate,
            Err(e) => {
                warn!(candidate_id = record.id, reason = e.reason(), "Skipping invalid candidate");
                return Ok(self.skip(SkipReason::Invalid(e)));
            }
        };

        let text = candidate.context_text();
        let embedded = self
            .retry
            .run(
                "embed",
                || self.generator.embed(&text, InputType::SearchDocument),
                EmbeddingError::is_transient,
            )
            .await;

        match embedded {
            Ok(vector) => Ok(Prepared::Point(IndexPoint::from_candidate(&candidate, vector))),
            Err(e) if e.is_config() => {
                error!(candidate_id = record.id, error = %e, "Embedding dimension does not match the collection");
                Err(TransformError::Config(e))
            }
            Err(e) => {
                error!(candidate_id = record.id, error = %e, "Embedding failed, skipping candidate");
                Ok(self.skip(SkipReason::Embedding(e)))
            }
        }
    }

    /// Prepare every record independently.
    ///
    /// When no point came out of a batch and at least one row failed at the
    /// provider, every row that passed validation failed to embed. That
    /// outage is reported as [`TransformError::ProviderDown`]; rows skipped
    /// as invalid do not hide it.
    pub async fn prepare_batch(&self, records: &[CandidateRecord]) -> Result<TransformedBatch, TransformError> {
        let mut batch = TransformedBatch::default();
        let mut last_provider_error = None;
        let mut provider_failures = 0;

        for record in records {
            match self.prepare(record).await? {
                Prepared::Point(point) => batch.points.push(point),
                Prepared::Skipped(reason) => {
                    if let SkipReason::Embedding(e) = &reason {
                        provider_failures += 1;
                        last_provider_error = Some(e.clone());
                    }
                    batch.skipped.push((record.id, reason));
                }
            }
        }

        match last_provider_error {
            Some(last) if batch.points.is_empty() => Err(TransformError::ProviderDown {
                attempted: provider_failures,
                last,
            }),
            _ => Ok(batch),
        }
    }

    fn skip(&self, reason: SkipReason) -> Prepared {
        metrics::RECORDS_SKIPPED.with_label_values(&[reason.label()]).inc();
        Prepared::Skipped(reason)
    }
}
