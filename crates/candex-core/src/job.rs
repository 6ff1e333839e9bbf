//! Indexing jobs exchanged over the job queue.
//!
//! Wire format: `{"job_type": "...", "candidate_id": 42, "requested_by": "...",
//! "timestamp": "RFC3339", "attempts": 0}`. Only `job_type` is mandatory on the
//! wire; [`IndexJob::command`] turns a decoded message into a typed
//! [`JobCommand`] or explains why it cannot be processed.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::candidate::CandidateId;

#[derive(Debug, Error)]
pub enum JobError {
    #[error("malformed job payload: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("unknown job type: {0}")]
    UnknownType(String),
    #[error("{0} job requires candidate_id")]
    MissingCandidateId(JobType),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum JobType {
    SingleIndex,
    DeletePoint,
    EtlSync,
    FullReindex,
    Unknown(String),
}

impl JobType {
    pub fn as_str(&self) -> &str {
        match self {
            Self::SingleIndex => "single_index",
            Self::DeletePoint => "delete_point",
            Self::EtlSync => "etl_sync",
            Self::FullReindex => "full_reindex",
            Self::Unknown(raw) => raw,
        }
    }
}

impl From<&str> for JobType {
    fn from(s: &str) -> Self {
        match s {
            "single_index" => Self::SingleIndex,
            "delete_point" => Self::DeletePoint,
            // legacy producers still emit the batch name
            "etl_sync" | "embedding_batch" => Self::EtlSync,
            "full_reindex" => Self::FullReindex,
            other => Self::Unknown(other.to_string()),
        }
    }
}

impl From<String> for JobType {
    fn from(s: String) -> Self {
        Self::from(s.as_str())
    }
}

impl From<JobType> for String {
    fn from(t: JobType) -> Self {
        t.as_str().to_string()
    }
}

impl std::fmt::Display for JobType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexJob {
    pub job_type: JobType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub candidate_id: Option<CandidateId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requested_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    /// Deliveries that already failed. Absent on first delivery.
    #[serde(default, skip_serializing_if = "is_zero")]
    pub attempts: u32,
}

const fn is_zero(n: &u32) -> bool {
    *n == 0
}

impl IndexJob {
    pub fn new(job_type: JobType, candidate_id: Option<CandidateId>) -> Self {
        Self {
            job_type,
            candidate_id,
            requested_by: None,
            timestamp: Some(Utc::now().to_rfc3339()),
            attempts: 0,
        }
    }

    pub fn single_index(id: CandidateId) -> Self {
        Self::new(JobType::SingleIndex, Some(id))
    }

    pub fn delete_point(id: CandidateId) -> Self {
        Self::new(JobType::DeletePoint, Some(id))
    }

    pub fn etl_sync() -> Self {
        Self::new(JobType::EtlSync, None)
    }

    pub fn full_reindex() -> Self {
        Self::new(JobType::FullReindex, None)
    }

    pub fn with_requested_by(mut self, requested_by: impl Into<String>) -> Self {
        self.requested_by = Some(requested_by.into());
        self
    }

    /// Decode a raw queue message.
    pub fn parse(raw: &str) -> Result<Self, JobError> {
        Ok(serde_json::from_str(raw)?)
    }

    pub fn to_json(&self) -> Result<String, JobError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Copy of this job for re-delivery after a failed attempt.
    #[must_use]
    pub fn next_attempt(&self) -> Self {
        let mut job = self.clone();
        job.attempts = self.attempts.saturating_add(1);
        job
    }

    pub fn command(&self) -> Result<JobCommand, JobError> {
        let require_id = || {
            self.candidate_id
                .ok_or_else(|| JobError::MissingCandidateId(self.job_type.clone()))
        };
        match &self.job_type {
            JobType::SingleIndex => Ok(JobCommand::SingleIndex(require_id()?)),
            JobType::DeletePoint => Ok(JobCommand::DeletePoint(require_id()?)),
            JobType::EtlSync => Ok(JobCommand::EtlSync),
            JobType::FullReindex => Ok(JobCommand::FullReindex),
            JobType::Unknown(raw) => Err(JobError::UnknownType(raw.clone())),
        }
    }
}

/// What a job asks the worker to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobCommand {
    SingleIndex(CandidateId),
    DeletePoint(CandidateId),
    EtlSync,
    FullReindex,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_message() {
        let job = IndexJob::parse(r#"{"job_type":"etl_sync"}"#).unwrap();
        assert_eq!(job.job_type, JobType::EtlSync);
        assert_eq!(job.attempts, 0);
        assert_eq!(job.command().unwrap(), JobCommand::EtlSync);
    }

    #[test]
    fn embedding_batch_is_an_etl_sync_alias() {
        let job = IndexJob::parse(r#"{"job_type":"embedding_batch","requested_by":"cron"}"#).unwrap();
        assert_eq!(job.command().unwrap(), JobCommand::EtlSync);
    }

    #[test]
    fn single_index_requires_candidate_id() {
        let job = IndexJob::parse(r#"{"job_type":"single_index"}"#).unwrap();
        assert!(matches!(
            job.command(),
            Err(JobError::MissingCandidateId(JobType::SingleIndex))
        ));

        let job = IndexJob::parse(r#"{"job_type":"single_index","candidate_id":42}"#).unwrap();
        assert_eq!(job.command().unwrap(), JobCommand::SingleIndex(42));
    }

    #[test]
    fn unknown_type_is_rejected_by_command() {
        let job = IndexJob::parse(r#"{"job_type":"rebuild_everything"}"#).unwrap();
        assert!(matches!(job.command(), Err(JobError::UnknownType(t)) if t == "rebuild_everything"));
    }

    #[test]
    fn malformed_json_is_an_error() {
        assert!(matches!(IndexJob::parse("not json"), Err(JobError::Malformed(_))));
        assert!(matches!(
            IndexJob::parse(r#"{"candidate_id":1}"#),
            Err(JobError::Malformed(_))
        ));
    }

    #[test]
    fn serializes_wire_names() {
        let job = IndexJob::delete_point(9).with_requested_by("api");
        let value: serde_json::Value = serde_json::from_str(&job.to_json().unwrap()).unwrap();
        assert_eq!(value["job_type"], "delete_point");
        assert_eq!(value["candidate_id"], 9);
        assert_eq!(value["requested_by"], "api");
        assert!(value.get("attempts").is_none());
    }

    #[test]
    fn next_attempt_increments_counter() {
        let job = IndexJob::single_index(3).next_attempt().next_attempt();
        assert_eq!(job.attempts, 2);
        let reparsed = IndexJob::parse(&job.to_json().unwrap()).unwrap();
        assert_eq!(reparsed.attempts, 2);
    }
}
