//! Pipeline execution records kept for external polling.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Extracting,
    Transforming,
    Loading,
    Completed,
    Failed,
}

impl ExecutionStatus {
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Extracting => "extracting",
            Self::Transforming => "transforming",
            Self::Loading => "loading",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identifier of a single pipeline run. Time-ordered.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(String);

impl RunId {
    pub fn new() -> Self {
        Self(Uuid::now_v7().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<&str> for RunId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub run_id: RunId,
    pub timestamp: DateTime<Utc>,
    pub status: ExecutionStatus,
    pub processed: usize,
    #[serde(default)]
    pub skipped: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ExecutionRecord {
    pub fn new(run_id: RunId, status: ExecutionStatus) -> Self {
        Self {
            run_id,
            timestamp: Utc::now(),
            status,
            processed: 0,
            skipped: 0,
            error: None,
        }
    }

    pub fn completed(run_id: RunId, processed: usize, skipped: usize) -> Self {
        Self {
            processed,
            skipped,
            ..Self::new(run_id, ExecutionStatus::Completed)
        }
    }

    pub fn failed(run_id: RunId, processed: usize, error: impl Into<String>) -> Self {
        Self {
            processed,
            error: Some(error.into()),
            ..Self::new(run_id, ExecutionStatus::Failed)
        }
    }
}
