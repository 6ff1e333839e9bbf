//! Candidate records as read from the system of record.
//!
//! [`CandidateRecord`] is the typed row produced by the data-access layer.
//! Text columns are nullable in storage, so validation into a
//! [`ValidatedCandidate`] is an explicit step with a typed failure.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Primary key of a candidate row.
pub type CandidateId = i32;

/// A candidate field that must be present and non-blank before indexing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CandidateField {
    Name,
    Summary,
    Skills,
    Experience,
}

impl CandidateField {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Name => "name",
            Self::Summary => "summary",
            Self::Skills => "skills",
            Self::Experience => "experience",
        }
    }
}

impl std::fmt::Display for CandidateField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("candidate {id}: field `{field}` is missing or blank")]
    BlankField { id: CandidateId, field: CandidateField },
}

impl ValidationError {
    /// Short label used for metrics and log fields.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::BlankField { field, .. } => field.as_str(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateRecord {
    pub id: CandidateId,
    pub name: Option<String>,
    pub summary: Option<String>,
    pub skills: Option<String>,
    pub experience: Option<String>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub last_indexed_at: Option<DateTime<Utc>>,
}

impl CandidateRecord {
    /// A record is stale when it has never been indexed or was edited after
    /// its last indexing.
    pub fn is_stale(&self) -> bool {
        match self.last_indexed_at {
            None => true,
            Some(indexed) => self.updated_at > indexed,
        }
    }

    /// Check that every text attribute is present and non-blank.
    pub fn validate(&self) -> Result<ValidatedCandidate, ValidationError> {
        let name = self.required(CandidateField::Name, self.name.as_deref())?;
        let summary = self.required(CandidateField::Summary, self.summary.as_deref())?;
        let skills = self.required(CandidateField::Skills, self.skills.as_deref())?;
        let experience = self.required(CandidateField::Experience, self.experience.as_deref())?;

        Ok(ValidatedCandidate {
            id: self.id,
            name,
            summary,
            skills,
            experience,
            updated_at: self.updated_at,
        })
    }

    fn required(&self, field: CandidateField, value: Option<&str>) -> Result<String, ValidationError> {
        match value {
            Some(v) if !v.trim().is_empty() => Ok(v.to_string()),
            _ => Err(ValidationError::BlankField { id: self.id, field }),
        }
    }
}

/// A candidate whose text attributes passed validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedCandidate {
    pub id: CandidateId,
    pub name: String,
    pub summary: String,
    pub skills: String,
    pub experience: String,
    pub updated_at: DateTime<Utc>,
}

impl ValidatedCandidate {
    /// Deterministic text fed to the embedding model.
    pub fn context_text(&self) -> String {
        format!(
            "{} | {} | Skills: {} | Experience: {}",
            self.name, self.summary, self.skills, self.experience
        )
    }

    /// Timestamp representation stored in the point payload.
    pub fn updated_at_string(&self) -> String {
        self.updated_at.to_rfc3339()
    }
}
