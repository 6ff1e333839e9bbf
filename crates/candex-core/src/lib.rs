//! Domain types shared by the Candex indexing crates.

pub mod candidate;
pub mod config;
pub mod execution;
pub mod job;

pub use candidate::{CandidateField, CandidateId, CandidateRecord, ValidatedCandidate, ValidationError};
pub use config::{Config, ConfigError, Distance};
pub use execution::{ExecutionRecord, ExecutionStatus, RunId};
pub use job::{IndexJob, JobCommand, JobError, JobType};

pub const CORE_VERSION: &str = env!("CARGO_PKG_VERSION");
