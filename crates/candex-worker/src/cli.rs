//! Command line interface

use std::net::SocketAddr;

use candex_core::{CandidateId, IndexJob};
use candex_indexer::search::{DEFAULT_LIMIT, DEFAULT_SCORE_THRESHOLD, DEFAULT_SIMILAR_LIMIT};
use clap::{Parser, Subcommand, ValueEnum};

#[derive(Debug, Clone, Parser)]
#[command(
    name = "candex",
    version,
    about = "Candidate profile indexing worker",
    long_about = "Keeps the candidate vector collection in step with the candidates table. \
                  Runs the job consumer by default; the other subcommands trigger or inspect the pipeline."
)]
pub struct Cli {
    #[arg(
        long,
        global = true,
        env = "CANDEX_LOG_FORMAT",
        value_enum,
        default_value_t = LogFormat::Json,
        help = "Log output format"
    )]
    pub log_format: LogFormat,
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Json,
    Pretty,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Commands {
    #[command(about = "Consume indexing jobs until interrupted")]
    Worker {
        #[arg(long, env = "METRICS_ADDR", help = "Serve /health and /metrics on this address")]
        metrics_addr: Option<SocketAddr>,
    },
    #[command(about = "Queue an indexing job and return immediately")]
    Enqueue {
        #[arg(value_enum, help = "Job to queue")]
        job: JobKind,
        #[arg(long, help = "Candidate id, required for single-index and delete-point")]
        candidate_id: Option<CandidateId>,
        #[arg(long, default_value = "cli", help = "Recorded as the requester of the job")]
        requested_by: String,
    },
    #[command(about = "Run a sync in the foreground and wait for it")]
    Sync,
    #[command(about = "Show the last pipeline status and last success")]
    Status,
    #[command(about = "Show recent pipeline executions")]
    History {
        #[arg(long, default_value_t = 10, help = "Number of executions to show")]
        limit: usize,
    },
    #[command(about = "Semantic search over indexed candidates")]
    Search {
        #[arg(help = "Search query")]
        query: String,
        #[arg(long, default_value_t = DEFAULT_LIMIT, help = "Maximum number of results (1-50)")]
        limit: usize,
        #[arg(long, default_value_t = DEFAULT_SCORE_THRESHOLD, help = "Minimum similarity score (0.0-1.0)")]
        score_threshold: f32,
        #[arg(long = "skill", help = "Skill filter, repeat for alternatives")]
        skills: Vec<String>,
        #[arg(long, help = "Name filter")]
        name: Option<String>,
    },
    #[command(about = "Find candidates similar to an indexed candidate")]
    Similar {
        #[arg(help = "Reference candidate id")]
        id: CandidateId,
        #[arg(long, default_value_t = DEFAULT_SIMILAR_LIMIT, help = "Maximum number of results (1-50)")]
        limit: usize,
        #[arg(long, default_value_t = 0.0, help = "Minimum similarity score (0.0-1.0)")]
        score_threshold: f32,
    },
    #[command(about = "Show collection size and queue length")]
    Stats,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum JobKind {
    SingleIndex,
    DeletePoint,
    EtlSync,
    FullReindex,
}

impl JobKind {
    /// Build the queue message, checking that per-candidate jobs carry an id.
    pub fn to_job(self, candidate_id: Option<CandidateId>, requested_by: &str) -> Result<IndexJob, String> {
        let job = match (self, candidate_id) {
            (Self::SingleIndex, Some(id)) => IndexJob::single_index(id),
            (Self::DeletePoint, Some(id)) => IndexJob::delete_point(id),
            (Self::SingleIndex | Self::DeletePoint, None) => {
                return Err("--candidate-id is required for this job".to_string());
            }
            (Self::EtlSync, _) => IndexJob::etl_sync(),
            (Self::FullReindex, _) => IndexJob::full_reindex(),
        };
        Ok(job.with_requested_by(requested_by))
    }
}
