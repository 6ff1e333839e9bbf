//! Candex - candidate indexing worker and admin CLI
//!
//! Without a subcommand the binary runs the job consumer.

use std::net::SocketAddr;
use std::process::ExitCode;

use anyhow::Context;
use candex_core::config::{load_dotenv, EmbeddingSettings, QdrantSettings, RedisSettings};
use candex_core::Config;
use candex_indexer::{metrics, JobConsumer, SearchRequest};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

mod app;
mod cli;
mod server;
mod telemetry;

use cli::{Cli, Commands};

/// Exit code of `similar` when the reference candidate is not indexed.
const EXIT_NOT_FOUND: u8 = 2;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    load_dotenv();
    telemetry::init(cli.log_format);

    match run(cli.command.unwrap_or(Commands::Worker { metrics_addr: None })).await {
        Ok(code) => code,
        Err(e) => {
            error!(error = %format!("{e:#}"), "Command failed");
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(command: Commands) -> anyhow::Result<ExitCode> {
    match command {
        Commands::Worker { metrics_addr } => worker(metrics_addr).await?,
        Commands::Enqueue {
            job,
            candidate_id,
            requested_by,
        } => {
            let job = job.to_job(candidate_id, &requested_by).map_err(anyhow::Error::msg)?;
            let redis = app::redis(&RedisSettings::from_lookup(app::env)?).await?;
            redis.queue.push(&job).await.context("pushing job")?;
            info!(job_type = %job.job_type, candidate_id = ?job.candidate_id, "Job enqueued");
            println!("accepted");
        }
        Commands::Sync => {
            let config = Config::from_env()?;
            let pipeline = app::pipeline(&config).await?;
            let report = pipeline.orchestrator.run_sync().await?;
            print_json(&serde_json::json!({
                "run_id": report.run_id,
                "status": "completed",
                "processed": report.processed,
                "skipped": report.skipped,
            }))?;
        }
        Commands::Status => {
            let redis = app::redis(&RedisSettings::from_lookup(app::env)?).await?;
            print_json(&serde_json::json!({
                "last_status": redis.log.last_status().await?,
                "last_success": redis.log.last_success().await?,
            }))?;
        }
        Commands::History { limit } => {
            let redis = app::redis(&RedisSettings::from_lookup(app::env)?).await?;
            print_json(&redis.log.history(limit).await?)?;
        }
        Commands::Search {
            query,
            limit,
            score_threshold,
            skills,
            name,
        } => {
            let request = SearchRequest {
                query,
                limit,
                score_threshold,
                skills,
                name,
            };
            let hits = app::search_service()?.search(&request).await?;
            print_json(&hits)?;
        }
        Commands::Similar {
            id,
            limit,
            score_threshold,
        } => match app::search_service()?.find_similar(id, limit, score_threshold).await? {
            Some(hits) => print_json(&hits)?,
            None => {
                eprintln!("candidate {id} not found in the index");
                return Ok(ExitCode::from(EXIT_NOT_FOUND));
            }
        },
        Commands::Stats => {
            let qdrant = QdrantSettings::from_lookup(app::env)?;
            let embedding = EmbeddingSettings::from_lookup(app::env)?;
            let store = app::vector_store(&qdrant, &embedding)?;
            let redis = app::redis(&RedisSettings::from_lookup(app::env)?).await?;
            print_json(&serde_json::json!({
                "collection": qdrant.collection,
                "points": store.count().await?,
                "queue": redis.queue.name(),
                "queued_jobs": redis.queue.len().await?,
            }))?;
        }
    }
    Ok(ExitCode::SUCCESS)
}

async fn worker(metrics_addr: Option<SocketAddr>) -> anyhow::Result<()> {
    let config = Config::from_env()?;
    info!(version = env!("CARGO_PKG_VERSION"), "Starting Candex worker");
    metrics::init_metrics();

    let pipeline = app::pipeline(&config).await?;
    let cancel = CancellationToken::new();
    tokio::spawn(shutdown_signal(cancel.clone()));

    let metrics_server = metrics_addr.or(config.metrics_addr).map(|addr| {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if let Err(e) = server::serve(addr, cancel).await {
                error!(error = %e, "Metrics server failed");
            }
        })
    });

    let consumer = JobConsumer::new(pipeline.redis.queue.clone(), pipeline.orchestrator, config.job_max_attempts);
    consumer.run(cancel.clone()).await;

    cancel.cancel();
    if let Some(handle) = metrics_server {
        if let Err(e) = handle.await {
            warn!(error = %e, "Metrics server task ended abnormally");
        }
    }
    info!("Candex worker stopped");
    Ok(())
}

async fn shutdown_signal(cancel: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
    info!("Shutdown requested, finishing the current job");
    cancel.cancel();
}

fn print_json(value: &impl serde::Serialize) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
