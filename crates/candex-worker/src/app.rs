//! Process wiring: every backend is built once here and handed to the
//! components that use it.

use std::sync::Arc;

use anyhow::Context;
use candex_core::config::{redact_url, EmbeddingSettings, QdrantSettings, RedisSettings};
use candex_core::Config;
use candex_embedding::{CohereEmbeddingProvider, EmbeddingGenerator};
use candex_indexer::postgres::{init_pool, PgCandidateSource};
use candex_indexer::{
    CandidateSource, ExecutionLog, JobQueue, Loader, Orchestrator, RedisExecutionLog, RedisJobQueue, RetryPolicy,
    SearchService, Transformer,
};
use candex_vector::{CollectionConfig, QdrantConfig, QdrantVectorStore, VectorStore};
use tracing::info;

const DB_MAX_CONNECTIONS: u32 = 5;

pub fn env(key: &str) -> Option<String> {
    std::env::var(key).ok()
}

/// Queue and execution log, both on the same Redis connection.
#[derive(Clone)]
pub struct RedisBackends {
    pub queue: Arc<dyn JobQueue>,
    pub log: Arc<dyn ExecutionLog>,
}

pub async fn redis(settings: &RedisSettings) -> anyhow::Result<RedisBackends> {
    let conn = candex_indexer::connect_redis(&settings.url)
        .await
        .with_context(|| format!("connecting to redis at {}", redact_url(&settings.url)))?;
    info!(url = %redact_url(&settings.url), queue = %settings.queue, "Connected to Redis");

    Ok(RedisBackends {
        queue: Arc::new(RedisJobQueue::new(conn.clone(), settings.queue.clone())),
        log: Arc::new(RedisExecutionLog::new(
            conn,
            settings.status_prefix.clone(),
            settings.history_limit,
        )),
    })
}

pub fn collection(qdrant: &QdrantSettings, embedding: &EmbeddingSettings) -> CollectionConfig {
    CollectionConfig::new(qdrant.collection.clone(), embedding.dimension, embedding.distance)
}

pub fn vector_store(qdrant: &QdrantSettings, embedding: &EmbeddingSettings) -> anyhow::Result<Arc<dyn VectorStore>> {
    let config = QdrantConfig::new(qdrant.url.clone(), collection(qdrant, embedding)).with_api_key(qdrant.api_key.clone());
    let store = QdrantVectorStore::new(config).context("building qdrant client")?;
    info!(url = %qdrant.url, collection = %qdrant.collection, "Vector store configured");
    Ok(Arc::new(store))
}

pub fn embedding_generator(settings: &EmbeddingSettings) -> anyhow::Result<EmbeddingGenerator> {
    let provider = CohereEmbeddingProvider::new(&settings.api_key, &settings.base_url, &settings.model)
        .context("building embedding provider")?;
    info!(model = %settings.model, dimension = settings.dimension, "Embedding provider configured");
    Ok(EmbeddingGenerator::new(Arc::new(provider), settings.dimension))
}

pub async fn candidate_source(database_url: &str) -> anyhow::Result<Arc<dyn CandidateSource>> {
    let pool = init_pool(database_url, DB_MAX_CONNECTIONS)
        .await
        .with_context(|| format!("connecting to {}", redact_url(database_url)))?;
    info!(url = %redact_url(database_url), "Connected to PostgreSQL");
    Ok(Arc::new(PgCandidateSource::new(pool)))
}

/// Everything the worker and the synchronous trigger need.
pub struct Pipeline {
    pub orchestrator: Orchestrator,
    pub redis: RedisBackends,
}

pub async fn pipeline(config: &Config) -> anyhow::Result<Pipeline> {
    let retry = RetryPolicy::from(config.retry);
    let source = candidate_source(&config.database_url).await?;
    let store = vector_store(&config.qdrant, &config.embedding)?;
    let generator = embedding_generator(&config.embedding)?;
    let redis = redis(&config.redis).await?;

    let orchestrator = Orchestrator::new(
        source.clone(),
        Transformer::new(generator, retry.clone()),
        Loader::new(store, source, retry),
        redis.log.clone(),
    );
    Ok(Pipeline { orchestrator, redis })
}

pub fn search_service() -> anyhow::Result<SearchService> {
    let qdrant = QdrantSettings::from_lookup(env)?;
    let embedding = EmbeddingSettings::from_lookup(env)?;
    let store = vector_store(&qdrant, &embedding)?;
    Ok(SearchService::new(store, embedding_generator(&embedding)?))
}
