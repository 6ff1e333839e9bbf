//! Qdrant vector store implementation

use async_trait::async_trait;
use candex_core::Distance;
use qdrant_client::qdrant::{
    point_id::PointIdOptions, value::Kind, vector_output, Condition, CreateCollectionBuilder,
    CreateFieldIndexCollectionBuilder, DeletePointsBuilder, FieldType, Filter, GetPointsBuilder,
    PointId, PointStruct, PointsIdsList, SearchPointsBuilder, UpsertPointsBuilder, Value,
    VectorParamsBuilder, VectorsOutput,
};
use qdrant_client::{Payload, Qdrant};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::{VectorError, VectorResult};
use crate::store::{check_dimension, VectorStore};
use crate::types::{CollectionConfig, IndexPoint, PointPayload, ScoredPoint, SearchFilter, SearchQuery};

/// Payload fields that get a full-text index so filters do not scan.
const TEXT_INDEXED_FIELDS: [&str; 2] = ["name", "text_content"];

/// Configuration for Qdrant connection
#[derive(Debug, Clone)]
pub struct QdrantConfig {
    /// Qdrant gRPC URL
    pub url: String,
    /// API key (optional)
    pub api_key: Option<String>,
    /// Request timeout in seconds
    pub timeout_secs: u64,
    /// Collection served by the store
    pub collection: CollectionConfig,
}

impl QdrantConfig {
    pub fn new(url: impl Into<String>, collection: CollectionConfig) -> Self {
        Self {
            url: url.into(),
            api_key: None,
            timeout_secs: 30,
            collection,
        }
    }

    /// Set API key
    pub fn with_api_key(mut self, api_key: Option<String>) -> Self {
        self.api_key = api_key;
        self
    }

    /// Set request timeout
    pub fn with_timeout(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = timeout_secs;
        self
    }
}

/// Qdrant vector store implementation
pub struct QdrantVectorStore {
    client: Qdrant,
    config: QdrantConfig,
}

fn backend_err(e: impl std::fmt::Display) -> VectorError {
    VectorError::backend("qdrant", e.to_string())
}

impl QdrantVectorStore {
    /// Build the client. No request is made until the first call.
    pub fn new(config: QdrantConfig) -> VectorResult<Self> {
        let client = Qdrant::from_url(&config.url)
            .api_key(config.api_key.clone())
            .timeout(Duration::from_secs(config.timeout_secs))
            .connect_timeout(Duration::from_secs(config.timeout_secs.min(10)))
            .build()
            .map_err(|e| VectorError::connection(e.to_string()))?;

        Ok(Self { client, config })
    }

    fn name(&self) -> &str {
        &self.config.collection.name
    }

    fn qdrant_distance(distance: Distance) -> qdrant_client::qdrant::Distance {
        match distance {
            Distance::Cosine => qdrant_client::qdrant::Distance::Cosine,
            Distance::Euclid => qdrant_client::qdrant::Distance::Euclid,
            Distance::Dot => qdrant_client::qdrant::Distance::Dot,
        }
    }

    async fn create(&self) -> VectorResult<()> {
        let collection = &self.config.collection;
        self.client
            .create_collection(
                CreateCollectionBuilder::new(collection.name.clone()).vectors_config(
                    VectorParamsBuilder::new(
                        collection.dimension as u64,
                        Self::qdrant_distance(collection.distance),
                    ),
                ),
            )
            .await
            .map_err(backend_err)?;

        info!(
            collection = %collection.name,
            dimension = collection.dimension,
            distance = %collection.distance,
            "Created Qdrant collection"
        );
        Ok(())
    }

    /// Create whichever full-text payload indexes the collection lacks.
    async fn ensure_text_indexes(&self) -> VectorResult<()> {
        let info = self
            .client
            .collection_info(self.name())
            .await
            .map_err(backend_err)?;
        let indexed: Vec<String> = info
            .result
            .map(|r| r.payload_schema.into_keys().collect())
            .unwrap_or_default();

        for field in missing_text_indexes(&indexed) {
            self.client
                .create_field_index(
                    CreateFieldIndexCollectionBuilder::new(self.name(), field, FieldType::Text).wait(true),
                )
                .await
                .map_err(backend_err)?;
            info!(collection = %self.name(), field, "Created full-text payload index");
        }
        Ok(())
    }

    fn to_point(point: IndexPoint) -> PointStruct {
        let payload = Payload::from([
            ("name", Value::from(point.payload.name)),
            ("text_content", Value::from(point.payload.text_content)),
            ("update_at", Value::from(point.payload.update_at)),
        ]);
        PointStruct::new(point.id, point.vector, payload)
    }

    fn numeric_id(id: Option<&PointId>) -> Option<u64> {
        match id.and_then(|id| id.point_id_options.as_ref()) {
            Some(PointIdOptions::Num(n)) => Some(*n),
            _ => None,
        }
    }

    fn string_value(payload: &HashMap<String, Value>, key: &str) -> Option<String> {
        payload.get(key).and_then(|v| match &v.kind {
            Some(Kind::StringValue(s)) => Some(s.clone()),
            _ => None,
        })
    }

    fn to_payload(payload: &HashMap<String, Value>) -> PointPayload {
        PointPayload {
            name: Self::string_value(payload, "name").unwrap_or_default(),
            text_content: Self::string_value(payload, "text_content").unwrap_or_default(),
            update_at: Self::string_value(payload, "update_at")
                .or_else(|| Self::string_value(payload, "updated_at"))
                .unwrap_or_default(),
        }
    }

    fn dense_vector(vectors: Option<&VectorsOutput>) -> Option<Vec<f32>> {
        match vectors?.get_vector()? {
            vector_output::Vector::Dense(dense) => Some(dense.data),
            _ => None,
        }
    }

    fn build_filter(filter: &SearchFilter) -> Option<Filter> {
        let mut must: Vec<Condition> = Vec::new();

        if let Some(name) = &filter.name {
            must.push(Condition::matches_text("name", name.clone()));
        }

        if !filter.skills_any.is_empty() {
            let any_skill = Filter::should(
                filter
                    .skills_any
                    .iter()
                    .map(|skill| Condition::matches_text("text_content", skill.clone())),
            );
            must.push(Condition::from(any_skill));
        }

        let must_not: Vec<Condition> = filter
            .exclude_id
            .map(|id| Condition::has_id([id]))
            .into_iter()
            .collect();

        if must.is_empty() && must_not.is_empty() {
            return None;
        }

        let mut qdrant_filter = Filter::must(must);
        qdrant_filter.must_not = must_not;
        Some(qdrant_filter)
    }
}

/// Fields of [`TEXT_INDEXED_FIELDS`] absent from `indexed`.
fn missing_text_indexes(indexed: &[String]) -> Vec<&'static str> {
    TEXT_INDEXED_FIELDS
        .into_iter()
        .filter(|field| !indexed.iter().any(|f| f == field))
        .collect()
}

#[async_trait]
impl VectorStore for QdrantVectorStore {
    async fn ensure_collection(&self) -> VectorResult<bool> {
        let exists = self
            .client
            .collection_exists(self.name())
            .await
            .map_err(backend_err)?;

        let created = if exists {
            false
        } else {
            match self.create().await {
                Ok(()) => true,
                Err(e) => {
                    // Another worker may have created it between the check and the create.
                    let exists_now = self
                        .client
                        .collection_exists(self.name())
                        .await
                        .map_err(backend_err)?;
                    if !exists_now {
                        return Err(e);
                    }
                    debug!(collection = %self.name(), "Collection created concurrently");
                    false
                }
            }
        };

        self.ensure_text_indexes().await?;
        Ok(created)
    }

    async fn recreate_collection(&self) -> VectorResult<()> {
        let exists = self
            .client
            .collection_exists(self.name())
            .await
            .map_err(backend_err)?;
        if exists {
            self.client
                .delete_collection(self.name())
                .await
                .map_err(backend_err)?;
            warn!(collection = %self.name(), "Dropped Qdrant collection");
        }
        self.create().await?;
        self.ensure_text_indexes().await
    }

    async fn upsert(&self, points: Vec<IndexPoint>) -> VectorResult<usize> {
        check_dimension(&self.config.collection, &points)?;
        if points.is_empty() {
            return Ok(0);
        }

        let written = points.len();
        let points: Vec<PointStruct> = points.into_iter().map(Self::to_point).collect();

        self.client
            .upsert_points(UpsertPointsBuilder::new(self.name(), points).wait(true))
            .await
            .map_err(backend_err)?;

        debug!(count = written, "Points upserted to Qdrant");
        Ok(written)
    }

    async fn get(&self, id: u64) -> VectorResult<Option<IndexPoint>> {
        let response = self
            .client
            .get_points(
                GetPointsBuilder::new(self.name(), vec![PointId::from(id)])
                    .with_vectors(true)
                    .with_payload(true),
            )
            .await;

        let response = match response {
            Ok(response) => response,
            Err(e) => {
                // A missing collection holds no points.
                if !self.client.collection_exists(self.name()).await.map_err(backend_err)? {
                    debug!(collection = %self.name(), id, "Collection absent, point not found");
                    return Ok(None);
                }
                return Err(backend_err(e));
            }
        };

        let Some(point) = response.result.into_iter().next() else {
            return Ok(None);
        };

        let vector = Self::dense_vector(point.vectors.as_ref())
            .ok_or_else(|| VectorError::backend("qdrant", format!("point {id} has no dense vector")))?;

        Ok(Some(IndexPoint {
            id,
            vector,
            payload: Self::to_payload(&point.payload),
        }))
    }

    async fn delete(&self, id: u64) -> VectorResult<()> {
        self.client
            .delete_points(
                DeletePointsBuilder::new(self.name())
                    .points(PointsIdsList::from(vec![id]))
                    .wait(true),
            )
            .await
            .map_err(backend_err)?;

        debug!(id, "Point deleted from Qdrant");
        Ok(())
    }

    async fn search(&self, query: SearchQuery) -> VectorResult<Vec<ScoredPoint>> {
        query
            .validate(self.config.collection.dimension)
            .map_err(VectorError::InvalidQuery)?;

        let mut request = SearchPointsBuilder::new(self.name(), query.vector, query.limit as u64)
            .with_payload(true);
        if let Some(threshold) = query.score_threshold {
            request = request.score_threshold(threshold);
        }
        if let Some(filter) = Self::build_filter(&query.filter) {
            request = request.filter(filter);
        }

        let response = self
            .client
            .search_points(request)
            .await
            .map_err(backend_err)?;

        let mut results = Vec::with_capacity(response.result.len());
        for point in response.result {
            match Self::numeric_id(point.id.as_ref()) {
                Some(id) => results.push(ScoredPoint {
                    id,
                    score: point.score,
                    payload: Self::to_payload(&point.payload),
                }),
                None => warn!(id = ?point.id, "Skipping search result without numeric id"),
            }
        }

        Ok(results)
    }

    async fn count(&self) -> VectorResult<usize> {
        let info = self
            .client
            .collection_info(self.name())
            .await
            .map_err(backend_err)?;

        let count = info.result.and_then(|r| r.points_count).unwrap_or(0);
        Ok(usize::try_from(count).unwrap_or(usize::MAX))
    }

    fn collection(&self) -> &CollectionConfig {
        &self.config.collection
    }

    fn backend_name(&self) -> &'static str {
        "qdrant"
    }
}
