//! Search service: semantic lookup over the candidate collection

use std::sync::Arc;

use candex_core::CandidateId;
use candex_embedding::{EmbeddingError, EmbeddingGenerator, InputType};
use candex_vector::{point_id, ScoredPoint, SearchFilter, SearchQuery, VectorError, VectorStore};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

pub const DEFAULT_LIMIT: usize = 10;
pub const MAX_LIMIT: usize = 50;
pub const DEFAULT_SCORE_THRESHOLD: f32 = 0.2;
pub const DEFAULT_SIMILAR_LIMIT: usize = 5;
pub const MIN_QUERY_CHARS: usize = 3;

/// Search request parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchRequest {
    pub query: String,
    pub limit: usize,
    pub score_threshold: f32,
    /// Any of these must match the candidate text.
    pub skills: Vec<String>,
    /// Must match the candidate name.
    pub name: Option<String>,
}

impl SearchRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            limit: DEFAULT_LIMIT,
            score_threshold: DEFAULT_SCORE_THRESHOLD,
            skills: Vec::new(),
            name: None,
        }
    }

    #[must_use]
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    #[must_use]
    pub fn with_score_threshold(mut self, threshold: f32) -> Self {
        self.score_threshold = threshold;
        self
    }

    #[must_use]
    pub fn with_skill(mut self, skill: impl Into<String>) -> Self {
        self.skills.push(skill.into());
        self
    }

    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn validate(&self) -> Result<(), SearchError> {
        if self.query.trim().chars().count() < MIN_QUERY_CHARS {
            return Err(SearchError::InvalidQuery(format!(
                "query must have at least {MIN_QUERY_CHARS} characters"
            )));
        }
        validate_bounds(self.limit, self.score_threshold)
    }

    fn filter(&self) -> SearchFilter {
        SearchFilter {
            name: self
                .name
                .as_deref()
                .map(str::trim)
                .filter(|n| !n.is_empty())
                .map(str::to_string),
            skills_any: self
                .skills
                .iter()
                .map(|s| s.trim())
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
            exclude_id: None,
        }
    }
}

fn validate_bounds(limit: usize, score_threshold: f32) -> Result<(), SearchError> {
    if !(1..=MAX_LIMIT).contains(&limit) {
        return Err(SearchError::InvalidQuery(format!("limit must be between 1 and {MAX_LIMIT}")));
    }
    if !(0.0..=1.0).contains(&score_threshold) {
        return Err(SearchError::InvalidQuery(
            "score_threshold must be between 0 and 1".to_string(),
        ));
    }
    Ok(())
}

/// Search result item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub id: u64,
    pub score: f32,
    pub name: String,
    pub text: String,
    pub updated_at: String,
}

impl From<ScoredPoint> for SearchHit {
    fn from(point: ScoredPoint) -> Self {
        Self {
            id: point.id,
            score: point.score,
            name: point.payload.name,
            text: point.payload.text_content,
            updated_at: point.payload.update_at,
        }
    }
}

/// Search error type
#[derive(Debug, Error)]
pub enum SearchError {
    #[error("invalid query: {0}")]
    InvalidQuery(String),

    #[error("embedding generation failed: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("vector search failed: {0}")]
    Vector(#[from] VectorError),
}

/// Semantic search over the candidate collection
#[derive(Clone)]
pub struct SearchService {
    store: Arc<dyn VectorStore>,
    generator: EmbeddingGenerator,
}

impl SearchService {
    pub fn new(store: Arc<dyn VectorStore>, generator: EmbeddingGenerator) -> Self {
        Self { store, generator }
    }

    /// Embed the query and return the best matching candidates.
    pub async fn search(&self, request: &SearchRequest) -> Result<Vec<SearchHit>, SearchError> {
        request.validate()?;
        debug!(query = %request.query, limit = request.limit, "Searching candidates");

        let vector = self.generator.embed(request.query.trim(), InputType::SearchQuery).await?;
        let query = SearchQuery::new(vector)
            .with_limit(request.limit)
            .with_score_threshold(request.score_threshold)
            .with_filter(request.filter());

        let results = self.store.search(query).await?;
        Ok(results.into_iter().map(SearchHit::from).collect())
    }

    /// Candidates closest to the stored vector of `id`, excluding `id` itself.
    ///
    /// Returns `Ok(None)` when `id` is not in the collection.
    pub async fn find_similar(
        &self,
        id: CandidateId,
        limit: usize,
        score_threshold: f32,
    ) -> Result<Option<Vec<SearchHit>>, SearchError> {
        validate_bounds(limit, score_threshold)?;

        let reference = point_id(id);
        let Some(point) = self.store.get(reference).await? else {
            debug!(candidate_id = id, "Reference candidate not indexed");
            return Ok(None);
        };

        let query = SearchQuery::new(point.vector)
            .with_limit(limit)
            .with_score_threshold(score_threshold)
            .with_filter(SearchFilter {
                exclude_id: Some(reference),
                ..SearchFilter::default()
            });

        let results = self.store.search(query).await?;
        Ok(Some(results.into_iter().map(SearchHit::from).collect()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candex_core::Distance;
    use candex_embedding::MockEmbeddingProvider;
    use candex_vector::{CollectionConfig, IndexPoint, InMemoryVectorStore, PointPayload};

    const DIM: usize = 16;

    async fn service() -> (SearchService, Arc<InMemoryVectorStore>, Arc<MockEmbeddingProvider>) {
        let store = Arc::new(InMemoryVectorStore::new(CollectionConfig::new("candidates", DIM, Distance::Cosine)));
        store.ensure_collection().await.unwrap();
        let provider = Arc::new(MockEmbeddingProvider::new(DIM));
        let service = SearchService::new(store.clone(), EmbeddingGenerator::new(provider.clone(), DIM));
        (service, store, provider)
    }

    fn point(provider: &MockEmbeddingProvider, id: u64, name: &str, text: &str) -> IndexPoint {
        point_near(provider, id, name, text, text)
    }

    /// Point whose vector is the embedding of `near` rather than of its text.
    fn point_near(provider: &MockEmbeddingProvider, id: u64, name: &str, text: &str, near: &str) -> IndexPoint {
        IndexPoint {
            id,
            vector: provider.vector_for(near),
            payload: PointPayload {
                name: name.into(),
                text_content: text.into(),
                update_at: "2024-05-01T10:00:00+00:00".into(),
            },
        }
    }

    #[test]
    fn request_validation() {
        assert!(SearchRequest::new("rust developer").validate().is_ok());
        assert!(matches!(
            SearchRequest::new("  ab ").validate(),
            Err(SearchError::InvalidQuery(_))
        ));
        assert!(SearchRequest::new("rust").with_limit(0).validate().is_err());
        assert!(SearchRequest::new("rust").with_limit(51).validate().is_err());
        assert!(SearchRequest::new("rust").with_score_threshold(1.5).validate().is_err());
    }

    #[tokio::test]
    async fn search_embeds_as_query_and_maps_hits() {
        let (service, store, provider) = service().await;
        let text = "Ada | Rust engineer | Skills: Rust | Experience: 10 years";
        store.upsert(vec![point(&provider, 1, "Ada", text)]).await.unwrap();

        let hits = service
            .search(&SearchRequest::new(text).with_score_threshold(0.0))
            .await
            .unwrap();

        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, 1);
        assert_eq!(hits[0].name, "Ada");
        assert_eq!(hits[0].text, text);
        assert_eq!(hits[0].updated_at, "2024-05-01T10:00:00+00:00");
        assert_eq!(provider.input_types(), vec![InputType::SearchQuery]);
    }

    #[tokio::test]
    async fn skills_are_alternatives_and_name_is_required() {
        let (service, store, provider) = service().await;
        store
            .upsert(vec![
                point_near(&provider, 1, "Ada", "Skills: Rust", "systems programmer"),
                point_near(&provider, 2, "Grace", "Skills: COBOL", "systems programmer"),
                point_near(&provider, 3, "Linus", "Skills: C", "systems programmer"),
            ])
            .await
            .unwrap();

        let request = SearchRequest::new("systems programmer")
            .with_score_threshold(0.0)
            .with_skill("rust")
            .with_skill("cobol");
        let mut ids: Vec<_> = service.search(&request).await.unwrap().iter().map(|h| h.id).collect();
        ids.sort_unstable();
        assert_eq!(ids, vec![1, 2]);

        let named = request.with_name("grace");
        let ids: Vec<_> = service.search(&named).await.unwrap().iter().map(|h| h.id).collect();
        assert_eq!(ids, vec![2]);
    }

    #[tokio::test]
    async fn find_similar_excludes_the_reference() {
        let (service, store, provider) = service().await;
        store
            .upsert(vec![
                point(&provider, 1, "Ada", "Rust"),
                point(&provider, 2, "Grace", "COBOL"),
            ])
            .await
            .unwrap();

        let hits = service
            .find_similar(1, DEFAULT_SIMILAR_LIMIT, 0.0)
            .await
            .unwrap()
            .unwrap();
        assert!(hits.iter().all(|h| h.id != 1));
    }

    #[tokio::test]
    async fn find_similar_of_absent_id_is_none() {
        let (service, _store, _provider) = service().await;
        assert!(service.find_similar(42, DEFAULT_SIMILAR_LIMIT, 0.0).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn find_similar_before_first_index_is_none() {
        let store = Arc::new(InMemoryVectorStore::new(CollectionConfig::new("candidates", DIM, Distance::Cosine)));
        let provider = Arc::new(MockEmbeddingProvider::new(DIM));
        let service = SearchService::new(store, EmbeddingGenerator::new(provider, DIM));

        assert!(service.find_similar(1, DEFAULT_SIMILAR_LIMIT, 0.0).await.unwrap().is_none());
    }
}
