//! Embedding providers and the dimension-checked embedding generator
//!
//! Providers turn text into vectors. The [`EmbeddingGenerator`] wraps a
//! provider and enforces the configured output length, since a silently
//! mismatched vector corrupts the collection it is written to.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub mod cohere;
pub mod error;
pub mod mock;

pub use cohere::CohereEmbeddingProvider;
pub use error::{EmbeddingError, EmbeddingResult};
pub use mock::MockEmbeddingProvider;

/// Whether text is embedded for storage or for querying.
///
/// Asymmetric models place documents and queries in slightly different
/// regions of the vector space, so both sides must say which one they are.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputType {
    SearchDocument,
    SearchQuery,
}

impl InputType {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::SearchDocument => "search_document",
            Self::SearchQuery => "search_query",
        }
    }
}

#[async_trait]
pub trait EmbeddingProvider: Send + Sync + std::fmt::Debug {
    fn name(&self) -> &'static str;

    /// One vector per input text, in input order.
    async fn embed_batch(&self, texts: &[String], input_type: InputType) -> EmbeddingResult<Vec<Vec<f32>>>;
}

/// Provider wrapper that checks every returned vector against the
/// configured dimension.
#[derive(Debug, Clone)]
pub struct EmbeddingGenerator {
    provider: Arc<dyn EmbeddingProvider>,
    dimension: usize,
}

impl EmbeddingGenerator {
    pub fn new(provider: Arc<dyn EmbeddingProvider>, dimension: usize) -> Self {
        Self { provider, dimension }
    }

    pub const fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn provider_name(&self) -> &'static str {
        self.provider.name()
    }

    pub async fn embed(&self, text: &str, input_type: InputType) -> EmbeddingResult<Vec<f32>> {
        let mut vectors = self.embed_batch(&[text.to_string()], input_type).await?;
        vectors.pop().ok_or(EmbeddingError::CountMismatch {
            expected: 1,
            actual: 0,
        })
    }

    pub async fn embed_batch(&self, texts: &[String], input_type: InputType) -> EmbeddingResult<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let vectors = self.provider.embed_batch(texts, input_type).await?;
        if vectors.len() != texts.len() {
            return Err(EmbeddingError::CountMismatch {
                expected: texts.len(),
                actual: vectors.len(),
            });
        }
        if let Some(bad) = vectors.iter().find(|v| v.len() != self.dimension) {
            return Err(EmbeddingError::DimensionMismatch {
                expected: self.dimension,
                actual: bad.len(),
            });
        }
        Ok(vectors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn input_type_wire_names() {
        assert_eq!(InputType::SearchDocument.as_str(), "search_document");
        assert_eq!(
            serde_json::to_string(&InputType::SearchQuery).unwrap(),
            "\"search_query\""
        );
    }

    #[tokio::test]
    async fn generator_accepts_matching_dimension() {
        let generator = EmbeddingGenerator::new(Arc::new(MockEmbeddingProvider::new(8)), 8);
        let v = generator.embed("hello", InputType::SearchDocument).await.unwrap();
        assert_eq!(v.len(), 8);
    }

    #[tokio::test]
    async fn generator_rejects_dimension_mismatch() {
        let generator = EmbeddingGenerator::new(Arc::new(MockEmbeddingProvider::new(512)), 1024);
        let err = generator.embed("hello", InputType::SearchDocument).await.unwrap_err();
        assert_eq!(
            err,
            EmbeddingError::DimensionMismatch {
                expected: 1024,
                actual: 512
            }
        );
    }

    #[tokio::test]
    async fn generator_rejects_short_batch() {
        let provider = MockEmbeddingProvider::new(4);
        provider.enqueue(Ok(vec![vec![0.0; 4]]));
        let generator = EmbeddingGenerator::new(Arc::new(provider), 4);

        let texts = vec!["a".to_string(), "b".to_string()];
        let err = generator.embed_batch(&texts, InputType::SearchDocument).await.unwrap_err();
        assert_eq!(err, EmbeddingError::CountMismatch { expected: 2, actual: 1 });
    }

    #[tokio::test]
    async fn generator_skips_provider_for_empty_batch() {
        let provider = Arc::new(MockEmbeddingProvider::new(4));
        let generator = EmbeddingGenerator::new(provider.clone(), 4);
        assert!(generator.embed_batch(&[], InputType::SearchDocument).await.unwrap().is_empty());
        assert_eq!(provider.calls(), 0);
    }
}
