use std::collections::hash_map::DefaultHasher;
use std::collections::VecDeque;
use std::hash::{Hash, Hasher};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::{EmbeddingError, EmbeddingProvider, EmbeddingResult, InputType};

/// Deterministic provider for tests.
///
/// Each text maps to a unit vector seeded from its hash, so identical texts
/// always embed identically. Scripted responses are served first, and texts
/// containing a registered marker fail with the registered error.
#[derive(Debug, Default)]
pub struct MockEmbeddingProvider {
    dimension: usize,
    scripted: Mutex<VecDeque<EmbeddingResult<Vec<Vec<f32>>>>>,
    failures: Mutex<Vec<(String, EmbeddingError)>>,
    seen: Mutex<Vec<InputType>>,
}

impl MockEmbeddingProvider {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            ..Self::default()
        }
    }

    /// Serve `result` for the next call instead of generating vectors.
    pub fn enqueue(&self, result: EmbeddingResult<Vec<Vec<f32>>>) {
        self.scripted.lock().unwrap_or_else(std::sync::PoisonError::into_inner).push_back(result);
    }

    /// Fail every call whose input contains `marker`.
    pub fn fail_when_contains(&self, marker: impl Into<String>, error: EmbeddingError) {
        self.failures
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push((marker.into(), error));
    }

    /// Number of provider calls made so far.
    pub fn calls(&self) -> usize {
        self.seen.lock().unwrap_or_else(std::sync::PoisonError::into_inner).len()
    }

    /// Input types of every call, in order.
    pub fn input_types(&self) -> Vec<InputType> {
        self.seen
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    /// Deterministic vector for `text`.
    pub fn vector_for(&self, text: &str) -> Vec<f32> {
        let mut hasher = DefaultHasher::new();
        text.hash(&mut hasher);
        let mut state = hasher.finish() | 1;

        let raw: Vec<f32> = (0..self.dimension)
            .map(|_| {
                // xorshift64
                state ^= state << 13;
                state ^= state >> 7;
                state ^= state << 17;
                #[allow(clippy::cast_precision_loss)]
                let unit = (state >> 40) as f32 / (1u64 << 24) as f32;
                unit * 2.0 - 1.0
            })
            .collect();

        let norm = raw.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm == 0.0 {
            raw
        } else {
            raw.into_iter().map(|x| x / norm).collect()
        }
    }
}

#[async_trait]
impl EmbeddingProvider for MockEmbeddingProvider {
    fn name(&self) -> &'static str {
        "mock-embedding"
    }

    async fn embed_batch(&self, texts: &[String], input_type: InputType) -> EmbeddingResult<Vec<Vec<f32>>> {
        self.seen
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(input_type);

        if let Some(result) = self
            .scripted
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .pop_front()
        {
            return result;
        }

        let failures = self.failures.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        for (marker, error) in failures.iter() {
            if texts.iter().any(|t| t.contains(marker.as_str())) {
                return Err(error.clone());
            }
        }

        Ok(texts.iter().map(|t| self.vector_for(t)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn same_text_same_vector() {
        let provider = MockEmbeddingProvider::new(16);
        let texts = vec!["rust engineer".to_string(), "rust engineer".to_string(), "chef".to_string()];
        let vectors = provider.embed_batch(&texts, InputType::SearchDocument).await.unwrap();
        assert_eq!(vectors[0], vectors[1]);
        assert_ne!(vectors[0], vectors[2]);
        let norm: f32 = vectors[2].iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-4);
    }

    #[tokio::test]
    async fn scripted_results_come_first() {
        let provider = MockEmbeddingProvider::new(4);
        provider.enqueue(Err(EmbeddingError::Transport("down".into())));

        let texts = vec!["a".to_string()];
        assert!(provider.embed_batch(&texts, InputType::SearchQuery).await.is_err());
        assert!(provider.embed_batch(&texts, InputType::SearchQuery).await.is_ok());
        assert_eq!(provider.input_types(), vec![InputType::SearchQuery; 2]);
    }

    #[tokio::test]
    async fn marker_failures_apply_to_matching_texts() {
        let provider = MockEmbeddingProvider::new(4);
        provider.fail_when_contains("poison", EmbeddingError::Decode("bad".into()));

        let ok = vec!["fine".to_string()];
        let bad = vec!["poison pill".to_string()];
        assert!(provider.embed_batch(&ok, InputType::SearchDocument).await.is_ok());
        assert_eq!(
            provider.embed_batch(&bad, InputType::SearchDocument).await.unwrap_err(),
            EmbeddingError::Decode("bad".into())
        );
        assert_eq!(provider.calls(), 2);
    }
}
