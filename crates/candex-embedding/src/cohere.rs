//! Cohere `/v1/embed` provider

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{EmbeddingError, EmbeddingProvider, EmbeddingResult, InputType};

pub const COHERE_API_BASE: &str = "https://api.cohere.ai";
pub const DEFAULT_MODEL: &str = "embed-multilingual-light-v3.0";

#[derive(Debug, Clone)]
pub struct CohereEmbeddingProvider {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl CohereEmbeddingProvider {
    pub fn new(
        api_key: impl Into<String>,
        base_url: impl Into<String>,
        model: impl Into<String>,
    ) -> EmbeddingResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| EmbeddingError::Transport(e.to_string()))?;

        Ok(Self {
            client,
            api_key: api_key.into(),
            base_url: base_url.into(),
            model: model.into(),
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn endpoint(&self) -> String {
        format!("{}/v1/embed", self.base_url.trim_end_matches('/'))
    }
}

#[derive(Debug, Serialize)]
struct EmbedRequestBody<'a> {
    texts: &'a [String],
    model: &'a str,
    input_type: InputType,
    embedding_types: [&'static str; 1],
}

#[derive(Debug, Deserialize)]
struct EmbedResponseBody {
    embeddings: EmbeddingsByType,
}

#[derive(Debug, Deserialize)]
struct EmbeddingsByType {
    float: Vec<Vec<f32>>,
}

#[async_trait]
impl EmbeddingProvider for CohereEmbeddingProvider {
    fn name(&self) -> &'static str {
        "cohere"
    }

    async fn embed_batch(&self, texts: &[String], input_type: InputType) -> EmbeddingResult<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let body = EmbedRequestBody {
            texts,
            model: &self.model,
            input_type,
            embedding_types: ["float"],
        };

        let response = self
            .client
            .post(self.endpoint())
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| EmbeddingError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unable to read body>".to_string());
            return Err(EmbeddingError::HttpStatus {
                status: status.as_u16(),
                body,
            });
        }

        let resp: EmbedResponseBody = response
            .json()
            .await
            .map_err(|e| EmbeddingError::Decode(e.to_string()))?;

        debug!(count = resp.embeddings.float.len(), input_type = input_type.as_str(), "Cohere embeddings received");
        Ok(resp.embeddings.float)
    }
}
