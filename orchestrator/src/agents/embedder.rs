// Embedding Agent: turns the active query into a vector

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ApiError;
use crate::models::EmbeddingVector;

#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<EmbeddingVector, ApiError>;
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a str,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

pub struct OpenAiEmbedder {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl OpenAiEmbedder {
    pub fn new(client: reqwest::Client, base_url: String, api_key: String, model: String) -> Self {
        Self { client, base_url, api_key, model }
    }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    async fn embed(&self, text: &str) -> Result<EmbeddingVector, ApiError> {
        if text.trim().is_empty() {
            return Err(ApiError::InvalidInput("cannot embed empty text".to_string()));
        }

        let resp = self
            .client
            .post(format!("{}/embeddings", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&EmbeddingRequest { model: &self.model, input: text })
            .send()
            .await
            .map_err(|e| ApiError::UpstreamUnavailable(format!("embedding request failed: {}", e)))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            let message = format!("embedding service returned {}: {}", status, body);
            return Err(if status == reqwest::StatusCode::BAD_REQUEST {
                ApiError::InvalidInput(message)
            } else {
                ApiError::UpstreamUnavailable(message)
            });
        }

        let parsed: EmbeddingResponse = resp.json().await.map_err(|e| {
            ApiError::UpstreamUnavailable(format!("malformed embedding response: {}", e))
        })?;

        let vector = parsed
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| {
                ApiError::UpstreamUnavailable("embedding response contained no vectors".to_string())
            })?;

        debug!(dimensions = vector.len(), model = %self.model, "Embedding generated");
        Ok(vector)
    }
}
