// Retriever Agent: nearest-neighbour lookup against the professor review index

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::ApiError;
use crate::models::MatchResult;

#[async_trait]
pub trait Retriever: Send + Sync {
    /// Returns up to `top_k` matches, best first. An empty result is not an error.
    async fn query(&self, vector: &[f32], top_k: usize) -> Result<Vec<MatchResult>, ApiError>;
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct QueryRequest<'a> {
    namespace: &'a str,
    vector: &'a [f32],
    top_k: usize,
    include_metadata: bool,
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    #[serde(default)]
    matches: Vec<MatchResult>,
}

#[derive(Debug, Deserialize)]
struct DescribeIndexResponse {
    host: String,
}

pub struct PineconeRetriever {
    client: reqwest::Client,
    index_host: String,
    namespace: String,
    api_key: String,
}

impl PineconeRetriever {
    pub fn new(client: reqwest::Client, index_host: String, namespace: String, api_key: String) -> Self {
        Self { client, index_host, namespace, api_key }
    }

    /// Looks up the data-plane host of `index` once, at startup.
    pub async fn connect(
        client: reqwest::Client,
        controller_url: &str,
        index: &str,
        namespace: String,
        api_key: String,
    ) -> Result<Self, ApiError> {
        let resp = client
            .get(format!("{}/indexes/{}", controller_url, index))
            .header("Api-Key", &api_key)
            .send()
            .await
            .map_err(|e| ApiError::UpstreamUnavailable(format!("index lookup failed: {}", e)))?;

        let status = resp.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(ApiError::IndexNotFound(index.to_string()));
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ApiError::UpstreamUnavailable(format!(
                "index lookup returned {}: {}",
                status, body
            )));
        }

        let described: DescribeIndexResponse = resp.json().await?;
        let index_host = normalize_host(&described.host);
        info!(index = %index, host = %index_host, "Resolved vector index host");

        Ok(Self::new(client, index_host, namespace, api_key))
    }
}

fn normalize_host(host: &str) -> String {
    let host = host.trim_end_matches('/');
    if host.starts_with("http://") || host.starts_with("https://") {
        host.to_string()
    } else {
        format!("https://{}", host)
    }
}

#[async_trait]
impl Retriever for PineconeRetriever {
    async fn query(&self, vector: &[f32], top_k: usize) -> Result<Vec<MatchResult>, ApiError> {
        let request = QueryRequest {
            namespace: &self.namespace,
            vector,
            top_k,
            include_metadata: true,
        };

        let resp = self
            .client
            .post(format!("{}/query", self.index_host))
            .header("Api-Key", &self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| ApiError::UpstreamUnavailable(format!("vector query failed: {}", e)))?;

        let status = resp.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(ApiError::IndexNotFound(format!(
                "{} (namespace {})",
                self.index_host, self.namespace
            )));
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ApiError::UpstreamUnavailable(format!(
                "vector index returned {}: {}",
                status, body
            )));
        }

        let parsed: QueryResponse = resp.json().await.map_err(|e| {
            ApiError::UpstreamUnavailable(format!("malformed vector query response: {}", e))
        })?;

        let mut matches = parsed.matches;
        matches.truncate(top_k);
        debug!(
            count = matches.len(),
            top_score = matches.first().map(|m| m.score),
            "Vector query returned matches"
        );
        Ok(matches)
    }
}
