//! Recording fakes for the pipeline's upstream clients.

use std::sync::Mutex;

use async_trait::async_trait;
use futures::stream;
use warp::http::StatusCode;
use warp::Filter;

use crate::agents::completion::spawn_fragment_producer;
use crate::agents::{CompletionStreamer, Embedder, FragmentStream, Retriever};
use crate::error::ApiError;
use crate::models::{EmbeddingVector, MatchMetadata, MatchResult, Turn};

/// Serves `body` with `status` for every request on an ephemeral local port.
/// Returns the base URL.
pub fn stub_upstream(status: StatusCode, body: impl Into<String>) -> String {
    let body = body.into();
    let routes = warp::any().map(move || warp::reply::with_status(body.clone(), status));
    let (addr, server) = warp::serve(routes).bind_ephemeral(([127, 0, 0, 1], 0));
    tokio::spawn(server);
    format!("http://{}", addr)
}

pub fn professor(id: &str, stars: f64) -> MatchResult {
    MatchResult {
        id: id.to_string(),
        score: 0.9,
        metadata: MatchMetadata {
            review: format!("{} explains every proof", id),
            subject: "Algorithms".to_string(),
            stars,
        },
    }
}

#[derive(Default)]
pub struct FakeEmbedder {
    fail: bool,
    calls: Mutex<Vec<String>>,
}

impl FakeEmbedder {
    pub fn failing() -> Self {
        Self { fail: true, ..Self::default() }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Embedder for FakeEmbedder {
    async fn embed(&self, text: &str) -> Result<EmbeddingVector, ApiError> {
        self.calls.lock().unwrap().push(text.to_string());
        if self.fail {
            return Err(ApiError::UpstreamUnavailable("embedding service returned 503".to_string()));
        }
        Ok(vec![0.1, 0.2, 0.3])
    }
}

pub struct FakeRetriever {
    matches: Vec<MatchResult>,
    fail: bool,
    calls: Mutex<Vec<usize>>,
}

impl FakeRetriever {
    pub fn returning(matches: Vec<MatchResult>) -> Self {
        Self { matches, fail: false, calls: Mutex::new(Vec::new()) }
    }

    pub fn failing() -> Self {
        Self { matches: Vec::new(), fail: true, calls: Mutex::new(Vec::new()) }
    }

    /// `top_k` of every query.
    pub fn calls(&self) -> Vec<usize> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Retriever for FakeRetriever {
    async fn query(&self, _vector: &[f32], top_k: usize) -> Result<Vec<MatchResult>, ApiError> {
        self.calls.lock().unwrap().push(top_k);
        if self.fail {
            return Err(ApiError::IndexNotFound("rag".to_string()));
        }
        Ok(self.matches.iter().take(top_k).cloned().collect())
    }
}

#[derive(Debug, Clone)]
pub struct CompletionCall {
    pub system_prompt: String,
    pub prior_turns: Vec<Turn>,
    pub final_turn: Turn,
}

pub struct FakeCompleter {
    fragments: Vec<String>,
    interrupt: bool,
    calls: Mutex<Vec<CompletionCall>>,
}

impl FakeCompleter {
    pub fn yielding(fragments: &[&str]) -> Self {
        Self {
            fragments: fragments.iter().map(|f| f.to_string()).collect(),
            interrupt: false,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Yields `fragments`, then fails as if the connection dropped.
    pub fn interrupted_after(fragments: &[&str]) -> Self {
        Self { interrupt: true, ..Self::yielding(fragments) }
    }

    pub fn calls(&self) -> Vec<CompletionCall> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl CompletionStreamer for FakeCompleter {
    async fn stream_completion(
        &self,
        system_prompt: &str,
        prior_turns: &[Turn],
        final_turn: &Turn,
    ) -> Result<FragmentStream, ApiError> {
        self.calls.lock().unwrap().push(CompletionCall {
            system_prompt: system_prompt.to_string(),
            prior_turns: prior_turns.to_vec(),
            final_turn: final_turn.clone(),
        });

        let mut items: Vec<Result<String, ApiError>> =
            self.fragments.iter().cloned().map(Ok).collect();
        if self.interrupt {
            items.push(Err(ApiError::StreamInterrupted("connection reset by peer".to_string())));
        }
        Ok(spawn_fragment_producer(stream::iter(items)))
    }
}
