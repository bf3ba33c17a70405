// Chat pipeline: embed -> retrieve -> augment -> stream, one pass per request

use std::fmt;
use std::sync::Arc;

use futures::{future, stream, StreamExt};
use tracing::{debug, error};

use crate::agents::augmenter::augment;
use crate::agents::{CompletionStreamer, Embedder, FragmentStream, Retriever};
use crate::error::ApiError;
use crate::metrics;
use crate::models::{Conversation, Turn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Received,
    Embedding,
    Retrieving,
    Augmenting,
    Streaming,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Received => "received",
            Stage::Embedding => "embedding",
            Stage::Retrieving => "retrieving",
            Stage::Augmenting => "augmenting",
            Stage::Streaming => "streaming",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Process-wide handles, shared read-only by every in-flight request.
pub struct ChatPipeline {
    embedder: Arc<dyn Embedder>,
    retriever: Arc<dyn Retriever>,
    completer: Arc<dyn CompletionStreamer>,
    system_prompt: String,
    top_k: usize,
}

impl ChatPipeline {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        retriever: Arc<dyn Retriever>,
        completer: Arc<dyn CompletionStreamer>,
        system_prompt: String,
        top_k: usize,
    ) -> Self {
        Self { embedder, retriever, completer, system_prompt, top_k }
    }

    /// Runs every stage up to the model's first fragment.
    ///
    /// An `Err` means nothing has been sent yet. Failures after the first
    /// fragment arrive as the last item of the returned stream.
    pub async fn run(&self, turns: Vec<Turn>) -> Result<FragmentStream, ApiError> {
        let conversation = Conversation::try_from(turns).map_err(|e| fail(Stage::Received, e))?;

        debug!(stage = %Stage::Embedding, "Embedding active turn");
        let vector = self
            .embedder
            .embed(&conversation.active.content)
            .await
            .map_err(|e| fail(Stage::Embedding, e))?;

        debug!(stage = %Stage::Retrieving, top_k = self.top_k, "Querying vector index");
        let matches = self
            .retriever
            .query(&vector, self.top_k)
            .await
            .map_err(|e| fail(Stage::Retrieving, e))?;

        debug!(stage = %Stage::Augmenting, matches = matches.len(), "Augmenting active turn");
        let augmented = Turn::user(augment(&conversation.active.content, &matches));

        debug!(stage = %Stage::Streaming, "Requesting completion");
        let mut fragments = self
            .completer
            .stream_completion(&self.system_prompt, &conversation.history, &augmented)
            .await
            .map_err(|e| fail(Stage::Streaming, e))?;

        // Nothing is committed to the client until the model has produced something.
        let rest: FragmentStream = match fragments.next().await {
            Some(Ok(first)) => Box::pin(stream::once(future::ready(Ok(first))).chain(fragments)),
            Some(Err(e)) => return Err(fail(Stage::Streaming, e)),
            None => Box::pin(stream::empty::<Result<String, ApiError>>()),
        };
        Ok(rest)
    }
}

fn fail(stage: Stage, err: ApiError) -> ApiError {
    error!(stage = %stage, error = %err, "Chat pipeline failed");
    metrics::record_stage_failure(stage.as_str());
    err
}
