// Completion Agent: streams the chat model's reply fragment by fragment

use std::collections::VecDeque;
use std::fmt::Display;
use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use futures::{stream, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, error, info, Instrument};

use super::sse::SseDecoder;
use crate::error::ApiError;
use crate::metrics;
use crate::models::{Role, Turn};

/// Finite, single-use sequence of reply fragments. Ends with `Err` on a mid-stream failure.
pub type FragmentStream = Pin<Box<dyn Stream<Item = Result<String, ApiError>> + Send>>;

const FRAGMENT_BUFFER: usize = 32;

#[async_trait]
pub trait CompletionStreamer: Send + Sync {
    /// Opens the upstream stream. Errors here happen before any byte reaches the caller.
    async fn stream_completion(
        &self,
        system_prompt: &str,
        prior_turns: &[Turn],
        final_turn: &Turn,
    ) -> Result<FragmentStream, ApiError>;
}

/// Drives `upstream` on its own task and hands fragments over a bounded channel.
///
/// Dropping the returned stream closes the channel; the task then stops polling
/// and drops `upstream`, which releases the underlying connection.
pub fn spawn_fragment_producer<S>(upstream: S) -> FragmentStream
where
    S: Stream<Item = Result<String, ApiError>> + Send + 'static,
{
    let (tx, rx) = mpsc::channel::<Result<String, ApiError>>(FRAGMENT_BUFFER);

    tokio::spawn(async move {
        let mut upstream = Box::pin(upstream);
        let mut delivered = 0usize;

        loop {
            let next = tokio::select! {
                _ = tx.closed() => None,
                next = upstream.next() => Some(next),
            };

            match next {
                None => {
                    info!(delivered, "Client detached, abandoning completion stream");
                    metrics::record_stream_outcome("cancelled");
                    return;
                }
                Some(Some(Ok(fragment))) => {
                    if fragment.is_empty() {
                        continue;
                    }
                    if tx.send(Ok(fragment)).await.is_err() {
                        info!(delivered, "Client detached, abandoning completion stream");
                        metrics::record_stream_outcome("cancelled");
                        return;
                    }
                    delivered += 1;
                }
                Some(Some(Err(err))) => {
                    let err = match err {
                        ApiError::StreamInterrupted(_) => err,
                        other => ApiError::StreamInterrupted(other.to_string()),
                    };
                    error!(delivered, error = %err, "Completion stream failed mid-response");
                    metrics::record_stream_outcome("interrupted");
                    let _ = tx.send(Err(err)).await;
                    return;
                }
                Some(None) => {
                    debug!(delivered, "Completion stream finished");
                    metrics::record_stream_outcome("completed");
                    return;
                }
            }
        }
    }
    .in_current_span());

    Box::pin(stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|item| (item, rx))
    }))
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    stream: bool,
}

#[derive(Debug, Serialize, PartialEq)]
struct ChatMessage<'a> {
    role: Role,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
    #[serde(default)]
    error: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: ChunkDelta,
}

#[derive(Debug, Default, Deserialize)]
struct ChunkDelta {
    #[serde(default)]
    content: Option<String>,
}

/// System prompt first, then history unchanged, then the augmented turn as the user.
fn build_messages<'a>(
    system_prompt: &'a str,
    prior_turns: &'a [Turn],
    final_turn: &'a Turn,
) -> Vec<ChatMessage<'a>> {
    let mut messages = Vec::with_capacity(prior_turns.len() + 2);
    messages.push(ChatMessage { role: Role::System, content: system_prompt });
    messages.extend(
        prior_turns
            .iter()
            .map(|t| ChatMessage { role: t.role, content: &t.content }),
    );
    messages.push(ChatMessage { role: Role::User, content: &final_turn.content });
    messages
}

enum SsePayload {
    Done,
    Fragment(Option<String>),
}

fn parse_payload(payload: &str) -> Result<SsePayload, ApiError> {
    if payload.trim() == "[DONE]" {
        return Ok(SsePayload::Done);
    }
    let chunk: ChatChunk = serde_json::from_str(payload)
        .map_err(|e| ApiError::StreamInterrupted(format!("malformed completion chunk: {}", e)))?;
    if let Some(err) = chunk.error {
        return Err(ApiError::StreamInterrupted(format!("completion service error: {}", err)));
    }
    let content = chunk
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.delta.content)
        .filter(|c| !c.is_empty());
    Ok(SsePayload::Fragment(content))
}

struct SseState<S> {
    body: S,
    decoder: SseDecoder,
    pending: VecDeque<String>,
    body_ended: bool,
    failed: bool,
}

/// Turns a chat-completions SSE body into text fragments. A body that ends
/// before `[DONE]` counts as interrupted.
fn fragments_from_sse<S, E>(body: S) -> impl Stream<Item = Result<String, ApiError>> + Send
where
    S: Stream<Item = Result<Bytes, E>> + Send + Unpin + 'static,
    E: Display + Send,
{
    let state = SseState {
        body,
        decoder: SseDecoder::new(),
        pending: VecDeque::new(),
        body_ended: false,
        failed: false,
    };

    stream::unfold(state, |mut st| async move {
        loop {
            if let Some(payload) = st.pending.pop_front() {
                match parse_payload(&payload) {
                    Ok(SsePayload::Done) => return None,
                    Ok(SsePayload::Fragment(Some(text))) => return Some((Ok(text), st)),
                    Ok(SsePayload::Fragment(None)) => continue,
                    Err(err) => {
                        st.failed = true;
                        st.pending.clear();
                        return Some((Err(err), st));
                    }
                }
            }

            if st.failed {
                return None;
            }

            if st.body_ended {
                st.failed = true;
                let err = ApiError::StreamInterrupted("completion stream ended without [DONE]".to_string());
                return Some((Err(err), st));
            }

            match st.body.next().await {
                Some(Ok(bytes)) => {
                    let payloads = st.decoder.push(&bytes);
                    st.pending.extend(payloads);
                }
                Some(Err(err)) => {
                    st.failed = true;
                    let err = ApiError::StreamInterrupted(format!("upstream connection failed: {}", err));
                    return Some((Err(err), st));
                }
                None => {
                    st.body_ended = true;
                    st.pending.extend(st.decoder.finish());
                }
            }
        }
    })
}

pub struct OpenAiCompletionStreamer {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl OpenAiCompletionStreamer {
    pub fn new(client: reqwest::Client, base_url: String, api_key: String, model: String) -> Self {
        Self { client, base_url, api_key, model }
    }
}

#[async_trait]
impl CompletionStreamer for OpenAiCompletionStreamer {
    async fn stream_completion(
        &self,
        system_prompt: &str,
        prior_turns: &[Turn],
        final_turn: &Turn,
    ) -> Result<FragmentStream, ApiError> {
        let request = ChatRequest {
            model: &self.model,
            messages: build_messages(system_prompt, prior_turns, final_turn),
            stream: true,
        };

        let resp = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| ApiError::UpstreamUnavailable(format!("completion request failed: {}", e)))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ApiError::UpstreamUnavailable(format!(
                "completion service returned {}: {}",
                status, body
            )));
        }

        debug!(model = %self.model, messages = request.messages.len(), "Completion stream opened");
        Ok(spawn_fragment_producer(fragments_from_sse(Box::pin(resp.bytes_stream()))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::time::Duration;

    use warp::http::StatusCode;

    use crate::testing::stub_upstream;

    fn sse_chunk(content: &str) -> Bytes {
        let chunk = serde_json::json!({
            "id": "chatcmpl-1",
            "object": "chat.completion.chunk",
            "choices": [{"index": 0, "delta": {"content": content}, "finish_reason": null}]
        });
        Bytes::from(format!("data: {}\n\n", chunk))
    }

    fn body(parts: Vec<Result<Bytes, io::Error>>) -> impl Stream<Item = Result<Bytes, io::Error>> + Send + Unpin {
        stream::iter(parts)
    }

    async fn drain(mut fragments: FragmentStream) -> (String, Option<ApiError>) {
        let mut text = String::new();
        while let Some(item) = fragments.next().await {
            match item {
                Ok(fragment) => text.push_str(&fragment),
                Err(err) => return (text, Some(err)),
            }
        }
        (text, None)
    }

    #[test]
    fn messages_wrap_history_with_system_and_augmented_turn() {
        let history = vec![
            Turn { role: Role::Assistant, content: "Hi! How can I help?".to_string() },
            Turn::user("Any good math professors?"),
        ];
        let final_turn = Turn::user("augmented question");

        let messages = build_messages("be helpful", &history, &final_turn);
        assert_eq!(messages.len(), 4);
        assert_eq!(messages[0], ChatMessage { role: Role::System, content: "be helpful" });
        assert_eq!(messages[1].role, Role::Assistant);
        assert_eq!(messages[3], ChatMessage { role: Role::User, content: "augmented question" });

        let json = serde_json::to_value(&messages[0]).unwrap();
        assert_eq!(json, serde_json::json!({"role": "system", "content": "be helpful"}));
    }

    #[test]
    fn role_only_and_finish_chunks_carry_no_fragment() {
        let role_only = r#"{"choices":[{"index":0,"delta":{"role":"assistant","content":""}}]}"#;
        assert!(matches!(parse_payload(role_only), Ok(SsePayload::Fragment(None))));

        let finish = r#"{"choices":[{"index":0,"delta":{},"finish_reason":"stop"}]}"#;
        assert!(matches!(parse_payload(finish), Ok(SsePayload::Fragment(None))));

        assert!(matches!(parse_payload("[DONE]"), Ok(SsePayload::Done)));
    }

    #[test]
    fn error_payload_interrupts() {
        let payload = r#"{"error":{"message":"server overloaded","type":"server_error"}}"#;
        assert!(matches!(parse_payload(payload), Err(ApiError::StreamInterrupted(_))));
    }

    #[tokio::test]
    async fn fragments_concatenate_to_full_reply() {
        let upstream = fragments_from_sse(body(vec![
            Ok(sse_chunk("Professor ")),
            Ok(sse_chunk("ProfB ")),
            Ok(sse_chunk("is great.")),
            Ok(Bytes::from_static(b"data: [DONE]\n\n")),
        ]));

        let (text, err) = drain(spawn_fragment_producer(upstream)).await;
        assert_eq!(text, "Professor ProfB is great.");
        assert!(err.is_none());
    }

    #[tokio::test]
    async fn events_split_across_chunks_are_reassembled() {
        let whole = [sse_chunk("alpha"), sse_chunk("beta"), Bytes::from_static(b"data: [DONE]\n\n")].concat();
        let parts = whole
            .chunks(7)
            .map(|c| Ok(Bytes::copy_from_slice(c)))
            .collect();

        let (text, err) = drain(spawn_fragment_producer(fragments_from_sse(body(parts)))).await;
        assert_eq!(text, "alphabeta");
        assert!(err.is_none());
    }

    #[tokio::test]
    async fn connection_failure_after_three_fragments_interrupts() {
        let upstream = fragments_from_sse(body(vec![
            Ok(sse_chunk("one ")),
            Ok(sse_chunk("two ")),
            Ok(sse_chunk("three")),
            Err(io::Error::new(io::ErrorKind::ConnectionReset, "connection reset")),
        ]));

        let mut fragments = spawn_fragment_producer(upstream);
        let mut seen = Vec::new();
        let mut failure = None;
        while let Some(item) = fragments.next().await {
            match item {
                Ok(fragment) => seen.push(fragment),
                Err(err) => failure = Some(err),
            }
        }

        assert_eq!(seen, vec!["one ", "two ", "three"]);
        assert!(matches!(failure, Some(ApiError::StreamInterrupted(_))));
    }

    #[tokio::test]
    async fn body_ending_without_done_is_interrupted() {
        let upstream = fragments_from_sse(body(vec![Ok(sse_chunk("partial"))]));
        let (text, err) = drain(spawn_fragment_producer(upstream)).await;
        assert_eq!(text, "partial");
        assert!(matches!(err, Some(ApiError::StreamInterrupted(_))));
    }

    #[tokio::test]
    async fn dropping_consumer_stops_the_producer() {
        let (guard_tx, guard_rx) = tokio::sync::oneshot::channel::<()>();

        // Never-ending upstream that owns `guard_tx`; it is dropped only when the producer drops it.
        let upstream = stream::unfold(guard_tx, |guard| async move {
            tokio::time::sleep(Duration::from_millis(5)).await;
            Some((Ok::<_, ApiError>("tick".to_string()), guard))
        });

        let mut fragments = spawn_fragment_producer(upstream);
        assert_eq!(fragments.next().await.unwrap().unwrap(), "tick");
        drop(fragments);

        let released = tokio::time::timeout(Duration::from_secs(2), guard_rx).await;
        assert!(matches!(released, Ok(Err(_))), "upstream was not dropped after consumer detached");
    }

    fn streamer(base_url: String) -> OpenAiCompletionStreamer {
        OpenAiCompletionStreamer::new(
            reqwest::Client::new(),
            base_url,
            "sk-test".to_string(),
            "gpt-4o-mini".to_string(),
        )
    }

    #[tokio::test]
    async fn non_success_status_fails_before_streaming() {
        let base = stub_upstream(StatusCode::TOO_MANY_REQUESTS, r#"{"error":{"message":"quota"}}"#);
        let result = streamer(base)
            .stream_completion("system", &[], &Turn::user("hi"))
            .await;
        match result {
            Err(ApiError::UpstreamUnavailable(message)) => assert!(message.contains("429")),
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("expected an error before streaming"),
        }
    }

    #[tokio::test]
    async fn event_stream_body_becomes_fragments() {
        let body = [sse_chunk("Hello"), sse_chunk(", class"), Bytes::from_static(b"data: [DONE]\n\n")].concat();
        let base = stub_upstream(StatusCode::OK, String::from_utf8(body).unwrap());

        let fragments = streamer(base)
            .stream_completion("system", &[], &Turn::user("hi"))
            .await
            .unwrap();
        let (text, err) = drain(fragments).await;
        assert_eq!(text, "Hello, class");
        assert!(err.is_none());
    }
}
