//! SSE (Server-Sent Events) streaming for token-by-token responses.
//!
//! Converts the engine's chat chunk stream into OpenAI `chat.completion.chunk`
//! events. A clean end of the upstream stream produces a `stop` chunk followed
//! by the `[DONE]` sentinel; an upstream failure produces a single error event
//! and no sentinel.

use std::convert::Infallible;

use axum::http::{header, HeaderName, HeaderValue};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use futures::stream::{self, BoxStream, Stream, StreamExt};
use serde::Serialize;
use tracing::{debug, error};

use crate::error::{ErrorBody, GatewayError};
use crate::inference::client::BackendError;
use crate::inference::types::ChatResponse;
use crate::server::openai_api::unix_time;

/// Data of the final SSE event of a successful stream.
pub const DONE_SENTINEL: &str = "[DONE]";

/// Streaming chat completion chunk (OpenAI-compatible).
#[derive(Debug, Serialize)]
pub struct ChatCompletionChunk {
    pub id: String,
    pub object: &'static str,
    pub created: u64,
    pub model: String,
    pub choices: Vec<ChunkChoice>,
}

#[derive(Debug, Serialize)]
pub struct ChunkChoice {
    pub index: usize,
    pub delta: ChunkDelta,
    pub finish_reason: Option<&'static str>,
}

/// Serializes as `{"content": ...}` or `{}`.
#[derive(Debug, Default, Serialize)]
pub struct ChunkDelta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

impl ChatCompletionChunk {
    fn new(model: &str, delta: ChunkDelta, finish_reason: Option<&'static str>) -> Self {
        // id and created are taken at emission time, per chunk.
        let created = unix_time();
        Self {
            id: format!("chatcmpl-{created}"),
            object: "chat.completion.chunk",
            created,
            model: model.to_string(),
            choices: vec![ChunkChoice {
                index: 0,
                delta,
                finish_reason,
            }],
        }
    }

    /// Chunk carrying a piece of generated text.
    pub fn content(model: &str, text: String) -> Self {
        Self::new(model, ChunkDelta { content: Some(text) }, None)
    }

    /// Terminal chunk with an empty delta.
    pub fn stop(model: &str) -> Self {
        Self::new(model, ChunkDelta::default(), Some("stop"))
    }
}

/// One unit of the outgoing stream, before SSE encoding.
#[derive(Debug)]
pub enum StreamFrame {
    Chunk(ChatCompletionChunk),
    Error(ErrorBody),
    Done,
}

impl StreamFrame {
    /// The SSE `data:` payload.
    pub fn data(&self) -> String {
        match self {
            StreamFrame::Chunk(chunk) => encode(chunk),
            StreamFrame::Error(body) => encode(body),
            StreamFrame::Done => DONE_SENTINEL.to_string(),
        }
    }

    pub fn into_event(self) -> Event {
        Event::default().data(self.data())
    }
}

/// Serialize an event payload. A failure is logged and replaced by an
/// internal error body so the client never sees an empty event.
fn encode<T: Serialize>(payload: &T) -> String {
    serde_json::to_string(payload).unwrap_or_else(|e| {
        error!(error = %e, "Failed to serialize stream event");
        let body = GatewayError::Internal(format!("failed to encode stream event: {e}")).body();
        serde_json::json!({
            "error": {
                "message": body.error.message,
                "type": body.error.r#type,
                "code": body.error.code,
            }
        })
        .to_string()
    })
}

enum Phase {
    Relaying,
    Sentinel,
    Finished,
}

struct RelayState {
    upstream: BoxStream<'static, Result<ChatResponse, BackendError>>,
    model: String,
    phase: Phase,
}

/// Reshape engine chunks into OpenAI stream frames.
///
/// Chunks with empty content (including Ollama's final `done` chunk) are
/// skipped. The output is driven entirely by the upstream stream.
pub fn chat_frames<S>(upstream: S, model: String) -> impl Stream<Item = StreamFrame> + Send
where
    S: Stream<Item = Result<ChatResponse, BackendError>> + Send + 'static,
{
    let state = RelayState {
        upstream: upstream.boxed(),
        model,
        phase: Phase::Relaying,
    };

    stream::unfold(state, |mut st| async move {
        loop {
            match st.phase {
                Phase::Relaying => match st.upstream.next().await {
                    Some(Ok(chunk)) => {
                        let text = chunk.message.map(|m| m.content).unwrap_or_default();
                        if text.is_empty() {
                            continue;
                        }
                        let frame = StreamFrame::Chunk(ChatCompletionChunk::content(&st.model, text));
                        return Some((frame, st));
                    }
                    Some(Err(e)) => {
                        error!(error = %e, "Error in chat stream");
                        st.phase = Phase::Finished;
                        return Some((StreamFrame::Error(GatewayError::from(e).body()), st));
                    }
                    None => {
                        debug!(model = st.model, "Upstream chat stream finished");
                        st.phase = Phase::Sentinel;
                        return Some((StreamFrame::Chunk(ChatCompletionChunk::stop(&st.model)), st));
                    }
                },
                Phase::Sentinel => {
                    st.phase = Phase::Finished;
                    return Some((StreamFrame::Done, st));
                }
                Phase::Finished => return None,
            }
        }
    })
}

/// Build the `text/event-stream` response for a chat chunk stream.
pub fn sse_response<S>(upstream: S, model: String) -> Response
where
    S: Stream<Item = Result<ChatResponse, BackendError>> + Send + 'static,
{
    let events = chat_frames(upstream, model).map(|frame| Ok::<_, Infallible>(frame.into_event()));

    (
        [
            (header::CACHE_CONTROL, HeaderValue::from_static("no-cache")),
            (
                HeaderName::from_static("x-accel-buffering"),
                HeaderValue::from_static("no"),
            ),
        ],
        Sse::new(events).keep_alive(KeepAlive::default()),
    )
        .into_response()
}
