//! Ollama HTTP API wire types.
//!
//! Only the fields the shim reads or writes are modelled; everything else in
//! Ollama's responses is ignored during deserialization.

use serde::{Deserialize, Serialize};

/// Speaker of a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// Chat message in the shape Ollama expects: role and content only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// Sampling options forwarded as Ollama's `options` object.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct GenerationOptions {
    /// Maximum tokens to generate (`max_tokens` in OpenAI terms).
    pub num_predict: u32,

    /// Sampling temperature.
    pub temperature: f64,
}

/// Body of `POST /api/chat`.
#[derive(Debug, Serialize)]
pub struct ChatRequest<'a> {
    pub model: &'a str,
    pub messages: &'a [Message],
    pub stream: bool,
    pub options: &'a GenerationOptions,
}

/// Body of `POST /api/generate`.
#[derive(Debug, Serialize)]
pub struct GenerateRequest<'a> {
    pub model: &'a str,
    pub prompt: &'a str,
    pub stream: bool,
    pub options: &'a GenerationOptions,
}

/// Body of `POST /api/pull`.
#[derive(Debug, Serialize)]
pub struct PullRequest<'a> {
    pub model: &'a str,
    pub stream: bool,
}

/// Final reply of a non-streaming pull.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PullResponse {
    #[serde(default)]
    pub status: String,

    #[serde(default)]
    pub error: Option<String>,
}

/// Message part of a chat reply.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ResponseMessage {
    #[serde(default)]
    pub role: Option<String>,

    #[serde(default)]
    pub content: String,
}

/// A `/api/chat` reply. Non-streaming calls get exactly one; streaming calls
/// get one per NDJSON line, the last with `done: true` and the token counts.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChatResponse {
    #[serde(default)]
    pub model: Option<String>,

    #[serde(default)]
    pub message: Option<ResponseMessage>,

    #[serde(default)]
    pub done: bool,

    #[serde(default)]
    pub done_reason: Option<String>,

    /// Number of tokens in the prompt.
    #[serde(default)]
    pub prompt_eval_count: Option<u32>,

    /// Number of tokens in the response.
    #[serde(default)]
    pub eval_count: Option<u32>,

    /// Set when Ollama reports a failure in-band.
    #[serde(default)]
    pub error: Option<String>,
}

impl ChatResponse {
    /// Text carried by this reply, empty if none.
    pub fn content(&self) -> &str {
        self.message.as_ref().map(|m| m.content.as_str()).unwrap_or("")
    }

    /// Convenience constructor for a content-only chunk.
    pub fn with_content(content: impl Into<String>) -> Self {
        Self {
            message: Some(ResponseMessage {
                role: Some("assistant".to_string()),
                content: content.into(),
            }),
            ..Self::default()
        }
    }
}

/// A `/api/generate` reply.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GenerateResponse {
    #[serde(default)]
    pub model: Option<String>,

    #[serde(default)]
    pub response: String,

    #[serde(default)]
    pub done: bool,

    #[serde(default)]
    pub prompt_eval_count: Option<u32>,

    #[serde(default)]
    pub eval_count: Option<u32>,

    #[serde(default)]
    pub error: Option<String>,
}

/// Error body Ollama sends with non-2xx statuses.
#[derive(Debug, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}
