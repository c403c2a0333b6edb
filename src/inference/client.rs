//! Client for the Ollama HTTP API.
//!
//! [`InferenceBackend`] is the seam between the HTTP handlers and the engine;
//! [`OllamaClient`] is the production implementation over `reqwest`.

use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{BoxStream, StreamExt};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use crate::config::BackendConfig;
use crate::inference::ndjson;
use crate::inference::types::{
    ChatRequest, ChatResponse, ErrorBody, GenerateRequest, GenerateResponse, GenerationOptions,
    Message, PullRequest, PullResponse,
};

#[derive(Error, Debug)]
pub enum BackendError {
    #[error("inference backend unavailable: {0}")]
    Unavailable(String),

    #[error("{operation} timed out after {}s", .after.as_secs_f64())]
    Timeout {
        operation: &'static str,
        after: Duration,
    },

    #[error("inference backend returned {status}: {message}")]
    Status { status: u16, message: String },

    #[error("inference backend error: {0}")]
    Engine(String),

    #[error("invalid response from inference backend: {0}")]
    Decode(String),
}

impl BackendError {
    /// Stable machine-readable code, shared with the HTTP error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            BackendError::Unavailable(_) => "backend_unavailable",
            BackendError::Timeout { .. } => "backend_timeout",
            BackendError::Status { .. } | BackendError::Engine(_) => "backend_failed",
            BackendError::Decode(_) => "internal",
        }
    }

    fn from_reqwest(operation: &'static str, timeout: Duration, err: reqwest::Error) -> Self {
        if err.is_timeout() {
            BackendError::Timeout {
                operation,
                after: timeout,
            }
        } else if err.is_decode() {
            BackendError::Decode(err.to_string())
        } else {
            BackendError::Unavailable(err.to_string())
        }
    }
}

impl From<reqwest::Error> for BackendError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            BackendError::Decode(err.to_string())
        } else {
            BackendError::Unavailable(err.to_string())
        }
    }
}

/// Incremental chat output.
pub type ChatStream = BoxStream<'static, Result<ChatResponse, BackendError>>;

/// Operations the gateway needs from an inference engine.
#[async_trait]
pub trait InferenceBackend: Send + Sync {
    /// Make `model` available locally, downloading it if needed.
    async fn pull(&self, model: &str) -> Result<(), BackendError>;

    /// One-shot chat completion.
    async fn chat(
        &self,
        model: &str,
        messages: &[Message],
        options: &GenerationOptions,
    ) -> Result<ChatResponse, BackendError>;

    /// Streaming chat completion.
    async fn chat_stream(
        &self,
        model: &str,
        messages: &[Message],
        options: &GenerationOptions,
    ) -> Result<ChatStream, BackendError>;

    /// One-shot prompt completion.
    async fn generate(
        &self,
        model: &str,
        prompt: &str,
        options: &GenerationOptions,
    ) -> Result<GenerateResponse, BackendError>;
}

/// Bounded waits for each kind of backend call.
#[derive(Debug, Clone, Copy)]
pub struct Timeouts {
    pub connect: Duration,
    pub request: Duration,
    pub pull: Duration,
    pub stream_idle: Duration,
}

impl From<&BackendConfig> for Timeouts {
    fn from(config: &BackendConfig) -> Self {
        Self {
            connect: config.connect_timeout(),
            request: config.request_timeout(),
            pull: config.pull_timeout(),
            stream_idle: config.stream_idle_timeout(),
        }
    }
}

/// HTTP client for a running Ollama server.
pub struct OllamaClient {
    http: Client,
    base_url: String,
    timeouts: Timeouts,
}

impl OllamaClient {
    /// Build a client from the backend section of the configuration.
    pub fn new(config: &BackendConfig) -> reqwest::Result<Self> {
        Self::with_timeouts(&config.base_url, Timeouts::from(config))
    }

    pub fn with_timeouts(base_url: &str, timeouts: Timeouts) -> reqwest::Result<Self> {
        let http = Client::builder()
            .connect_timeout(timeouts.connect)
            .pool_max_idle_per_host(10)
            .build()?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            timeouts,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    /// POST a JSON body and decode a JSON reply, bounded by `timeout`.
    async fn post_json<B, R>(
        &self,
        operation: &'static str,
        path: &str,
        body: &B,
        timeout: Duration,
    ) -> Result<R, BackendError>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let url = self.url(path);
        debug!(operation, url, "Calling inference backend");

        let response = self
            .http
            .post(&url)
            .json(body)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| BackendError::from_reqwest(operation, timeout, e))?;

        let response = check_status(response).await?;

        response
            .json::<R>()
            .await
            .map_err(|e| BackendError::from_reqwest(operation, timeout, e))
    }
}

/// Turn a non-2xx reply into [`BackendError::Status`], using Ollama's
/// `{"error": ...}` body as the message when present.
async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, BackendError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let text = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ErrorBody>(&text)
        .map(|body| body.error)
        .unwrap_or_else(|_| text.trim().to_string());

    Err(BackendError::Status {
        status: status.as_u16(),
        message,
    })
}

fn in_band_error(error: Option<String>) -> Result<(), BackendError> {
    match error {
        Some(message) => Err(BackendError::Engine(message)),
        None => Ok(()),
    }
}

#[async_trait]
impl InferenceBackend for OllamaClient {
    async fn pull(&self, model: &str) -> Result<(), BackendError> {
        let body = PullRequest {
            model,
            stream: false,
        };
        let reply: PullResponse = self
            .post_json("pull", "/api/pull", &body, self.timeouts.pull)
            .await?;
        in_band_error(reply.error)?;
        debug!(model, status = reply.status, "Pull finished");
        Ok(())
    }

    async fn chat(
        &self,
        model: &str,
        messages: &[Message],
        options: &GenerationOptions,
    ) -> Result<ChatResponse, BackendError> {
        let body = ChatRequest {
            model,
            messages,
            stream: false,
            options,
        };
        let mut reply: ChatResponse = self
            .post_json("chat", "/api/chat", &body, self.timeouts.request)
            .await?;
        in_band_error(reply.error.take())?;
        Ok(reply)
    }

    async fn chat_stream(
        &self,
        model: &str,
        messages: &[Message],
        options: &GenerationOptions,
    ) -> Result<ChatStream, BackendError> {
        let body = ChatRequest {
            model,
            messages,
            stream: true,
            options,
        };
        let url = self.url("/api/chat");
        let idle = self.timeouts.stream_idle;
        debug!(url, "Opening streaming chat");

        // No total timeout here: a long answer is fine as long as chunks keep coming.
        let send = self.http.post(&url).json(&body).send();
        let response = tokio::time::timeout(idle, send)
            .await
            .map_err(|_| BackendError::Timeout {
                operation: "chat_stream",
                after: idle,
            })?
            .map_err(|e| BackendError::from_reqwest("chat_stream", idle, e))?;

        let response = check_status(response).await?;

        let chunks = ndjson::decode::<_, _, ChatResponse>(response.bytes_stream(), idle)
            .map(|item| {
                item.and_then(|mut chunk| {
                    in_band_error(chunk.error.take())?;
                    Ok(chunk)
                })
            })
            .boxed();

        Ok(chunks)
    }

    async fn generate(
        &self,
        model: &str,
        prompt: &str,
        options: &GenerationOptions,
    ) -> Result<GenerateResponse, BackendError> {
        let body = GenerateRequest {
            model,
            prompt,
            stream: false,
            options,
        };
        let mut reply: GenerateResponse = self
            .post_json("generate", "/api/generate", &body, self.timeouts.request)
            .await?;
        in_band_error(reply.error.take())?;
        Ok(reply)
    }
}
