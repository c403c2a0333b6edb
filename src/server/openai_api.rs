//! OpenAI-compatible HTTP API.
//!
//! Implements the subset of the OpenAI API this shim exposes:
//! - POST /v1/chat/completions
//! - POST /v1/completions
//! - GET /v1/models
//! - GET /health
//! - GET /
//! - GET /metrics

use std::future::Future;
use std::sync::Arc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::header;
use axum::middleware::from_fn_with_state;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::stream::{self, StreamExt, TryStreamExt};
use serde::{Deserialize, Serialize};
use tower::ServiceBuilder;
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::Config;
use crate::error::GatewayError;
use crate::inference::client::{BackendError, InferenceBackend};
use crate::inference::model_loader::ModelGuard;
use crate::inference::types::{
    ChatResponse, GenerateResponse, GenerationOptions, Message, Role,
};
use crate::metrics::Metrics;
use crate::server::middleware::{cors_layer, record_metrics, trace_layer};
use crate::server::streaming::sse_response;

/// Application state shared across handlers.
pub struct AppState {
    pub backend: Arc<dyn InferenceBackend>,
    pub config: Arc<Config>,
    pub model_guard: ModelGuard,
    pub metrics: Metrics,
    pub start_time: Instant,
}

impl AppState {
    pub fn new(
        backend: Arc<dyn InferenceBackend>,
        config: Arc<Config>,
    ) -> Result<Self, prometheus::Error> {
        Ok(Self {
            model_guard: ModelGuard::new(config.model.name.clone()),
            backend,
            config,
            metrics: Metrics::new()?,
            start_time: Instant::now(),
        })
    }

    /// Make sure the served model is loaded, pulling it on first use.
    pub async fn ensure_model_loaded(&self) -> Result<(), GatewayError> {
        let pull_on_demand = self.config.backend.pull_on_demand;
        self.model_guard
            .ensure_loaded(|| async {
                if pull_on_demand {
                    self.timed("pull", self.backend.pull(self.model_guard.model()))
                        .await
                } else {
                    Ok(())
                }
            })
            .await?;
        self.metrics.set_model_loaded(true);
        Ok(())
    }

    /// Await a backend call, recording its latency and failure code.
    async fn timed<T, F>(&self, operation: &'static str, call: F) -> Result<T, BackendError>
    where
        F: Future<Output = Result<T, BackendError>>,
    {
        let started = Instant::now();
        let result = call.await;
        self.metrics.observe_backend(operation, started.elapsed());
        if let Err(e) = &result {
            self.metrics.record_backend_error(operation, e.code());
        }
        result
    }

    /// Resolve request sampling parameters against the configured defaults.
    fn generation_options(
        &self,
        max_tokens: Option<u32>,
        temperature: Option<f64>,
    ) -> Result<GenerationOptions, GatewayError> {
        let num_predict = max_tokens.unwrap_or(self.config.model.max_tokens);
        if num_predict == 0 {
            return Err(GatewayError::InvalidInput(
                "max_tokens must be a positive integer".to_string(),
            ));
        }

        let temperature = temperature.unwrap_or(self.config.model.default_temperature);
        if !(0.0..=2.0).contains(&temperature) {
            return Err(GatewayError::InvalidInput(
                "temperature must be between 0 and 2".to_string(),
            ));
        }

        Ok(GenerationOptions {
            num_predict,
            temperature,
        })
    }
}

/// Build the axum router with all API routes.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/health", get(health))
        .route("/v1/models", get(list_models))
        .route("/v1/chat/completions", post(chat_completions))
        .route("/v1/completions", post(completions))
        .route("/metrics", get(metrics))
        .route_layer(from_fn_with_state(state.clone(), record_metrics))
        .layer(
            ServiceBuilder::new()
                .layer(trace_layer())
                .layer(cors_layer(&state.config.server)),
        )
        .with_state(state)
}

/// Current unix time in whole seconds.
pub fn unix_time() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

fn unix_time_f64() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or_default()
}

// ─── Request/Response Types ────────────────────────────────────────────────

/// Chat completion request (OpenAI-compatible).
///
/// `model` is accepted for compatibility but the configured model is always used.
#[derive(Debug, Deserialize)]
pub struct ChatCompletionRequest {
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub messages: Vec<ChatMessage>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub temperature: Option<f64>,
    #[serde(default)]
    pub stream: bool,
}

/// Incoming chat message. Fields other than role and content are dropped.
#[derive(Debug, Clone, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    #[serde(default)]
    pub content: Option<MessageContent>,
}

/// Message content: plain text or an array of typed parts.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    #[serde(other)]
    Other,
}

impl MessageContent {
    /// Flatten to text; non-text parts (images, audio) are dropped.
    pub fn into_text(self) -> String {
        match self {
            MessageContent::Text(text) => text,
            MessageContent::Parts(parts) => parts
                .into_iter()
                .filter_map(|part| match part {
                    ContentPart::Text { text } => Some(text),
                    ContentPart::Other => None,
                })
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }
}

impl From<ChatMessage> for Message {
    fn from(msg: ChatMessage) -> Self {
        Message {
            role: msg.role,
            content: msg.content.map(MessageContent::into_text).unwrap_or_default(),
        }
    }
}

/// Chat completion response (non-streaming).
#[derive(Debug, Serialize)]
pub struct ChatCompletionResponse {
    pub id: String,
    pub object: &'static str,
    pub created: u64,
    pub model: String,
    pub choices: Vec<ChatChoice>,
    pub usage: Usage,
}

#[derive(Debug, Serialize)]
pub struct ChatChoice {
    pub index: usize,
    pub message: Message,
    pub finish_reason: &'static str,
}

impl ChatCompletionResponse {
    pub fn from_reply(model: &str, reply: ChatResponse) -> Self {
        let created = unix_time();
        let usage = Usage::from_counts(reply.prompt_eval_count, reply.eval_count);
        let content = reply.message.map(|m| m.content).unwrap_or_default();

        Self {
            id: format!("chatcmpl-{created}"),
            object: "chat.completion",
            created,
            model: model.to_string(),
            choices: vec![ChatChoice {
                index: 0,
                message: Message::new(Role::Assistant, content),
                finish_reason: "stop",
            }],
            usage,
        }
    }
}

/// Completion request (non-chat).
#[derive(Debug, Deserialize)]
pub struct CompletionRequest {
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub prompt: Option<String>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub temperature: Option<f64>,
    #[serde(default)]
    pub stream: bool,
}

#[derive(Debug, Serialize)]
pub struct CompletionResponse {
    pub id: String,
    pub object: &'static str,
    pub created: u64,
    pub model: String,
    pub choices: Vec<CompletionChoice>,
    pub usage: Usage,
}

#[derive(Debug, Serialize)]
pub struct CompletionChoice {
    pub text: String,
    pub index: usize,
    pub finish_reason: &'static str,
}

impl CompletionResponse {
    pub fn from_reply(model: &str, reply: GenerateResponse) -> Self {
        let created = unix_time();
        Self {
            id: format!("cmpl-{created}"),
            object: "text_completion",
            created,
            model: model.to_string(),
            choices: vec![CompletionChoice {
                text: reply.response,
                index: 0,
                finish_reason: "stop",
            }],
            usage: Usage::from_counts(reply.prompt_eval_count, reply.eval_count),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Usage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

impl Usage {
    /// Engine token counts; missing counts are reported as zero.
    pub fn from_counts(prompt_eval_count: Option<u32>, eval_count: Option<u32>) -> Self {
        let prompt_tokens = u64::from(prompt_eval_count.unwrap_or(0));
        let completion_tokens = u64::from(eval_count.unwrap_or(0));
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
        }
    }
}

/// Model listing response.
#[derive(Debug, Serialize)]
pub struct ModelList {
    pub object: &'static str,
    pub data: Vec<ModelInfo>,
}

#[derive(Debug, Serialize)]
pub struct ModelInfo {
    pub id: String,
    pub object: &'static str,
    pub created: u64,
    pub owned_by: String,
}

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub model: String,
    pub model_loaded: bool,
    pub timestamp: f64,
    pub uptime_secs: u64,
}

/// Server descriptor returned by `GET /`.
#[derive(Debug, Serialize)]
pub struct IndexResponse {
    pub name: &'static str,
    pub version: &'static str,
    pub model: String,
    pub endpoints: Endpoints,
}

#[derive(Debug, Serialize)]
pub struct Endpoints {
    pub health: &'static str,
    pub models: &'static str,
    pub chat: &'static str,
    pub completions: &'static str,
    pub metrics: &'static str,
}

// ─── Route Handlers ────────────────────────────────────────────────────────

async fn chat_completions(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<ChatCompletionRequest>, JsonRejection>,
) -> Result<Response, GatewayError> {
    let Json(req) = payload?;
    let request_id = Uuid::new_v4().to_string();

    info!(
        request_id = request_id,
        requested_model = req.model.as_deref().unwrap_or("-"),
        messages = req.messages.len(),
        stream = req.stream,
        "Chat completion request"
    );

    if req.messages.is_empty() {
        return Err(GatewayError::InvalidInput("No messages provided".to_string()));
    }
    let options = state.generation_options(req.max_tokens, req.temperature)?;
    let messages: Vec<Message> = req.messages.into_iter().map(Message::from).collect();

    state.ensure_model_loaded().await?;

    if req.stream {
        return Ok(stream_chat(state, messages, options));
    }

    let model = state.config.model.name.as_str();
    let reply = state
        .timed("chat", state.backend.chat(model, &messages, &options))
        .await?;

    let response = ChatCompletionResponse::from_reply(model, reply);
    debug!(
        request_id = request_id,
        total_tokens = response.usage.total_tokens,
        "Chat completion done"
    );
    Ok(Json(response).into_response())
}

/// Streaming branch of chat completions. The upstream stream is opened inside
/// the response body, so a failure to open it is reported in-band.
fn stream_chat(state: Arc<AppState>, messages: Vec<Message>, options: GenerationOptions) -> Response {
    let model = state.config.model.name.clone();
    let observer = state.clone();

    let upstream = stream::once(async move {
        let started = Instant::now();
        let opened = state
            .backend
            .chat_stream(&state.config.model.name, &messages, &options)
            .await;
        state.metrics.observe_backend("chat_stream", started.elapsed());
        opened
    })
    .try_flatten()
    .inspect(move |item| match item {
        Ok(chunk) if !chunk.content().is_empty() => observer.metrics.record_stream_chunk(),
        Ok(_) => {}
        Err(e) => observer.metrics.record_backend_error("chat_stream", e.code()),
    });

    sse_response(upstream, model)
}

async fn completions(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<CompletionRequest>, JsonRejection>,
) -> Result<Json<CompletionResponse>, GatewayError> {
    let Json(req) = payload?;
    let request_id = Uuid::new_v4().to_string();

    info!(
        request_id = request_id,
        requested_model = req.model.as_deref().unwrap_or("-"),
        stream = req.stream,
        "Completion request"
    );

    let prompt = req.prompt.unwrap_or_default();
    if prompt.is_empty() {
        return Err(GatewayError::InvalidInput("No prompt provided".to_string()));
    }
    if req.stream {
        debug!(request_id = request_id, "Streaming is not offered for /v1/completions; answering in one piece");
    }
    let options = state.generation_options(req.max_tokens, req.temperature)?;

    state.ensure_model_loaded().await?;

    let model = state.config.model.name.as_str();
    let reply = state
        .timed("generate", state.backend.generate(model, &prompt, &options))
        .await?;

    Ok(Json(CompletionResponse::from_reply(model, reply)))
}

async fn list_models(State(state): State<Arc<AppState>>) -> Json<ModelList> {
    Json(ModelList {
        object: "list",
        data: vec![ModelInfo {
            id: state.config.model.name.clone(),
            object: "model",
            created: unix_time(),
            owned_by: state.config.model.owned_by.clone(),
        }],
    })
}

async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        model: state.config.model.name.clone(),
        model_loaded: state.model_guard.is_loaded(),
        timestamp: unix_time_f64(),
        uptime_secs: state.start_time.elapsed().as_secs(),
    })
}

async fn index(State(state): State<Arc<AppState>>) -> Json<IndexResponse> {
    Json(IndexResponse {
        name: env!("CARGO_PKG_NAME"),
        version: env!("CARGO_PKG_VERSION"),
        model: state.config.model.name.clone(),
        endpoints: Endpoints {
            health: "/health",
            models: "/v1/models",
            chat: "/v1/chat/completions",
            completions: "/v1/completions",
            metrics: "/metrics",
        },
    })
}

async fn metrics(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse, GatewayError> {
    let body = state.metrics.render()?;
    Ok((
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        body,
    ))
}
