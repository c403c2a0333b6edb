//! Shared helpers for the integration tests: a scripted inference backend and
//! in-process request helpers.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{HeaderMap, Method, Request, StatusCode};
use axum::Router;
use futures::stream::{self, StreamExt};
use http_body_util::BodyExt;
use tower::ServiceExt;

use ollama_openai_shim::config::Config;
use ollama_openai_shim::inference::client::{BackendError, ChatStream, InferenceBackend};
use ollama_openai_shim::inference::types::{
    ChatResponse, GenerateResponse, GenerationOptions, Message,
};
use ollama_openai_shim::server::openai_api::{build_router, AppState};

/// Failure a scripted call should produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Failure {
    Unavailable,
    Timeout,
    Engine,
}

impl Failure {
    pub fn to_error(self) -> BackendError {
        match self {
            Failure::Unavailable => BackendError::Unavailable("connection refused".into()),
            Failure::Timeout => BackendError::Timeout {
                operation: "chat",
                after: Duration::from_secs(300),
            },
            Failure::Engine => BackendError::Engine("model 'x' not found".into()),
        }
    }
}

/// One step of a scripted streaming reply.
#[derive(Debug, Clone)]
pub enum Step {
    Content(&'static str),
    Fail(Failure),
}

/// Inference backend that replays a script and counts calls.
pub struct MockBackend {
    pub pulls: AtomicUsize,
    pub chats: AtomicUsize,
    pub streams: AtomicUsize,
    pub generates: AtomicUsize,
    /// Number of upcoming pulls that should fail.
    pub failing_pulls: AtomicUsize,
    pub chat_failure: Option<Failure>,
    pub stream_open_failure: Option<Failure>,
    pub reply: &'static str,
    pub prompt_eval_count: Option<u32>,
    pub eval_count: Option<u32>,
    pub stream_script: Vec<Step>,
    pub last_messages: Mutex<Vec<Message>>,
    pub last_options: Mutex<Option<GenerationOptions>>,
    pub last_prompt: Mutex<Option<String>>,
}

impl Default for MockBackend {
    fn default() -> Self {
        Self {
            pulls: AtomicUsize::new(0),
            chats: AtomicUsize::new(0),
            streams: AtomicUsize::new(0),
            generates: AtomicUsize::new(0),
            failing_pulls: AtomicUsize::new(0),
            chat_failure: None,
            stream_open_failure: None,
            reply: "Hello there!",
            prompt_eval_count: Some(9),
            eval_count: Some(4),
            stream_script: vec![Step::Content("Hel"), Step::Content("lo")],
            last_messages: Mutex::new(Vec::new()),
            last_options: Mutex::new(None),
            last_prompt: Mutex::new(None),
        }
    }
}

impl MockBackend {
    pub fn backend_calls(&self) -> usize {
        self.pulls.load(Ordering::SeqCst)
            + self.chats.load(Ordering::SeqCst)
            + self.streams.load(Ordering::SeqCst)
            + self.generates.load(Ordering::SeqCst)
    }

    fn record(&self, messages: &[Message], options: &GenerationOptions) {
        *self.last_messages.lock().unwrap() = messages.to_vec();
        *self.last_options.lock().unwrap() = Some(*options);
    }
}

#[async_trait]
impl InferenceBackend for MockBackend {
    async fn pull(&self, _model: &str) -> Result<(), BackendError> {
        self.pulls.fetch_add(1, Ordering::SeqCst);
        let failing = self.failing_pulls.load(Ordering::SeqCst);
        if failing > 0 {
            self.failing_pulls.store(failing - 1, Ordering::SeqCst);
            return Err(Failure::Unavailable.to_error());
        }
        Ok(())
    }

    async fn chat(
        &self,
        _model: &str,
        messages: &[Message],
        options: &GenerationOptions,
    ) -> Result<ChatResponse, BackendError> {
        self.chats.fetch_add(1, Ordering::SeqCst);
        self.record(messages, options);
        if let Some(failure) = self.chat_failure {
            return Err(failure.to_error());
        }
        Ok(ChatResponse {
            done: true,
            prompt_eval_count: self.prompt_eval_count,
            eval_count: self.eval_count,
            ..ChatResponse::with_content(self.reply)
        })
    }

    async fn chat_stream(
        &self,
        _model: &str,
        messages: &[Message],
        options: &GenerationOptions,
    ) -> Result<ChatStream, BackendError> {
        self.streams.fetch_add(1, Ordering::SeqCst);
        self.record(messages, options);
        if let Some(failure) = self.stream_open_failure {
            return Err(failure.to_error());
        }

        let mut items: Vec<Result<ChatResponse, BackendError>> = Vec::new();
        let mut failed = false;
        for step in &self.stream_script {
            match step {
                Step::Content(text) => items.push(Ok(ChatResponse::with_content(*text))),
                Step::Fail(failure) => {
                    items.push(Err(failure.to_error()));
                    failed = true;
                }
            }
        }
        if !failed {
            items.push(Ok(ChatResponse {
                done: true,
                prompt_eval_count: self.prompt_eval_count,
                eval_count: self.eval_count,
                ..ChatResponse::default()
            }));
        }
        Ok(stream::iter(items).boxed())
    }

    async fn generate(
        &self,
        _model: &str,
        prompt: &str,
        options: &GenerationOptions,
    ) -> Result<GenerateResponse, BackendError> {
        self.generates.fetch_add(1, Ordering::SeqCst);
        *self.last_prompt.lock().unwrap() = Some(prompt.to_string());
        *self.last_options.lock().unwrap() = Some(*options);
        if let Some(failure) = self.chat_failure {
            return Err(failure.to_error());
        }
        Ok(GenerateResponse {
            response: self.reply.to_string(),
            done: true,
            prompt_eval_count: self.prompt_eval_count,
            eval_count: self.eval_count,
            ..GenerateResponse::default()
        })
    }
}

pub fn test_config() -> Config {
    let mut config = Config::default();
    config.model.name = "test-model:1b".to_string();
    config.model.max_tokens = 256;
    config
}

pub fn router_with(backend: Arc<MockBackend>) -> (Router, Arc<AppState>) {
    router_with_config(backend, test_config())
}

pub fn router_with_config(backend: Arc<MockBackend>, config: Config) -> (Router, Arc<AppState>) {
    let state = Arc::new(AppState::new(backend, Arc::new(config)).unwrap());
    (build_router(state.clone()), state)
}

pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: String,
}

impl TestResponse {
    pub fn json(&self) -> serde_json::Value {
        serde_json::from_str(&self.body).unwrap_or_else(|e| panic!("invalid JSON ({e}): {}", self.body))
    }

    /// `data:` payloads of an SSE body, in order.
    pub fn sse_data(&self) -> Vec<String> {
        self.body
            .split("\n\n")
            .filter_map(|event| {
                let data: Vec<&str> = event
                    .lines()
                    .filter_map(|line| line.strip_prefix("data:"))
                    .map(|d| d.strip_prefix(' ').unwrap_or(d))
                    .collect();
                (!data.is_empty()).then(|| data.join("\n"))
            })
            .collect()
    }
}

pub async fn send(app: &Router, request: Request<Body>) -> TestResponse {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    TestResponse {
        status,
        headers,
        body: String::from_utf8(bytes.to_vec()).unwrap(),
    }
}

pub async fn get(app: &Router, uri: &str) -> TestResponse {
    send(app, Request::builder().uri(uri).body(Body::empty()).unwrap()).await
}

pub async fn post_json(app: &Router, uri: &str, body: serde_json::Value) -> TestResponse {
    post_raw(app, uri, &body.to_string()).await
}

pub async fn post_raw(app: &Router, uri: &str, body: &str) -> TestResponse {
    send(
        app,
        Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
    )
    .await
}
