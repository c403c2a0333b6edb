//! HTTP server providing an OpenAI-compatible API.
//!
//! - [`openai_api`]: Request/response types, state and route handlers
//! - [`streaming`]: SSE streaming for token-by-token responses
//! - [`middleware`]: CORS, tracing and request metrics layers

pub mod middleware;
pub mod openai_api;
pub mod streaming;
