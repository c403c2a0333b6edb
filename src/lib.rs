//! ollama-openai-shim: OpenAI-compatible API in front of a local Ollama server.
//!
//! Serves a single configured model. Requests are validated, the model is
//! pulled on first use, and the call is forwarded to Ollama's chat or
//! generate endpoint. Replies are reshaped into OpenAI JSON, or relayed
//! chunk by chunk as Server-Sent Events when streaming.

pub mod config;
pub mod error;
pub mod inference;
pub mod metrics;
pub mod server;
