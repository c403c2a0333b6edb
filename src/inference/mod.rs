//! Inference backend access.
//!
//! - [`client`]: `InferenceBackend` trait and the Ollama HTTP client
//! - [`types`]: Ollama wire types
//! - [`ndjson`]: NDJSON decoding for streaming replies
//! - [`model_loader`]: exactly-once model load guard

pub mod client;
pub mod model_loader;
pub mod ndjson;
pub mod types;
