//! Runtime configuration for ollama-openai-shim.
//!
//! Configuration is layered: built-in defaults, then an optional JSON file,
//! then environment variables and command-line flags (both parsed by clap).

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use serde::{Deserialize, Serialize};

/// Command-line arguments.
///
/// Every override can also be given through the environment variable named
/// in its `env` attribute.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "ollama-openai-shim",
    about = "OpenAI-compatible API server backed by a local Ollama instance",
    version
)]
pub struct Cli {
    /// Path to configuration file (JSON).
    #[arg(short, long, default_value = "config.json")]
    pub config: PathBuf,

    /// Model to serve.
    #[arg(long, env = "MODEL_NAME")]
    pub model: Option<String>,

    /// Default maximum number of tokens to generate.
    #[arg(long, env = "MAX_TOKENS")]
    pub max_tokens: Option<u32>,

    /// Interface to bind.
    #[arg(long, env = "HOST")]
    pub host: Option<String>,

    /// HTTP listen port.
    #[arg(short, long, env = "PORT")]
    pub port: Option<u16>,

    /// Base URL of the Ollama server.
    #[arg(long = "ollama-url", env = "OLLAMA_HOST")]
    pub ollama_url: Option<String>,

    /// Comma-separated list of allowed CORS origins.
    #[arg(long, env = "CORS_ALLOWED_ORIGINS")]
    pub cors_allowed_origins: Option<String>,

    /// Enable verbose logging.
    #[arg(short, long)]
    pub verbose: bool,

    /// Emit logs as JSON lines.
    #[arg(long)]
    pub log_json: bool,
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Server configuration.
    pub server: ServerConfig,

    /// Served model configuration.
    pub model: ModelConfig,

    /// Ollama backend configuration.
    pub backend: BackendConfig,
}

/// HTTP server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Interface to bind (e.g. "0.0.0.0").
    pub host: String,

    /// Listen port.
    pub port: u16,

    /// Allowed CORS origins, comma separated. `None` allows any origin.
    pub cors_allowed_origins: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            cors_allowed_origins: None,
        }
    }
}

impl ServerConfig {
    /// Socket address string to bind.
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Settings for the single model this server exposes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Ollama model tag.
    pub name: String,

    /// Default `max_tokens` when a request omits it.
    pub max_tokens: u32,

    /// Default sampling temperature when a request omits it.
    pub default_temperature: f64,

    /// `owned_by` tag reported by `/v1/models`.
    pub owned_by: String,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            name: "deepseek-r1:1.5b".to_string(),
            max_tokens: 2048,
            default_temperature: 0.7,
            owned_by: "deepseek".to_string(),
        }
    }
}

/// Ollama connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// Base URL of the Ollama HTTP API.
    pub base_url: String,

    /// Timeout for non-streaming chat and generate calls.
    pub request_timeout_secs: u64,

    /// Timeout for pulling the model.
    pub pull_timeout_secs: u64,

    /// Maximum silence between two chunks of a streaming response.
    pub stream_idle_timeout_secs: u64,

    /// TCP connect timeout.
    pub connect_timeout_secs: u64,

    /// Pull the model on the first request. When false the model is assumed
    /// to be present already.
    pub pull_on_demand: bool,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:11434".to_string(),
            request_timeout_secs: 300,
            pull_timeout_secs: 1800,
            stream_idle_timeout_secs: 120,
            connect_timeout_secs: 10,
            pull_on_demand: true,
        }
    }
}

impl BackendConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn pull_timeout(&self) -> Duration {
        Duration::from_secs(self.pull_timeout_secs)
    }

    pub fn stream_idle_timeout(&self) -> Duration {
        Duration::from_secs(self.stream_idle_timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

impl Config {
    /// Load configuration from a JSON file, falling back to defaults for missing fields.
    pub fn load(path: &std::path::Path) -> anyhow::Result<Self> {
        if path.exists() {
            let data = std::fs::read_to_string(path)?;
            let config: Config = serde_json::from_str(&data)?;
            Ok(config)
        } else {
            tracing::warn!("Config file not found at {:?}, using defaults", path);
            Ok(Config::default())
        }
    }

    /// Apply command-line and environment overrides on top of the file values.
    pub fn apply_cli(&mut self, cli: &Cli) {
        if let Some(model) = &cli.model {
            self.model.name = model.clone();
        }
        if let Some(max_tokens) = cli.max_tokens {
            self.model.max_tokens = max_tokens;
        }
        if let Some(host) = &cli.host {
            self.server.host = host.clone();
        }
        if let Some(port) = cli.port {
            self.server.port = port;
        }
        if let Some(url) = &cli.ollama_url {
            self.backend.base_url = url.clone();
        }
        if let Some(origins) = &cli.cors_allowed_origins {
            self.server.cors_allowed_origins = Some(origins.clone());
        }
        self.backend.base_url = normalize_base_url(&self.backend.base_url);
    }
}

/// Turn `OLLAMA_HOST`-style values (`0.0.0.0:11434`, `http://host:11434/`)
/// into a base URL without a trailing slash.
pub fn normalize_base_url(raw: &str) -> String {
    let trimmed = raw.trim().trim_end_matches('/');
    if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        trimmed.to_string()
    } else {
        format!("http://{trimmed}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let cfg = Config::default();
        assert_eq!(cfg.model.name, "deepseek-r1:1.5b");
        assert_eq!(cfg.model.max_tokens, 2048);
        assert_eq!(cfg.server.port, 8080);
        assert_eq!(cfg.server.listen_addr(), "0.0.0.0:8080");
        assert_eq!(cfg.backend.stream_idle_timeout(), Duration::from_secs(120));
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"model": {{"name": "llama3.2"}}, "server": {{"port": 9000}}}}"#).unwrap();

        let cfg = Config::load(file.path()).unwrap();
        assert_eq!(cfg.model.name, "llama3.2");
        assert_eq!(cfg.model.max_tokens, 2048);
        assert_eq!(cfg.server.port, 9000);
        assert_eq!(cfg.server.host, "0.0.0.0");
        assert!(cfg.backend.pull_on_demand);
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = Config::load(&dir.path().join("absent.json")).unwrap();
        assert_eq!(cfg.model.name, ModelConfig::default().name);
    }

    #[test]
    fn test_unparsable_file_is_an_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();
        assert!(Config::load(file.path()).is_err());
    }

    #[test]
    fn test_cli_overrides() {
        let cli = Cli::try_parse_from([
            "ollama-openai-shim",
            "--model",
            "qwen2.5:0.5b",
            "--max-tokens",
            "128",
            "--port",
            "9999",
            "--ollama-url",
            "ollama:11434",
        ])
        .unwrap();

        let mut cfg = Config::default();
        cfg.apply_cli(&cli);
        assert_eq!(cfg.model.name, "qwen2.5:0.5b");
        assert_eq!(cfg.model.max_tokens, 128);
        assert_eq!(cfg.server.port, 9999);
        assert_eq!(cfg.backend.base_url, "http://ollama:11434");
    }

    #[test]
    fn test_normalize_base_url() {
        assert_eq!(normalize_base_url("0.0.0.0:11434"), "http://0.0.0.0:11434");
        assert_eq!(normalize_base_url("https://gpu.local/"), "https://gpu.local");
        assert_eq!(normalize_base_url("http://127.0.0.1:11434"), "http://127.0.0.1:11434");
    }
}
