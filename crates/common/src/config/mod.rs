//! Configuration management for PharmGraph services
//!
//! Supports loading configuration from:
//! - Environment variables (prefixed with APP__)
//! - Configuration files (config.toml, config.yaml)
//! - Default values

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    /// Server configuration
    pub server: ServerConfig,

    /// Chat model configuration
    pub chat_model: ChatModelConfig,

    /// Embedding service configuration
    pub embedding: EmbeddingConfig,

    /// Name resolver configuration
    pub resolver: ResolverConfig,

    /// Agent loop configuration
    pub agent: AgentConfig,

    /// Interaction data configuration
    pub data: DataConfig,

    /// Observability configuration
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Host to bind to
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,

    /// Request timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Shutdown timeout in seconds
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ChatModelConfig {
    /// Chat model provider: openai, mock
    #[serde(default = "default_chat_provider")]
    pub provider: String,

    /// API key for the chat model service
    pub api_key: Option<String>,

    /// API base URL (for custom endpoints)
    pub api_base: Option<String>,

    /// Model to use
    #[serde(default = "default_chat_model")]
    pub model: String,

    /// Request timeout in seconds
    #[serde(default = "default_chat_timeout")]
    pub timeout_secs: u64,

    /// Maximum retries
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EmbeddingConfig {
    /// Embedding provider: openai, mock
    #[serde(default = "default_embedding_provider")]
    pub provider: String,

    /// API key for embedding service
    pub api_key: Option<String>,

    /// API base URL (for custom endpoints)
    pub api_base: Option<String>,

    /// Model to use
    #[serde(default = "default_embedding_model")]
    pub model: String,

    /// Embedding dimension
    #[serde(default = "default_embedding_dimension")]
    pub dimension: usize,

    /// Request timeout in seconds
    #[serde(default = "default_embedding_timeout")]
    pub timeout_secs: u64,

    /// Maximum retries
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Batch size for embedding requests
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ResolverConfig {
    /// Enable the generative ingredient-extraction stage
    #[serde(default = "default_extraction_enabled")]
    pub extraction_enabled: bool,

    /// Minimum similarity for accepting a mapping
    #[serde(default = "default_match_threshold")]
    pub match_threshold: f32,

    /// Minimum similarity for ranked suggestions
    #[serde(default = "default_suggestion_threshold")]
    pub suggestion_threshold: f32,

    /// Timeout for the extraction model call in seconds
    #[serde(default = "default_extraction_timeout")]
    pub extraction_timeout_secs: u64,

    /// Maximum number of ranked suggestions
    #[serde(default = "default_max_suggestions")]
    pub max_suggestions: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AgentConfig {
    /// Maximum reasoning/acting cycles per turn
    #[serde(default = "default_max_cycles")]
    pub max_cycles: usize,

    /// Timeout for a single model call in seconds
    #[serde(default = "default_model_timeout")]
    pub model_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DataConfig {
    /// Path to the interaction triples file (.csv or .json)
    #[serde(default = "default_interactions_path")]
    pub interactions_path: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ObservabilityConfig {
    /// Log level (debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Enable JSON logging
    #[serde(default = "default_json_logging")]
    pub json_logging: bool,

    /// Metrics port (0 to disable)
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,

    /// Service name for tracing
    #[serde(default = "default_service_name")]
    pub service_name: String,
}

// Default value functions
fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8080
}
fn default_request_timeout() -> u64 {
    120
}
fn default_shutdown_timeout() -> u64 {
    30
}
fn default_chat_provider() -> String {
    "openai".to_string()
}
fn default_chat_model() -> String {
    crate::DEFAULT_CHAT_MODEL.to_string()
}
fn default_chat_timeout() -> u64 {
    60
}
fn default_embedding_provider() -> String {
    "openai".to_string()
}
fn default_embedding_model() -> String {
    crate::DEFAULT_EMBEDDING_MODEL.to_string()
}
fn default_embedding_dimension() -> usize {
    crate::DEFAULT_EMBEDDING_DIMENSION
}
fn default_embedding_timeout() -> u64 {
    30
}
fn default_max_retries() -> u32 {
    3
}
fn default_batch_size() -> usize {
    100
}
fn default_extraction_enabled() -> bool {
    true
}
fn default_match_threshold() -> f32 {
    0.7
}
fn default_suggestion_threshold() -> f32 {
    0.5
}
fn default_extraction_timeout() -> u64 {
    10
}
fn default_max_suggestions() -> usize {
    5
}
fn default_max_cycles() -> usize {
    10
}
fn default_model_timeout() -> u64 {
    60
}
fn default_interactions_path() -> String {
    "data/interactions.csv".to_string()
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_json_logging() -> bool {
    true
}
fn default_metrics_port() -> u16 {
    9090
}
fn default_service_name() -> String {
    "pharmgraph".to_string()
}

impl AppConfig {
    /// Load configuration from environment and files
    pub fn load() -> Result<Self, ConfigError> {
        let env = std::env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());

        let config = Config::builder()
            // Start with defaults
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 8080)?
            // Load base config file
            .add_source(File::with_name("config/default").required(false))
            // Load environment-specific config
            .add_source(File::with_name(&format!("config/{}", env)).required(false))
            // Load local overrides
            .add_source(File::with_name("config/local").required(false))
            // Load from environment variables with APP__ prefix
            // e.g., APP__SERVER__PORT=8081
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Load from a specific TOML file
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(File::with_name(path))
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Get request timeout as Duration
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.server.request_timeout_secs)
    }

    /// Get shutdown timeout as Duration
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.server.shutdown_timeout_secs)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: default_host(),
                port: default_port(),
                request_timeout_secs: default_request_timeout(),
                shutdown_timeout_secs: default_shutdown_timeout(),
            },
            chat_model: ChatModelConfig {
                provider: default_chat_provider(),
                api_key: None,
                api_base: None,
                model: default_chat_model(),
                timeout_secs: default_chat_timeout(),
                max_retries: default_max_retries(),
            },
            embedding: EmbeddingConfig {
                provider: default_embedding_provider(),
                api_key: None,
                api_base: None,
                model: default_embedding_model(),
                dimension: default_embedding_dimension(),
                timeout_secs: default_embedding_timeout(),
                max_retries: default_max_retries(),
                batch_size: default_batch_size(),
            },
            resolver: ResolverConfig {
                extraction_enabled: default_extraction_enabled(),
                match_threshold: default_match_threshold(),
                suggestion_threshold: default_suggestion_threshold(),
                extraction_timeout_secs: default_extraction_timeout(),
                max_suggestions: default_max_suggestions(),
            },
            agent: AgentConfig {
                max_cycles: default_max_cycles(),
                model_timeout_secs: default_model_timeout(),
            },
            data: DataConfig {
                interactions_path: default_interactions_path(),
            },
            observability: ObservabilityConfig {
                log_level: default_log_level(),
                json_logging: default_json_logging(),
                metrics_port: default_metrics_port(),
                service_name: default_service_name(),
            },
        }
    }
}
