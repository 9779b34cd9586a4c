//! PharmGraph Common Library
//!
//! Shared code for the PharmGraph services including:
//! - Error types and handling
//! - Configuration management
//! - Chat model client abstraction (tool-calling capable)
//! - Embedding client abstraction
//! - Metrics and observability

pub mod chat;
pub mod config;
pub mod embeddings;
pub mod errors;
pub mod metrics;

// Re-export commonly used types
pub use chat::{ChatMessage, ChatModel, ChatRequest, MessageRole, ToolCall, ToolSchema};
pub use config::AppConfig;
pub use embeddings::Embedder;
pub use errors::{AppError, Result};

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default chat model
pub const DEFAULT_CHAT_MODEL: &str = "gpt-4o-mini";

/// Default embedding model
pub const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-3-small";

/// Default embedding dimension
pub const DEFAULT_EMBEDDING_DIMENSION: usize = 768;
