//! PharmGraph Agent Core
//!
//! The drug-interaction question-answering core:
//! - In-memory interaction store (undirected graph, O(1) pair lookup)
//! - Two-stage name resolver (generative extraction + embedding match)
//! - Tool surface exposed to the chat model
//! - Bounded reasoning/acting orchestration loop with streaming
//! - Session manager mapping caller session ids to conversation threads

pub mod agent;
pub mod ingest;
pub mod resolver;
pub mod session;
pub mod store;
pub mod tools;

pub use agent::{AgentLoop, AnswerEvent, InMemoryTranscriptStore, TranscriptStore};
pub use resolver::{EmbeddingIndex, NameResolver, ResolutionResult};
pub use session::SessionManager;
pub use store::{InteractionRecord, InteractionStore, StoreStats};
pub use tools::{ToolContext, ToolInvocation};
