//! Conversation transcript storage
//!
//! Transcripts are keyed by thread id, the loop-internal identity of a
//! conversation. The trait is the substitution point for a persistent
//! checkpoint store; session semantics never depend on the implementation.

use async_trait::async_trait;
use pharmgraph_common::chat::ChatMessage;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Checkpointed transcript store keyed by thread id
#[async_trait]
pub trait TranscriptStore: Send + Sync {
    /// Full ordered history for a thread; empty for unknown threads
    async fn history(&self, thread_id: &str) -> Vec<ChatMessage>;

    /// Append a completed turn's messages to a thread
    async fn append(&self, thread_id: &str, turns: Vec<ChatMessage>);

    /// Drop a thread's history
    async fn reset(&self, thread_id: &str);
}

/// Process-local transcript store
#[derive(Default)]
pub struct InMemoryTranscriptStore {
    threads: RwLock<HashMap<String, Vec<ChatMessage>>>,
}

impl InMemoryTranscriptStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of threads with stored history
    pub async fn thread_count(&self) -> usize {
        self.threads.read().await.len()
    }
}

#[async_trait]
impl TranscriptStore for InMemoryTranscriptStore {
    async fn history(&self, thread_id: &str) -> Vec<ChatMessage> {
        self.threads
            .read()
            .await
            .get(thread_id)
            .cloned()
            .unwrap_or_default()
    }

    async fn append(&self, thread_id: &str, turns: Vec<ChatMessage>) {
        if turns.is_empty() {
            return;
        }
        self.threads
            .write()
            .await
            .entry(thread_id.to_string())
            .or_default()
            .extend(turns);
    }

    async fn reset(&self, thread_id: &str) {
        self.threads.write().await.remove(thread_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_history_roundtrip() {
        let store = InMemoryTranscriptStore::new();
        assert!(store.history("t1").await.is_empty());

        store
            .append("t1", vec![ChatMessage::user("hi"), ChatMessage::assistant("hello")])
            .await;
        let history = store.history("t1").await;
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].content, "hi");
    }

    #[tokio::test]
    async fn test_threads_are_isolated() {
        let store = InMemoryTranscriptStore::new();
        store.append("t1", vec![ChatMessage::user("warfarin")]).await;
        store.append("t2", vec![ChatMessage::user("aspirin")]).await;

        assert_eq!(store.history("t1").await[0].content, "warfarin");
        assert_eq!(store.history("t2").await[0].content, "aspirin");
        assert_eq!(store.thread_count().await, 2);
    }

    #[tokio::test]
    async fn test_reset_clears_thread() {
        let store = InMemoryTranscriptStore::new();
        store.append("t1", vec![ChatMessage::user("hi")]).await;
        store.reset("t1").await;
        assert!(store.history("t1").await.is_empty());
    }

    #[tokio::test]
    async fn test_empty_append_is_noop() {
        let store = InMemoryTranscriptStore::new();
        store.append("t1", Vec::new()).await;
        assert_eq!(store.thread_count().await, 0);
    }
}
