//! Session management
//!
//! Maps caller-facing session ids to internal conversation thread ids and
//! serializes turns per session. The thread id is the only key the
//! transcript store ever sees; the session id is an indirection layer, so a
//! different transcript backend never touches session semantics.

use crate::agent::{AgentLoop, TranscriptStore};
use pharmgraph_common::metrics;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use uuid::Uuid;

struct SessionEntry {
    thread_id: String,
    last_access: Instant,
    /// Serializes turns for this session; concurrent callers wait
    gate: Arc<Mutex<()>>,
}

impl SessionEntry {
    fn new() -> Self {
        Self {
            thread_id: Uuid::new_v4().to_string(),
            last_access: Instant::now(),
            gate: Arc::new(Mutex::new(())),
        }
    }
}

/// Concurrency-safe registry of sessions bound to one agent loop
pub struct SessionManager {
    agent: AgentLoop,
    transcripts: Arc<dyn TranscriptStore>,
    sessions: Mutex<HashMap<String, SessionEntry>>,
}

impl SessionManager {
    pub fn new(agent: AgentLoop, transcripts: Arc<dyn TranscriptStore>) -> Self {
        Self {
            agent,
            transcripts,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Stateless ask: one turn on a throwaway thread
    pub async fn ask(&self, question: &str) -> String {
        let thread_id = Uuid::new_v4().to_string();
        let answer = self.agent.run_turn(&thread_id, question).await;
        self.transcripts.reset(&thread_id).await;
        answer
    }

    /// Stateful chat turn. A missing session id creates a new session;
    /// the (possibly generated) id is returned with the answer.
    pub async fn chat(&self, session_id: Option<String>, question: &str) -> (String, String) {
        let session_id = session_id
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let (thread_id, gate) = {
            let mut sessions = self.sessions.lock().await;
            let entry = sessions
                .entry(session_id.clone())
                .or_insert_with(SessionEntry::new);
            entry.last_access = Instant::now();
            let handles = (entry.thread_id.clone(), entry.gate.clone());
            metrics::set_active_sessions(sessions.len());
            handles
        };

        // Turns for the same session are serialized; other sessions are
        // untouched by this lock
        let _turn = gate.lock().await;
        let answer = self.agent.run_turn(&thread_id, question).await;
        (answer, session_id)
    }

    /// Invalidate a session's thread identity. The next turn on the same
    /// session id starts a fresh transcript.
    pub async fn clear(&self, session_id: &str) -> bool {
        let removed = {
            let mut sessions = self.sessions.lock().await;
            let removed = sessions.remove(session_id);
            metrics::set_active_sessions(sessions.len());
            removed
        };

        match removed {
            Some(entry) => {
                self.transcripts.reset(&entry.thread_id).await;
                tracing::info!(session_id, "Session cleared");
                true
            }
            None => false,
        }
    }

    /// Number of live sessions
    pub async fn active_count(&self) -> usize {
        self.sessions.lock().await.len()
    }

    /// Drop sessions idle for longer than `max_idle`. Operational hygiene,
    /// never invoked implicitly.
    pub async fn evict_idle(&self, max_idle: Duration) -> usize {
        let evicted: Vec<SessionEntry> = {
            let mut sessions = self.sessions.lock().await;
            let stale: Vec<String> = sessions
                .iter()
                .filter(|(_, entry)| entry.last_access.elapsed() > max_idle)
                .map(|(id, _)| id.clone())
                .collect();
            let evicted = stale
                .iter()
                .filter_map(|id| sessions.remove(id))
                .collect();
            metrics::set_active_sessions(sessions.len());
            evicted
        };

        let count = evicted.len();
        for entry in evicted {
            self.transcripts.reset(&entry.thread_id).await;
        }
        if count > 0 {
            tracing::info!(count, "Evicted idle sessions");
        }
        count
    }

    #[cfg(test)]
    async fn thread_id_of(&self, session_id: &str) -> Option<String> {
        self.sessions
            .lock()
            .await
            .get(session_id)
            .map(|e| e.thread_id.clone())
    }
}
