//! Bounded reasoning/acting orchestration loop
//!
//! Drives the chat model against the tool surface until it produces a final
//! answer. States: `Reasoning` (model call) alternates with `Acting` (tool
//! execution); `Terminal` is reached only from `Reasoning`, when the model
//! replies without tool calls. The cycle count is bounded per turn and the
//! loop fails closed with a generic answer when the bound is exceeded.
//!
//! Transcript commits are all-or-nothing per turn: an abandoned turn (e.g.
//! a dropped stream consumer) never writes partial state.

mod transcript;

pub use transcript::{InMemoryTranscriptStore, TranscriptStore};

use crate::tools::{ToolContext, ToolInvocation};
use pharmgraph_common::chat::{ChatMessage, ChatModel, ChatRequest};
use pharmgraph_common::config::AgentConfig;
use pharmgraph_common::metrics;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

/// System prompt prepended to every fresh conversation
const SYSTEM_PROMPT: &str = "\
You are a helpful medical information assistant specialized in drug-drug \
interactions, with access to a database of known interactions. When \
answering questions: use the search_interactions tool to find interactions \
between specific drugs; use the list_interactions tool to find all \
interactions for a single drug; use the database_stats tool for database \
statistics; use the map_drug_name tool to check how a name is interpreted. \
Provide clear, accurate information based on the database. If no \
interaction is found, clearly state that. Always mention that users should \
consult healthcare professionals for medical advice.";

/// Answer when the cycle bound is exceeded
const CYCLE_LIMIT_ANSWER: &str = "\
I wasn't able to finish working through that question. Please try asking \
it in a simpler form.";

/// Answer when the model itself is unavailable
const UPSTREAM_FAILURE_ANSWER: &str = "\
I'm sorry, I'm having trouble answering right now. Please try again in a \
moment.";

/// Streamed turn output: partial answer chunks followed by a terminal
/// sentinel carrying the full answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnswerEvent {
    Delta(String),
    Final(String),
}

/// Loop state for one turn
enum LoopState {
    Reasoning,
    Acting(Vec<pharmgraph_common::chat::ToolCall>),
}

/// The consumer went away mid-turn; nothing was committed.
struct Cancelled;

/// Reasoning/acting loop bound to a transcript store
#[derive(Clone)]
pub struct AgentLoop {
    chat: Arc<dyn ChatModel>,
    tools: Arc<ToolContext>,
    transcripts: Arc<dyn TranscriptStore>,
    config: AgentConfig,
}

impl AgentLoop {
    pub fn new(
        chat: Arc<dyn ChatModel>,
        tools: Arc<ToolContext>,
        transcripts: Arc<dyn TranscriptStore>,
        config: AgentConfig,
    ) -> Self {
        Self {
            chat,
            tools,
            transcripts,
            config,
        }
    }

    /// Run one turn to completion and return the final answer.
    ///
    /// Always produces natural language; upstream failures degrade to an
    /// apology answer rather than an error.
    pub async fn run_turn(&self, thread_id: &str, question: &str) -> String {
        match self.drive(thread_id, question, None).await {
            Ok(answer) => answer,
            // Unreachable without an emitter, but fail closed anyway
            Err(Cancelled) => UPSTREAM_FAILURE_ANSWER.to_string(),
        }
    }

    /// Run one turn, streaming partial answer content.
    ///
    /// Yields `Delta` chunks as reasoning output becomes available and ends
    /// with the `Final` sentinel. Dropping the stream cancels the turn
    /// without committing transcript state.
    pub fn stream_turn(&self, thread_id: &str, question: &str) -> ReceiverStream<AnswerEvent> {
        let (tx, rx) = mpsc::channel(16);
        let this = self.clone();
        let thread_id = thread_id.to_string();
        let question = question.to_string();

        tokio::spawn(async move {
            if this.drive(&thread_id, &question, Some(tx)).await.is_err() {
                tracing::debug!(thread_id, "Turn abandoned by consumer");
            }
        });

        ReceiverStream::new(rx)
    }

    async fn drive(
        &self,
        thread_id: &str,
        question: &str,
        emitter: Option<mpsc::Sender<AnswerEvent>>,
    ) -> Result<String, Cancelled> {
        let started = Instant::now();
        let history = self.transcripts.history(thread_id).await;

        // Pending messages are committed only when the turn completes
        let mut pending: Vec<ChatMessage> = Vec::new();
        if history.is_empty() {
            pending.push(ChatMessage::system(SYSTEM_PROMPT));
        }
        pending.push(ChatMessage::user(question));

        let mut state = LoopState::Reasoning;
        let mut cycles = 0usize;

        loop {
            match state {
                LoopState::Reasoning => {
                    if cycles >= self.config.max_cycles {
                        tracing::warn!(thread_id, cycles, "Cycle bound exceeded, failing closed");
                        return self
                            .finish(
                                thread_id,
                                pending,
                                CYCLE_LIMIT_ANSWER.to_string(),
                                &emitter,
                                started,
                                cycles,
                                "cycle_limit",
                            )
                            .await;
                    }
                    cycles += 1;

                    let mut messages = history.clone();
                    messages.extend(pending.iter().cloned());
                    let request = ChatRequest::new(self.chat.model_name(), messages)
                        .with_tools(ToolInvocation::schemas());

                    let timeout = Duration::from_secs(self.config.model_timeout_secs);
                    let reply = match tokio::time::timeout(timeout, self.chat.complete(request)).await
                    {
                        Ok(Ok(message)) => message,
                        Ok(Err(e)) => {
                            tracing::error!(thread_id, error = %e, "Chat model failed");
                            return self
                                .finish(
                                    thread_id,
                                    pending,
                                    UPSTREAM_FAILURE_ANSWER.to_string(),
                                    &emitter,
                                    started,
                                    cycles,
                                    "degraded",
                                )
                                .await;
                        }
                        Err(_) => {
                            tracing::error!(
                                thread_id,
                                timeout_secs = self.config.model_timeout_secs,
                                "Chat model timed out"
                            );
                            return self
                                .finish(
                                    thread_id,
                                    pending,
                                    UPSTREAM_FAILURE_ANSWER.to_string(),
                                    &emitter,
                                    started,
                                    cycles,
                                    "degraded",
                                )
                                .await;
                        }
                    };

                    if !reply.content.is_empty() {
                        emit(&emitter, AnswerEvent::Delta(reply.content.clone())).await?;
                    }

                    if reply.has_tool_calls() {
                        let calls = reply.tool_calls.clone();
                        pending.push(reply);
                        state = LoopState::Acting(calls);
                    } else {
                        // Terminal: the reply content is the final answer
                        let answer = reply.content.clone();
                        pending.push(reply);
                        return self
                            .finish(thread_id, pending, answer, &emitter, started, cycles, "completed")
                            .await;
                    }
                }
                LoopState::Acting(calls) => {
                    // Calls within one acting phase are independent; each
                    // failure becomes a textual result, never a turn abort
                    for call in &calls {
                        let output = match ToolInvocation::parse(
                            &call.function.name,
                            &call.function.arguments,
                        ) {
                            Ok(invocation) => {
                                let output = invocation.execute(&self.tools).await;
                                metrics::record_tool_call(invocation.name(), true);
                                tracing::debug!(
                                    thread_id,
                                    tool = invocation.name(),
                                    "Tool call completed"
                                );
                                output
                            }
                            Err(message) => {
                                metrics::record_tool_call(&call.function.name, false);
                                tracing::warn!(
                                    thread_id,
                                    tool = %call.function.name,
                                    error = %message,
                                    "Tool call rejected"
                                );
                                format!("Tool error: {}", message)
                            }
                        };
                        pending.push(ChatMessage::tool_result(call.id.clone(), output));
                    }
                    state = LoopState::Reasoning;
                }
            }
        }
    }

    /// Commit the turn and emit the terminal sentinel.
    #[allow(clippy::too_many_arguments)]
    async fn finish(
        &self,
        thread_id: &str,
        mut pending: Vec<ChatMessage>,
        answer: String,
        emitter: &Option<mpsc::Sender<AnswerEvent>>,
        started: Instant,
        cycles: usize,
        outcome: &str,
    ) -> Result<String, Cancelled> {
        // Degraded answers are recorded too, so the model sees its own
        // apology on the next turn
        let already_recorded = matches!(
            pending.last(),
            Some(last) if last.content == answer && !last.has_tool_calls()
        );
        if !already_recorded {
            pending.push(ChatMessage::assistant(answer.clone()));
        }

        // Last cancellation point before the commit
        if let Some(tx) = emitter {
            if tx.is_closed() {
                return Err(Cancelled);
            }
        }

        self.transcripts.append(thread_id, pending).await;
        metrics::record_turn(started.elapsed().as_secs_f64(), cycles, outcome);
        tracing::info!(thread_id, cycles, outcome, "Turn completed");

        emit(emitter, AnswerEvent::Final(answer.clone())).await.ok();
        Ok(answer)
    }
}

async fn emit(
    emitter: &Option<mpsc::Sender<AnswerEvent>>,
    event: AnswerEvent,
) -> Result<(), Cancelled> {
    if let Some(tx) = emitter {
        tx.send(event).await.map_err(|_| Cancelled)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::{EmbeddingIndex, NameResolver};
    use crate::store::{InteractionRecord, InteractionStore};
    use pharmgraph_common::chat::{
        MessageRole, ScriptedChatModel, ScriptedReply, ToolCall,
    };
    use pharmgraph_common::config::ResolverConfig;
    use pharmgraph_common::embeddings::HashingEmbedder;
    use tokio_stream::StreamExt;

    async fn tool_context() -> Arc<ToolContext> {
        let (store, _) = InteractionStore::from_records(vec![
            InteractionRecord::new("Warfarin", "Aspirin", "Increases bleeding risk"),
            InteractionRecord::new("Warfarin", "Ibuprofen", "Moderate interaction"),
        ]);
        let store = Arc::new(store);

        let embedder = Arc::new(HashingEmbedder::new(128));
        let names: Vec<String> = store.drug_names().map(String::from).collect();
        let index = EmbeddingIndex::build(names, embedder.as_ref()).await.unwrap();
        let resolver = NameResolver::new(
            Arc::new(ScriptedChatModel::new(vec![])),
            embedder,
            index,
            ResolverConfig {
                extraction_enabled: false,
                match_threshold: 0.7,
                suggestion_threshold: 0.5,
                extraction_timeout_secs: 5,
                max_suggestions: 5,
            },
        );

        Arc::new(ToolContext {
            store,
            resolver: Arc::new(resolver),
        })
    }

    fn agent_config(max_cycles: usize) -> AgentConfig {
        AgentConfig {
            max_cycles,
            model_timeout_secs: 5,
        }
    }

    async fn loop_with(chat: ScriptedChatModel, max_cycles: usize) -> (AgentLoop, Arc<InMemoryTranscriptStore>) {
        let transcripts = Arc::new(InMemoryTranscriptStore::new());
        let agent = AgentLoop::new(
            Arc::new(chat),
            tool_context().await,
            transcripts.clone(),
            agent_config(max_cycles),
        );
        (agent, transcripts)
    }

    #[tokio::test]
    async fn test_terminal_without_tool_calls() {
        let chat = ScriptedChatModel::from_messages(vec![ChatMessage::assistant(
            "Warfarin is an anticoagulant.",
        )]);
        let (agent, transcripts) = loop_with(chat, 10).await;

        let answer = agent.run_turn("t1", "What is warfarin?").await;
        assert_eq!(answer, "Warfarin is an anticoagulant.");

        let history = transcripts.history("t1").await;
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].role, MessageRole::System);
        assert_eq!(history[1].role, MessageRole::User);
        assert_eq!(history[2].role, MessageRole::Assistant);
    }

    #[tokio::test]
    async fn test_tool_call_round_trip() {
        let chat = ScriptedChatModel::from_messages(vec![
            ChatMessage::assistant_tool_calls(
                "",
                vec![ToolCall::new(
                    "call_1",
                    "search_interactions",
                    r#"{"query": "warfarin and aspirin"}"#,
                )],
            ),
            ChatMessage::assistant("They increase bleeding risk together."),
        ]);
        let (agent, transcripts) = loop_with(chat, 10).await;

        let answer = agent
            .run_turn("t1", "Can I take warfarin with aspirin?")
            .await;
        assert_eq!(answer, "They increase bleeding risk together.");

        let history = transcripts.history("t1").await;
        // system, user, assistant(tool calls), tool result, assistant
        assert_eq!(history.len(), 5);
        assert_eq!(history[3].role, MessageRole::Tool);
        assert!(history[3].content.contains("Increases bleeding risk"));
        assert_eq!(history[3].tool_call_id.as_deref(), Some("call_1"));
    }

    #[tokio::test]
    async fn test_unknown_tool_becomes_textual_error() {
        let chat = ScriptedChatModel::from_messages(vec![
            ChatMessage::assistant_tool_calls(
                "",
                vec![ToolCall::new("call_1", "no_such_tool", "{}")],
            ),
            ChatMessage::assistant("done"),
        ]);
        let (agent, transcripts) = loop_with(chat, 10).await;

        let answer = agent.run_turn("t1", "hi").await;
        assert_eq!(answer, "done");

        let history = transcripts.history("t1").await;
        assert!(history[3].content.contains("Tool error"));
    }

    #[tokio::test]
    async fn test_cycle_bound_fails_closed() {
        let tool_call_msg = || {
            ChatMessage::assistant_tool_calls(
                "",
                vec![ToolCall::new("call_n", "database_stats", "{}")],
            )
        };
        let chat = ScriptedChatModel::from_messages(vec![
            tool_call_msg(),
            tool_call_msg(),
            tool_call_msg(),
        ]);
        let (agent, transcripts) = loop_with(chat, 2).await;

        let answer = agent.run_turn("t1", "loop forever").await;
        assert_eq!(answer, CYCLE_LIMIT_ANSWER);

        // The fail-closed answer is committed as the turn's final message
        let history = transcripts.history("t1").await;
        assert_eq!(history.last().unwrap().content, CYCLE_LIMIT_ANSWER);
    }

    #[tokio::test]
    async fn test_upstream_failure_degrades_to_apology() {
        let chat = ScriptedChatModel::new(vec![ScriptedReply::Error("503".into())]);
        let (agent, transcripts) = loop_with(chat, 10).await;

        let answer = agent.run_turn("t1", "hello").await;
        assert_eq!(answer, UPSTREAM_FAILURE_ANSWER);

        let history = transcripts.history("t1").await;
        assert_eq!(history.last().unwrap().content, UPSTREAM_FAILURE_ANSWER);
    }

    #[tokio::test]
    async fn test_multi_turn_history_accumulates() {
        let chat = ScriptedChatModel::from_messages(vec![
            ChatMessage::assistant("first answer"),
            ChatMessage::assistant("second answer"),
        ]);
        let (agent, transcripts) = loop_with(chat, 10).await;

        agent.run_turn("t1", "first question").await;
        agent.run_turn("t1", "second question").await;

        let history = transcripts.history("t1").await;
        // One system prompt only, then two user/assistant exchanges
        let system_count = history
            .iter()
            .filter(|m| m.role == MessageRole::System)
            .count();
        assert_eq!(system_count, 1);
        assert_eq!(history.len(), 5);
    }

    #[tokio::test]
    async fn test_stream_yields_deltas_then_final() {
        let chat = ScriptedChatModel::from_messages(vec![
            ChatMessage::assistant_tool_calls(
                "Checking the database.",
                vec![ToolCall::new("call_1", "database_stats", "{}")],
            ),
            ChatMessage::assistant("There are 3 drugs on file."),
        ]);
        let (agent, _) = loop_with(chat, 10).await;

        let events: Vec<AnswerEvent> = agent.stream_turn("t1", "how many drugs?").collect().await;

        assert_eq!(
            events.last(),
            Some(&AnswerEvent::Final("There are 3 drugs on file.".to_string()))
        );
        let deltas: Vec<&AnswerEvent> = events
            .iter()
            .filter(|e| matches!(e, AnswerEvent::Delta(_)))
            .collect();
        assert_eq!(deltas.len(), 2);
        assert_eq!(
            deltas[0],
            &AnswerEvent::Delta("Checking the database.".to_string())
        );
    }

    #[tokio::test]
    async fn test_abandoned_stream_commits_nothing() {
        let chat = ScriptedChatModel::from_messages(vec![ChatMessage::assistant("late answer")])
            .with_delay(Duration::from_millis(50));
        let (agent, transcripts) = loop_with(chat, 10).await;

        let stream = agent.stream_turn("t1", "question");
        drop(stream);

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(transcripts.history("t1").await.is_empty());
    }
}
