//! Chat model abstraction with tool calling
//!
//! Defines the message structures used for chat completions against an
//! OpenAI-compatible API, the `ChatModel` trait consumed by the agent loop,
//! and a scripted implementation for tests.

use crate::errors::{AppError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

/// Role of the message sender
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    /// System message (instructions for the model)
    System,
    /// User message
    User,
    /// Assistant message (model response)
    Assistant,
    /// Tool message (result from tool execution)
    Tool,
}

/// A model-issued request to invoke a named tool with JSON arguments
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    /// Provider-assigned call id, echoed back in the tool result message
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub function: FunctionCall,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    /// JSON-encoded arguments object
    pub arguments: String,
}

impl ToolCall {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: "function".to_string(),
            function: FunctionCall {
                name: name.into(),
                arguments: arguments.into(),
            },
        }
    }
}

/// A single message in a conversation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Role of the message sender
    pub role: MessageRole,
    /// Content of the message; the API sends an explicit null alongside
    /// tool calls
    #[serde(default, deserialize_with = "null_as_empty")]
    pub content: String,
    /// Tool calls requested by the assistant, if any
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    /// For tool messages, the id of the call this message answers
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

fn null_as_empty<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

impl ChatMessage {
    /// Create a new system message
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::System,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    /// Create a new user message
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    /// Create a new assistant message
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    /// Create an assistant message carrying tool-call requests
    pub fn assistant_tool_calls(content: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: content.into(),
            tool_calls,
            tool_call_id: None,
        }
    }

    /// Create a tool result message answering a specific call
    pub fn tool_result(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Tool,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: Some(call_id.into()),
        }
    }

    /// Whether this message requests any tool calls
    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}

/// JSON Schema description of a callable tool, in the wire format the
/// chat-completions API expects
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSchema {
    #[serde(rename = "type")]
    pub kind: String,
    pub function: FunctionSchema,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionSchema {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

impl ToolSchema {
    pub fn function(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: serde_json::Value,
    ) -> Self {
        Self {
            kind: "function".to_string(),
            function: FunctionSchema {
                name: name.into(),
                description: description.into(),
                parameters,
            },
        }
    }
}

/// Request body for chat completion
#[derive(Debug, Clone, Serialize)]
pub struct ChatRequest {
    /// ID of the model to use
    pub model: String,
    /// List of messages in the conversation
    pub messages: Vec<ChatMessage>,
    /// Tool schemas offered to the model
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolSchema>,
    /// Temperature for sampling
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    /// Maximum tokens to generate
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    /// Structured output hint ({"type": "json_object"})
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_format: Option<serde_json::Value>,
}

impl ChatRequest {
    /// Create a new chat request
    pub fn new(model: impl Into<String>, messages: Vec<ChatMessage>) -> Self {
        Self {
            model: model.into(),
            messages,
            tools: Vec::new(),
            temperature: None,
            max_tokens: None,
            response_format: None,
        }
    }

    /// Offer tool schemas to the model
    pub fn with_tools(mut self, tools: Vec<ToolSchema>) -> Self {
        self.tools = tools;
        self
    }

    /// Set temperature
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature.clamp(0.0, 2.0));
        self
    }

    /// Ask for a JSON object response
    pub fn with_json_output(mut self) -> Self {
        self.response_format = Some(serde_json::json!({ "type": "json_object" }));
        self
    }
}

/// Response from chat completion
#[derive(Debug, Clone, Deserialize)]
pub struct ChatResponse {
    pub choices: Vec<Choice>,
}

/// A single completion choice
#[derive(Debug, Clone, Deserialize)]
pub struct Choice {
    pub message: ChatMessage,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

impl ChatResponse {
    /// Take the first choice's message
    pub fn into_message(self) -> Result<ChatMessage> {
        self.choices
            .into_iter()
            .next()
            .map(|c| c.message)
            .ok_or_else(|| AppError::ChatModelError {
                message: "Response contained no choices".to_string(),
            })
    }
}

/// Trait for tool-calling-capable chat models
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Run one completion and return the assistant message
    async fn complete(&self, request: ChatRequest) -> Result<ChatMessage>;

    /// Get the model name
    fn model_name(&self) -> &str;
}

/// OpenAI-compatible chat completion client
pub struct OpenAiChatModel {
    client: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
    max_retries: u32,
}

impl OpenAiChatModel {
    /// Create a new client against an OpenAI-compatible endpoint
    pub fn new(config: &crate::config::ChatModelConfig) -> Result<Self> {
        let api_key = config
            .api_key
            .clone()
            .ok_or_else(|| AppError::Configuration {
                message: "Chat model API key required for the openai provider".to_string(),
            })?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            api_key,
            model: config.model.clone(),
            base_url: config
                .api_base
                .clone()
                .unwrap_or_else(|| "https://api.openai.com/v1".to_string()),
            max_retries: config.max_retries,
        })
    }

    async fn make_request(&self, request: &ChatRequest) -> Result<ChatMessage> {
        let url = format!("{}/chat/completions", self.base_url);

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(request)
            .send()
            .await
            .map_err(|e| AppError::ChatModelError {
                message: format!("Request failed: {}", e),
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::ChatModelError {
                message: format!("API error {}: {}", status, body),
            });
        }

        let result: ChatResponse = response.json().await.map_err(|e| AppError::ChatModelError {
            message: format!("Failed to parse response: {}", e),
        })?;

        result.into_message()
    }
}

#[async_trait]
impl ChatModel for OpenAiChatModel {
    async fn complete(&self, request: ChatRequest) -> Result<ChatMessage> {
        let mut last_error = None;

        for attempt in 0..self.max_retries {
            if attempt > 0 {
                // Exponential backoff
                let delay = Duration::from_millis(200 * (2_u64.pow(attempt)));
                tokio::time::sleep(delay).await;
            }

            let started = Instant::now();
            match self.make_request(&request).await {
                Ok(message) => {
                    crate::metrics::record_chat(started.elapsed().as_secs_f64(), &self.model, true);
                    return Ok(message);
                }
                Err(e) => {
                    crate::metrics::record_chat(
                        started.elapsed().as_secs_f64(),
                        &self.model,
                        false,
                    );
                    tracing::warn!(
                        attempt = attempt + 1,
                        max_retries = self.max_retries,
                        error = %e,
                        "Chat completion failed, retrying"
                    );
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| AppError::ChatModelError {
            message: "Unknown error after retries".to_string(),
        }))
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

/// A scripted reply for the test model
#[derive(Debug, Clone)]
pub enum ScriptedReply {
    /// Return this message
    Message(ChatMessage),
    /// Fail the completion with this error text
    Error(String),
}

/// Scripted chat model for tests.
///
/// Pops replies in order; once the script is exhausted it returns a plain
/// final answer so agent loops always terminate. An optional per-call delay
/// simulates slow upstreams for timeout tests.
pub struct ScriptedChatModel {
    replies: Mutex<VecDeque<ScriptedReply>>,
    delay: Option<Duration>,
}

impl ScriptedChatModel {
    pub fn new(replies: Vec<ScriptedReply>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            delay: None,
        }
    }

    /// Script a sequence of assistant messages
    pub fn from_messages(messages: Vec<ChatMessage>) -> Self {
        Self::new(messages.into_iter().map(ScriptedReply::Message).collect())
    }

    /// Delay each completion, for timeout tests
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

#[async_trait]
impl ChatModel for ScriptedChatModel {
    async fn complete(&self, _request: ChatRequest) -> Result<ChatMessage> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let next = self.replies.lock().await.pop_front();
        match next {
            Some(ScriptedReply::Message(message)) => Ok(message),
            Some(ScriptedReply::Error(message)) => Err(AppError::ChatModelError { message }),
            None => Ok(ChatMessage::assistant(
                "I have no further information on that.",
            )),
        }
    }

    fn model_name(&self) -> &str {
        "scripted-chat"
    }
}

/// Create a chat model based on configuration
pub fn create_chat_model(config: &crate::config::ChatModelConfig) -> Result<Arc<dyn ChatModel>> {
    match config.provider.as_str() {
        "openai" => Ok(Arc::new(OpenAiChatModel::new(config)?)),
        "mock" => Ok(Arc::new(ScriptedChatModel::new(Vec::new()))),
        other => {
            tracing::warn!(provider = other, "Unknown chat provider, using mock");
            Ok(Arc::new(ScriptedChatModel::new(Vec::new())))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_constructors() {
        let user = ChatMessage::user("Hello");
        assert_eq!(user.role, MessageRole::User);
        assert!(!user.has_tool_calls());

        let call = ToolCall::new("call_1", "search_interactions", r#"{"query":"a and b"}"#);
        let assistant = ChatMessage::assistant_tool_calls("", vec![call]);
        assert!(assistant.has_tool_calls());
        assert_eq!(assistant.tool_calls[0].function.name, "search_interactions");
    }

    #[test]
    fn test_request_serialization_skips_empty_tools() {
        let request = ChatRequest::new("gpt-4o-mini", vec![ChatMessage::user("hi")]);
        let json = serde_json::to_value(&request).unwrap();
        assert!(json.get("tools").is_none());
        assert!(json.get("response_format").is_none());
    }

    #[test]
    fn test_json_output_flag() {
        let request = ChatRequest::new("gpt-4o-mini", vec![]).with_json_output();
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["response_format"]["type"], "json_object");
    }

    #[test]
    fn test_tool_message_wire_format() {
        let msg = ChatMessage::tool_result("call_9", "No known interaction.");
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["role"], "tool");
        assert_eq!(json["tool_call_id"], "call_9");
        assert!(json.get("tool_calls").is_none());
    }

    #[test]
    fn test_null_content_deserializes_as_empty() {
        let json = r#"{
            "role": "assistant",
            "content": null,
            "tool_calls": [
                {"id": "c1", "type": "function",
                 "function": {"name": "database_stats", "arguments": "{}"}}
            ]
        }"#;
        let msg: ChatMessage = serde_json::from_str(json).unwrap();
        assert_eq!(msg.content, "");
        assert!(msg.has_tool_calls());
    }

    #[tokio::test]
    async fn test_scripted_model_pops_in_order() {
        let model = ScriptedChatModel::from_messages(vec![
            ChatMessage::assistant("first"),
            ChatMessage::assistant("second"),
        ]);
        let request = ChatRequest::new("scripted-chat", vec![]);

        let first = model.complete(request.clone()).await.unwrap();
        assert_eq!(first.content, "first");
        let second = model.complete(request.clone()).await.unwrap();
        assert_eq!(second.content, "second");

        // Exhausted script still terminates
        let fallback = model.complete(request).await.unwrap();
        assert_eq!(fallback.role, MessageRole::Assistant);
        assert!(!fallback.has_tool_calls());
    }

    #[tokio::test]
    async fn test_scripted_model_error_reply() {
        let model = ScriptedChatModel::new(vec![ScriptedReply::Error("boom".into())]);
        let request = ChatRequest::new("scripted-chat", vec![]);
        let err = model.complete(request).await.unwrap_err();
        assert!(err.to_string().contains("boom"));
    }
}
