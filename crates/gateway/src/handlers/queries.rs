//! Query and chat handlers

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};

use crate::AppState;
use pharmgraph_common::errors::{AppError, Result};

/// Stateless query request
#[derive(Debug, Deserialize)]
pub struct QueryRequest {
    pub question: String,
}

/// Stateless query response
#[derive(Serialize)]
pub struct QueryResponse {
    pub answer: String,
    pub timestamp: String,
}

/// Chat request with optional session
#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub question: String,
    #[serde(default)]
    pub session_id: Option<String>,
}

/// Chat response with the (possibly new) session id
#[derive(Serialize)]
pub struct ChatResponse {
    pub answer: String,
    pub session_id: String,
    pub timestamp: String,
}

/// Session clear response
#[derive(Serialize)]
pub struct ClearResponse {
    pub message: String,
    pub success: bool,
}

fn validate_question(question: &str) -> Result<()> {
    if question.trim().is_empty() {
        return Err(AppError::Validation {
            message: "Question must not be empty".to_string(),
            field: Some("question".to_string()),
        });
    }
    Ok(())
}

/// Stateless question answering on a throwaway session.
/// Each query is independent with no conversation history.
pub async fn query(
    State(state): State<AppState>,
    Json(request): Json<QueryRequest>,
) -> Result<Json<QueryResponse>> {
    validate_question(&request.question)?;

    let answer = state.sessions.ask(&request.question).await;

    Ok(Json(QueryResponse {
        answer,
        timestamp: chrono::Utc::now().to_rfc3339(),
    }))
}

/// Chat with conversation history maintained via session id.
/// An omitted session id starts a new session.
pub async fn chat(
    State(state): State<AppState>,
    Json(request): Json<ChatRequest>,
) -> Result<Json<ChatResponse>> {
    validate_question(&request.question)?;

    let (answer, session_id) = state
        .sessions
        .chat(request.session_id, &request.question)
        .await;

    tracing::debug!(session_id = %session_id, "Chat turn completed");

    Ok(Json(ChatResponse {
        answer,
        session_id,
        timestamp: chrono::Utc::now().to_rfc3339(),
    }))
}

/// Clear a chat session's conversation history
pub async fn clear_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<(StatusCode, Json<ClearResponse>)> {
    if !state.sessions.clear(&session_id).await {
        return Err(AppError::SessionNotFound { id: session_id });
    }

    Ok((
        StatusCode::OK,
        Json(ClearResponse {
            message: format!("Session {} cleared", session_id),
            success: true,
        }),
    ))
}
