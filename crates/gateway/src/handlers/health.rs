//! Health check handlers

use axum::Json;
use serde_json::{json, Value};

/// Liveness probe
pub async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": pharmgraph_common::VERSION,
    }))
}

/// Readiness probe. The store and index are built before the listener
/// starts, so a serving process is always ready.
pub async fn ready() -> Json<Value> {
    Json(json!({ "status": "ready" }))
}
