//! Store statistics handler

use axum::{extract::State, Json};
use serde::Serialize;

use crate::AppState;

/// Statistics response
#[derive(Serialize)]
pub struct StatsResponse {
    pub drugs: usize,
    pub interactions: usize,
    pub active_sessions: usize,
    pub version: &'static str,
}

/// Surface the interaction store's node/edge counts
pub async fn stats(State(state): State<AppState>) -> Json<StatsResponse> {
    let store_stats = state.store.stats();

    Json(StatsResponse {
        drugs: store_stats.drug_count,
        interactions: store_stats.interaction_count,
        active_sessions: state.sessions.active_count().await,
        version: pharmgraph_common::VERSION,
    })
}
