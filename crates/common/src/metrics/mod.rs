//! Metrics and observability utilities
//!
//! Provides Prometheus metrics with standardized naming conventions for
//! agent turns, tool calls, name resolution, and upstream model traffic.

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram, Unit};

/// Metrics prefix for all PharmGraph metrics
pub const METRICS_PREFIX: &str = "pharmgraph";

/// Register all metric descriptions
pub fn register_metrics() {
    // Turn metrics
    describe_counter!(
        format!("{}_turns_total", METRICS_PREFIX),
        Unit::Count,
        "Total number of agent turns"
    );

    describe_histogram!(
        format!("{}_turn_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "Agent turn latency in seconds"
    );

    // Tool metrics
    describe_counter!(
        format!("{}_tool_calls_total", METRICS_PREFIX),
        Unit::Count,
        "Total number of tool invocations"
    );

    // Resolution metrics
    describe_counter!(
        format!("{}_resolutions_total", METRICS_PREFIX),
        Unit::Count,
        "Total number of drug name resolutions"
    );

    // Chat model metrics
    describe_counter!(
        format!("{}_chat_requests_total", METRICS_PREFIX),
        Unit::Count,
        "Total chat completion API requests"
    );

    describe_histogram!(
        format!("{}_chat_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "Chat completion latency in seconds"
    );

    // Embedding metrics
    describe_counter!(
        format!("{}_embedding_requests_total", METRICS_PREFIX),
        Unit::Count,
        "Total embedding API requests"
    );

    describe_histogram!(
        format!("{}_embedding_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "Embedding generation latency in seconds"
    );

    // Session metrics
    describe_gauge!(
        format!("{}_active_sessions", METRICS_PREFIX),
        Unit::Count,
        "Number of active sessions"
    );

    tracing::info!("Metrics registered");
}

/// Record a completed agent turn
pub fn record_turn(duration_secs: f64, cycles: usize, outcome: &str) {
    counter!(
        format!("{}_turns_total", METRICS_PREFIX),
        "outcome" => outcome.to_string(),
        "cycles" => cycles.to_string()
    )
    .increment(1);

    histogram!(
        format!("{}_turn_duration_seconds", METRICS_PREFIX),
        "outcome" => outcome.to_string()
    )
    .record(duration_secs);
}

/// Record a tool invocation
pub fn record_tool_call(tool: &str, ok: bool) {
    let status = if ok { "success" } else { "error" };

    counter!(
        format!("{}_tool_calls_total", METRICS_PREFIX),
        "tool" => tool.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

/// Record a name resolution outcome
pub fn record_resolution(outcome: &str) {
    counter!(
        format!("{}_resolutions_total", METRICS_PREFIX),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// Record a chat completion request
pub fn record_chat(duration_secs: f64, model: &str, success: bool) {
    let status = if success { "success" } else { "error" };

    counter!(
        format!("{}_chat_requests_total", METRICS_PREFIX),
        "model" => model.to_string(),
        "status" => status.to_string()
    )
    .increment(1);

    if success {
        histogram!(
            format!("{}_chat_duration_seconds", METRICS_PREFIX),
            "model" => model.to_string()
        )
        .record(duration_secs);
    }
}

/// Record an embedding request
pub fn record_embedding(duration_secs: f64, model: &str, batch_size: usize, success: bool) {
    let status = if success { "success" } else { "error" };

    counter!(
        format!("{}_embedding_requests_total", METRICS_PREFIX),
        "model" => model.to_string(),
        "status" => status.to_string(),
        "batch" => batch_size.to_string()
    )
    .increment(1);

    if success {
        histogram!(
            format!("{}_embedding_duration_seconds", METRICS_PREFIX),
            "model" => model.to_string()
        )
        .record(duration_secs);
    }
}

/// Update the active session gauge
pub fn set_active_sessions(count: usize) {
    gauge!(format!("{}_active_sessions", METRICS_PREFIX)).set(count as f64);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_does_not_panic() {
        record_turn(0.25, 2, "completed");
        record_tool_call("search_interactions", true);
        record_resolution("matched");
        record_chat(0.5, "gpt-4o-mini", true);
        record_embedding(0.1, "text-embedding-3-small", 4, false);
        set_active_sessions(3);
    }
}
