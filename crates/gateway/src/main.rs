//! PharmGraph API Gateway
//!
//! The entry point for all external API requests. Handles:
//! - Stateless question answering and stateful chat sessions
//! - Session lifecycle (create on first use, explicit clear)
//! - Store statistics
//! - Observability (logging, metrics, tracing)

mod handlers;

use axum::{
    routing::{delete, get, post},
    Router,
};
use metrics_exporter_prometheus::PrometheusBuilder;
use pharmgraph_agent::{
    AgentLoop, EmbeddingIndex, InMemoryTranscriptStore, InteractionStore, NameResolver,
    SessionManager, ToolContext,
};
use pharmgraph_common::{chat, config::AppConfig, embeddings, metrics};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tower_http::{
    cors::{Any, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};
use tracing::{info, Level};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<InteractionStore>,
    pub sessions: Arc<SessionManager>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_max_level(Level::INFO)
        .with_target(true)
        .json()
        .init();

    info!("Starting PharmGraph API Gateway v{}", pharmgraph_common::VERSION);

    // Load configuration
    let config = AppConfig::load().map_err(|e| {
        tracing::error!(error = %e, "Failed to load configuration");
        e
    })?;

    // Initialize metrics
    metrics::register_metrics();
    if config.observability.metrics_port > 0 {
        let metrics_addr = SocketAddr::from(([0, 0, 0, 0], config.observability.metrics_port));
        PrometheusBuilder::new()
            .with_http_listener(metrics_addr)
            .install()?;
        info!("Metrics exporter listening on {}", metrics_addr);
    }

    // Load the interaction store
    info!(
        path = %config.data.interactions_path,
        "Loading interaction data..."
    );
    let (records, dropped) = pharmgraph_agent::ingest::load_records(&config.data.interactions_path)?;
    let (store, skipped) = InteractionStore::from_records(records);
    let store = Arc::new(store);
    let stats = store.stats();
    info!(
        drugs = stats.drug_count,
        interactions = stats.interaction_count,
        dropped,
        skipped,
        "Interaction store built"
    );

    // Build the embedding index over the canonical lexicon
    let embedder = embeddings::create_embedder(&config.embedding)?;
    let names: Vec<String> = store.drug_names().map(String::from).collect();
    info!(entries = names.len(), model = embedder.model_name(), "Building embedding index...");
    let index = EmbeddingIndex::build(names, embedder.as_ref()).await?;

    // Wire the resolver, tool surface, loop, and session manager
    let chat_model = chat::create_chat_model(&config.chat_model)?;
    let resolver = NameResolver::new(
        chat_model.clone(),
        embedder,
        index,
        config.resolver.clone(),
    );
    let tools = Arc::new(ToolContext {
        store: store.clone(),
        resolver: Arc::new(resolver),
    });
    let transcripts = Arc::new(InMemoryTranscriptStore::new());
    let agent = AgentLoop::new(chat_model, tools, transcripts.clone(), config.agent.clone());
    let sessions = Arc::new(SessionManager::new(agent, transcripts));

    let state = AppState { store, sessions };

    // Build the router
    let app = create_router(state);

    // Start the server
    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shutdown complete");
    Ok(())
}

/// Create the main application router
fn create_router(state: AppState) -> Router {
    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Request ID propagation
    let request_id = SetRequestIdLayer::x_request_id(MakeRequestUuid);
    let propagate_id = PropagateRequestIdLayer::x_request_id();

    // API routes
    let api_routes = Router::new()
        // Stateless question answering
        .route("/query", post(handlers::queries::query))
        // Stateful chat
        .route("/chat", post(handlers::queries::chat))
        .route("/chat/{session_id}", delete(handlers::queries::clear_session))
        // Store statistics
        .route("/stats", get(handlers::stats::stats));

    // Compose the app
    Router::new()
        .route("/health", get(handlers::health::health))
        .route("/ready", get(handlers::health::ready))
        .nest("/v1", api_routes)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(request_id)
        .layer(propagate_id)
        .with_state(state)
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, starting shutdown..."),
        _ = terminate => info!("Received SIGTERM, starting shutdown..."),
    }
}
