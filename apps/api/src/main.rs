mod completion;
mod config;
mod engine;
mod errors;
mod evaluators;
mod graph;
mod llm_client;
mod routes;
mod state;
mod store;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::completion::CompletionService;
use crate::config::Config;
use crate::engine::MatchEngine;
use crate::llm_client::LlmClient;
use crate::routes::build_router;
use crate::state::AppState;
use crate::store::{DocumentStore, FsDocumentStore, InMemoryDocumentStore};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first (fails on missing required env vars)
    let config = Config::from_env()?;

    // Initialize structured logging
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!("{}={}", env!("CARGO_PKG_NAME"), &config.rust_log))
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Parley API v{}", env!("CARGO_PKG_VERSION"));

    // Initialize the document store (file-backed by default; swap via EPHEMERAL_STORE)
    let store: Arc<dyn DocumentStore> = if config.ephemeral_store {
        info!("Using in-memory document store");
        Arc::new(InMemoryDocumentStore::new())
    } else {
        let fs = FsDocumentStore::open(&config.data_dir).await?;
        info!("Document store rooted at {}", config.data_dir);
        Arc::new(fs)
    };

    // Initialize the completion service
    let completion: Arc<dyn CompletionService> =
        Arc::new(LlmClient::new(config.anthropic_api_key.clone()));
    info!("LLM client initialized (model: {})", llm_client::MODEL);

    // Compile the evaluator graphs; a misconfigured pipeline aborts here
    let engine = Arc::new(MatchEngine::new(
        Arc::clone(&store),
        completion,
        config.engine_config(),
    )?);
    info!("Evaluator graphs compiled");

    // Build app state
    let state = AppState { store, engine };

    // Build router
    let app = build_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive()); // TODO: tighten CORS in production

    let addr: SocketAddr = format!("0.0.0.0:{}", config.port).parse()?;
    info!("Listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
