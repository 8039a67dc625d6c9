use std::sync::Arc;

use crate::engine::MatchEngine;
use crate::store::DocumentStore;

/// Shared application state injected into all route handlers via Axum extractors.
#[derive(Clone)]
pub struct AppState {
    /// Write side for the transport sync step; the engine reads the same
    /// store through its own handle.
    pub store: Arc<dyn DocumentStore>,
    pub engine: Arc<MatchEngine>,
}
