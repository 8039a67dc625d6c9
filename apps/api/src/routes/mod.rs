pub mod health;
pub mod matchmaking;

use axum::{
    routing::{get, post},
    Router,
};

use crate::state::AppState;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_handler))
        .route(
            "/api/v1/matchmaking/run",
            post(matchmaking::handle_run_matchmaking),
        )
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    use super::*;
    use crate::completion::testing::ScriptedCompletion;
    use crate::engine::{EngineConfig, MatchEngine};
    use crate::store::InMemoryDocumentStore;

    fn test_state() -> AppState {
        let store = Arc::new(InMemoryDocumentStore::new());
        let completion = Arc::new(ScriptedCompletion::always("[]"));
        let config = EngineConfig {
            max_picks: 3,
            max_concurrency: 2,
            completion_timeout: Duration::from_secs(30),
        };
        let engine = Arc::new(
            MatchEngine::new(Arc::clone(&store) as _, completion, config).unwrap(),
        );
        AppState { store, engine }
    }

    #[tokio::test]
    async fn test_health_endpoint_responds_ok() {
        let app = build_router(test_state());
        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_run_endpoint_accepts_empty_batch() {
        let app = build_router(test_state());
        let request = Request::builder()
            .method("POST")
            .uri("/api/v1/matchmaking/run")
            .header("content-type", "application/json")
            .body(Body::from(r#"{"postings": [], "profiles": []}"#))
            .unwrap();

        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
