//! HTTP server setup with Axum

use std::sync::Arc;

use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;
use tower_http::cors::{Any, CorsLayer};

use super::websocket::{handler::ws_handler, state::AppState};

/// Response for GET /stats
#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub clients: usize,
    pub rooms: usize,
}

/// Create the Axum router with all endpoints
pub fn create_router(state: Arc<AppState>) -> Router {
    // CORS configuration - allow all origins for development
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let ws_path = state.registry.config().ws_path.clone();

    Router::new()
        // WebSocket endpoint
        .route(&ws_path, get(ws_handler))
        // Health check
        .route("/health", get(health_check))
        .route("/stats", get(stats))
        .layer(cors)
        .with_state(state)
}

/// Health check endpoint
async fn health_check() -> &'static str {
    "OK"
}

/// GET /stats - live client and room counts
async fn stats(State(state): State<Arc<AppState>>) -> Json<StatsResponse> {
    Json(StatsResponse {
        clients: state.registry.clients_count(),
        rooms: state.registry.rooms_count(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::Registry;
    use crate::config::BrokerConfig;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use tower::util::ServiceExt;

    fn app() -> (Router, Registry) {
        let registry = Registry::new(BrokerConfig::default());
        let state = Arc::new(AppState::bare(registry.clone()));
        (create_router(state), registry)
    }

    #[tokio::test]
    async fn test_health_check() {
        let (app, _) = app();

        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), 200);
    }

    #[tokio::test]
    async fn test_plain_get_on_ws_path_needs_upgrade() {
        let (app, _) = app();

        let response = app
            .oneshot(Request::builder().uri("/ws").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UPGRADE_REQUIRED);
    }

    #[tokio::test]
    async fn test_stats_counts_rooms() {
        let (app, registry) = app();
        registry.room("lobby").await.unwrap();

        let response = app
            .oneshot(Request::builder().uri("/stats").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), 200);

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["clients"], 0);
        assert_eq!(json["rooms"], 1);
    }
}
