//! Composes the HTTP surface of every module into one router.

use axum::{http::HeaderValue, http::StatusCode, routing::get, Json, Router};
use log::{info, warn};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::shared::state::AppState;

pub async fn health_check() -> (StatusCode, Json<serde_json::Value>) {
    (StatusCode::OK, Json(serde_json::json!({ "status": "healthy" })))
}

pub fn configure_api_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/health", get(health_check))
        .merge(crate::tickets::configure_tickets_routes())
        .merge(crate::feedback::configure_feedback_routes())
        .merge(crate::chat::configure_chat_routes())
        .merge(crate::kb::configure_kb_routes())
        .merge(crate::monitoring::configure_monitoring_routes())
}

/// Permissive when no origins are configured.
pub fn create_cors_layer(origins: &[String]) -> CorsLayer {
    let parsed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(_) => {
                warn!("Ignoring invalid CORS origin {}", origin);
                None
            }
        })
        .collect();

    if parsed.is_empty() {
        info!("Creating CORS layer with development defaults (no origins configured)");
        CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any)
    } else {
        info!("Creating CORS layer with {} configured origins", parsed.len());
        CorsLayer::new()
            .allow_origin(parsed)
            .allow_methods(Any)
            .allow_headers(Any)
    }
}

pub fn build_router(state: Arc<AppState>, cors_origins: &[String]) -> Router {
    configure_api_routes()
        .layer(create_cors_layer(cors_origins))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
