use axum::{
    routing::{any, get, post},
    Router,
};
use std::sync::Arc;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use super::handlers;
use super::signaling_ws::signaling_ws_handler;
use super::ws::ws_handler;
use crate::state::AppState;

/// Create the main application router
pub fn create_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api_routes = Router::new()
        .route("/health", get(handlers::health_check))
        .route("/sessions", get(handlers::list_sessions))
        .route(
            "/config/session",
            get(handlers::get_session_config).patch(handlers::update_session_config),
        )
        .route("/source/action", post(handlers::source_action))
        // WebSocket endpoint for real-time events
        .route("/ws", any(ws_handler));

    let signaling_path = normalize_path(&state.config.get().web.signaling_path);

    Router::new()
        .nest("/api", api_routes)
        .route(&signaling_path, any(signaling_ws_handler))
        // Source control path of the original web client
        .route("/v4l", post(handlers::source_action))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

fn normalize_path(path: &str) -> String {
    let trimmed = path.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        "/server".to_string()
    } else if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{}", trimmed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_path() {
        assert_eq!(normalize_path("/server"), "/server");
        assert_eq!(normalize_path("signal/"), "/signal");
        assert_eq!(normalize_path(""), "/server");
    }
}
