use std::sync::Arc;

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::http::HeaderValue;
use axum::routing::{get, post};
use tower_http::cors::{Any, CorsLayer};

use super::app_state::AppState;
use super::rate_limit::{api_rate_limit, join_rate_limit, ws_rate_limit};
use super::{rest_api, ws_handler};

/// Largest accepted REST request body.
const MAX_BODY_BYTES: usize = 16 * 1024;

/// Build the axum router with all HTTP and WebSocket routes.
pub fn build_router(state: Arc<AppState>) -> Router {
    // Restrict CORS to the configured public_url origin (or allow any for localhost dev)
    let public_url = &state.config.server.public_url;
    let cors = if public_url.contains("localhost") || public_url.contains("127.0.0.1") {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        let origin = public_url
            .parse::<HeaderValue>()
            .unwrap_or_else(|_| HeaderValue::from_static("https://localhost"));
        CorsLayer::new()
            .allow_origin(origin)
            .allow_methods(Any)
            .allow_headers(Any)
    };

    let rate_limiters = state.limiters.clone();

    let join_routes = Router::new()
        .route("/api/rooms/join", post(rest_api::join_room))
        .layer(axum::middleware::from_fn(join_rate_limit));

    let ws_routes = Router::new()
        .route("/ws", get(ws_handler::ws_upgrade))
        .layer(axum::middleware::from_fn(ws_rate_limit));

    let api_routes = Router::new()
        .route("/api/rooms/{room_id}/messages", get(rest_api::get_messages))
        .route("/api/rooms/{room_id}/users", get(rest_api::get_active_users))
        .route("/api/health", get(rest_api::health))
        .layer(axum::middleware::from_fn(api_rate_limit));

    Router::new()
        .merge(ws_routes)
        .merge(join_routes)
        .merge(api_routes)
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(cors)
        // Inject rate limiters into all request extensions
        .layer(axum::Extension(rate_limiters))
        .with_state(state)
}
