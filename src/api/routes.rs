//! Route configuration.

use crate::api::middleware::auth_middleware;
use crate::api::{handlers, websocket};
use crate::state::AppState;
use axum::Router;
use axum::middleware;
use axum::routing::{delete, get, post};
use std::sync::Arc;

/// Creates the API router.
///
/// Every route except `/health` passes through [`auth_middleware`].
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        // Health check
        .route("/health", get(handlers::health_check))
        // Authentication
        .route(
            "/api/v1/auth/keys",
            post(handlers::create_api_key).get(handlers::list_api_keys),
        )
        .route(
            "/api/v1/auth/keys/{key_id}",
            delete(handlers::delete_api_key),
        )
        // Bots
        .route(
            "/api/v1/bots",
            post(handlers::create_bot).get(handlers::list_bots),
        )
        .route(
            "/api/v1/bots/{bot_id}",
            get(handlers::get_bot).delete(handlers::delete_bot),
        )
        .route("/api/v1/bots/{bot_id}/status", get(handlers::get_bot_status))
        .route("/api/v1/bots/{bot_id}/logs", get(handlers::get_bot_logs))
        .route(
            "/api/v1/bots/{bot_id}/logs/ws",
            get(websocket::logs_ws_handler),
        )
        // Control
        .route("/api/v1/bots/{bot_id}/start", post(handlers::start_bot))
        .route("/api/v1/bots/{bot_id}/stop", post(handlers::stop_bot))
        .route("/api/v1/bots/{bot_id}/restart", post(handlers::restart_bot))
        .layer(middleware::from_fn_with_state(
            Arc::clone(&state),
            auth_middleware,
        ))
        .with_state(state)
}
