//! API routes

pub mod chat;
pub mod health;
pub mod support;

use axum::{
    http::{
        header::{AUTHORIZATION, CONTENT_TYPE},
        HeaderValue, Method,
    },
    middleware,
    routing::{get, patch, post},
    Router,
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::{auth::require_auth, state::AppState, websocket::ws_handler};

/// CORS policy allowing the configured frontend origin
fn cors_layer(frontend_url: &str) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PATCH])
        .allow_headers([AUTHORIZATION, CONTENT_TYPE])
        .allow_credentials(true);

    match frontend_url.parse::<HeaderValue>() {
        Ok(origin) => layer.allow_origin(origin),
        Err(e) => {
            tracing::warn!(error = %e, frontend_url, "Invalid FRONTEND_URL, cross-origin requests disabled");
            layer
        }
    }
}

/// Create all API routes
pub fn create_router(state: AppState) -> Router {
    // Health check routes (at root level for infrastructure monitoring)
    let health_routes = Router::new()
        .route("/health", get(health::health))
        .route("/health/live", get(health::liveness))
        .route("/health/ready", get(health::readiness));

    let protected_chat_routes = Router::new()
        // Users
        .route("/session", post(chat::create_session))
        .route("/session/active", get(chat::get_active_session))
        .route(
            "/session/:session_id/messages",
            get(chat::get_messages).post(chat::send_message),
        )
        .route("/session/:session_id/close", patch(chat::close_session))
        .route("/session/:session_id/mark-read", patch(chat::mark_read))
        // Staff
        .route("/sessions", get(support::list_sessions))
        .route("/sessions/status/:status", get(support::list_sessions_by_status))
        .route("/session/:session_id/details", get(support::get_session_details))
        .route("/session/:session_id/assign", patch(support::assign_session))
        .route("/session/:session_id/unassign", patch(support::unassign_session))
        .route("/session/:session_id/priority", patch(support::update_priority))
        .route(
            "/session/:session_id/support-message",
            post(support::send_support_message),
        )
        .route("/session/:session_id/agent-close", patch(support::agent_close_session))
        .route("/stats", get(support::get_stats))
        .route("/agents/active", get(support::list_active_agents))
        // Admins
        .route("/agents", get(support::list_agents).post(support::create_agent))
        .route(
            "/agents/:agent_id",
            get(support::get_agent).patch(support::update_agent),
        )
        .layer(middleware::from_fn_with_state(state.clone(), require_auth));

    // WebSocket routes (auth handled in handler via query parameter)
    let websocket_routes = Router::new().route("/ws", get(ws_handler));

    let chat_routes = Router::new()
        .merge(protected_chat_routes)
        .merge(websocket_routes);

    Router::new()
        .merge(health_routes)
        .nest("/api/chat", chat_routes)
        .layer(cors_layer(&state.config.frontend_url))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
