//! HTTP control plane for the relay
//!
//! Four routes: clients report and heartbeat their tunnels, operators
//! list live clients, anyone can read the status summary. The three
//! mutating/inspecting routes are gated by a shared `X-API-Key`.

pub mod handlers;
pub mod middleware;

use axum::{
    middleware as axum_middleware,
    routing::{get, post},
    Router,
};
use portlink_proxy::ConnectionBudget;
use portlink_registry::ClientRegistry;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

/// State shared across all control-plane handlers
///
/// Constructed once at startup and passed by handle; handlers never touch
/// process-global state, so tests can stand up isolated instances.
pub struct AppState {
    pub registry: ClientRegistry,
    pub budget: ConnectionBudget,
    pub proxy_ports: Vec<u16>,
    pub api_key: String,
}

/// Build the control-plane router over the given state
pub fn build_router(state: Arc<AppState>) -> Router {
    let authenticated = Router::new()
        .route("/api/report", post(handlers::report))
        .route("/api/heartbeat", post(handlers::heartbeat))
        .route("/api/clients", get(handlers::clients))
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::require_api_key,
        ));

    Router::new()
        .route("/api/status", get(handlers::status))
        .merge(authenticated)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
