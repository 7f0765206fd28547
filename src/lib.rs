// Public API for integration tests and potential library usage

pub mod allowlist;
pub mod api;
pub mod broadcast;
pub mod config;
pub mod protocol;
pub mod roles;
pub mod session;
pub mod state;
pub mod store;
pub mod tally;
pub mod types;
pub mod validation;
pub mod ws;

use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;

/// All HTTP and WebSocket routes, without middleware layers
pub fn router(state: Arc<state::AppState>) -> Router {
    let admin_routes = Router::new()
        .route("/lock", post(api::lock_voting))
        .route("/reset", post(api::reset_votes))
        .route("/report", get(api::status_report))
        .route("/export", get(api::export_results))
        .route("/allowlist/sync", post(api::sync_allowlist));

    Router::new()
        .route("/api/config", get(api::get_config))
        .route("/api/validate", post(api::validate_ballot))
        .route("/api/me", get(api::get_me))
        .route("/api/vote", post(api::submit_vote))
        .route("/api/standings", get(api::get_standings))
        .route("/api/status", get(api::get_status))
        .nest("/api/admin", admin_routes)
        .route("/ws", get(ws::ws_handler))
        .with_state(state)
}
