//! Route Definitions
//!
//! Maps URLs to handlers with type-safe routing.

use super::handlers::*;
use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;

/// Build the API router with all endpoints
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/menu", get(menu_handler))
        // Matchmaking; may block while waiting in the lobby
        .route("/game", post(start_game_handler))
        // Long-poll game view
        .route("/game/:game_id", get(game_update_handler))
        .route("/game/:game_id/round/:round/:choice", post(decision_handler))
        // Metrics endpoint for Prometheus
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}
