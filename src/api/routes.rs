//! Route table

use axum::{
    routing::{get, post},
    Router,
};

use super::handlers;
use super::AppState;

pub fn control_routes(state: AppState) -> Router {
    Router::new()
        .route("/", get(handlers::get_info))
        .route("/health", get(handlers::get_health))
        .route("/reset", post(handlers::post_reset))
        .with_state(state)
}
