//! HTTP surface: webhook endpoints, payment callbacks, and DTOs.

pub mod dto;
pub mod handlers;

use axum::Router;

use crate::app_state::AppState;

/// Builds the complete router with all endpoints.
pub fn build_router() -> Router<AppState> {
    handlers::routes()
}
