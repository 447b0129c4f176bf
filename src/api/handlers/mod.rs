//! HTTP endpoint handlers organized by concern.

pub mod payment;
pub mod system;
pub mod webhook;

use axum::Router;
use axum::routing::get;

use crate::app_state::AppState;

/// Composes all routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route(
            "/webhook",
            get(webhook::verify_webhook).post(webhook::receive_webhook),
        )
        .route("/paypal/return", get(payment::paypal_return))
        .route("/paypal/cancel", get(payment::paypal_cancel))
        .merge(system::routes())
}
