//! Messaging-platform webhook handlers: verification handshake and
//! inbound event receipt.

use axum::Json;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use serde_json::json;

use crate::api::dto::WebhookPayload;
use crate::app_state::AppState;

/// Query parameters of the platform's verification handshake.
#[derive(Debug, Deserialize)]
pub struct VerifyParams {
    /// Must be `"subscribe"`.
    #[serde(rename = "hub.mode")]
    pub mode: Option<String>,
    /// Shared secret to compare against configuration.
    #[serde(rename = "hub.verify_token")]
    pub verify_token: Option<String>,
    /// Challenge token to echo back on success.
    #[serde(rename = "hub.challenge")]
    pub challenge: Option<String>,
}

/// `GET /webhook` — verification handshake: echo the challenge when the
/// shared secret matches, 403 otherwise.
pub async fn verify_webhook(
    State(state): State<AppState>,
    Query(params): Query<VerifyParams>,
) -> Response {
    if params.mode.as_deref() == Some("subscribe")
        && params.verify_token.as_deref() == Some(state.verify_token.as_str())
    {
        tracing::info!("webhook verified");
        return (StatusCode::OK, params.challenge.unwrap_or_default()).into_response();
    }
    tracing::warn!(mode = ?params.mode, "webhook verification failed");
    (StatusCode::FORBIDDEN, "Forbidden").into_response()
}

/// `POST /webhook` — inbound event receipt.
///
/// Always acknowledged with 200: the platform redelivers on any other
/// status, and a malformed payload would redeliver forever. Payloads
/// without a usable message (status updates, unsupported types) are
/// logged and dropped.
pub async fn receive_webhook(
    State(state): State<AppState>,
    Json(raw): Json<serde_json::Value>,
) -> impl IntoResponse {
    match serde_json::from_value::<WebhookPayload>(raw) {
        Ok(payload) => match payload.first_event() {
            Some((wa_id, event)) => {
                tracing::info!(wa_id = wa_id.as_str(), ?event, "inbound event");
                state.engine.handle_event(&wa_id, event).await;
            }
            None => tracing::debug!("webhook payload without a usable message"),
        },
        Err(err) => tracing::warn!(error = %err, "webhook payload decode failed"),
    }
    Json(json!({ "ok": true }))
}
