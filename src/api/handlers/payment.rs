//! Payment-provider return and cancel callbacks.
//!
//! The return callback is one of the two settlement triggers (the other
//! is the customer-initiated "check payment" action); both funnel into
//! the serialized receipt issuer, so racing them is safe.

use std::path::Path;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Response};
use serde::Deserialize;

use crate::app_state::AppState;
use crate::domain::OrderId;
use crate::error::BotError;
use crate::service::payment::STATUS_COMPLETED;

/// Query parameters of the provider return/cancel redirects.
#[derive(Debug, Deserialize)]
pub struct CallbackParams {
    /// Local order id, embedded in the return URL at order creation.
    pub oid: Option<String>,
}

/// `GET /paypal/return` — the payer finished (or abandoned) the approval
/// page: attempt capture and, on completion, settle and send the receipt.
pub async fn paypal_return(
    State(state): State<AppState>,
    Query(params): Query<CallbackParams>,
) -> Response {
    let Some(order_id) = params
        .oid
        .as_deref()
        .and_then(|s| s.trim().parse::<i64>().ok())
    else {
        return (StatusCode::BAD_REQUEST, "Missing oid").into_response();
    };

    match capture_and_settle(&state, OrderId::new(order_id)).await {
        Ok(true) => Html(
            "<h2>תודה! התשלום נקלט ✅</h2><p>אפשר לחזור ל-WhatsApp — החשבונית נשלחה.</p>",
        )
        .into_response(),
        Ok(false) => Html(
            "<h2>התשלום עדיין לא הושלם</h2><p>חזור ל-WhatsApp ולחץ 'בדיקת תשלום'.</p>",
        )
        .into_response(),
        Err(BotError::OrderNotFound(_)) => {
            (StatusCode::NOT_FOUND, "Order not found").into_response()
        }
        Err(err) => {
            tracing::error!(order_id, error = %err, "return callback failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Html("<h2>שגיאה בעיבוד התשלום</h2><p>חזור ל-WhatsApp ולחץ 'בדיקת תשלום'.</p>"),
            )
                .into_response()
        }
    }
}

/// `GET /paypal/cancel` — acknowledgment only; no local state changes.
pub async fn paypal_cancel() -> impl IntoResponse {
    Html("<h2>התשלום בוטל</h2><p>אפשר לחזור ל-WhatsApp ולהתחיל מחדש.</p>")
}

/// Captures the remote order and settles locally when completed.
/// Returns `Ok(true)` when a receipt was issued and sent.
async fn capture_and_settle(state: &AppState, order_id: OrderId) -> Result<bool, BotError> {
    let order = state.ledger.order(order_id).await?;
    let Some(provider_order_id) = order.provider_order_id.clone() else {
        // A linkless order has nothing to capture.
        return Err(BotError::OrderNotFound(order_id.get()));
    };

    let capture = state.gateway.capture(&provider_order_id).await?;
    state
        .ledger
        .update_provider_status(order.id, &capture.status)
        .await?;

    if capture.status != STATUS_COMPLETED {
        tracing::info!(%order_id, status = capture.status.as_str(), "capture not completed");
        return Ok(false);
    }

    let artifact = state
        .issuer
        .ensure_receipt(order.id, capture.capture_id.as_deref(), Some(&capture.status))
        .await?;
    if let Err(err) = state
        .sender
        .send_text(&order.wa_id, "✅ התשלום נקלט! שולח חשבונית…")
        .await
    {
        tracing::error!(%order_id, error = %err, "settlement text delivery failed");
    }
    if let Err(err) = state
        .sender
        .send_document(&order.wa_id, Path::new(&artifact), "🧾 חשבונית ✅")
        .await
    {
        tracing::error!(%order_id, error = %err, "receipt delivery failed");
    }
    Ok(true)
}
