//! Shared application state injected into all Axum handlers.

use std::sync::Arc;

use crate::persistence::Ledger;
use crate::service::conversation::ConversationEngine;
use crate::service::messaging::MessagingSender;
use crate::service::payment::PaymentGateway;
use crate::service::receipt::ReceiptIssuer;

/// Shared application state available to all handlers via Axum's
/// `State` extractor.
#[derive(Debug, Clone)]
pub struct AppState {
    /// The conversation state machine driving webhook events.
    pub engine: Arc<ConversationEngine>,
    /// Durable storage, used directly by the payment callbacks.
    pub ledger: Arc<dyn Ledger>,
    /// Payment provider adapter for the capture callback.
    pub gateway: Arc<dyn PaymentGateway>,
    /// Serialized settlement service.
    pub issuer: Arc<ReceiptIssuer>,
    /// Outbound messaging channel for receipt delivery.
    pub sender: Arc<dyn MessagingSender>,
    /// Shared secret of the webhook verification handshake.
    pub verify_token: String,
}
