//! Bot error types with HTTP status code mapping.
//!
//! [`BotError`] is the central error type for the bot. Each variant maps to
//! a numeric code and a structured JSON error response for the HTTP surface,
//! and is classified as either a business-rule violation (shown to the
//! customer by the conversation engine) or an infrastructure failure
//! (logged, degraded to a generic reply).

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

/// Structured JSON error response body.
///
/// All error responses follow this shape:
/// ```json
/// {
///   "error": {
///     "code": 1001,
///     "message": "unknown catalog item: tape",
///     "details": null
///   }
/// }
/// ```
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Structured error payload.
    pub error: ErrorBody,
}

/// Inner error body with numeric code and human-readable message.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    /// Numeric error code (see code ranges on [`BotError`]).
    pub code: u32,
    /// Human-readable error message.
    pub message: String,
    /// Optional additional details.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

/// Central error enum for the bot core.
///
/// # Error Code Ranges
///
/// | Range     | Category              | HTTP Status                  |
/// |-----------|-----------------------|------------------------------|
/// | 1000–1999 | Validation (business) | 400 Bad Request              |
/// | 2000–2999 | Not Found / State     | 404 Not Found / 409 Conflict |
/// | 3000–3999 | Infrastructure        | 500 / 502                    |
/// | 4000–4999 | Permission            | 403 Forbidden                |
#[derive(Debug, thiserror::Error)]
pub enum BotError {
    /// An item key is not present in the catalog.
    #[error("unknown catalog item: {0}")]
    InvalidItem(String),

    /// A monetary amount is zero, negative, or unparseable.
    #[error("invalid amount: {0}")]
    InvalidAmount(String),

    /// No order exists with the given id.
    #[error("order not found: {0}")]
    OrderNotFound(i64),

    /// A non-admin customer attempted an admin-only step.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// A later flow step executed without the fields an earlier step should
    /// have collected. Indicates a stale or corrupted session.
    #[error("session inconsistent: {0}")]
    SessionInconsistent(String),

    /// The payment provider returned a transport or HTTP-level failure.
    #[error("payment provider error: {0}")]
    PaymentProvider(String),

    /// The messaging platform call itself failed (transport/HTTP level).
    #[error("messaging error: {0}")]
    Messaging(String),

    /// Persistence layer failure.
    #[error("persistence error: {0}")]
    Persistence(String),

    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl BotError {
    /// Returns the numeric error code for this variant.
    #[must_use]
    pub const fn error_code(&self) -> u32 {
        match self {
            Self::InvalidItem(_) => 1001,
            Self::InvalidAmount(_) => 1002,
            Self::OrderNotFound(_) => 2001,
            Self::SessionInconsistent(_) => 2002,
            Self::Internal(_) => 3000,
            Self::PaymentProvider(_) => 3001,
            Self::Messaging(_) => 3002,
            Self::Persistence(_) => 3003,
            Self::Unauthorized(_) => 4001,
        }
    }

    /// Returns the HTTP status code for this variant.
    #[must_use]
    pub const fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidItem(_) | Self::InvalidAmount(_) => StatusCode::BAD_REQUEST,
            Self::OrderNotFound(_) => StatusCode::NOT_FOUND,
            Self::SessionInconsistent(_) => StatusCode::CONFLICT,
            Self::Unauthorized(_) => StatusCode::FORBIDDEN,
            Self::PaymentProvider(_) | Self::Messaging(_) => StatusCode::BAD_GATEWAY,
            Self::Persistence(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Returns `true` for expected business-rule violations that the
    /// conversation engine may surface to the customer directly, `false`
    /// for infrastructure failures that degrade to a generic reply.
    #[must_use]
    pub const fn is_business(&self) -> bool {
        matches!(
            self,
            Self::InvalidItem(_)
                | Self::InvalidAmount(_)
                | Self::OrderNotFound(_)
                | Self::Unauthorized(_)
                | Self::SessionInconsistent(_)
        )
    }
}

impl IntoResponse for BotError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorResponse {
            error: ErrorBody {
                code: self.error_code(),
                message: self.to_string(),
                details: None,
            },
        };
        let mut response = axum::Json(body).into_response();
        *response.status_mut() = status;
        response
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn business_errors_are_classified() {
        assert!(BotError::InvalidItem("tape".to_string()).is_business());
        assert!(BotError::InvalidAmount("-1".to_string()).is_business());
        assert!(BotError::OrderNotFound(7).is_business());
        assert!(BotError::Unauthorized("972000".to_string()).is_business());
        assert!(BotError::SessionInconsistent("missing name".to_string()).is_business());
    }

    #[test]
    fn infrastructure_errors_are_classified() {
        assert!(!BotError::PaymentProvider("timeout".to_string()).is_business());
        assert!(!BotError::Messaging("503".to_string()).is_business());
        assert!(!BotError::Persistence("pool closed".to_string()).is_business());
        assert!(!BotError::Internal("oops".to_string()).is_business());
    }

    #[test]
    fn status_codes_match_categories() {
        assert_eq!(
            BotError::InvalidAmount("0".to_string()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            BotError::OrderNotFound(1).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            BotError::Unauthorized("x".to_string()).status_code(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            BotError::PaymentProvider("x".to_string()).status_code(),
            StatusCode::BAD_GATEWAY
        );
    }

    #[test]
    fn error_codes_are_unique() {
        let codes = [
            BotError::InvalidItem(String::new()).error_code(),
            BotError::InvalidAmount(String::new()).error_code(),
            BotError::OrderNotFound(0).error_code(),
            BotError::Unauthorized(String::new()).error_code(),
            BotError::SessionInconsistent(String::new()).error_code(),
            BotError::PaymentProvider(String::new()).error_code(),
            BotError::Messaging(String::new()).error_code(),
            BotError::Persistence(String::new()).error_code(),
            BotError::Internal(String::new()).error_code(),
        ];
        let mut deduped = codes.to_vec();
        deduped.sort_unstable();
        deduped.dedup();
        assert_eq!(deduped.len(), codes.len());
    }
}
