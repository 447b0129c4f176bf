//! Payment provider adapter: trait + PayPal Checkout implementation.
//!
//! Wraps the three-call remote lifecycle — create, query, capture — and
//! caches the OAuth bearer credential. The credential is refreshed when
//! within 60 seconds of expiry, so a token read as "still valid" cannot
//! expire mid-flight. Refreshing twice in a race is harmless; no lock is
//! held across the network call.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde_json::json;
use tokio::sync::RwLock;

use crate::domain::OrderId;
use crate::error::BotError;

/// Provider status string meaning the payment is fully captured.
pub const STATUS_COMPLETED: &str = "COMPLETED";

/// Result of creating a remote payment order.
#[derive(Debug, Clone)]
pub struct RemoteOrder {
    /// Provider-side correlation id.
    pub provider_order_id: String,
    /// Payer-facing approval URL.
    pub approval_url: String,
}

/// Result of a capture attempt. A non-`COMPLETED` status means "not yet
/// completed", not failure.
#[derive(Debug, Clone)]
pub struct Capture {
    /// Provider status after the capture attempt.
    pub status: String,
    /// Capture id, present when funds were captured.
    pub capture_id: Option<String>,
}

/// Abstract payment provider as seen by the conversation engine.
#[async_trait]
pub trait PaymentGateway: Send + Sync + std::fmt::Debug {
    /// Creates a remote order for the given local order and amount.
    ///
    /// No local state is committed by this call; the caller records the
    /// returned link against the order afterwards.
    ///
    /// # Errors
    ///
    /// Returns [`BotError::PaymentProvider`] on any non-success response
    /// or a missing approval link.
    async fn create_remote_order(
        &self,
        local_order_id: OrderId,
        amount: Decimal,
    ) -> Result<RemoteOrder, BotError>;

    /// Reads the remote order status. Read-only; safe to call repeatedly
    /// and concurrently.
    ///
    /// # Errors
    ///
    /// Returns [`BotError::PaymentProvider`] on transport/HTTP failure.
    async fn query_remote_status(&self, provider_order_id: &str) -> Result<String, BotError>;

    /// Attempts to finalize payment. Only called from contexts where the
    /// customer or provider asserts completion — never speculatively.
    ///
    /// # Errors
    ///
    /// Returns [`BotError::PaymentProvider`] on transport/HTTP failure.
    async fn capture(&self, provider_order_id: &str) -> Result<Capture, BotError>;
}

/// Cached OAuth bearer credential.
#[derive(Debug, Clone)]
struct CachedToken {
    value: String,
    expires_at: DateTime<Utc>,
}

impl CachedToken {
    /// `true` while more than the refresh margin remains before expiry.
    fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at - Duration::seconds(60)
    }
}

/// PayPal Checkout (Orders v2) gateway.
#[derive(Debug)]
pub struct PayPalGateway {
    http: reqwest::Client,
    api_base: String,
    client_id: String,
    client_secret: String,
    currency: String,
    brand_name: String,
    public_base_url: String,
    token: RwLock<Option<CachedToken>>,
}

impl PayPalGateway {
    /// Creates a gateway. The `http` client carries the global timeout.
    #[must_use]
    pub fn new(
        http: reqwest::Client,
        api_base: &str,
        client_id: &str,
        client_secret: &str,
        currency: &str,
        brand_name: &str,
        public_base_url: &str,
    ) -> Self {
        Self {
            http,
            api_base: api_base.to_string(),
            client_id: client_id.to_string(),
            client_secret: client_secret.to_string(),
            currency: currency.to_string(),
            brand_name: brand_name.to_string(),
            public_base_url: public_base_url.to_string(),
            token: RwLock::new(None),
        }
    }

    /// Returns a bearer token, fetching or refreshing as needed.
    async fn access_token(&self) -> Result<String, BotError> {
        let now = Utc::now();
        if let Some(cached) = self.token.read().await.as_ref()
            && cached.is_fresh(now)
        {
            return Ok(cached.value.clone());
        }

        let response = self
            .http
            .post(format!("{}/v1/oauth2/token", self.api_base))
            .basic_auth(&self.client_id, Some(&self.client_secret))
            .form(&[("grant_type", "client_credentials")])
            .send()
            .await
            .map_err(|e| BotError::PaymentProvider(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(BotError::PaymentProvider(format!(
                "token request failed: {status}"
            )));
        }
        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| BotError::PaymentProvider(e.to_string()))?;

        let value = body
            .get("access_token")
            .and_then(|t| t.as_str())
            .ok_or_else(|| BotError::PaymentProvider("token response missing access_token".to_string()))?
            .to_string();
        let expires_in = body
            .get("expires_in")
            .and_then(serde_json::Value::as_i64)
            .unwrap_or(300);

        let cached = CachedToken {
            value: value.clone(),
            expires_at: now + Duration::seconds(expires_in),
        };
        *self.token.write().await = Some(cached);
        Ok(value)
    }
}

#[async_trait]
impl PaymentGateway for PayPalGateway {
    async fn create_remote_order(
        &self,
        local_order_id: OrderId,
        amount: Decimal,
    ) -> Result<RemoteOrder, BotError> {
        let token = self.access_token().await?;
        let body = json!({
            "intent": "CAPTURE",
            "purchase_units": [{
                "reference_id": "PU1",
                "custom_id": local_order_id.to_string(),
                "invoice_id": format!("FXL-{local_order_id}"),
                "amount": {
                    "currency_code": self.currency,
                    "value": format!("{amount:.2}"),
                },
            }],
            "application_context": {
                "brand_name": self.brand_name,
                "landing_page": "BILLING",
                "user_action": "PAY_NOW",
                "return_url": format!("{}/paypal/return?oid={local_order_id}", self.public_base_url),
                "cancel_url": format!("{}/paypal/cancel?oid={local_order_id}", self.public_base_url),
            },
        });

        let response = self
            .http
            .post(format!("{}/v2/checkout/orders", self.api_base))
            .bearer_auth(&token)
            .header("PayPal-Request-Id", uuid::Uuid::new_v4().to_string())
            .json(&body)
            .send()
            .await
            .map_err(|e| BotError::PaymentProvider(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            tracing::warn!(%status, body = text.as_str(), "remote order creation rejected");
            return Err(BotError::PaymentProvider(format!(
                "order creation failed: {status}"
            )));
        }
        let payload: serde_json::Value = response
            .json()
            .await
            .map_err(|e| BotError::PaymentProvider(e.to_string()))?;

        let provider_order_id = payload
            .get("id")
            .and_then(|id| id.as_str())
            .ok_or_else(|| BotError::PaymentProvider("order response missing id".to_string()))?
            .to_string();
        let approval_url = extract_approval_url(&payload).ok_or_else(|| {
            BotError::PaymentProvider("order response missing approval link".to_string())
        })?;

        tracing::info!(%local_order_id, provider_order_id = provider_order_id.as_str(), "remote order created");
        Ok(RemoteOrder {
            provider_order_id,
            approval_url,
        })
    }

    async fn query_remote_status(&self, provider_order_id: &str) -> Result<String, BotError> {
        let token = self.access_token().await?;
        let response = self
            .http
            .get(format!(
                "{}/v2/checkout/orders/{provider_order_id}",
                self.api_base
            ))
            .bearer_auth(&token)
            .send()
            .await
            .map_err(|e| BotError::PaymentProvider(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(BotError::PaymentProvider(format!(
                "order query failed: {status}"
            )));
        }
        let payload: serde_json::Value = response
            .json()
            .await
            .map_err(|e| BotError::PaymentProvider(e.to_string()))?;

        Ok(payload
            .get("status")
            .and_then(|s| s.as_str())
            .unwrap_or_default()
            .to_string())
    }

    async fn capture(&self, provider_order_id: &str) -> Result<Capture, BotError> {
        let token = self.access_token().await?;
        let response = self
            .http
            .post(format!(
                "{}/v2/checkout/orders/{provider_order_id}/capture",
                self.api_base
            ))
            .bearer_auth(&token)
            .json(&json!({}))
            .send()
            .await
            .map_err(|e| BotError::PaymentProvider(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(BotError::PaymentProvider(format!(
                "capture failed: {status}"
            )));
        }
        let payload: serde_json::Value = response
            .json()
            .await
            .map_err(|e| BotError::PaymentProvider(e.to_string()))?;

        Ok(Capture {
            status: payload
                .get("status")
                .and_then(|s| s.as_str())
                .unwrap_or_default()
                .to_string(),
            capture_id: extract_capture_id(&payload),
        })
    }
}

/// Finds the payer approval link (`approve` or `payer-action` rel).
fn extract_approval_url(payload: &serde_json::Value) -> Option<String> {
    payload
        .get("links")?
        .as_array()?
        .iter()
        .find(|link| {
            matches!(
                link.get("rel").and_then(|r| r.as_str()),
                Some("approve") | Some("payer-action")
            )
        })
        .and_then(|link| link.get("href"))
        .and_then(|href| href.as_str())
        .map(ToString::to_string)
}

/// Extracts the first capture id from a capture response.
fn extract_capture_id(payload: &serde_json::Value) -> Option<String> {
    payload
        .get("purchase_units")?
        .as_array()?
        .iter()
        .find_map(|unit| {
            unit.get("payments")?
                .get("captures")?
                .as_array()?
                .first()?
                .get("id")?
                .as_str()
                .map(ToString::to_string)
        })
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn token_freshness_includes_sixty_second_margin() {
        let now = Utc::now();
        let fresh = CachedToken {
            value: "t".to_string(),
            expires_at: now + Duration::seconds(120),
        };
        assert!(fresh.is_fresh(now));

        let near_expiry = CachedToken {
            value: "t".to_string(),
            expires_at: now + Duration::seconds(30),
        };
        assert!(!near_expiry.is_fresh(now));
    }

    #[test]
    fn approval_url_prefers_first_matching_rel() {
        let payload = json!({
            "id": "PP-1",
            "links": [
                { "rel": "self", "href": "https://api/orders/PP-1" },
                { "rel": "approve", "href": "https://pay/approve/PP-1" },
            ],
        });
        assert_eq!(
            extract_approval_url(&payload).as_deref(),
            Some("https://pay/approve/PP-1")
        );
    }

    #[test]
    fn approval_url_accepts_payer_action_rel() {
        let payload = json!({
            "links": [{ "rel": "payer-action", "href": "https://pay/act" }],
        });
        assert_eq!(extract_approval_url(&payload).as_deref(), Some("https://pay/act"));
    }

    #[test]
    fn approval_url_missing_returns_none() {
        let payload = json!({ "links": [{ "rel": "self", "href": "https://x" }] });
        assert!(extract_approval_url(&payload).is_none());
        assert!(extract_approval_url(&json!({})).is_none());
    }

    #[test]
    fn capture_id_extracted_from_nested_payload() {
        let payload = json!({
            "status": "COMPLETED",
            "purchase_units": [{
                "payments": { "captures": [{ "id": "CAP-9" }] },
            }],
        });
        assert_eq!(extract_capture_id(&payload).as_deref(), Some("CAP-9"));
    }

    #[test]
    fn capture_id_missing_returns_none() {
        assert!(extract_capture_id(&json!({ "status": "PENDING" })).is_none());
        assert!(
            extract_capture_id(&json!({ "purchase_units": [{ "payments": {} }] })).is_none()
        );
    }
}
