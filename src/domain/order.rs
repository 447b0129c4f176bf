//! Order aggregate: one purchase attempt with snapshot pricing and
//! payment linkage.
//!
//! Line items snapshot the catalog label and price at creation time on
//! purpose: catalog prices may change later, but historical orders must
//! remain immutable in price. `total_amount` is the exact sum of the
//! snapshots and is never recomputed.

use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::catalog::{Catalog, NO_SECOND_ITEM};
use crate::error::BotError;

/// Monotonic integer order identifier, assigned by the ledger at creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderId(i64);

impl OrderId {
    /// Wraps a raw ledger-assigned id.
    #[must_use]
    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    /// Returns the raw integer id.
    #[must_use]
    pub const fn get(&self) -> i64 {
        self.0
    }
}

impl fmt::Display for OrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Order lifecycle status. Transitions only forward: `Pending → Paid`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    /// Created, payment not yet confirmed.
    Pending,
    /// Settlement recorded; a receipt exists or is being issued.
    Paid,
}

impl OrderStatus {
    /// Stable string form used in the database.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Paid => "paid",
        }
    }

    /// Parses the database string form.
    ///
    /// # Errors
    ///
    /// Returns [`BotError::Persistence`] on an unknown status string.
    pub fn parse(s: &str) -> Result<Self, BotError> {
        match s {
            "pending" => Ok(Self::Pending),
            "paid" => Ok(Self::Paid),
            other => Err(BotError::Persistence(format!(
                "unknown order status: {other}"
            ))),
        }
    }
}

/// One priced line of an order — a snapshot taken at creation time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineItem {
    /// Catalog key the line was created from (`"custom"`/`"manual"` for
    /// free-form amounts).
    pub key: String,
    /// Label snapshot.
    pub label: String,
    /// Amount snapshot.
    pub amount: Decimal,
}

/// One purchase attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    /// Ledger-assigned id.
    pub id: OrderId,
    /// Messaging-platform customer identity.
    pub wa_id: String,
    /// Customer name captured at order time.
    pub customer_name: String,
    /// Customer phone captured at order time.
    pub customer_phone: String,
    /// One or two priced lines.
    pub items: Vec<LineItem>,
    /// Exact sum of line amounts at creation; never recomputed.
    pub total_amount: Decimal,
    /// Free-text note attached at creation.
    pub note: String,
    /// Lifecycle status.
    pub status: OrderStatus,
    /// Payer-facing approval URL, set once after remote order creation.
    pub pay_link: Option<String>,
    /// Payment-provider correlation id, set once after remote creation.
    pub provider_order_id: Option<String>,
    /// Last observed provider status string; never cleared once set.
    pub provider_status: Option<String>,
    /// Provider capture id; first-write-wins.
    pub capture_id: Option<String>,
    /// Invoice number, assigned exactly once when the receipt is first
    /// produced.
    pub invoice_number: Option<i64>,
    /// Receipt artifact path; once set it is a cache — settlement never
    /// regenerates it.
    pub invoice_artifact: Option<String>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// First transition to paid; set exactly once.
    pub paid_at: Option<DateTime<Utc>>,
}

/// Validated input for order creation, built before touching the ledger.
#[derive(Debug, Clone)]
pub struct OrderDraft {
    /// Customer identity the order belongs to.
    pub wa_id: String,
    /// Name snapshot.
    pub customer_name: String,
    /// Phone snapshot.
    pub customer_phone: String,
    /// One or two validated, priced lines.
    pub items: Vec<LineItem>,
    /// Exact sum of line amounts.
    pub total_amount: Decimal,
    /// Order note.
    pub note: String,
    /// Initial status: `Pending` for provider-settled orders, `Paid` for
    /// manual admin invoices.
    pub initial_status: OrderStatus,
}

impl OrderDraft {
    /// Builds a draft from one or two catalog selections, re-validating
    /// each key against the current catalog and snapshotting label and
    /// price.
    ///
    /// # Errors
    ///
    /// Returns [`BotError::InvalidItem`] if a key (other than the
    /// `"none"` sentinel in second position) is absent from the catalog.
    pub fn from_catalog(
        catalog: &Catalog,
        wa_id: &str,
        name: &str,
        phone: &str,
        item1: &str,
        item2: &str,
        note: &str,
    ) -> Result<Self, BotError> {
        let first = catalog.price_of(item1)?;
        let mut items = vec![LineItem {
            key: first.key.to_string(),
            label: first.label.to_string(),
            amount: first.price,
        }];

        if !item2.is_empty() && item2 != NO_SECOND_ITEM {
            let second = catalog.price_of(item2)?;
            items.push(LineItem {
                key: second.key.to_string(),
                label: second.label.to_string(),
                amount: second.price,
            });
        }

        let total_amount = items.iter().map(|line| line.amount).sum();

        Ok(Self {
            wa_id: wa_id.to_string(),
            customer_name: name.to_string(),
            customer_phone: phone.to_string(),
            items,
            total_amount,
            note: note.to_string(),
            initial_status: OrderStatus::Pending,
        })
    }

    /// Builds a draft for an admin free-form amount that still goes
    /// through the payment provider.
    ///
    /// # Errors
    ///
    /// Returns [`BotError::InvalidAmount`] if `amount <= 0`. Amounts are
    /// never clamped or coerced.
    pub fn custom(
        wa_id: &str,
        name: &str,
        phone: &str,
        amount: Decimal,
        label: &str,
        note: &str,
    ) -> Result<Self, BotError> {
        if amount <= Decimal::ZERO {
            return Err(BotError::InvalidAmount(amount.to_string()));
        }
        Ok(Self {
            wa_id: wa_id.to_string(),
            customer_name: name.to_string(),
            customer_phone: phone.to_string(),
            items: vec![LineItem {
                key: "custom".to_string(),
                label: label.to_string(),
                amount,
            }],
            total_amount: amount,
            note: note.to_string(),
            initial_status: OrderStatus::Pending,
        })
    }

    /// Builds a draft for a manual admin invoice: created already paid,
    /// settled without any payment-provider interaction.
    ///
    /// # Errors
    ///
    /// Returns [`BotError::InvalidAmount`] if `amount <= 0`.
    pub fn manual(
        name: &str,
        phone: &str,
        reason: &str,
        amount: Decimal,
        note: &str,
    ) -> Result<Self, BotError> {
        if amount <= Decimal::ZERO {
            return Err(BotError::InvalidAmount(amount.to_string()));
        }
        let label = if reason.trim().is_empty() {
            "🧾 תשלום".to_string()
        } else {
            format!("🧾 {}", reason.trim())
        };
        Ok(Self {
            // Manual invoices have no messaging identity; keyed by the
            // customer phone so the restore flow can find them.
            wa_id: phone.to_string(),
            customer_name: name.to_string(),
            customer_phone: phone.to_string(),
            items: vec![LineItem {
                key: "manual".to_string(),
                label,
                amount,
            }],
            total_amount: amount,
            note: note.to_string(),
            initial_status: OrderStatus::Paid,
        })
    }
}

/// The durable outcome of a first successful settlement.
#[derive(Debug, Clone)]
pub struct Settlement {
    /// Invoice number assigned to this order.
    pub invoice_number: i64,
    /// Path of the generated receipt artifact.
    pub artifact: String,
    /// Provider capture id, if the settlement came from a capture.
    pub capture_id: Option<String>,
    /// Provider status observed at settlement time.
    pub provider_status: Option<String>,
    /// Settlement timestamp (becomes `paid_at` if not already set).
    pub paid_at: DateTime<Utc>,
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn catalog() -> Catalog {
        Catalog::standard()
    }

    #[test]
    fn draft_total_is_exact_sum_of_snapshots() {
        let draft = OrderDraft::from_catalog(
            &catalog(),
            "972501234567",
            "דני",
            "0501234567",
            "screen",
            "delivery",
            "",
        );
        let Ok(draft) = draft else {
            panic!("valid draft");
        };
        assert_eq!(draft.items.len(), 2);
        assert_eq!(draft.total_amount, dec!(399.00) + dec!(69.90));
    }

    #[test]
    fn draft_with_none_sentinel_has_one_line() {
        let draft = OrderDraft::from_catalog(
            &catalog(),
            "972501234567",
            "דני",
            "0501234567",
            "screen",
            NO_SECOND_ITEM,
            "",
        );
        let Ok(draft) = draft else {
            panic!("valid draft");
        };
        assert_eq!(draft.items.len(), 1);
        assert_eq!(draft.total_amount, dec!(399.00));
    }

    #[test]
    fn draft_rejects_unknown_first_item() {
        let result = OrderDraft::from_catalog(
            &catalog(),
            "972501234567",
            "דני",
            "0501234567",
            "tape",
            NO_SECOND_ITEM,
            "",
        );
        assert!(matches!(result, Err(BotError::InvalidItem(_))));
    }

    #[test]
    fn draft_rejects_unknown_second_item() {
        let result = OrderDraft::from_catalog(
            &catalog(),
            "972501234567",
            "דני",
            "0501234567",
            "screen",
            "tape",
            "",
        );
        assert!(matches!(result, Err(BotError::InvalidItem(_))));
    }

    #[test]
    fn snapshots_survive_catalog_changes() {
        let draft = OrderDraft::from_catalog(
            &catalog(),
            "972501234567",
            "דני",
            "0501234567",
            "screen",
            NO_SECOND_ITEM,
            "",
        );
        let Ok(draft) = draft else {
            panic!("valid draft");
        };

        // A later, repriced catalog does not affect the draft's snapshots.
        let repriced = Catalog::new(vec![crate::domain::catalog::CatalogItem {
            key: "screen",
            label: "📱 מסך",
            price: dec!(999.00),
        }]);
        let Ok(current) = repriced.price_of("screen") else {
            panic!("screen present");
        };
        assert_eq!(current.price, dec!(999.00));
        let Some(first) = draft.items.first() else {
            panic!("one line");
        };
        assert_eq!(first.amount, dec!(399.00));
    }

    #[test]
    fn custom_draft_rejects_non_positive_amounts() {
        for amount in [dec!(0), dec!(-5)] {
            let result =
                OrderDraft::custom("972501234567", "דני", "0501234567", amount, "מקדמה", "");
            assert!(matches!(result, Err(BotError::InvalidAmount(_))));
        }
    }

    #[test]
    fn manual_draft_is_paid_from_creation() {
        let draft = OrderDraft::manual("דני", "0501234567", "החלפת מסך", dec!(350), "");
        let Ok(draft) = draft else {
            panic!("valid draft");
        };
        assert_eq!(draft.initial_status, OrderStatus::Paid);
        let Some(line) = draft.items.first() else {
            panic!("one line");
        };
        assert_eq!(line.key, "manual");
        assert!(line.label.contains("החלפת מסך"));
    }

    #[test]
    fn manual_draft_blank_reason_gets_default_label() {
        let draft = OrderDraft::manual("דני", "0501234567", "   ", dec!(100), "");
        let Ok(draft) = draft else {
            panic!("valid draft");
        };
        let Some(line) = draft.items.first() else {
            panic!("one line");
        };
        assert_eq!(line.label, "🧾 תשלום");
    }

    #[test]
    fn status_round_trips_through_strings() {
        for status in [OrderStatus::Pending, OrderStatus::Paid] {
            let parsed = OrderStatus::parse(status.as_str());
            let Ok(parsed) = parsed else {
                panic!("round trip");
            };
            assert_eq!(parsed, status);
        }
        assert!(OrderStatus::parse("refunded").is_err());
    }
}
