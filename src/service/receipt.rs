//! Receipt issuance: exactly one artifact per order, strictly increasing
//! invoice numbers.
//!
//! [`ReceiptIssuer::ensure_receipt`] is the single settlement path for
//! every trigger (provider return callback, customer-initiated status
//! check, manual admin invoice). The whole check-then-act sequence —
//! re-read the order, check for an existing artifact, assign the next
//! invoice number, render, persist — runs under one global mutex. The
//! lock is global rather than per-order because the invoice counter is
//! global: two different orders settling concurrently must not read the
//! same maximum.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Mutex;

use crate::config::BusinessProfile;
use crate::domain::catalog::format_amount;
use crate::domain::{Order, OrderId, Settlement};
use crate::error::BotError;
use crate::persistence::Ledger;

/// Renders a receipt artifact for a settled order.
///
/// Layout is out of core scope; implementations only guarantee that the
/// returned path exists and is stable for the given invoice number.
pub trait ReceiptRenderer: Send + Sync + std::fmt::Debug {
    /// Writes the artifact and returns its path.
    ///
    /// # Errors
    ///
    /// Returns [`BotError::Internal`] when the artifact cannot be written.
    fn render(&self, order: &Order, invoice_number: i64) -> Result<String, BotError>;
}

/// Plain-text receipt renderer writing `invoice_<n>.txt` files.
#[derive(Debug)]
pub struct TextReceiptRenderer {
    dir: PathBuf,
    business: BusinessProfile,
}

impl TextReceiptRenderer {
    /// Creates a renderer writing into `dir`.
    #[must_use]
    pub fn new(dir: PathBuf, business: BusinessProfile) -> Self {
        Self { dir, business }
    }
}

impl ReceiptRenderer for TextReceiptRenderer {
    fn render(&self, order: &Order, invoice_number: i64) -> Result<String, BotError> {
        std::fs::create_dir_all(&self.dir)
            .map_err(|e| BotError::Internal(format!("create receipts dir: {e}")))?;

        let mut lines = vec![
            "חשבונית מס / קבלה".to_string(),
            self.business.name.clone(),
            self.business.subtitle.clone(),
            format!("טלפון: {}", self.business.phone),
            String::new(),
            format!("מס׳ חשבונית: {invoice_number}"),
            format!("תאריך: {}", Utc::now().format("%Y-%m-%d %H:%M:%S")),
            format!("לקוח: {}", order.customer_name),
            format!("טלפון: {}", order.customer_phone),
            String::new(),
        ];
        for item in &order.items {
            lines.push(format!("{} — {}", item.label, format_amount(item.amount)));
        }
        lines.push(String::new());
        lines.push(format!("סה״כ לתשלום: {}", format_amount(order.total_amount)));
        lines.push(String::new());
        lines.push(self.business.tax_note.clone());
        lines.push(self.business.warranty_note.clone());

        let path = self.dir.join(format!("invoice_{invoice_number}.txt"));
        std::fs::write(&path, lines.join("\n"))
            .map_err(|e| BotError::Internal(format!("write receipt: {e}")))?;
        Ok(path.to_string_lossy().into_owned())
    }
}

/// Serialized settlement service guaranteeing at most one receipt per
/// order.
#[derive(Debug)]
pub struct ReceiptIssuer {
    ledger: Arc<dyn Ledger>,
    renderer: Arc<dyn ReceiptRenderer>,
    settle_lock: Mutex<()>,
}

impl ReceiptIssuer {
    /// Creates an issuer over the given ledger and renderer.
    #[must_use]
    pub fn new(ledger: Arc<dyn Ledger>, renderer: Arc<dyn ReceiptRenderer>) -> Self {
        Self {
            ledger,
            renderer,
            settle_lock: Mutex::new(()),
        }
    }

    /// Settles an order and returns its receipt artifact path.
    ///
    /// Idempotent: an order with an existing artifact gets the cached path
    /// back, with `capture_id`/`provider_status`/`paid_at` backfilled only
    /// where previously unset (first-write-wins). Otherwise the next
    /// invoice number is assigned, the artifact rendered, and the
    /// settlement persisted — all under the global settlement lock.
    ///
    /// # Errors
    ///
    /// Returns [`BotError::OrderNotFound`] for an unknown order, or the
    /// renderer/ledger error on failure.
    pub async fn ensure_receipt(
        &self,
        order_id: OrderId,
        capture_id: Option<&str>,
        provider_status: Option<&str>,
    ) -> Result<String, BotError> {
        let _guard = self.settle_lock.lock().await;
        let now = Utc::now();

        let order = self.ledger.order(order_id).await?;
        if let Some(artifact) = &order.invoice_artifact {
            self.ledger
                .backfill_settlement(order_id, capture_id, provider_status, now)
                .await?;
            tracing::info!(%order_id, artifact = artifact.as_str(), "settlement replay, artifact reused");
            return Ok(artifact.clone());
        }

        let invoice_number = self.ledger.max_invoice_number().await? + 1;
        let artifact = self.renderer.render(&order, invoice_number)?;
        self.ledger
            .record_settlement(
                order_id,
                Settlement {
                    invoice_number,
                    artifact: artifact.clone(),
                    capture_id: capture_id.map(ToString::to_string),
                    provider_status: provider_status.map(ToString::to_string),
                    paid_at: now,
                },
            )
            .await?;

        tracing::info!(%order_id, invoice_number, "order settled, receipt issued");
        Ok(artifact)
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use crate::domain::catalog::NO_SECOND_ITEM;
    use crate::domain::{Catalog, OrderDraft};
    use crate::persistence::memory::MemoryLedger;

    fn business() -> BusinessProfile {
        BusinessProfile {
            name: "Expresphone".to_string(),
            subtitle: "מעבדה לתיקון סלולר".to_string(),
            phone: "054-0000000".to_string(),
            tax_note: "עוסק פטור – ללא מע״מ".to_string(),
            warranty_note: "ללא אחריות על נזקי מים".to_string(),
            order_note: String::new(),
            navigation_url: String::new(),
            reviews_url: String::new(),
            reviews_alt_url: String::new(),
        }
    }

    fn issuer_over(dir: &std::path::Path) -> (Arc<MemoryLedger>, ReceiptIssuer) {
        let ledger = Arc::new(MemoryLedger::new());
        let renderer = Arc::new(TextReceiptRenderer::new(dir.to_path_buf(), business()));
        let issuer = ReceiptIssuer::new(Arc::clone(&ledger) as Arc<dyn Ledger>, renderer);
        (ledger, issuer)
    }

    async fn pending_order(ledger: &MemoryLedger) -> OrderId {
        let draft = OrderDraft::from_catalog(
            &Catalog::standard(),
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
        let Ok(order) = ledger.create_order(draft).await else {
            panic!("creation failed");
        };
        order.id
    }

    #[tokio::test]
    async fn first_settlement_assigns_invoice_and_writes_artifact() {
        let Ok(dir) = tempfile::tempdir() else {
            panic!("tempdir");
        };
        let (ledger, issuer) = issuer_over(dir.path());
        let order_id = pending_order(&ledger).await;

        let artifact = issuer
            .ensure_receipt(order_id, Some("CAP-1"), Some("COMPLETED"))
            .await;
        let Ok(artifact) = artifact else {
            panic!("settlement failed");
        };
        assert!(std::path::Path::new(&artifact).is_file());

        let Ok(order) = ledger.order(order_id).await else {
            panic!("lookup failed");
        };
        assert_eq!(order.invoice_number, Some(1));
        assert_eq!(order.capture_id.as_deref(), Some("CAP-1"));
        assert!(order.paid_at.is_some());
    }

    #[tokio::test]
    async fn second_settlement_reuses_artifact_and_keeps_first_capture() {
        let Ok(dir) = tempfile::tempdir() else {
            panic!("tempdir");
        };
        let (ledger, issuer) = issuer_over(dir.path());
        let order_id = pending_order(&ledger).await;

        let first = issuer
            .ensure_receipt(order_id, Some("CAP-1"), Some("COMPLETED"))
            .await;
        let second = issuer
            .ensure_receipt(order_id, Some("CAP-2"), Some("COMPLETED"))
            .await;
        let (Ok(first), Ok(second)) = (first, second) else {
            panic!("settlement failed");
        };
        assert_eq!(first, second);

        let Ok(order) = ledger.order(order_id).await else {
            panic!("lookup failed");
        };
        assert_eq!(order.capture_id.as_deref(), Some("CAP-1"));
        assert_eq!(order.invoice_number, Some(1));
    }

    #[tokio::test]
    async fn concurrent_settlements_consume_one_invoice_number() {
        let Ok(dir) = tempfile::tempdir() else {
            panic!("tempdir");
        };
        let (ledger, issuer) = issuer_over(dir.path());
        let order_id = pending_order(&ledger).await;
        let issuer = Arc::new(issuer);

        // A provider return callback and a manual status check racing.
        let a = issuer.ensure_receipt(order_id, Some("CAP-A"), Some("COMPLETED"));
        let b = issuer.ensure_receipt(order_id, Some("CAP-B"), Some("COMPLETED"));
        let (a, b) = tokio::join!(a, b);
        let (Ok(a), Ok(b)) = (a, b) else {
            panic!("settlement failed");
        };
        assert_eq!(a, b);

        let Ok(order) = ledger.order(order_id).await else {
            panic!("lookup failed");
        };
        assert_eq!(order.invoice_number, Some(1));
        // Exactly one artifact file on disk.
        let Ok(entries) = std::fs::read_dir(dir.path()) else {
            panic!("read dir");
        };
        assert_eq!(entries.count(), 1);
    }

    #[tokio::test]
    async fn invoice_numbers_strictly_increase_across_orders() {
        let Ok(dir) = tempfile::tempdir() else {
            panic!("tempdir");
        };
        let (ledger, issuer) = issuer_over(dir.path());

        let mut numbers = Vec::new();
        for _ in 0..4 {
            let order_id = pending_order(&ledger).await;
            let result = issuer.ensure_receipt(order_id, None, None).await;
            assert!(result.is_ok());
            let Ok(order) = ledger.order(order_id).await else {
                panic!("lookup failed");
            };
            let Some(number) = order.invoice_number else {
                panic!("invoice assigned");
            };
            numbers.push(number);
        }
        assert_eq!(numbers, vec![1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn unknown_order_is_rejected() {
        let Ok(dir) = tempfile::tempdir() else {
            panic!("tempdir");
        };
        let (_ledger, issuer) = issuer_over(dir.path());
        let result = issuer.ensure_receipt(OrderId::new(99), None, None).await;
        assert!(matches!(result, Err(BotError::OrderNotFound(99))));
    }

    #[test]
    fn renderer_includes_lines_and_total() {
        let Ok(dir) = tempfile::tempdir() else {
            panic!("tempdir");
        };
        let renderer = TextReceiptRenderer::new(dir.path().to_path_buf(), business());

        let order = sample_paid_order();
        let Ok(path) = renderer.render(&order, 7) else {
            panic!("render failed");
        };
        let Ok(content) = std::fs::read_to_string(&path) else {
            panic!("read failed");
        };
        assert!(content.contains("מס׳ חשבונית: 7"));
        assert!(content.contains("דני"));
        assert!(content.contains("399.00 ₪"));
        assert!(content.contains("סה״כ לתשלום"));
    }

    fn sample_paid_order() -> Order {
        use crate::domain::{LineItem, OrderStatus};
        use rust_decimal_macros::dec;
        Order {
            id: OrderId::new(1),
            wa_id: "972501234567".to_string(),
            customer_name: "דני".to_string(),
            customer_phone: "0501234567".to_string(),
            items: vec![LineItem {
                key: "screen".to_string(),
                label: "📱 מסך".to_string(),
                amount: dec!(399.00),
            }],
            total_amount: dec!(399.00),
            note: String::new(),
            status: OrderStatus::Paid,
            pay_link: None,
            provider_order_id: None,
            provider_status: None,
            capture_id: None,
            invoice_number: None,
            invoice_artifact: None,
            created_at: Utc::now(),
            paid_at: Some(Utc::now()),
        }
    }
}
