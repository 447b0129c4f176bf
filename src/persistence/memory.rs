//! In-memory ledger implementation.
//!
//! Used for unit tests and for `PERSISTENCE_ENABLED=false` runs. All maps
//! live behind one `tokio::sync::RwLock`, so every operation observes a
//! consistent snapshot; ids are monotonic within the process lifetime.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use super::Ledger;
use crate::domain::{
    Customer, Order, OrderDraft, OrderId, OrderStatus, Settlement, Ticket, TicketDraft,
    TicketStatus,
};
use crate::error::BotError;

#[derive(Debug, Default)]
struct Inner {
    orders: BTreeMap<i64, Order>,
    customers: HashMap<String, Customer>,
    tickets: Vec<Ticket>,
    next_order_id: i64,
    next_ticket_id: i64,
}

/// Volatile [`Ledger`] backed by in-process maps.
#[derive(Debug, Default)]
pub struct MemoryLedger {
    inner: RwLock<Inner>,
}

impl MemoryLedger {
    /// Creates an empty ledger.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Ledger for MemoryLedger {
    async fn create_order(&self, draft: OrderDraft) -> Result<Order, BotError> {
        let mut inner = self.inner.write().await;
        inner.next_order_id += 1;
        let now = Utc::now();
        let order = Order {
            id: OrderId::new(inner.next_order_id),
            wa_id: draft.wa_id,
            customer_name: draft.customer_name,
            customer_phone: draft.customer_phone,
            items: draft.items,
            total_amount: draft.total_amount,
            note: draft.note,
            status: draft.initial_status,
            pay_link: None,
            provider_order_id: None,
            provider_status: None,
            capture_id: None,
            invoice_number: None,
            invoice_artifact: None,
            created_at: now,
            paid_at: (draft.initial_status == OrderStatus::Paid).then_some(now),
        };
        inner.orders.insert(order.id.get(), order.clone());
        Ok(order)
    }

    async fn order(&self, id: OrderId) -> Result<Order, BotError> {
        self.inner
            .read()
            .await
            .orders
            .get(&id.get())
            .cloned()
            .ok_or(BotError::OrderNotFound(id.get()))
    }

    async fn record_payment_link(
        &self,
        id: OrderId,
        provider_order_id: &str,
        pay_link: &str,
        provider_status: &str,
    ) -> Result<(), BotError> {
        let mut inner = self.inner.write().await;
        let order = inner
            .orders
            .get_mut(&id.get())
            .ok_or(BotError::OrderNotFound(id.get()))?;
        if order.provider_order_id.is_none() {
            order.provider_order_id = Some(provider_order_id.to_string());
        }
        if order.pay_link.is_none() {
            order.pay_link = Some(pay_link.to_string());
        }
        order.provider_status = Some(provider_status.to_string());
        Ok(())
    }

    async fn update_provider_status(&self, id: OrderId, status: &str) -> Result<(), BotError> {
        let mut inner = self.inner.write().await;
        let order = inner
            .orders
            .get_mut(&id.get())
            .ok_or(BotError::OrderNotFound(id.get()))?;
        order.provider_status = Some(status.to_string());
        Ok(())
    }

    async fn latest_pending_order(&self, wa_id: &str) -> Result<Option<Order>, BotError> {
        let inner = self.inner.read().await;
        Ok(inner
            .orders
            .values()
            .rev()
            .find(|o| o.wa_id == wa_id && o.status == OrderStatus::Pending)
            .cloned())
    }

    async fn max_invoice_number(&self) -> Result<i64, BotError> {
        let inner = self.inner.read().await;
        Ok(inner
            .orders
            .values()
            .filter_map(|o| o.invoice_number)
            .max()
            .unwrap_or(0))
    }

    async fn record_settlement(
        &self,
        id: OrderId,
        settlement: Settlement,
    ) -> Result<(), BotError> {
        let mut inner = self.inner.write().await;
        let order = inner
            .orders
            .get_mut(&id.get())
            .ok_or(BotError::OrderNotFound(id.get()))?;
        order.status = OrderStatus::Paid;
        if order.paid_at.is_none() {
            order.paid_at = Some(settlement.paid_at);
        }
        if order.invoice_number.is_none() {
            order.invoice_number = Some(settlement.invoice_number);
        }
        if order.invoice_artifact.is_none() {
            order.invoice_artifact = Some(settlement.artifact);
        }
        if order.capture_id.is_none() {
            order.capture_id = settlement.capture_id;
        }
        if order.provider_status.is_none() {
            order.provider_status = settlement.provider_status;
        }
        Ok(())
    }

    async fn backfill_settlement(
        &self,
        id: OrderId,
        capture_id: Option<&str>,
        provider_status: Option<&str>,
        paid_at: DateTime<Utc>,
    ) -> Result<(), BotError> {
        let mut inner = self.inner.write().await;
        let order = inner
            .orders
            .get_mut(&id.get())
            .ok_or(BotError::OrderNotFound(id.get()))?;
        order.status = OrderStatus::Paid;
        if order.paid_at.is_none() {
            order.paid_at = Some(paid_at);
        }
        if order.capture_id.is_none() {
            order.capture_id = capture_id.map(ToString::to_string);
        }
        if order.provider_status.is_none() {
            order.provider_status = provider_status.map(ToString::to_string);
        }
        Ok(())
    }

    async fn receipts_by_phone(&self, phone: &str, limit: i64) -> Result<Vec<Order>, BotError> {
        let inner = self.inner.read().await;
        Ok(inner
            .orders
            .values()
            .rev()
            .filter(|o| o.customer_phone == phone && o.invoice_artifact.is_some())
            .take(usize::try_from(limit).unwrap_or(0))
            .cloned()
            .collect())
    }

    async fn upsert_customer(
        &self,
        wa_id: &str,
        name: Option<&str>,
        phone: Option<&str>,
    ) -> Result<(), BotError> {
        let mut inner = self.inner.write().await;
        let now = Utc::now();
        match inner.customers.get_mut(wa_id) {
            Some(existing) => {
                if let Some(name) = name.filter(|n| !n.trim().is_empty()) {
                    existing.name = name.to_string();
                }
                if let Some(phone) = phone.filter(|p| !p.trim().is_empty()) {
                    existing.phone = phone.to_string();
                }
                existing.last_seen = now;
            }
            None => {
                inner.customers.insert(
                    wa_id.to_string(),
                    Customer {
                        wa_id: wa_id.to_string(),
                        name: name.unwrap_or_default().to_string(),
                        phone: phone.unwrap_or_default().to_string(),
                        last_seen: now,
                    },
                );
            }
        }
        Ok(())
    }

    async fn customer(&self, wa_id: &str) -> Result<Option<Customer>, BotError> {
        Ok(self.inner.read().await.customers.get(wa_id).cloned())
    }

    async fn create_ticket(&self, draft: TicketDraft) -> Result<Ticket, BotError> {
        let mut inner = self.inner.write().await;
        inner.next_ticket_id += 1;
        let ticket = Ticket {
            id: inner.next_ticket_id,
            wa_id: draft.wa_id,
            customer_name: draft.customer_name,
            customer_phone: draft.customer_phone,
            device: draft.device,
            issue: draft.issue,
            created_at: Utc::now(),
            status: TicketStatus::Open,
        };
        inner.tickets.push(ticket.clone());
        Ok(ticket)
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use crate::domain::Catalog;
    use crate::domain::catalog::NO_SECOND_ITEM;
    use rust_decimal_macros::dec;

    fn draft(wa_id: &str) -> OrderDraft {
        let result = OrderDraft::from_catalog(
            &Catalog::standard(),
            wa_id,
            "דני",
            "0501234567",
            "screen",
            NO_SECOND_ITEM,
            "",
        );
        let Ok(draft) = result else {
            panic!("valid draft");
        };
        draft
    }

    #[tokio::test]
    async fn create_order_assigns_monotonic_ids() {
        let ledger = MemoryLedger::new();
        let a = ledger.create_order(draft("111")).await;
        let b = ledger.create_order(draft("111")).await;
        let (Ok(a), Ok(b)) = (a, b) else {
            panic!("creation failed");
        };
        assert!(b.id.get() > a.id.get());
        assert_eq!(a.status, OrderStatus::Pending);
        assert!(a.paid_at.is_none());
    }

    #[tokio::test]
    async fn order_lookup_missing_id_fails() {
        let ledger = MemoryLedger::new();
        let result = ledger.order(OrderId::new(42)).await;
        assert!(matches!(result, Err(BotError::OrderNotFound(42))));
    }

    #[tokio::test]
    async fn payment_link_is_first_write_wins() {
        let ledger = MemoryLedger::new();
        let Ok(order) = ledger.create_order(draft("111")).await else {
            panic!("creation failed");
        };

        let first = ledger
            .record_payment_link(order.id, "PP-1", "https://pay/1", "CREATED")
            .await;
        assert!(first.is_ok());
        let second = ledger
            .record_payment_link(order.id, "PP-2", "https://pay/2", "APPROVED")
            .await;
        assert!(second.is_ok());

        let Ok(reloaded) = ledger.order(order.id).await else {
            panic!("lookup failed");
        };
        assert_eq!(reloaded.provider_order_id.as_deref(), Some("PP-1"));
        assert_eq!(reloaded.pay_link.as_deref(), Some("https://pay/1"));
        // Observed status does move forward.
        assert_eq!(reloaded.provider_status.as_deref(), Some("APPROVED"));
    }

    #[tokio::test]
    async fn latest_pending_order_picks_newest() {
        let ledger = MemoryLedger::new();
        let _ = ledger.create_order(draft("111")).await;
        let Ok(newer) = ledger.create_order(draft("111")).await else {
            panic!("creation failed");
        };
        let _ = ledger.create_order(draft("222")).await;

        let found = ledger.latest_pending_order("111").await;
        let Ok(Some(found)) = found else {
            panic!("expected a pending order");
        };
        assert_eq!(found.id, newer.id);
    }

    #[tokio::test]
    async fn settlement_capture_id_first_write_wins() {
        let ledger = MemoryLedger::new();
        let Ok(order) = ledger.create_order(draft("111")).await else {
            panic!("creation failed");
        };

        let now = Utc::now();
        let result = ledger
            .record_settlement(
                order.id,
                Settlement {
                    invoice_number: 1,
                    artifact: "receipts/invoice_1.txt".to_string(),
                    capture_id: Some("CAP-1".to_string()),
                    provider_status: Some("COMPLETED".to_string()),
                    paid_at: now,
                },
            )
            .await;
        assert!(result.is_ok());

        let result = ledger
            .backfill_settlement(order.id, Some("CAP-2"), Some("COMPLETED"), Utc::now())
            .await;
        assert!(result.is_ok());

        let Ok(reloaded) = ledger.order(order.id).await else {
            panic!("lookup failed");
        };
        assert_eq!(reloaded.capture_id.as_deref(), Some("CAP-1"));
        assert_eq!(reloaded.invoice_number, Some(1));
        assert_eq!(reloaded.paid_at, Some(now));
        assert_eq!(reloaded.status, OrderStatus::Paid);
    }

    #[tokio::test]
    async fn receipts_by_phone_newest_first_with_limit() {
        let ledger = MemoryLedger::new();
        let mut settled_ids = Vec::new();
        for i in 0..7 {
            let Ok(order) = ledger.create_order(draft("111")).await else {
                panic!("creation failed");
            };
            let result = ledger
                .record_settlement(
                    order.id,
                    Settlement {
                        invoice_number: i + 1,
                        artifact: format!("receipts/invoice_{}.txt", i + 1),
                        capture_id: None,
                        provider_status: None,
                        paid_at: Utc::now(),
                    },
                )
                .await;
            assert!(result.is_ok());
            settled_ids.push(order.id.get());
        }

        let Ok(found) = ledger.receipts_by_phone("0501234567", 5).await else {
            panic!("lookup failed");
        };
        assert_eq!(found.len(), 5);
        let ids: Vec<i64> = found.iter().map(|o| o.id.get()).collect();
        let mut expected: Vec<i64> = settled_ids.iter().rev().take(5).copied().collect();
        expected.sort_unstable_by(|a, b| b.cmp(a));
        assert_eq!(ids, expected);

        let Ok(none) = ledger.receipts_by_phone("0599999999", 5).await else {
            panic!("lookup failed");
        };
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn upsert_customer_keeps_known_fields() {
        let ledger = MemoryLedger::new();
        let result = ledger
            .upsert_customer("111", Some("דני"), Some("0501234567"))
            .await;
        assert!(result.is_ok());

        // A bare last-seen update must not erase name/phone.
        let result = ledger.upsert_customer("111", None, None).await;
        assert!(result.is_ok());

        let Ok(Some(customer)) = ledger.customer("111").await else {
            panic!("customer should exist");
        };
        assert_eq!(customer.name, "דני");
        assert_eq!(customer.phone, "0501234567");
        assert!(customer.has_contact_details());
    }

    #[tokio::test]
    async fn manual_draft_is_created_paid() {
        let ledger = MemoryLedger::new();
        let Ok(manual) = OrderDraft::manual("דני", "0501234567", "תיקון", dec!(350), "") else {
            panic!("valid draft");
        };
        let Ok(order) = ledger.create_order(manual).await else {
            panic!("creation failed");
        };
        assert_eq!(order.status, OrderStatus::Paid);
        assert!(order.paid_at.is_some());
        assert!(order.invoice_number.is_none());
    }

    #[tokio::test]
    async fn create_ticket_assigns_id_and_open_status() {
        let ledger = MemoryLedger::new();
        let result = ledger
            .create_ticket(TicketDraft {
                wa_id: "111".to_string(),
                customer_name: "דני".to_string(),
                customer_phone: "0501234567".to_string(),
                device: "iPhone 13".to_string(),
                issue: "מסך שבור".to_string(),
            })
            .await;
        let Ok(ticket) = result else {
            panic!("creation failed");
        };
        assert_eq!(ticket.id, 1);
        assert_eq!(ticket.status, TicketStatus::Open);
    }
}
