//! Persistence layer: the durable ledger of orders, customers, tickets.
//!
//! [`Ledger`] is the durability boundary of the bot — session-store races
//! can at worst confuse a prompt, but every money-affecting fact lives
//! here. Two implementations: [`postgres::PostgresLedger`] for production
//! and [`memory::MemoryLedger`] for tests and persistence-disabled runs.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::{Customer, Order, OrderDraft, OrderId, Settlement, Ticket, TicketDraft};
use crate::error::BotError;

/// Durable storage for orders, customers, and tickets.
///
/// All write operations are atomic per record. Settlement writes use
/// first-write-wins semantics for `paid_at`, `capture_id`, and
/// `invoice_number`/`invoice_artifact`; the check-then-act sequence around
/// them is serialized by the receipt issuer (see `service::receipt`).
#[async_trait]
pub trait Ledger: Send + Sync + std::fmt::Debug {
    /// Inserts a new order from a validated draft and returns it with its
    /// assigned id. Drafts with an initial status of `Paid` (manual admin
    /// invoices) get `paid_at` set to the creation timestamp.
    ///
    /// # Errors
    ///
    /// Returns [`BotError::Persistence`] on storage failure.
    async fn create_order(&self, draft: OrderDraft) -> Result<Order, BotError>;

    /// Loads an order by id.
    ///
    /// # Errors
    ///
    /// Returns [`BotError::OrderNotFound`] if no such order exists.
    async fn order(&self, id: OrderId) -> Result<Order, BotError>;

    /// One-time association of the provider order id, payer-facing link,
    /// and initial provider status, recorded immediately after remote
    /// order creation. Fields already set are left unchanged.
    ///
    /// # Errors
    ///
    /// Returns [`BotError::OrderNotFound`] if no such order exists.
    async fn record_payment_link(
        &self,
        id: OrderId,
        provider_order_id: &str,
        pay_link: &str,
        provider_status: &str,
    ) -> Result<(), BotError>;

    /// Records the latest observed provider status. Callers never pass an
    /// unknown/empty status, so an existing value is never cleared.
    ///
    /// # Errors
    ///
    /// Returns [`BotError::OrderNotFound`] if no such order exists.
    async fn update_provider_status(&self, id: OrderId, status: &str) -> Result<(), BotError>;

    /// Returns the most recent pending order for the customer, used to
    /// resume a "check payment" action without an order number.
    ///
    /// # Errors
    ///
    /// Returns [`BotError::Persistence`] on storage failure.
    async fn latest_pending_order(&self, wa_id: &str) -> Result<Option<Order>, BotError>;

    /// Returns the maximum invoice number assigned so far (0 if none).
    ///
    /// # Errors
    ///
    /// Returns [`BotError::Persistence`] on storage failure.
    async fn max_invoice_number(&self) -> Result<i64, BotError>;

    /// Persists a first settlement: status `paid`, invoice number and
    /// artifact path (first-write-wins), `paid_at`/`capture_id`/
    /// `provider_status` only if previously unset. The "last observed"
    /// status update is [`Ledger::update_provider_status`], which both
    /// settlement triggers call before settling.
    ///
    /// # Errors
    ///
    /// Returns [`BotError::OrderNotFound`] if no such order exists.
    async fn record_settlement(&self, id: OrderId, settlement: Settlement)
    -> Result<(), BotError>;

    /// The idempotent re-settlement path taken when an artifact already
    /// exists: marks paid and backfills `capture_id`/`provider_status`/
    /// `paid_at` only where previously unset.
    ///
    /// # Errors
    ///
    /// Returns [`BotError::OrderNotFound`] if no such order exists.
    async fn backfill_settlement(
        &self,
        id: OrderId,
        capture_id: Option<&str>,
        provider_status: Option<&str>,
        paid_at: DateTime<Utc>,
    ) -> Result<(), BotError>;

    /// Returns up to `limit` orders with a receipt artifact for the given
    /// customer phone, newest first (id descending).
    ///
    /// # Errors
    ///
    /// Returns [`BotError::Persistence`] on storage failure.
    async fn receipts_by_phone(&self, phone: &str, limit: i64) -> Result<Vec<Order>, BotError>;

    /// Upserts the long-lived customer record: always refreshes
    /// `last_seen`; name/phone are only overwritten with non-empty values.
    ///
    /// # Errors
    ///
    /// Returns [`BotError::Persistence`] on storage failure.
    async fn upsert_customer(
        &self,
        wa_id: &str,
        name: Option<&str>,
        phone: Option<&str>,
    ) -> Result<(), BotError>;

    /// Loads a customer record by identity.
    ///
    /// # Errors
    ///
    /// Returns [`BotError::Persistence`] on storage failure.
    async fn customer(&self, wa_id: &str) -> Result<Option<Customer>, BotError>;

    /// Files a new open ticket and returns it with its assigned id.
    ///
    /// # Errors
    ///
    /// Returns [`BotError::Persistence`] on storage failure.
    async fn create_ticket(&self, draft: TicketDraft) -> Result<Ticket, BotError>;
}
