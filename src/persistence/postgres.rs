//! PostgreSQL implementation of the ledger using `sqlx::PgPool`.
//!
//! Line items are stored flattened (`item1_*` / `item2_*`) — orders carry
//! at most two lines. Settlement writes run inside a transaction with a
//! row lock so the first-write-wins columns cannot interleave.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};

use super::Ledger;
use crate::domain::{
    Customer, LineItem, Order, OrderDraft, OrderId, OrderStatus, Settlement, Ticket, TicketDraft,
    TicketStatus,
};
use crate::error::BotError;

/// Columns selected for every order query, in [`row_to_order`] order.
const ORDER_COLUMNS: &str = "id, wa_id, customer_name, customer_phone, \
     item1_key, item1_label, item1_amount, item2_key, item2_label, item2_amount, \
     total_amount, note, status, pay_link, provider_order_id, provider_status, \
     capture_id, invoice_number, invoice_artifact, created_at, paid_at";

/// PostgreSQL-backed [`Ledger`].
#[derive(Debug, Clone)]
pub struct PostgresLedger {
    pool: PgPool,
}

impl PostgresLedger {
    /// Creates a new ledger over the given connection pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Creates the orders/customers/tickets tables if they do not exist.
    ///
    /// # Errors
    ///
    /// Returns a [`BotError::Persistence`] on database failure.
    pub async fn init_schema(&self) -> Result<(), BotError> {
        let statements = [
            "CREATE TABLE IF NOT EXISTS orders (
                id BIGSERIAL PRIMARY KEY,
                wa_id TEXT NOT NULL,
                customer_name TEXT NOT NULL,
                customer_phone TEXT NOT NULL,
                item1_key TEXT NOT NULL,
                item1_label TEXT NOT NULL,
                item1_amount NUMERIC NOT NULL,
                item2_key TEXT,
                item2_label TEXT,
                item2_amount NUMERIC,
                total_amount NUMERIC NOT NULL,
                note TEXT NOT NULL DEFAULT '',
                status TEXT NOT NULL,
                pay_link TEXT,
                provider_order_id TEXT,
                provider_status TEXT,
                capture_id TEXT,
                invoice_number BIGINT,
                invoice_artifact TEXT,
                created_at TIMESTAMPTZ NOT NULL,
                paid_at TIMESTAMPTZ
            )",
            "CREATE INDEX IF NOT EXISTS idx_orders_customer_status \
             ON orders (wa_id, status, id DESC)",
            "CREATE INDEX IF NOT EXISTS idx_orders_phone ON orders (customer_phone)",
            "CREATE TABLE IF NOT EXISTS customers (
                wa_id TEXT PRIMARY KEY,
                name TEXT NOT NULL DEFAULT '',
                phone TEXT NOT NULL DEFAULT '',
                last_seen TIMESTAMPTZ NOT NULL
            )",
            "CREATE TABLE IF NOT EXISTS tickets (
                id BIGSERIAL PRIMARY KEY,
                wa_id TEXT NOT NULL,
                customer_name TEXT NOT NULL,
                customer_phone TEXT NOT NULL,
                device TEXT NOT NULL,
                issue TEXT NOT NULL,
                created_at TIMESTAMPTZ NOT NULL,
                status TEXT NOT NULL
            )",
        ];
        for statement in statements {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(|e| BotError::Persistence(e.to_string()))?;
        }
        Ok(())
    }
}

/// Maps one `orders` row (in [`ORDER_COLUMNS`] order) to the domain type.
fn row_to_order(row: &PgRow) -> Result<Order, BotError> {
    let persistence = |e: sqlx::Error| BotError::Persistence(e.to_string());

    let mut items = vec![LineItem {
        key: row.try_get("item1_key").map_err(persistence)?,
        label: row.try_get("item1_label").map_err(persistence)?,
        amount: row.try_get("item1_amount").map_err(persistence)?,
    }];
    let item2_key: Option<String> = row.try_get("item2_key").map_err(persistence)?;
    if let Some(key) = item2_key {
        items.push(LineItem {
            key,
            label: row
                .try_get::<Option<String>, _>("item2_label")
                .map_err(persistence)?
                .unwrap_or_default(),
            amount: row
                .try_get::<Option<Decimal>, _>("item2_amount")
                .map_err(persistence)?
                .unwrap_or_default(),
        });
    }

    let status: String = row.try_get("status").map_err(persistence)?;

    Ok(Order {
        id: OrderId::new(row.try_get("id").map_err(persistence)?),
        wa_id: row.try_get("wa_id").map_err(persistence)?,
        customer_name: row.try_get("customer_name").map_err(persistence)?,
        customer_phone: row.try_get("customer_phone").map_err(persistence)?,
        items,
        total_amount: row.try_get("total_amount").map_err(persistence)?,
        note: row.try_get("note").map_err(persistence)?,
        status: OrderStatus::parse(&status)?,
        pay_link: row.try_get("pay_link").map_err(persistence)?,
        provider_order_id: row.try_get("provider_order_id").map_err(persistence)?,
        provider_status: row.try_get("provider_status").map_err(persistence)?,
        capture_id: row.try_get("capture_id").map_err(persistence)?,
        invoice_number: row.try_get("invoice_number").map_err(persistence)?,
        invoice_artifact: row.try_get("invoice_artifact").map_err(persistence)?,
        created_at: row.try_get("created_at").map_err(persistence)?,
        paid_at: row.try_get("paid_at").map_err(persistence)?,
    })
}

#[async_trait::async_trait]
impl Ledger for PostgresLedger {
    async fn create_order(&self, draft: OrderDraft) -> Result<Order, BotError> {
        let now = Utc::now();
        let paid_at = (draft.initial_status == OrderStatus::Paid).then_some(now);
        let first = draft
            .items
            .first()
            .ok_or_else(|| BotError::Internal("order draft with no line items".to_string()))?;
        let second = draft.items.get(1);

        let row = sqlx::query(&format!(
            "INSERT INTO orders (
                wa_id, customer_name, customer_phone,
                item1_key, item1_label, item1_amount,
                item2_key, item2_label, item2_amount,
                total_amount, note, status, created_at, paid_at
             ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
             RETURNING {ORDER_COLUMNS}"
        ))
        .bind(&draft.wa_id)
        .bind(&draft.customer_name)
        .bind(&draft.customer_phone)
        .bind(&first.key)
        .bind(&first.label)
        .bind(first.amount)
        .bind(second.map(|l| l.key.clone()))
        .bind(second.map(|l| l.label.clone()))
        .bind(second.map(|l| l.amount))
        .bind(draft.total_amount)
        .bind(&draft.note)
        .bind(draft.initial_status.as_str())
        .bind(now)
        .bind(paid_at)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| BotError::Persistence(e.to_string()))?;

        row_to_order(&row)
    }

    async fn order(&self, id: OrderId) -> Result<Order, BotError> {
        let row = sqlx::query(&format!("SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1"))
            .bind(id.get())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| BotError::Persistence(e.to_string()))?;

        match row {
            Some(row) => row_to_order(&row),
            None => Err(BotError::OrderNotFound(id.get())),
        }
    }

    async fn record_payment_link(
        &self,
        id: OrderId,
        provider_order_id: &str,
        pay_link: &str,
        provider_status: &str,
    ) -> Result<(), BotError> {
        let result = sqlx::query(
            "UPDATE orders SET
                provider_order_id = COALESCE(provider_order_id, $2),
                pay_link = COALESCE(pay_link, $3),
                provider_status = $4
             WHERE id = $1",
        )
        .bind(id.get())
        .bind(provider_order_id)
        .bind(pay_link)
        .bind(provider_status)
        .execute(&self.pool)
        .await
        .map_err(|e| BotError::Persistence(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(BotError::OrderNotFound(id.get()));
        }
        Ok(())
    }

    async fn update_provider_status(&self, id: OrderId, status: &str) -> Result<(), BotError> {
        let result = sqlx::query("UPDATE orders SET provider_status = $2 WHERE id = $1")
            .bind(id.get())
            .bind(status)
            .execute(&self.pool)
            .await
            .map_err(|e| BotError::Persistence(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(BotError::OrderNotFound(id.get()));
        }
        Ok(())
    }

    async fn latest_pending_order(&self, wa_id: &str) -> Result<Option<Order>, BotError> {
        let row = sqlx::query(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders \
             WHERE wa_id = $1 AND status = 'pending' ORDER BY id DESC LIMIT 1"
        ))
        .bind(wa_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| BotError::Persistence(e.to_string()))?;

        row.as_ref().map(row_to_order).transpose()
    }

    async fn max_invoice_number(&self) -> Result<i64, BotError> {
        let max: Option<i64> =
            sqlx::query_scalar("SELECT MAX(invoice_number) FROM orders")
                .fetch_one(&self.pool)
                .await
                .map_err(|e| BotError::Persistence(e.to_string()))?;
        Ok(max.unwrap_or(0))
    }

    async fn record_settlement(
        &self,
        id: OrderId,
        settlement: Settlement,
    ) -> Result<(), BotError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| BotError::Persistence(e.to_string()))?;

        // Row lock: serializes this write against any concurrent
        // settlement attempt for the same order.
        let locked = sqlx::query("SELECT id FROM orders WHERE id = $1 FOR UPDATE")
            .bind(id.get())
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| BotError::Persistence(e.to_string()))?;
        if locked.is_none() {
            return Err(BotError::OrderNotFound(id.get()));
        }

        sqlx::query(
            "UPDATE orders SET
                status = 'paid',
                paid_at = COALESCE(paid_at, $2),
                invoice_number = COALESCE(invoice_number, $3),
                invoice_artifact = COALESCE(invoice_artifact, $4),
                capture_id = COALESCE(capture_id, $5),
                provider_status = COALESCE(provider_status, $6)
             WHERE id = $1",
        )
        .bind(id.get())
        .bind(settlement.paid_at)
        .bind(settlement.invoice_number)
        .bind(&settlement.artifact)
        .bind(settlement.capture_id.as_deref())
        .bind(settlement.provider_status.as_deref())
        .execute(&mut *tx)
        .await
        .map_err(|e| BotError::Persistence(e.to_string()))?;

        tx.commit()
            .await
            .map_err(|e| BotError::Persistence(e.to_string()))
    }

    async fn backfill_settlement(
        &self,
        id: OrderId,
        capture_id: Option<&str>,
        provider_status: Option<&str>,
        paid_at: DateTime<Utc>,
    ) -> Result<(), BotError> {
        let result = sqlx::query(
            "UPDATE orders SET
                status = 'paid',
                paid_at = COALESCE(paid_at, $2),
                capture_id = COALESCE(capture_id, $3),
                provider_status = COALESCE(provider_status, $4)
             WHERE id = $1",
        )
        .bind(id.get())
        .bind(paid_at)
        .bind(capture_id)
        .bind(provider_status)
        .execute(&self.pool)
        .await
        .map_err(|e| BotError::Persistence(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(BotError::OrderNotFound(id.get()));
        }
        Ok(())
    }

    async fn receipts_by_phone(&self, phone: &str, limit: i64) -> Result<Vec<Order>, BotError> {
        let rows = sqlx::query(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders \
             WHERE customer_phone = $1 AND invoice_artifact IS NOT NULL \
             ORDER BY id DESC LIMIT $2"
        ))
        .bind(phone)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| BotError::Persistence(e.to_string()))?;

        rows.iter().map(row_to_order).collect()
    }

    async fn upsert_customer(
        &self,
        wa_id: &str,
        name: Option<&str>,
        phone: Option<&str>,
    ) -> Result<(), BotError> {
        sqlx::query(
            "INSERT INTO customers (wa_id, name, phone, last_seen)
             VALUES ($1, COALESCE($2, ''), COALESCE($3, ''), $4)
             ON CONFLICT (wa_id) DO UPDATE SET
                name = COALESCE(NULLIF($2, ''), customers.name),
                phone = COALESCE(NULLIF($3, ''), customers.phone),
                last_seen = $4",
        )
        .bind(wa_id)
        .bind(name)
        .bind(phone)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(|e| BotError::Persistence(e.to_string()))?;
        Ok(())
    }

    async fn customer(&self, wa_id: &str) -> Result<Option<Customer>, BotError> {
        let row = sqlx::query("SELECT wa_id, name, phone, last_seen FROM customers WHERE wa_id = $1")
            .bind(wa_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| BotError::Persistence(e.to_string()))?;

        let persistence = |e: sqlx::Error| BotError::Persistence(e.to_string());
        row.map(|row| {
            Ok(Customer {
                wa_id: row.try_get("wa_id").map_err(persistence)?,
                name: row.try_get("name").map_err(persistence)?,
                phone: row.try_get("phone").map_err(persistence)?,
                last_seen: row.try_get("last_seen").map_err(persistence)?,
            })
        })
        .transpose()
    }

    async fn create_ticket(&self, draft: TicketDraft) -> Result<Ticket, BotError> {
        let now = Utc::now();
        let id: i64 = sqlx::query_scalar(
            "INSERT INTO tickets (wa_id, customer_name, customer_phone, device, issue, created_at, status)
             VALUES ($1, $2, $3, $4, $5, $6, $7) RETURNING id",
        )
        .bind(&draft.wa_id)
        .bind(&draft.customer_name)
        .bind(&draft.customer_phone)
        .bind(&draft.device)
        .bind(&draft.issue)
        .bind(now)
        .bind(TicketStatus::Open.as_str())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| BotError::Persistence(e.to_string()))?;

        Ok(Ticket {
            id,
            wa_id: draft.wa_id,
            customer_name: draft.customer_name,
            customer_phone: draft.customer_phone,
            device: draft.device,
            issue: draft.issue,
            created_at: now,
            status: TicketStatus::Open,
        })
    }
}
