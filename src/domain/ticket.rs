//! Non-monetary service requests ("my device is broken, no payment yet").

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Ticket lifecycle status. Tickets never auto-transition; status changes
/// are administrative.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TicketStatus {
    /// Newly filed, awaiting a human.
    Open,
    /// Closed by an admin.
    Closed,
}

impl TicketStatus {
    /// Stable string form used in the database.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Closed => "closed",
        }
    }
}

/// A filed service request with a customer snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ticket {
    /// Ledger-assigned id.
    pub id: i64,
    /// Messaging-platform customer identity.
    pub wa_id: String,
    /// Name snapshot at filing time.
    pub customer_name: String,
    /// Phone snapshot at filing time.
    pub customer_phone: String,
    /// Device description (model) as given by the customer.
    pub device: String,
    /// Issue description as given by the customer.
    pub issue: String,
    /// Filing timestamp.
    pub created_at: DateTime<Utc>,
    /// Lifecycle status.
    pub status: TicketStatus,
}

/// Input for filing a new ticket.
#[derive(Debug, Clone)]
pub struct TicketDraft {
    /// Messaging-platform customer identity.
    pub wa_id: String,
    /// Name snapshot.
    pub customer_name: String,
    /// Phone snapshot.
    pub customer_phone: String,
    /// Device description.
    pub device: String,
    /// Issue description.
    pub issue: String,
}
