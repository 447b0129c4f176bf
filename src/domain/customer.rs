//! Long-lived customer identity record, separate from any single order.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A known customer, keyed by messaging-platform identity.
///
/// Upserted on every inbound event (for `last_seen`) and whenever a flow
/// captures name or phone. A customer with both name and phone on record
/// skips the data-collection steps of the order flow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Customer {
    /// Messaging-platform customer identity.
    pub wa_id: String,
    /// Last known name; empty until a flow captures one.
    pub name: String,
    /// Last known phone; empty until a flow captures one.
    pub phone: String,
    /// Timestamp of the most recent inbound event.
    pub last_seen: DateTime<Utc>,
}

impl Customer {
    /// Returns `true` when both name and phone are on record, allowing
    /// the order flow to jump straight to item selection.
    #[must_use]
    pub fn has_contact_details(&self) -> bool {
        !self.name.trim().is_empty() && !self.phone.trim().is_empty()
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    fn customer(name: &str, phone: &str) -> Customer {
        Customer {
            wa_id: "972501234567".to_string(),
            name: name.to_string(),
            phone: phone.to_string(),
            last_seen: Utc::now(),
        }
    }

    #[test]
    fn contact_details_require_both_fields() {
        assert!(customer("דני", "0501234567").has_contact_details());
        assert!(!customer("", "0501234567").has_contact_details());
        assert!(!customer("דני", "").has_contact_details());
        assert!(!customer("  ", " ").has_contact_details());
    }
}
