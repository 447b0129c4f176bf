//! Per-customer conversational state.
//!
//! [`SessionState`] is a closed enum: each step variant carries exactly
//! the fields that are valid at that step, so a later step can never run
//! without the data an earlier step collected. Sessions are pure cache —
//! losing one only costs the customer a restart of the current flow,
//! never data loss for settled orders.

use std::collections::HashMap;

use tokio::sync::RwLock;

/// Position in a multi-turn flow plus the fields accumulated so far.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    /// Order flow: waiting for the customer's name.
    CollectName,
    /// Order flow: waiting for the phone number.
    CollectPhone {
        /// Name collected in the previous step.
        name: String,
    },
    /// Order flow: waiting for the first item selection.
    PickFirstItem {
        /// Customer name.
        name: String,
        /// Customer phone.
        phone: String,
    },
    /// Order flow: waiting for the second item selection (or the
    /// "no second item" sentinel).
    PickSecondItem {
        /// Customer name.
        name: String,
        /// Customer phone.
        phone: String,
        /// First item key, re-validated at finalization.
        first_item: String,
    },
    /// Restore flow: waiting for the phone number to look up receipts.
    RestorePhone,
    /// Broken-device flow: waiting for the device model.
    BrokenDevice,
    /// Broken-device flow: branch menu shown, waiting for a choice.
    BrokenChoice {
        /// Device model given in the previous step.
        device: String,
    },
    /// Broken-device flow: ticket opened, waiting for the issue text.
    BrokenIssue {
        /// Device model carried across the branch.
        device: String,
    },
    /// Admin payment-link flow: waiting for the customer name.
    AdminPayName,
    /// Admin payment-link flow: waiting for the customer phone.
    AdminPayPhone {
        /// Customer name.
        name: String,
    },
    /// Admin payment-link flow: waiting for the amount.
    AdminPayAmount {
        /// Customer name.
        name: String,
        /// Customer phone.
        phone: String,
    },
    /// Admin manual-invoice flow: waiting for the customer name.
    AdminInvoiceName,
    /// Admin manual-invoice flow: waiting for the customer phone.
    AdminInvoicePhone {
        /// Customer name.
        name: String,
    },
    /// Admin manual-invoice flow: waiting for the payment reason.
    AdminInvoiceReason {
        /// Customer name.
        name: String,
        /// Customer phone.
        phone: String,
    },
    /// Admin manual-invoice flow: waiting for the amount.
    AdminInvoiceAmount {
        /// Customer name.
        name: String,
        /// Customer phone.
        phone: String,
        /// Payment reason for the invoice line.
        reason: String,
    },
}

impl SessionState {
    /// Returns `true` for steps that belong to an admin-only flow and
    /// therefore must re-check the allow-list before executing.
    #[must_use]
    pub const fn requires_admin(&self) -> bool {
        matches!(
            self,
            Self::AdminPayName
                | Self::AdminPayPhone { .. }
                | Self::AdminPayAmount { .. }
                | Self::AdminInvoiceName
                | Self::AdminInvoicePhone { .. }
                | Self::AdminInvoiceReason { .. }
                | Self::AdminInvoiceAmount { .. }
        )
    }
}

/// In-memory session store keyed by customer identity.
///
/// Plain key-value semantics with last-write-wins per key; each customer
/// interacts through one conversational channel at a time by assumption.
/// At most one active session per customer. Not persisted across restart.
#[derive(Debug, Default)]
pub struct SessionStore {
    sessions: RwLock<HashMap<String, SessionState>>,
}

impl SessionStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the customer's current session state, if any.
    pub async fn get(&self, wa_id: &str) -> Option<SessionState> {
        self.sessions.read().await.get(wa_id).cloned()
    }

    /// Sets (or replaces) the customer's session state.
    pub async fn set(&self, wa_id: &str, state: SessionState) {
        self.sessions
            .write()
            .await
            .insert(wa_id.to_string(), state);
    }

    /// Clears the customer's session, if any.
    pub async fn clear(&self, wa_id: &str) {
        self.sessions.write().await.remove(wa_id);
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_get_clear_round_trip() {
        let store = SessionStore::new();
        assert!(store.get("972501234567").await.is_none());

        store.set("972501234567", SessionState::CollectName).await;
        assert_eq!(
            store.get("972501234567").await,
            Some(SessionState::CollectName)
        );

        store.clear("972501234567").await;
        assert!(store.get("972501234567").await.is_none());
    }

    #[tokio::test]
    async fn last_write_wins() {
        let store = SessionStore::new();
        store.set("972501234567", SessionState::CollectName).await;
        store
            .set(
                "972501234567",
                SessionState::CollectPhone {
                    name: "דני".to_string(),
                },
            )
            .await;

        let state = store.get("972501234567").await;
        assert!(matches!(state, Some(SessionState::CollectPhone { .. })));
    }

    #[tokio::test]
    async fn sessions_are_per_customer() {
        let store = SessionStore::new();
        store.set("111", SessionState::CollectName).await;
        store.set("222", SessionState::RestorePhone).await;

        assert_eq!(store.get("111").await, Some(SessionState::CollectName));
        assert_eq!(store.get("222").await, Some(SessionState::RestorePhone));
    }

    #[test]
    fn admin_steps_require_admin() {
        assert!(SessionState::AdminPayName.requires_admin());
        assert!(
            SessionState::AdminInvoiceAmount {
                name: "a".to_string(),
                phone: "b".to_string(),
                reason: "c".to_string(),
            }
            .requires_admin()
        );
        assert!(!SessionState::CollectName.requires_admin());
        assert!(!SessionState::RestorePhone.requires_admin());
    }
}
