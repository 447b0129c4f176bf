//! # fixline
//!
//! WhatsApp commerce bot for a phone-repair workshop. Walks a customer
//! through a repair-ordering flow, creates PayPal payment links,
//! reconciles payment status with the provider, and delivers a receipt
//! document — plus an admin side-channel for manual invoicing and
//! broadcast notifications.
//!
//! ## Architecture
//!
//! ```text
//! WhatsApp Cloud API webhook, PayPal redirects
//!     │
//!     ├── HTTP Handlers (api/)
//!     │
//!     ├── ConversationEngine (service/)
//!     ├── ReceiptIssuer, PaymentGateway, MessagingSender (service/)
//!     │
//!     ├── SessionStore, Catalog, Intent rules (domain/)
//!     │
//!     └── Ledger: PostgreSQL or in-memory (persistence/)
//! ```
//!
//! The ledger is the durability boundary: session-store races can at
//! worst confuse a prompt; money-affecting writes are serialized through
//! the receipt issuer and are idempotent.

pub mod api;
pub mod app_state;
pub mod config;
pub mod domain;
pub mod error;
pub mod persistence;
pub mod service;
