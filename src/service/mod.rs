//! Service layer: conversation engine, payment gateway, receipt issuer,
//! and outbound messaging.

pub mod conversation;
pub mod messaging;
pub mod payment;
pub mod receipt;

pub use conversation::{ConversationEngine, InboundEvent};
pub use messaging::{MenuOption, MessagingSender, WhatsAppSender};
pub use payment::{Capture, PayPalGateway, PaymentGateway, RemoteOrder};
pub use receipt::{ReceiptIssuer, ReceiptRenderer, TextReceiptRenderer};
