//! Conversation engine: the per-customer state machine.
//!
//! Maps an inbound event (free text or a menu selection) plus the
//! customer's session to the next action: a reply, a flow advance, an
//! order creation, a settlement. Every flow terminates by clearing or
//! advancing the session and leaving the customer with a next-step
//! prompt or the main menu — the transport is a fire-and-forget webhook,
//! so the bot must never go silent.

use std::path::Path;
use std::sync::Arc;

use rust_decimal::Decimal;

use crate::config::{AdminRegistry, BusinessProfile};
use crate::domain::catalog::{NO_SECOND_ITEM, format_amount};
use crate::domain::{
    Catalog, Intent, OrderDraft, SessionState, SessionStore, TicketDraft, intent,
};
use crate::error::BotError;
use crate::persistence::Ledger;
use crate::service::messaging::{MenuOption, MessagingSender};
use crate::service::payment::{PaymentGateway, STATUS_COMPLETED};
use crate::service::receipt::ReceiptIssuer;

/// Normalized inbound event, as produced by the webhook decoder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundEvent {
    /// Free text typed by the customer.
    Text(String),
    /// Menu selection id from an interactive list reply.
    Selection(String),
}

/// Menu and selection action ids.
mod action {
    pub const MENU_PAY: &str = "menu:pay";
    pub const MENU_PRICELIST: &str = "menu:pricelist";
    pub const MENU_DELIVERY: &str = "menu:delivery";
    pub const MENU_WHERE: &str = "menu:where";
    pub const MENU_REVIEWS: &str = "menu:reviews";
    pub const MENU_CHECK_PAYMENT: &str = "menu:checkpay";
    pub const MENU_RESTORE: &str = "menu:restore";
    pub const MENU_AGENT: &str = "menu:rep";
    pub const ADMIN_PAY_ANY: &str = "admin:pay_any";
    pub const ADMIN_INVOICE: &str = "admin:invoice";
    pub const BROKEN_TICKET: &str = "broken:form";
    pub const BROKEN_PAY: &str = "broken:pay";
    pub const BROKEN_AGENT: &str = "broken:rep";
    pub const ITEM1_PREFIX: &str = "item1:";
    pub const ITEM2_PREFIX: &str = "item2:";
}

/// Commands that abandon any flow and re-anchor to the main menu.
const RESTART_COMMANDS: &[&str] = &["start", "/start", "תפריט", "menu", "התחל"];

/// Maximum receipts resent by the restore flow.
const RESTORE_LIMIT: i64 = 5;

/// The conversation state machine.
///
/// Owns the session store; every other collaborator is injected behind a
/// trait so tests run against fakes. All [`BotError`]s are caught at
/// [`ConversationEngine::handle_event`] and converted into a customer
/// reply plus a re-anchor — none propagate past the engine.
#[derive(Debug)]
pub struct ConversationEngine {
    ledger: Arc<dyn Ledger>,
    sender: Arc<dyn MessagingSender>,
    gateway: Arc<dyn PaymentGateway>,
    issuer: Arc<ReceiptIssuer>,
    sessions: SessionStore,
    catalog: Catalog,
    admins: Arc<AdminRegistry>,
    business: BusinessProfile,
}

impl ConversationEngine {
    /// Creates the engine over its collaborators.
    #[must_use]
    pub fn new(
        ledger: Arc<dyn Ledger>,
        sender: Arc<dyn MessagingSender>,
        gateway: Arc<dyn PaymentGateway>,
        issuer: Arc<ReceiptIssuer>,
        catalog: Catalog,
        admins: Arc<AdminRegistry>,
        business: BusinessProfile,
    ) -> Self {
        Self {
            ledger,
            sender,
            gateway,
            issuer,
            sessions: SessionStore::new(),
            catalog,
            admins,
            business,
        }
    }

    /// Handles one inbound event. Never returns an error: failures are
    /// converted into a customer-visible reply and a re-anchor to the
    /// main menu.
    pub async fn handle_event(&self, wa_id: &str, event: InboundEvent) {
        if let Err(err) = self.ledger.upsert_customer(wa_id, None, None).await {
            tracing::warn!(wa_id, error = %err, "last-seen upsert failed");
        }
        if let Err(err) = self.dispatch(wa_id, &event).await {
            self.recover(wa_id, &err).await;
        }
    }

    /// The flow-handler error boundary: clear the session, tell the
    /// customer what happened (business errors get a specific message,
    /// infrastructure errors a generic one plus an admin alert), then
    /// re-anchor to the main menu.
    async fn recover(&self, wa_id: &str, err: &BotError) {
        self.sessions.clear(wa_id).await;
        if err.is_business() {
            tracing::info!(wa_id, error = %err, "flow rejected");
        } else {
            tracing::error!(wa_id, error = %err, "flow failed");
            self.admin_broadcast(&format!("❌ תקלה בטיפול בלקוח {wa_id}\n{err}"))
                .await;
        }
        if let Err(send_err) = self.sender.send_text(wa_id, &user_message(err)).await {
            tracing::error!(wa_id, error = %send_err, "error reply delivery failed");
        }
        if let Err(menu_err) = self.show_main_menu(wa_id).await {
            tracing::error!(wa_id, error = %menu_err, "menu delivery failed");
        }
    }

    async fn dispatch(&self, wa_id: &str, event: &InboundEvent) -> Result<(), BotError> {
        match event {
            InboundEvent::Selection(action_id) => self.handle_action(wa_id, action_id).await,
            InboundEvent::Text(text) => {
                let trimmed = text.trim();
                if RESTART_COMMANDS.contains(&trimmed.to_lowercase().as_str()) {
                    self.sessions.clear(wa_id).await;
                    return self.show_main_menu(wa_id).await;
                }
                match self.sessions.get(wa_id).await {
                    Some(state) => self.handle_step(wa_id, state, trimmed).await,
                    None => self.handle_idle_text(wa_id, trimmed).await,
                }
            }
        }
    }

    /// Advances the session one text step.
    async fn handle_step(
        &self,
        wa_id: &str,
        state: SessionState,
        text: &str,
    ) -> Result<(), BotError> {
        // Admin flows re-check the allow-list on every step, not just at
        // entry: a revoked admin is rejected mid-flow.
        if state.requires_admin() && !self.admins.is_admin(wa_id) {
            return Err(BotError::Unauthorized(wa_id.to_string()));
        }

        match state {
            SessionState::CollectName => {
                self.sessions
                    .set(
                        wa_id,
                        SessionState::CollectPhone {
                            name: text.to_string(),
                        },
                    )
                    .await;
                self.sender.send_text(wa_id, "מספר טלפון?").await
            }
            SessionState::CollectPhone { name } => {
                self.ledger
                    .upsert_customer(wa_id, Some(&name), Some(text))
                    .await?;
                self.sessions
                    .set(
                        wa_id,
                        SessionState::PickFirstItem {
                            name,
                            phone: text.to_string(),
                        },
                    )
                    .await;
                self.show_items_menu(wa_id, action::ITEM1_PREFIX, false)
                    .await
            }
            // Item steps expect a menu selection; free text re-prompts
            // without advancing.
            SessionState::PickFirstItem { .. } => {
                self.sender.send_text(wa_id, "בחר פריט מהכפתורים 👇").await?;
                self.show_items_menu(wa_id, action::ITEM1_PREFIX, false)
                    .await
            }
            SessionState::PickSecondItem { .. } => {
                self.sender.send_text(wa_id, "בחר פריט 2 מהכפתורים 👇").await?;
                self.show_items_menu(wa_id, action::ITEM2_PREFIX, true).await
            }
            SessionState::RestorePhone => self.restore_receipts(wa_id, text).await,
            SessionState::BrokenDevice => {
                self.sessions
                    .set(
                        wa_id,
                        SessionState::BrokenChoice {
                            device: text.to_string(),
                        },
                    )
                    .await;
                self.show_broken_menu(wa_id, text).await
            }
            SessionState::BrokenChoice { device } => {
                // Expecting a selection; re-show the branch menu.
                self.show_broken_menu(wa_id, &device).await
            }
            SessionState::BrokenIssue { device } => self.file_ticket(wa_id, &device, text).await,
            SessionState::AdminPayName => {
                self.sessions
                    .set(
                        wa_id,
                        SessionState::AdminPayPhone {
                            name: text.to_string(),
                        },
                    )
                    .await;
                self.sender.send_text(wa_id, "טלפון הלקוח?").await
            }
            SessionState::AdminPayPhone { name } => {
                self.sessions
                    .set(
                        wa_id,
                        SessionState::AdminPayAmount {
                            name,
                            phone: text.to_string(),
                        },
                    )
                    .await;
                self.sender
                    .send_text(wa_id, "סכום לחיוב? (למשל 250)")
                    .await
            }
            SessionState::AdminPayAmount { name, phone } => {
                self.admin_payment_link(wa_id, &name, &phone, text).await
            }
            SessionState::AdminInvoiceName => {
                self.sessions
                    .set(
                        wa_id,
                        SessionState::AdminInvoicePhone {
                            name: text.to_string(),
                        },
                    )
                    .await;
                self.sender.send_text(wa_id, "טלפון הלקוח לחשבונית?").await
            }
            SessionState::AdminInvoicePhone { name } => {
                self.sessions
                    .set(
                        wa_id,
                        SessionState::AdminInvoiceReason {
                            name,
                            phone: text.to_string(),
                        },
                    )
                    .await;
                self.sender
                    .send_text(wa_id, "עבור מה התשלום? (למשל: החלפת מסך iPhone 13)")
                    .await
            }
            SessionState::AdminInvoiceReason { name, phone } => {
                self.sessions
                    .set(
                        wa_id,
                        SessionState::AdminInvoiceAmount {
                            name,
                            phone,
                            reason: text.to_string(),
                        },
                    )
                    .await;
                self.sender
                    .send_text(wa_id, "סכום לחשבונית? (למשל 350)")
                    .await
            }
            SessionState::AdminInvoiceAmount {
                name,
                phone,
                reason,
            } => {
                self.admin_manual_invoice(wa_id, &name, &phone, &reason, text)
                    .await
            }
        }
    }

    /// Handles free text with no active session: intent classification.
    async fn handle_idle_text(&self, wa_id: &str, text: &str) -> Result<(), BotError> {
        match intent::classify(text) {
            Intent::Delivery => {
                let reply = match self.catalog.price_of("delivery") {
                    Ok(item) => format!(
                        "🚚 כן, יש שליחות עד הבית.\nעלות: {}",
                        format_amount(item.price)
                    ),
                    Err(_) => "🚚 כן, יש שליחות עד הבית.".to_string(),
                };
                self.sender.send_text(wa_id, &reply).await?;
                self.show_main_menu(wa_id).await
            }
            Intent::Location => {
                self.sender
                    .send_text(
                        wa_id,
                        &format!("🧭 ניווט ב-Waze:\n{}", self.business.navigation_url),
                    )
                    .await?;
                self.show_main_menu(wa_id).await
            }
            Intent::Pricelist => {
                let pricelist = self.pricelist_text();
                self.sender.send_text(wa_id, &pricelist).await?;
                self.show_main_menu(wa_id).await
            }
            Intent::Reviews => {
                self.sender
                    .send_text(
                        wa_id,
                        &format!(
                            "⭐ ביקורות:\n{}\n\n{}",
                            self.business.reviews_url, self.business.reviews_alt_url
                        ),
                    )
                    .await?;
                self.show_main_menu(wa_id).await
            }
            Intent::HumanAgent => {
                self.sender
                    .send_text(wa_id, "👤 כתוב: שם + עיר + מה התקלה, ונחזור מהר.")
                    .await?;
                self.admin_broadcast(&format!(
                    "📞 בקשת נציג\nמאת: {wa_id}\nהודעה: {}",
                    truncate_chars(text, 200)
                ))
                .await;
                self.show_main_menu(wa_id).await
            }
            // Jumps straight into the order flow: item selection for a
            // repeat customer, name collection for a new one.
            Intent::Payment => self.start_order_flow(wa_id).await,
            Intent::BrokenDevice => {
                self.sessions.set(wa_id, SessionState::BrokenDevice).await;
                self.sender
                    .send_text(wa_id, "הבנתי שנשבר לך משהו 😅 איזה מכשיר זה? (דגם מלא)")
                    .await
            }
            Intent::Unknown => {
                let known = self
                    .ledger
                    .customer(wa_id)
                    .await?
                    .is_some_and(|c| !c.name.trim().is_empty());
                let reply = if known {
                    "לא הבנתי 🙂 כתוב מה אתה צריך (שליחות/איפה/נשבר לי/תשלום) או פתח תפריט."
                        .to_string()
                } else {
                    format!("ברוך הבא ל-{} 👋\nאיך אפשר לעזור?", self.business.name)
                };
                self.sender.send_text(wa_id, &reply).await?;
                self.show_main_menu(wa_id).await
            }
        }
    }

    /// Handles a menu selection.
    async fn handle_action(&self, wa_id: &str, action_id: &str) -> Result<(), BotError> {
        match action_id {
            action::MENU_PAY => self.start_order_flow(wa_id).await,
            action::MENU_PRICELIST => {
                let pricelist = self.pricelist_text();
                self.sender.send_text(wa_id, &pricelist).await?;
                self.show_main_menu(wa_id).await
            }
            action::MENU_DELIVERY => {
                let reply = match self.catalog.price_of("delivery") {
                    Ok(item) => format!(
                        "🚚 יש שליחות עד הבית.\nעלות: {}\n\nרוצה לשלם/להזמין? פתח תפריט 👇",
                        format_amount(item.price)
                    ),
                    Err(_) => "🚚 יש שליחות עד הבית.".to_string(),
                };
                self.sender.send_text(wa_id, &reply).await?;
                self.show_main_menu(wa_id).await
            }
            action::MENU_WHERE => {
                self.sender
                    .send_text(
                        wa_id,
                        &format!("🧭 ניווט ב-Waze:\n{}", self.business.navigation_url),
                    )
                    .await?;
                self.show_main_menu(wa_id).await
            }
            action::MENU_REVIEWS => {
                self.sender
                    .send_text(
                        wa_id,
                        &format!(
                            "⭐ ביקורות:\nגוגל:\n{}\n\nאיזי:\n{}",
                            self.business.reviews_url, self.business.reviews_alt_url
                        ),
                    )
                    .await?;
                self.show_main_menu(wa_id).await
            }
            action::MENU_AGENT => {
                self.sender
                    .send_text(wa_id, "👤 מעולה. כתוב: שם + עיר + מה התקלה, ונחזור אליך מהר.")
                    .await?;
                self.admin_broadcast(&format!("📞 בקשת נציג\nמאת: {wa_id}")).await;
                self.show_main_menu(wa_id).await
            }
            action::MENU_RESTORE => {
                self.sessions.set(wa_id, SessionState::RestorePhone).await;
                self.sender
                    .send_text(wa_id, "הזן מספר טלפון לשחזור חשבוניות:")
                    .await
            }
            action::MENU_CHECK_PAYMENT => self.check_payment(wa_id).await,
            action::ADMIN_PAY_ANY => {
                if !self.admins.is_admin(wa_id) {
                    return Err(BotError::Unauthorized(wa_id.to_string()));
                }
                self.sessions.set(wa_id, SessionState::AdminPayName).await;
                self.sender.send_text(wa_id, "💳 אדמין: שם לקוח?").await
            }
            action::ADMIN_INVOICE => {
                if !self.admins.is_admin(wa_id) {
                    return Err(BotError::Unauthorized(wa_id.to_string()));
                }
                self.sessions.set(wa_id, SessionState::AdminInvoiceName).await;
                self.sender.send_text(wa_id, "🧾 שם הלקוח לחשבונית?").await
            }
            action::BROKEN_TICKET => {
                let Some(SessionState::BrokenChoice { device }) = self.sessions.get(wa_id).await
                else {
                    return self.stale_selection(wa_id).await;
                };
                self.sessions
                    .set(
                        wa_id,
                        SessionState::BrokenIssue {
                            device: device.clone(),
                        },
                    )
                    .await;
                self.sender
                    .send_text(
                        wa_id,
                        &format!(
                            "✅ פנייה נפתחה.\nמכשיר: {device}\nכתוב בקצרה מה התקלה/מה נשבר:"
                        ),
                    )
                    .await?;
                self.admin_broadcast(&format!(
                    "📩 פנייה חדשה (נפתחה)\nמאת: {wa_id}\nמכשיר: {device}"
                ))
                .await;
                Ok(())
            }
            action::BROKEN_PAY => {
                self.sessions.clear(wa_id).await;
                self.sender
                    .send_text(
                        wa_id,
                        "מעולה. פתח תפריט → 💳 הזמנה ותשלום.\nאם אין מחיר מדויק, אפשר גם מקדמה דרך אדמין.",
                    )
                    .await?;
                self.show_main_menu(wa_id).await
            }
            action::BROKEN_AGENT => {
                self.sessions.clear(wa_id).await;
                self.sender
                    .send_text(wa_id, "✅ הבנתי. כתוב: שם + עיר + מה נשבר, ונציג יחזור אליך.")
                    .await?;
                self.admin_broadcast(&format!("📞 בקשת נציג (נשבר לי)\nמאת: {wa_id}"))
                    .await;
                self.show_main_menu(wa_id).await
            }
            id if id.starts_with(action::ITEM1_PREFIX) => {
                let key = id.trim_start_matches(action::ITEM1_PREFIX);
                self.pick_first_item(wa_id, key).await
            }
            id if id.starts_with(action::ITEM2_PREFIX) => {
                let key = id.trim_start_matches(action::ITEM2_PREFIX);
                self.finalize_order(wa_id, key).await
            }
            _ => {
                self.sender.send_text(wa_id, "בחר מהתפריט 👇").await?;
                self.show_main_menu(wa_id).await
            }
        }
    }

    /// Entry to the order flow: repeat customers with known contact
    /// details skip straight to item selection.
    async fn start_order_flow(&self, wa_id: &str) -> Result<(), BotError> {
        if let Some(customer) = self.ledger.customer(wa_id).await?
            && customer.has_contact_details()
        {
            self.sessions
                .set(
                    wa_id,
                    SessionState::PickFirstItem {
                        name: customer.name.clone(),
                        phone: customer.phone,
                    },
                )
                .await;
            self.sender
                .send_text(
                    wa_id,
                    &format!("👋 {} ממשיכים להזמנה.\nבחר פריט:", customer.name),
                )
                .await?;
            return self
                .show_items_menu(wa_id, action::ITEM1_PREFIX, false)
                .await;
        }
        self.sessions.set(wa_id, SessionState::CollectName).await;
        self.sender.send_text(wa_id, "שם לקוח?").await
    }

    /// First item selected from the items menu.
    async fn pick_first_item(&self, wa_id: &str, key: &str) -> Result<(), BotError> {
        let Some(SessionState::PickFirstItem { name, phone }) = self.sessions.get(wa_id).await
        else {
            return self.stale_selection(wa_id).await;
        };
        if self.catalog.price_of(key).is_err() {
            // Invalid or stale key: re-prompt without advancing.
            self.sender
                .send_text(wa_id, "בחירה לא תקינה. בחר פריט מהכפתורים 👇")
                .await?;
            return self
                .show_items_menu(wa_id, action::ITEM1_PREFIX, false)
                .await;
        }
        self.sessions
            .set(
                wa_id,
                SessionState::PickSecondItem {
                    name,
                    phone,
                    first_item: key.to_string(),
                },
            )
            .await;
        self.show_items_menu(wa_id, action::ITEM2_PREFIX, true).await
    }

    /// Second item selected: create the order and the payment link as one
    /// logical operation. A payment-link failure leaves the order pending
    /// with no link — the customer is told to retry; nothing retries in
    /// the background.
    async fn finalize_order(&self, wa_id: &str, second_key: &str) -> Result<(), BotError> {
        let Some(SessionState::PickSecondItem {
            name,
            phone,
            first_item,
        }) = self.sessions.get(wa_id).await
        else {
            return self.stale_selection(wa_id).await;
        };
        if second_key != NO_SECOND_ITEM && self.catalog.price_of(second_key).is_err() {
            self.sender.send_text(wa_id, "בחר פריט 2 מהכפתורים 👇").await?;
            return self.show_items_menu(wa_id, action::ITEM2_PREFIX, true).await;
        }

        // Item keys are re-validated against the catalog here, at
        // finalization time — a key picked earlier may have been removed.
        let draft = OrderDraft::from_catalog(
            &self.catalog,
            wa_id,
            &name,
            &phone,
            &first_item,
            second_key,
            &self.business.order_note,
        )?;
        let order = self.ledger.create_order(draft).await?;
        self.ledger
            .upsert_customer(wa_id, Some(&name), Some(&phone))
            .await?;

        match self
            .gateway
            .create_remote_order(order.id, order.total_amount)
            .await
        {
            Ok(remote) => {
                self.ledger
                    .record_payment_link(
                        order.id,
                        &remote.provider_order_id,
                        &remote.approval_url,
                        "CREATED",
                    )
                    .await?;
                let items_text = order
                    .items
                    .iter()
                    .map(|line| format!("• {} — {}", line.label, format_amount(line.amount)))
                    .collect::<Vec<_>>()
                    .join("\n");
                self.sender
                    .send_text(
                        wa_id,
                        &format!(
                            "✅ הזמנה #{}\n👤 {name} | {phone}\n\n{items_text}\n💳 סה״כ: {}\nℹ️ {}\n\nלתשלום מאובטח (PayPal):\n{}\n\n🔄 אחרי התשלום: תפריט → 'בדיקת תשלום'\nאו סיים בדפדפן – החשבונית תישלח אוטומטית.",
                            order.id,
                            format_amount(order.total_amount),
                            self.business.order_note,
                            remote.approval_url,
                        ),
                    )
                    .await?;
            }
            Err(err) => {
                tracing::error!(order_id = %order.id, error = %err, "payment link creation failed");
                self.admin_broadcast(&format!(
                    "❌ יצירת לינק תשלום נכשלה\nהזמנה #{}\nלקוח: {wa_id}\n{err}",
                    order.id
                ))
                .await;
                self.sender
                    .send_text(
                        wa_id,
                        "❌ לא הצלחתי ליצור לינק תשלום כרגע. נסה שוב עוד רגע דרך התפריט.",
                    )
                    .await?;
            }
        }

        self.sessions.clear(wa_id).await;
        self.show_main_menu(wa_id).await
    }

    /// The sessionless "check payment" action: query the provider for the
    /// latest pending order and settle on completion. Safe to invoke any
    /// number of times.
    async fn check_payment(&self, wa_id: &str) -> Result<(), BotError> {
        let Some(order) = self.ledger.latest_pending_order(wa_id).await? else {
            self.sender
                .send_text(wa_id, "לא מצאתי הזמנה ממתינה. פתח תפריט → הזמנה ותשלום.")
                .await?;
            return self.show_main_menu(wa_id).await;
        };
        let Some(provider_order_id) = order.provider_order_id.clone() else {
            // A linkless pending order cannot settle; no receipt is ever
            // producible for it. The customer starts a fresh order.
            self.sender
                .send_text(
                    wa_id,
                    "להזמנה האחרונה אין לינק תשלום. פתח תפריט → הזמנה ותשלום ונסה שוב.",
                )
                .await?;
            return self.show_main_menu(wa_id).await;
        };

        let status = self.gateway.query_remote_status(&provider_order_id).await?;
        self.ledger.update_provider_status(order.id, &status).await?;

        if status == STATUS_COMPLETED {
            let artifact = self
                .issuer
                .ensure_receipt(order.id, None, Some(&status))
                .await?;
            self.sender
                .send_text(wa_id, "✅ התשלום אומת מול PayPal! שולח חשבונית…")
                .await?;
            self.sender
                .send_document(wa_id, Path::new(&artifact), "🧾 חשבונית ✅")
                .await?;
        } else {
            let reply = match &order.pay_link {
                Some(link) => format!(
                    "סטטוס תשלום כרגע: {status}\n\nאם עוד לא שילמת, הנה הלינק:\n{link}"
                ),
                None => format!("סטטוס תשלום כרגע: {status}"),
            };
            self.sender.send_text(wa_id, &reply).await?;
        }
        self.show_main_menu(wa_id).await
    }

    /// Restore flow terminal: resend up to [`RESTORE_LIMIT`] most recent
    /// receipts for the given phone.
    async fn restore_receipts(&self, wa_id: &str, phone: &str) -> Result<(), BotError> {
        let receipts = self
            .ledger
            .receipts_by_phone(phone.trim(), RESTORE_LIMIT)
            .await?;

        if receipts.is_empty() {
            self.sender
                .send_text(wa_id, "לא נמצאו חשבוניות לטלפון הזה.")
                .await?;
        } else {
            self.sender
                .send_text(wa_id, &format!("נמצאו {} חשבוניות. שולח…", receipts.len()))
                .await?;
            for order in &receipts {
                if let Some(artifact) = &order.invoice_artifact
                    && Path::new(artifact).is_file()
                {
                    self.sender
                        .send_document(wa_id, Path::new(artifact), "🧾 שחזור חשבונית")
                        .await?;
                }
            }
        }
        self.sessions.clear(wa_id).await;
        self.show_main_menu(wa_id).await
    }

    /// Broken-device flow terminal: file the ticket and notify admins.
    async fn file_ticket(&self, wa_id: &str, device: &str, issue: &str) -> Result<(), BotError> {
        let customer = self.ledger.customer(wa_id).await?;
        let (name, phone) = customer
            .map(|c| (c.name, c.phone))
            .unwrap_or_default();

        let ticket = self
            .ledger
            .create_ticket(TicketDraft {
                wa_id: wa_id.to_string(),
                customer_name: name.clone(),
                customer_phone: phone.clone(),
                device: device.to_string(),
                issue: issue.to_string(),
            })
            .await?;

        self.sender
            .send_text(
                wa_id,
                &format!(
                    "✅ תודה! הפנייה נקלטה (#{}) נחזור אליך בהקדם.\nאם תרצה – אפשר גם מקדמה/תשלום דרך התפריט.",
                    ticket.id
                ),
            )
            .await?;
        self.admin_broadcast(&format!(
            "📩 פנייה חדשה #{}\nWA:{wa_id}\nשם:{name}\nטלפון:{phone}\nמכשיר:{device}\nתקלה:{}",
            ticket.id,
            truncate_chars(issue, 250)
        ))
        .await;
        self.sessions.clear(wa_id).await;
        self.show_main_menu(wa_id).await
    }

    /// Admin flow terminal: custom-amount order plus payment link.
    async fn admin_payment_link(
        &self,
        wa_id: &str,
        name: &str,
        phone: &str,
        amount_text: &str,
    ) -> Result<(), BotError> {
        let amount = parse_amount(amount_text)?;
        let draft = OrderDraft::custom(
            wa_id,
            name,
            phone,
            amount,
            "💳 מקדמה / סכום חופשי",
            &self.business.order_note,
        )?;
        let order = self.ledger.create_order(draft).await?;
        let remote = self
            .gateway
            .create_remote_order(order.id, order.total_amount)
            .await?;
        self.ledger
            .record_payment_link(
                order.id,
                &remote.provider_order_id,
                &remote.approval_url,
                "CREATED",
            )
            .await?;

        self.sender
            .send_text(
                wa_id,
                &format!(
                    "✅ נוצר חיוב #{}\n👤 {name} | {phone}\n💳 סכום: {}\n\nלינק תשלום:\n{}\n\nאחרי תשלום: תפריט → בדיקת תשלום",
                    order.id,
                    format_amount(amount),
                    remote.approval_url,
                ),
            )
            .await?;
        self.sessions.clear(wa_id).await;
        self.show_main_menu(wa_id).await
    }

    /// Admin flow terminal: manual invoice with no provider interaction.
    async fn admin_manual_invoice(
        &self,
        wa_id: &str,
        name: &str,
        phone: &str,
        reason: &str,
        amount_text: &str,
    ) -> Result<(), BotError> {
        let amount = parse_amount(amount_text)?;
        let draft = OrderDraft::manual(name, phone, reason, amount, &self.business.order_note)?;
        let order = self.ledger.create_order(draft).await?;
        let artifact = self
            .issuer
            .ensure_receipt(order.id, None, Some("MANUAL"))
            .await?;

        self.sender
            .send_text(wa_id, &format!("✅ הופקה חשבונית #{}. שולח…", order.id))
            .await?;
        self.sender
            .send_document(wa_id, Path::new(&artifact), "🧾 חשבונית אדמין ✅")
            .await?;
        self.sessions.clear(wa_id).await;
        self.show_main_menu(wa_id).await
    }

    /// A selection arrived for a step the session is not in (expired menu,
    /// interleaved messages): clear and re-anchor.
    async fn stale_selection(&self, wa_id: &str) -> Result<(), BotError> {
        self.sessions.clear(wa_id).await;
        self.sender
            .send_text(wa_id, "הבחירה כבר לא בתוקף. פתח תפריט ונסה שוב.")
            .await?;
        self.show_main_menu(wa_id).await
    }

    /// Sends the main menu — the universal re-anchor.
    async fn show_main_menu(&self, wa_id: &str) -> Result<(), BotError> {
        let mut options = vec![
            MenuOption::described(action::MENU_PAY, "💳 הזמנה ותשלום", "לינק PayPal"),
            MenuOption::described(action::MENU_PRICELIST, "📋 מחירון", "מחירים"),
            MenuOption::described(action::MENU_DELIVERY, "🚚 שליחות", "מחיר שליחות"),
            MenuOption::described(action::MENU_WHERE, "🧭 איפה אנחנו", "ניווט Waze"),
            MenuOption::described(action::MENU_REVIEWS, "⭐ ביקורות", "גוגל + איזי"),
            MenuOption::described(action::MENU_CHECK_PAYMENT, "🔄 בדיקת תשלום", "אימות PayPal"),
            MenuOption::described(action::MENU_RESTORE, "🧾 שחזור חשבונית", "לפי טלפון"),
            MenuOption::described(action::MENU_AGENT, "👤 נציג", "פנייה לנציג"),
        ];
        if self.admins.is_admin(wa_id) {
            options.push(MenuOption::described(
                action::ADMIN_PAY_ANY,
                "💳 אדמין: סכום",
                "לינק לכל סכום",
            ));
            options.push(MenuOption::described(
                action::ADMIN_INVOICE,
                "🧾 חשבונית אדמין",
                "קבלה בלי תשלום",
            ));
        }
        self.sender
            .send_menu(wa_id, &self.business.name, "בחר פעולה 👇", "פתח", &options)
            .await
    }

    /// Sends the items menu for the given step prefix.
    async fn show_items_menu(
        &self,
        wa_id: &str,
        prefix: &str,
        include_none: bool,
    ) -> Result<(), BotError> {
        let mut options: Vec<MenuOption> = self
            .catalog
            .items()
            .iter()
            .map(|item| {
                MenuOption::new(
                    &format!("{prefix}{}", item.key),
                    &format!("{} {}₪", item.label, item.price.trunc()),
                )
            })
            .collect();
        if include_none {
            options.push(MenuOption::new(
                &format!("{prefix}{NO_SECOND_ITEM}"),
                "➖ בלי פריט 2",
            ));
        }
        self.sender
            .send_menu(wa_id, "בחירת פריט", "בחר שירות:", "בחר", &options)
            .await
    }

    /// Sends the broken-device branch menu.
    async fn show_broken_menu(&self, wa_id: &str, device: &str) -> Result<(), BotError> {
        let options = vec![
            MenuOption::new(action::BROKEN_TICKET, "📝 לפתוח פנייה"),
            MenuOption::new(action::BROKEN_PAY, "💳 לשלם תיקון"),
            MenuOption::new(action::BROKEN_AGENT, "👤 נציג"),
        ];
        self.sender
            .send_menu(
                wa_id,
                "מה תרצה?",
                &format!("מכשיר: {device}\nבחר אפשרות:"),
                "בחר",
                &options,
            )
            .await
    }

    /// Renders the full pricelist from the catalog.
    fn pricelist_text(&self) -> String {
        let mut lines = vec![format!("📋 מחירון {}", self.business.name), String::new()];
        for item in self.catalog.items() {
            lines.push(format!("{} — {}", item.label, format_amount(item.price)));
        }
        lines.push(String::new());
        lines.push(format!("ℹ️ {}", self.business.order_note));
        lines.join("\n")
    }

    /// Sends a text to every configured admin; individual failures are
    /// logged and do not abort the fan-out.
    async fn admin_broadcast(&self, text: &str) {
        for phone in self.admins.snapshot() {
            if let Err(err) = self.sender.send_text(&phone, text).await {
                tracing::warn!(admin = phone.as_str(), error = %err, "admin broadcast failed");
            }
        }
    }
}

/// Maps an error to the customer-visible reply sent by the boundary.
fn user_message(err: &BotError) -> String {
    match err {
        BotError::InvalidItem(_) => "בחירה לא תקינה. כתוב 'תפריט' ונסה שוב.".to_string(),
        BotError::InvalidAmount(_) => "❌ סכום לא תקין. נסה שוב (לדוגמה 250).".to_string(),
        BotError::OrderNotFound(_) => "לא מצאתי את ההזמנה. פתח תפריט ונסה שוב.".to_string(),
        BotError::Unauthorized(_) => "אין הרשאה.".to_string(),
        BotError::SessionInconsistent(_) => {
            "משהו התבלבל. כתוב 'תפריט' להתחלה מחדש.".to_string()
        }
        _ => "❌ לא הצלחתי להשלים את הפעולה כרגע. נסה שוב עוד רגע.".to_string(),
    }
}

/// Parses a customer-typed amount ("250", "1,200.50").
fn parse_amount(text: &str) -> Result<Decimal, BotError> {
    text.replace(',', "")
        .trim()
        .parse::<Decimal>()
        .map_err(|_| BotError::InvalidAmount(text.to_string()))
}

/// Truncates on a char boundary for broadcast snippets.
fn truncate_chars(s: &str, max_chars: usize) -> String {
    s.chars().take(max_chars).collect()
}
