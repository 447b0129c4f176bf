//! Inbound webhook payload types and event extraction.
//!
//! Only the fields that drive the state machine are modeled; everything
//! else in the platform's deeply nested payload is ignored. Extraction is
//! best-effort: a payload without a usable message yields no event, never
//! an error — the webhook must always be acknowledged.

use serde::Deserialize;

use crate::service::InboundEvent;

/// Top-level webhook payload.
#[derive(Debug, Default, Deserialize)]
pub struct WebhookPayload {
    /// Webhook entries (one per subscribed object).
    #[serde(default)]
    pub entry: Vec<Entry>,
}

/// One webhook entry.
#[derive(Debug, Default, Deserialize)]
pub struct Entry {
    /// Field changes within the entry.
    #[serde(default)]
    pub changes: Vec<Change>,
}

/// One field change.
#[derive(Debug, Default, Deserialize)]
pub struct Change {
    /// The changed value.
    #[serde(default)]
    pub value: ChangeValue,
}

/// The value of a change: inbound messages, if any.
#[derive(Debug, Default, Deserialize)]
pub struct ChangeValue {
    /// Inbound messages (empty for delivery/status updates).
    #[serde(default)]
    pub messages: Vec<InboundMessage>,
}

/// One inbound message.
#[derive(Debug, Default, Deserialize)]
pub struct InboundMessage {
    /// Sender's customer identity.
    pub from: Option<String>,
    /// Message type discriminator (`"text"`, `"interactive"`, …).
    #[serde(rename = "type")]
    pub kind: Option<String>,
    /// Text body, when `type == "text"`.
    pub text: Option<TextBody>,
    /// Interactive reply, when `type == "interactive"`.
    pub interactive: Option<Interactive>,
}

/// Body of a text message.
#[derive(Debug, Default, Deserialize)]
pub struct TextBody {
    /// The text content.
    #[serde(default)]
    pub body: String,
}

/// An interactive reply.
#[derive(Debug, Default, Deserialize)]
pub struct Interactive {
    /// Interactive type discriminator (`"list_reply"`, …).
    #[serde(rename = "type")]
    pub kind: Option<String>,
    /// List selection, when `type == "list_reply"`.
    pub list_reply: Option<ListReply>,
}

/// A selected list row.
#[derive(Debug, Default, Deserialize)]
pub struct ListReply {
    /// The selection id (e.g. `"menu:pay"`).
    #[serde(default)]
    pub id: String,
}

impl WebhookPayload {
    /// Extracts the first usable `(customer identity, event)` pair.
    ///
    /// Interactive list replies become [`InboundEvent::Selection`];
    /// everything else with a text body becomes [`InboundEvent::Text`].
    #[must_use]
    pub fn first_event(&self) -> Option<(String, InboundEvent)> {
        let message = self
            .entry
            .first()?
            .changes
            .first()?
            .value
            .messages
            .first()?;
        let wa_id = message.from.clone()?;

        if let Some(interactive) = &message.interactive
            && interactive.kind.as_deref() == Some("list_reply")
            && let Some(reply) = &interactive.list_reply
        {
            return Some((wa_id, InboundEvent::Selection(reply.id.clone())));
        }

        let body = message.text.as_ref().map(|t| t.body.trim().to_string())?;
        Some((wa_id, InboundEvent::Text(body)))
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use serde_json::json;

    fn decode(value: serde_json::Value) -> WebhookPayload {
        let Ok(payload) = serde_json::from_value(value) else {
            panic!("payload should decode");
        };
        payload
    }

    #[test]
    fn text_message_decodes_to_text_event() {
        let payload = decode(json!({
            "entry": [{ "changes": [{ "value": { "messages": [{
                "from": "972501234567",
                "type": "text",
                "text": { "body": " שלום " },
            }] } }] }],
        }));

        let Some((wa_id, event)) = payload.first_event() else {
            panic!("event expected");
        };
        assert_eq!(wa_id, "972501234567");
        assert_eq!(event, InboundEvent::Text("שלום".to_string()));
    }

    #[test]
    fn list_reply_decodes_to_selection_event() {
        let payload = decode(json!({
            "entry": [{ "changes": [{ "value": { "messages": [{
                "from": "972501234567",
                "type": "interactive",
                "interactive": {
                    "type": "list_reply",
                    "list_reply": { "id": "menu:pay", "title": "💳 הזמנה ותשלום" },
                },
            }] } }] }],
        }));

        let Some((_, event)) = payload.first_event() else {
            panic!("event expected");
        };
        assert_eq!(event, InboundEvent::Selection("menu:pay".to_string()));
    }

    #[test]
    fn status_update_without_messages_yields_no_event() {
        let payload = decode(json!({
            "entry": [{ "changes": [{ "value": { "statuses": [{ "id": "wamid.x" }] } }] }],
        }));
        assert!(payload.first_event().is_none());
    }

    #[test]
    fn empty_payload_yields_no_event() {
        assert!(decode(json!({})).first_event().is_none());
        assert!(decode(json!({ "entry": [] })).first_event().is_none());
    }

    #[test]
    fn message_without_sender_yields_no_event() {
        let payload = decode(json!({
            "entry": [{ "changes": [{ "value": { "messages": [{
                "type": "text",
                "text": { "body": "שלום" },
            }] } }] }],
        }));
        assert!(payload.first_event().is_none());
    }
}
