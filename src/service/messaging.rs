//! Outbound messaging: trait + WhatsApp Cloud API implementation.
//!
//! The sender is fire-and-forget from the engine's perspective: a
//! delivery rejection (non-2xx) is logged here and not surfaced; only a
//! transport-level failure raises [`BotError::Messaging`].

use std::path::Path;

use async_trait::async_trait;
use serde_json::json;

use crate::error::BotError;

/// One row of an interactive list menu.
#[derive(Debug, Clone)]
pub struct MenuOption {
    /// Selection id delivered back via the webhook (e.g. `"menu:pay"`).
    pub id: String,
    /// Short row title (platform-limited to ~24 characters).
    pub title: String,
    /// Optional dimmed description line.
    pub description: Option<String>,
}

impl MenuOption {
    /// Creates a row without a description.
    #[must_use]
    pub fn new(id: &str, title: &str) -> Self {
        Self {
            id: id.to_string(),
            title: title.to_string(),
            description: None,
        }
    }

    /// Creates a row with a description.
    #[must_use]
    pub fn described(id: &str, title: &str, description: &str) -> Self {
        Self {
            id: id.to_string(),
            title: title.to_string(),
            description: Some(description.to_string()),
        }
    }
}

/// Abstract outbound channel to the customer.
#[async_trait]
pub trait MessagingSender: Send + Sync + std::fmt::Debug {
    /// Sends a plain text message.
    ///
    /// # Errors
    ///
    /// Returns [`BotError::Messaging`] on transport failure.
    async fn send_text(&self, wa_id: &str, text: &str) -> Result<(), BotError>;

    /// Sends an interactive list menu.
    ///
    /// # Errors
    ///
    /// Returns [`BotError::Messaging`] on transport failure.
    async fn send_menu(
        &self,
        wa_id: &str,
        title: &str,
        body: &str,
        button: &str,
        options: &[MenuOption],
    ) -> Result<(), BotError>;

    /// Uploads and sends a document with a caption.
    ///
    /// # Errors
    ///
    /// Returns [`BotError::Messaging`] on transport failure or when the
    /// artifact cannot be read.
    async fn send_document(
        &self,
        wa_id: &str,
        artifact: &Path,
        caption: &str,
    ) -> Result<(), BotError>;
}

/// WhatsApp Cloud API sender over the Graph API.
#[derive(Debug, Clone)]
pub struct WhatsAppSender {
    http: reqwest::Client,
    phone_number_id: String,
    access_token: String,
    graph_version: String,
}

impl WhatsAppSender {
    /// Creates a sender. The `http` client carries the global timeout.
    #[must_use]
    pub fn new(
        http: reqwest::Client,
        phone_number_id: &str,
        access_token: &str,
        graph_version: &str,
    ) -> Self {
        Self {
            http,
            phone_number_id: phone_number_id.to_string(),
            access_token: access_token.to_string(),
            graph_version: graph_version.to_string(),
        }
    }

    fn messages_url(&self) -> String {
        format!(
            "https://graph.facebook.com/{}/{}/messages",
            self.graph_version, self.phone_number_id
        )
    }

    fn media_url(&self) -> String {
        format!(
            "https://graph.facebook.com/{}/{}/media",
            self.graph_version, self.phone_number_id
        )
    }

    /// Posts a message payload; non-2xx responses are logged, not raised.
    async fn post_message(&self, payload: serde_json::Value) -> Result<(), BotError> {
        let response = self
            .http
            .post(self.messages_url())
            .bearer_auth(&self.access_token)
            .json(&payload)
            .send()
            .await
            .map_err(|e| BotError::Messaging(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(%status, body = body.as_str(), "message delivery rejected");
        }
        Ok(())
    }

    /// Uploads a file to the media endpoint and returns its media id.
    async fn upload_media(&self, artifact: &Path) -> Result<String, BotError> {
        let bytes = tokio::fs::read(artifact)
            .await
            .map_err(|e| BotError::Messaging(format!("read artifact: {e}")))?;
        let file_name = artifact
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "document".to_string());
        let mime = mime_for(artifact);

        let part = reqwest::multipart::Part::bytes(bytes)
            .file_name(file_name)
            .mime_str(mime)
            .map_err(|e| BotError::Messaging(e.to_string()))?;
        let form = reqwest::multipart::Form::new()
            .text("messaging_product", "whatsapp")
            .text("type", mime)
            .part("file", part);

        let response = self
            .http
            .post(self.media_url())
            .bearer_auth(&self.access_token)
            .multipart(form)
            .send()
            .await
            .map_err(|e| BotError::Messaging(e.to_string()))?;

        let status = response.status();
        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| BotError::Messaging(e.to_string()))?;
        body.get("id")
            .and_then(|id| id.as_str())
            .map(ToString::to_string)
            .ok_or_else(|| BotError::Messaging(format!("media upload failed: {status}")))
    }
}

#[async_trait]
impl MessagingSender for WhatsAppSender {
    async fn send_text(&self, wa_id: &str, text: &str) -> Result<(), BotError> {
        self.post_message(json!({
            "messaging_product": "whatsapp",
            "to": wa_id,
            "type": "text",
            "text": { "body": text },
        }))
        .await
    }

    async fn send_menu(
        &self,
        wa_id: &str,
        title: &str,
        body: &str,
        button: &str,
        options: &[MenuOption],
    ) -> Result<(), BotError> {
        let rows: Vec<serde_json::Value> = options
            .iter()
            .map(|opt| match &opt.description {
                Some(description) => json!({
                    "id": opt.id,
                    "title": truncate(&opt.title, 24),
                    "description": description,
                }),
                None => json!({ "id": opt.id, "title": truncate(&opt.title, 24) }),
            })
            .collect();

        self.post_message(json!({
            "messaging_product": "whatsapp",
            "to": wa_id,
            "type": "interactive",
            "interactive": {
                "type": "list",
                "header": { "type": "text", "text": truncate(title, 60) },
                "body": { "text": truncate(body, 1024) },
                "action": {
                    "button": truncate(button, 20),
                    "sections": [{ "title": "תפריט", "rows": rows }],
                },
            },
        }))
        .await
    }

    async fn send_document(
        &self,
        wa_id: &str,
        artifact: &Path,
        caption: &str,
    ) -> Result<(), BotError> {
        let media_id = self.upload_media(artifact).await?;
        let file_name = artifact
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "document".to_string());

        self.post_message(json!({
            "messaging_product": "whatsapp",
            "to": wa_id,
            "type": "document",
            "document": { "id": media_id, "caption": caption, "filename": file_name },
        }))
        .await
    }
}

/// Maps an artifact extension to a media mime type.
fn mime_for(path: &Path) -> &'static str {
    match path.extension().and_then(|e| e.to_str()) {
        Some("pdf") => "application/pdf",
        _ => "text/plain",
    }
}

/// Truncates to the platform's field limit on a char boundary.
fn truncate(s: &str, max_chars: usize) -> String {
    s.chars().take(max_chars).collect()
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate("שלום עולם", 4), "שלום");
        assert_eq!(truncate("abc", 24), "abc");
    }

    #[test]
    fn mime_for_known_extensions() {
        assert_eq!(mime_for(&PathBuf::from("invoice_1.pdf")), "application/pdf");
        assert_eq!(mime_for(&PathBuf::from("invoice_1.txt")), "text/plain");
        assert_eq!(mime_for(&PathBuf::from("invoice")), "text/plain");
    }

    #[test]
    fn menu_option_builders() {
        let plain = MenuOption::new("menu:pay", "💳 הזמנה ותשלום");
        assert!(plain.description.is_none());

        let described = MenuOption::described("menu:pay", "💳 הזמנה ותשלום", "לינק PayPal");
        assert_eq!(described.description.as_deref(), Some("לינק PayPal"));
    }
}
