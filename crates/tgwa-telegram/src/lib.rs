//! Telegram adapter (teloxide).
//!
//! Channel posts feed the forwarding router; admin commands manage rules and
//! the WhatsApp login; [`TelegramNotifier`] implements the core
//! `OperatorNotifier` port by messaging every configured admin.

use async_trait::async_trait;
use qrcode::{render::unicode::Dense1x2, QrCode};
use teloxide::{prelude::*, types::ParseMode};
use tokio::time::sleep;

pub mod handlers;
pub mod router;

use tgwa_core::{errors::Error, formatting::escape_html, ports::OperatorNotifier, Result};

/// Render a pairing payload as a block of unicode half-blocks, suitable for a `<pre>` block.
pub fn render_qr(payload: &str) -> Option<String> {
    let code = QrCode::new(payload.as_bytes()).ok()?;
    Some(
        code.render::<Dense1x2>()
            .dark_color(Dense1x2::Light)
            .light_color(Dense1x2::Dark)
            .build(),
    )
}

pub fn pairing_message(payload: &str) -> String {
    let raw = format!("<code>{}</code>", escape_html(payload));
    match render_qr(payload) {
        Some(qr) => format!(
            "📱 <b>WhatsApp login</b>\n\n\
Scan with WhatsApp → Linked devices → Link a device:\n\
<pre>{}</pre>\n\
Raw code: {raw}",
            escape_html(&qr)
        ),
        None => format!("📱 <b>WhatsApp login</b>\n\nPairing code: {raw}"),
    }
}

#[derive(Clone)]
pub struct TelegramNotifier {
    bot: Bot,
    admins: Vec<i64>,
}

impl TelegramNotifier {
    pub fn new(bot: Bot, admins: Vec<i64>) -> Self {
        Self { bot, admins }
    }

    fn map_err(e: teloxide::RequestError) -> Error {
        Error::External(format!("telegram error: {e}"))
    }

    async fn with_retry<T, Fut>(&self, mut op: impl FnMut() -> Fut) -> Result<T>
    where
        Fut: std::future::IntoFuture<Output = std::result::Result<T, teloxide::RequestError>>,
        Fut::IntoFuture: Send,
    {
        const MAX_RETRIES: usize = 1;
        let mut attempts = 0usize;
        loop {
            match op().await {
                Ok(v) => return Ok(v),
                Err(e) => match e {
                    teloxide::RequestError::RetryAfter(d) if attempts < MAX_RETRIES => {
                        attempts += 1;
                        sleep(d).await;
                        continue;
                    }
                    other => return Err(Self::map_err(other)),
                },
            }
        }
    }

    /// Send to every admin; one unreachable admin does not stop the rest.
    async fn broadcast_html(&self, html: &str) -> Result<()> {
        let mut first_err = None;
        for &admin in &self.admins {
            let sent = self
                .with_retry(|| {
                    self.bot
                        .send_message(ChatId(admin), html.to_string())
                        .parse_mode(ParseMode::Html)
                })
                .await;
            if let Err(e) = sent {
                tracing::warn!(admin, "operator notification failed: {e}");
                first_err.get_or_insert(e);
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl OperatorNotifier for TelegramNotifier {
    async fn show_pairing_challenge(&self, payload: &str) -> Result<()> {
        self.broadcast_html(&pairing_message(payload)).await
    }

    async fn notify_ready(&self) -> Result<()> {
        self.broadcast_html("✅ <b>WhatsApp connected</b>\nForwarding is active.")
            .await
    }

    async fn notify_disconnected(&self, reason: &str) -> Result<()> {
        self.broadcast_html(&format!(
            "⚠️ <b>WhatsApp disconnected</b>\nReason: <code>{}</code>",
            escape_html(reason)
        ))
        .await
    }

    async fn notify_warning(&self, message: &str) -> Result<()> {
        self.broadcast_html(&format!("⚠️ {}", escape_html(message)))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pairing_message_embeds_qr_and_raw_payload() {
        let msg = pairing_message("2@abc<def>,xyz==");
        assert!(msg.contains("<pre>"));
        assert!(msg.contains("▀") || msg.contains("▄") || msg.contains("█"));
        assert!(msg.contains("<code>2@abc&lt;def&gt;,xyz==</code>"));
    }

    #[test]
    fn qr_rows_are_uniform_width() {
        let qr = render_qr("hello").unwrap();
        let widths: Vec<usize> = qr.lines().map(|l| l.chars().count()).collect();
        assert!(widths.len() > 5);
        assert!(widths.iter().all(|w| *w == widths[0]));
    }
}
