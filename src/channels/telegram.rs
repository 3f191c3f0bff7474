//! Telegram Bot API channels.
//!
//! `TelegramListener` long-polls `getUpdates` and turns channel posts and
//! messages into `SourceMessage`s. `TelegramDelivery` sends outbound codes
//! with `sendMessage`. Each listener token is an independent producer; the
//! same source post seen by two bots is two messages.

use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;

use crate::cache::snapshot::ChannelId;
use crate::channels::{Delivery, MessageStream, SourceChannel};
use crate::error::ChannelError;
use crate::pipeline::types::SourceMessage;

const API_BASE: &str = "https://api.telegram.org";

/// Long-poll timeout passed to `getUpdates`, in seconds.
const POLL_TIMEOUT_SECS: u64 = 30;

/// Pause after a failed poll before trying again.
const POLL_BACKOFF: Duration = Duration::from_secs(5);

fn api_url(token: &SecretString, method: &str) -> String {
    format!("{API_BASE}/bot{}/{method}", token.expose_secret())
}

// ── Ingestion ───────────────────────────────────────────────────────

/// One listener bot.
pub struct TelegramListener {
    name: String,
    bot_token: SecretString,
    client: reqwest::Client,
}

impl TelegramListener {
    pub fn new(name: impl Into<String>, bot_token: SecretString) -> Self {
        Self {
            name: name.into(),
            bot_token,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl SourceChannel for TelegramListener {
    fn name(&self) -> &str {
        &self.name
    }

    async fn start(&self) -> Result<MessageStream, ChannelError> {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        let name = self.name.clone();
        let url = api_url(&self.bot_token, "getUpdates");
        let client = self.client.clone();

        tokio::spawn(async move {
            let mut offset: i64 = 0;

            tracing::info!(listener = %name, "Telegram listener polling for updates");

            loop {
                let body = serde_json::json!({
                    "offset": offset,
                    "timeout": POLL_TIMEOUT_SECS,
                    "allowed_updates": ["message", "channel_post"]
                });

                let resp = match client.post(&url).json(&body).send().await {
                    Ok(r) => r,
                    Err(e) => {
                        tracing::warn!(listener = %name, "Telegram poll error: {e}");
                        tokio::time::sleep(POLL_BACKOFF).await;
                        continue;
                    }
                };

                let data: Value = match resp.json().await {
                    Ok(d) => d,
                    Err(e) => {
                        tracing::warn!(listener = %name, "Telegram parse error: {e}");
                        tokio::time::sleep(POLL_BACKOFF).await;
                        continue;
                    }
                };

                if data.get("ok").and_then(Value::as_bool) != Some(true) {
                    // 409 when another poller holds the same token.
                    let description = data
                        .get("description")
                        .and_then(Value::as_str)
                        .unwrap_or("");
                    tracing::warn!(listener = %name, description, "Telegram getUpdates rejected");
                    tokio::time::sleep(POLL_BACKOFF).await;
                    continue;
                }

                let Some(results) = data.get("result").and_then(Value::as_array) else {
                    continue;
                };

                for update in results {
                    // Advance offset past this update
                    if let Some(uid) = update.get("update_id").and_then(Value::as_i64) {
                        offset = uid + 1;
                    }

                    let Some(msg) = parse_update(update) else {
                        continue;
                    };

                    if tx.send(msg).is_err() {
                        tracing::info!(listener = %name, "Telegram listener channel closed");
                        return;
                    }
                }
            }
        });

        let stream = futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|msg| (msg, rx))
        });

        Ok(Box::pin(stream))
    }

    async fn health_check(&self) -> Result<(), ChannelError> {
        get_me(&self.client, &self.bot_token, &self.name).await
    }
}

// ── Delivery ────────────────────────────────────────────────────────

/// Delivery bot posting into target channels.
pub struct TelegramDelivery {
    bot_token: SecretString,
    client: reqwest::Client,
}

impl TelegramDelivery {
    pub fn new(bot_token: SecretString) -> Self {
        Self {
            bot_token,
            client: reqwest::Client::new(),
        }
    }

    pub async fn health_check(&self) -> Result<(), ChannelError> {
        get_me(&self.client, &self.bot_token, "telegram").await
    }
}

#[async_trait]
impl Delivery for TelegramDelivery {
    fn name(&self) -> &str {
        "telegram"
    }

    async fn send(&self, target_id: ChannelId, text: &str) -> Result<(), ChannelError> {
        let resp = self
            .client
            .post(api_url(&self.bot_token, "sendMessage"))
            .json(&send_body(target_id, text))
            .send()
            .await
            .map_err(|e| ChannelError::Http(e.to_string()))?;

        let status = resp.status();
        if status.is_success() {
            return Ok(());
        }

        let body: Value = resp.json().await.unwrap_or(Value::Null);
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(ChannelError::RateLimited {
                name: "telegram".into(),
                retry_after: retry_after(&body),
            });
        }

        Err(ChannelError::SendFailed {
            name: "telegram".into(),
            reason: format!(
                "sendMessage returned {status}: {}",
                body.get("description").and_then(Value::as_str).unwrap_or("no description")
            ),
        })
    }
}

// ── Helpers ─────────────────────────────────────────────────────────

async fn get_me(
    client: &reqwest::Client,
    token: &SecretString,
    name: &str,
) -> Result<(), ChannelError> {
    let resp = client
        .get(api_url(token, "getMe"))
        .send()
        .await
        .map_err(|e| ChannelError::StartupFailed {
            name: name.into(),
            reason: e.to_string(),
        })?;

    if resp.status().is_success() {
        Ok(())
    } else {
        Err(ChannelError::StartupFailed {
            name: name.into(),
            reason: format!("getMe returned {}", resp.status()),
        })
    }
}

/// Build a `SourceMessage` from one `getUpdates` entry.
///
/// Accepts `message` and `channel_post` updates carrying text or a caption.
fn parse_update(update: &Value) -> Option<SourceMessage> {
    let post = update
        .get("channel_post")
        .or_else(|| update.get("message"))?;

    let text = post
        .get("text")
        .or_else(|| post.get("caption"))
        .and_then(Value::as_str)?;

    let chat_id = post
        .get("chat")
        .and_then(|c| c.get("id"))
        .and_then(Value::as_i64)?;

    Some(SourceMessage::new(chat_id, text))
}

fn send_body(target_id: ChannelId, text: &str) -> Value {
    serde_json::json!({
        "chat_id": target_id,
        "text": escape_markdown_v2(text),
        "parse_mode": "MarkdownV2",
        "disable_web_page_preview": true
    })
}

/// Escape `text` for `MarkdownV2` so it renders exactly as written.
///
/// Backtick pairs stay code spans, inside which only `\` needs escaping. Everywhere else every reserved character is escaped, so codes
/// and links containing `_` or `*` cannot open an entity.
fn escape_markdown_v2(text: &str) -> String {
    const RESERVED: &str = "_*[]()~`>#+-=|{}.!\\";

    let mut out = String::with_capacity(text.len() + text.len() / 4);
    let mut in_code = false;
    let mut chars = text.chars();

    while let Some(c) = chars.next() {
        if c == '`' {
            // Only a backtick with a partner opens a span.
            if in_code || chars.clone().any(|n| n == '`') {
                in_code = !in_code;
                out.push(c);
                continue;
            }
            out.push('\\');
            out.push(c);
            continue;
        }

        let reserved = if in_code { c == '\\' } else { RESERVED.contains(c) };
        if reserved {
            out.push('\\');
        }
        out.push(c);
    }

    out
}

fn retry_after(body: &Value) -> Option<Duration> {
    body.get("parameters")
        .and_then(|p| p.get("retry_after"))
        .and_then(Value::as_u64)
        .map(Duration::from_secs)
}

// ── Tests ───────────────────────────────────────────────────────────
