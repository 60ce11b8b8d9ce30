//! Telegram Bot API transport.
//!
//! The notifier only needs "send text to a named chat"; that seam is the
//! [`MessageSink`] trait so tests can swap in a recording sink.

use std::future::Future;
use std::time::Duration;

use anyhow::{bail, Result};
use serde_json::json;
use tracing::debug;

/// Outbound delivery seam. One failed recipient must not poison the
/// fan-out, so callers handle errors per send.
pub trait MessageSink: Send + Sync {
    fn send(&self, chat_id: &str, text: &str) -> impl Future<Output = Result<()>> + Send;
}

impl<T: MessageSink + ?Sized> MessageSink for std::sync::Arc<T> {
    fn send(&self, chat_id: &str, text: &str) -> impl Future<Output = Result<()>> + Send {
        (**self).send(chat_id, text)
    }
}

pub struct TelegramClient {
    client: reqwest::Client,
    base_url: String,
}

impl TelegramClient {
    pub fn new(api_url: &str, token: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: format!("{}/bot{}", api_url.trim_end_matches('/'), token),
        })
    }

    async fn call(&self, method: &str, body: serde_json::Value) -> Result<()> {
        let resp = self
            .client
            .post(format!("{}/{}", self.base_url, method))
            .json(&body)
            .send()
            .await?;
        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            bail!("telegram {method} {status}: {text}");
        }
        Ok(())
    }

    /// Send an HTML-formatted message to one chat.
    pub async fn send_message(&self, chat_id: &str, text: &str) -> Result<()> {
        debug!(chat_id, "sending message");
        self.call(
            "sendMessage",
            json!({
                "chat_id": chat_id,
                "text": text,
                "parse_mode": "HTML",
                "disable_web_page_preview": true,
            }),
        )
        .await
    }

    /// Register the bot's command menu with Telegram.
    pub async fn set_my_commands(&self) -> Result<()> {
        self.call(
            "setMyCommands",
            json!({
                "commands": [
                    { "command": "watch", "description": "Start watching: /watch <id> [dot|ksm]" },
                    { "command": "watchdot", "description": "Watch on Polkadot: /watchdot <id>" },
                    { "command": "watchksm", "description": "Watch on Kusama: /watchksm <id>" },
                    { "command": "unwatch", "description": "Stop watching: /unwatch <id> [dot|ksm]" },
                    { "command": "list", "description": "List watched referenda (with chain)" },
                    { "command": "clear", "description": "Clear all subscriptions" },
                    { "command": "id", "description": "Show this chat id" },
                    { "command": "help", "description": "Show help" }
                ],
                "scope": { "type": "default" },
            }),
        )
        .await
    }
}

impl MessageSink for TelegramClient {
    async fn send(&self, chat_id: &str, text: &str) -> Result<()> {
        self.send_message(chat_id, text).await
    }
}
