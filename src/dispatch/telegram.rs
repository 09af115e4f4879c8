//! 📱 Telegram Bot API delivery
//!
//! Plain `sendMessage` calls in HTML parse mode with a minimum delay between
//! messages so fan-out to many groups stays under the bot rate limit.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::info;

use super::Notifier;

const TELEGRAM_API_URL: &str = "https://api.telegram.org";

pub struct TelegramNotifier {
    client: Client,
    bot_token: String,
    admin_chat_id: i64,
    /// Rate limiting: last message timestamp
    last_message_time: Arc<Mutex<Instant>>,
    min_message_delay: Duration,
}

impl TelegramNotifier {
    pub fn new(bot_token: String, admin_chat_id: i64, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build Telegram HTTP client")?;

        Ok(Self {
            client,
            bot_token,
            admin_chat_id,
            last_message_time: Arc::new(Mutex::new(
                Instant::now()
                    .checked_sub(Duration::from_secs(1))
                    .unwrap_or_else(Instant::now),
            )),
            min_message_delay: Duration::from_millis(100),
        })
    }

    async fn send_message(&self, chat_id: i64, text: &str) -> Result<()> {
        {
            let mut last_time = self.last_message_time.lock().await;
            let elapsed = last_time.elapsed();
            if elapsed < self.min_message_delay {
                tokio::time::sleep(self.min_message_delay - elapsed).await;
            }
            *last_time = Instant::now();
        }

        let url = format!("{}/bot{}/sendMessage", TELEGRAM_API_URL, self.bot_token);
        let payload = json!({
            "chat_id": chat_id,
            "text": text,
            "parse_mode": "HTML",
            "disable_web_page_preview": true
        });

        let response = self
            .client
            .post(&url)
            .json(&payload)
            .send()
            .await
            .context("Telegram request failed")?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            anyhow::bail!("Telegram API error ({}): {}", status, error_text);
        }

        Ok(())
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn send_alert(&self, chat_id: i64, text: &str) -> Result<()> {
        self.send_message(chat_id, text).await
    }

    async fn send_admin(&self, text: &str) -> Result<()> {
        if self.admin_chat_id == 0 {
            info!("📣 {}", text);
            return Ok(());
        }
        self.send_message(self.admin_chat_id, text).await
    }
}

/// Writes alerts to the log; used when no bot token is configured
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send_alert(&self, chat_id: i64, text: &str) -> Result<()> {
        info!("📣 [chat {}]\n{}", chat_id, text);
        Ok(())
    }

    async fn send_admin(&self, text: &str) -> Result<()> {
        info!("📣 [admin] {}", text);
        Ok(())
    }
}
