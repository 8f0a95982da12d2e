use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;

use super::{expiry_message, new_transactions_message, sync_failure_message, ExpiryInfo, Notifier, SyncFailureInfo};
use crate::error::{BankSyncError, Result};
use crate::models::Transaction;

pub const TELEGRAM_API: &str = "https://api.telegram.org";

pub struct TelegramNotifier {
    client: Client,
    api_base: String,
    bot_token: String,
    chat_id: String,
}

impl TelegramNotifier {
    pub fn new(client: Client, bot_token: impl Into<String>, chat_id: impl Into<String>) -> Self {
        Self {
            client,
            api_base: TELEGRAM_API.to_string(),
            bot_token: bot_token.into(),
            chat_id: chat_id.into(),
        }
    }

    async fn send(&self, text: String) -> Result<()> {
        let url = format!("{}/bot{}/sendMessage", self.api_base, self.bot_token);
        let resp = self
            .client
            .post(url)
            .json(&json!({ "chat_id": self.chat_id, "text": text }))
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(BankSyncError::Upstream { status: status.as_u16(), body });
        }
        Ok(())
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn notify_new_transactions(&self, records: &[Transaction]) -> Result<()> {
        self.send(new_transactions_message(records)).await
    }

    async fn notify_expiry(&self, info: &ExpiryInfo) -> Result<()> {
        self.send(expiry_message(info)).await
    }

    async fn notify_sync_failure(&self, info: &SyncFailureInfo) -> Result<()> {
        self.send(sync_failure_message(info)).await
    }
}
