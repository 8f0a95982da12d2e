use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;

use super::{expiry_message, new_transactions_message, sync_failure_message, ExpiryInfo, Notifier, SyncFailureInfo};
use crate::error::{BankSyncError, Result};
use crate::models::Transaction;

/// Discord rejects webhook content longer than this.
const MAX_CONTENT_CHARS: usize = 2000;

pub struct DiscordNotifier {
    client: Client,
    webhook_url: String,
}

impl DiscordNotifier {
    pub fn new(client: Client, webhook_url: impl Into<String>) -> Self {
        Self {
            client,
            webhook_url: webhook_url.into(),
        }
    }

    async fn post(&self, content: String) -> Result<()> {
        let content: String = if content.chars().count() > MAX_CONTENT_CHARS {
            let mut cut: String = content.chars().take(MAX_CONTENT_CHARS - 1).collect();
            cut.push('…');
            cut
        } else {
            content
        };
        let resp = self
            .client
            .post(&self.webhook_url)
            .json(&json!({ "content": content }))
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
impl Notifier for DiscordNotifier {
    async fn notify_new_transactions(&self, records: &[Transaction]) -> Result<()> {
        self.post(new_transactions_message(records)).await
    }

    async fn notify_expiry(&self, info: &ExpiryInfo) -> Result<()> {
        self.post(expiry_message(info)).await
    }

    async fn notify_sync_failure(&self, info: &SyncFailureInfo) -> Result<()> {
        self.post(sync_failure_message(info)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SyncTrigger;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn failure() -> SyncFailureInfo {
        SyncFailureInfo {
            trigger: SyncTrigger::Scheduled,
            attempts: 4,
            last_error: "timeout".into(),
        }
    }

    #[tokio::test]
    async fn test_posts_content_to_webhook() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/webhook"))
            .and(body_json(json!({"content": "scheduled sync failed after 4 attempt(s): timeout"})))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let notifier = DiscordNotifier::new(Client::new(), format!("{}/webhook", server.uri()));
        notifier.notify_sync_failure(&failure()).await.unwrap();
    }

    #[tokio::test]
    async fn test_rejected_webhook_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(404).set_body_string("Unknown Webhook"))
            .mount(&server)
            .await;

        let notifier = DiscordNotifier::new(Client::new(), format!("{}/webhook", server.uri()));
        let err = notifier.notify_sync_failure(&failure()).await.unwrap_err();
        assert!(matches!(err, BankSyncError::Upstream { status: 404, .. }));
    }
}
