//! Outbound notifications. Delivery is fire-and-forget for callers: the
//! `Notifiers` fan-out logs adapter failures and always succeeds.

#[cfg(feature = "discord")]
pub mod discord;
pub mod filter;
#[cfg(feature = "telegram")]
pub mod telegram;

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::error::Result;
use crate::fmt::money;
use crate::models::{SyncTrigger, Transaction};

/// An upstream authorisation that is about to lapse.
#[derive(Debug, Clone, PartialEq)]
pub struct ExpiryInfo {
    pub requisition_id: String,
    pub institution_id: Option<String>,
    pub days_remaining: i64,
    pub expires_at: String,
    pub link: Option<String>,
}

/// A scheduled cycle that exhausted its retries.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncFailureInfo {
    pub trigger: SyncTrigger,
    pub attempts: u32,
    pub last_error: String,
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify_new_transactions(&self, records: &[Transaction]) -> Result<()>;
    async fn notify_expiry(&self, info: &ExpiryInfo) -> Result<()>;
    async fn notify_sync_failure(&self, info: &SyncFailureInfo) -> Result<()>;
}

pub fn new_transactions_message(records: &[Transaction]) -> String {
    let mut lines = vec![format!("{} new transaction(s)", records.len())];
    for txn in records {
        lines.push(format!(
            "{} {} {}",
            txn.date,
            money(txn.amount, txn.currency.as_deref()),
            txn.description
        ));
    }
    lines.join("\n")
}

pub fn expiry_message(info: &ExpiryInfo) -> String {
    let mut msg = format!(
        "Bank connection {} ({}) expires in {} day(s) on {}.",
        info.requisition_id,
        info.institution_id.as_deref().unwrap_or("unknown institution"),
        info.days_remaining,
        info.expires_at
    );
    if let Some(link) = &info.link {
        msg.push_str(&format!(" Re-authorise: {link}"));
    }
    msg
}

pub fn sync_failure_message(info: &SyncFailureInfo) -> String {
    format!(
        "{} sync failed after {} attempt(s): {}",
        info.trigger, info.attempts, info.last_error
    )
}

/// Writes notifications to the log only.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify_new_transactions(&self, records: &[Transaction]) -> Result<()> {
        info!(count = records.len(), "{}", new_transactions_message(records));
        Ok(())
    }

    async fn notify_expiry(&self, info: &ExpiryInfo) -> Result<()> {
        warn!("{}", expiry_message(info));
        Ok(())
    }

    async fn notify_sync_failure(&self, info: &SyncFailureInfo) -> Result<()> {
        warn!("{}", sync_failure_message(info));
        Ok(())
    }
}

/// Fans a notification out to every adapter. One adapter failing never
/// affects the others or the caller.
#[derive(Clone, Default)]
pub struct Notifiers {
    adapters: Vec<(&'static str, Arc<dyn Notifier>)>,
}

impl Notifiers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: &'static str, adapter: Arc<dyn Notifier>) -> Self {
        self.adapters.push((name, adapter));
        self
    }

    /// Adapter names in registration order.
    pub fn names(&self) -> Vec<&'static str> {
        self.adapters.iter().map(|(name, _)| *name).collect()
    }
}

#[async_trait]
impl Notifier for Notifiers {
    async fn notify_new_transactions(&self, records: &[Transaction]) -> Result<()> {
        for (name, adapter) in &self.adapters {
            if let Err(e) = adapter.notify_new_transactions(records).await {
                warn!(notifier = *name, error = %e, "new transaction notification failed");
            }
        }
        Ok(())
    }

    async fn notify_expiry(&self, info: &ExpiryInfo) -> Result<()> {
        for (name, adapter) in &self.adapters {
            if let Err(e) = adapter.notify_expiry(info).await {
                warn!(notifier = *name, error = %e, "expiry notification failed");
            }
        }
        Ok(())
    }

    async fn notify_sync_failure(&self, info: &SyncFailureInfo) -> Result<()> {
        for (name, adapter) in &self.adapters {
            if let Err(e) = adapter.notify_sync_failure(info).await {
                warn!(notifier = *name, error = %e, "sync failure notification failed");
            }
        }
        Ok(())
    }
}


#[cfg(test)]
mod tests {
    use super::testing::RecordingNotifier;
    use super::*;
    use crate::models::TransactionStatus;

    fn txn(id: &str) -> Transaction {
        Transaction {
            account_id: "acc-1".into(),
            transaction_id: id.into(),
            internal_transaction_id: None,
            institution_id: None,
            iban: None,
            date: "2024-01-15".into(),
            description: "Grocer".into(),
            amount: -1234.5,
            currency: Some("EUR".into()),
            status: TransactionStatus::Booked,
            raw: serde_json::Value::Null,
        }
    }

    #[test]
    fn test_new_transactions_message() {
        let msg = new_transactions_message(&[txn("a")]);
        assert_eq!(msg, "1 new transaction(s)\n2024-01-15 -1,234.50 EUR Grocer");
    }

    #[test]
    fn test_expiry_message_includes_link() {
        let info = ExpiryInfo {
            requisition_id: "req-1".into(),
            institution_id: Some("BANK_X".into()),
            days_remaining: 3,
            expires_at: "2024-04-01".into(),
            link: Some("https://example.test/link".into()),
        };
        assert_eq!(
            expiry_message(&info),
            "Bank connection req-1 (BANK_X) expires in 3 day(s) on 2024-04-01. Re-authorise: https://example.test/link"
        );
    }

    #[tokio::test]
    async fn test_fan_out_isolates_failures() {
        let failing = Arc::new(RecordingNotifier { fail: true, ..RecordingNotifier::default() });
        let healthy = Arc::new(RecordingNotifier::default());
        let notifiers = Notifiers::new()
            .with("failing", failing.clone())
            .with("healthy", healthy.clone());

        notifiers.notify_new_transactions(&[txn("a")]).await.unwrap();
        notifiers
            .notify_sync_failure(&SyncFailureInfo {
                trigger: SyncTrigger::Scheduled,
                attempts: 4,
                last_error: "boom".into(),
            })
            .await
            .unwrap();

        assert_eq!(failing.new_transactions.lock().unwrap().len(), 1);
        assert_eq!(healthy.new_transactions.lock().unwrap().as_slice(), &[vec!["a".to_string()]]);
        assert_eq!(healthy.failures.lock().unwrap()[0].attempts, 4);
        assert_eq!(notifiers.names(), vec!["failing", "healthy"]);
    }
}
