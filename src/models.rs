use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::BankSyncError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub id: String,
    pub institution_id: Option<String>,
    pub status: Option<String>,
    pub iban: Option<String>,
    pub name: Option<String>,
    pub display_name: Option<String>,
    pub currency: Option<String>,
    pub logo: Option<String>,
    pub created: Option<String>,
    pub last_accessed: Option<String>,
    pub last_updated: Option<String>,
}

impl Account {
    /// User-facing label: display name, then upstream name, then id.
    pub fn label(&self) -> &str {
        self.display_name
            .as_deref()
            .or(self.name.as_deref())
            .unwrap_or(&self.id)
    }
}

/// Account fields as reported by upstream. `display_name` is only written
/// when explicitly set.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AccountUpsert {
    pub id: String,
    pub institution_id: Option<String>,
    pub status: Option<String>,
    pub iban: Option<String>,
    pub name: Option<String>,
    pub display_name: Option<String>,
    pub currency: Option<String>,
    pub logo: Option<String>,
    pub created: Option<String>,
    pub last_accessed: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Balance {
    pub account_id: String,
    pub balance_type: String,
    pub amount: f64,
    pub currency: Option<String>,
    /// RFC 3339 UTC, second precision.
    pub timestamp: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
    Booked,
    Pending,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Booked => "booked",
            Self::Pending => "pending",
        }
    }
}

impl FromStr for TransactionStatus {
    type Err = BankSyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "booked" => Ok(Self::Booked),
            "pending" => Ok(Self::Pending),
            other => Err(BankSyncError::Other(format!("Unknown transaction status: {other}"))),
        }
    }
}

/// Canonical transaction keyed by (account_id, transaction_id).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Transaction {
    pub account_id: String,
    pub transaction_id: String,
    pub internal_transaction_id: Option<String>,
    pub institution_id: Option<String>,
    pub iban: Option<String>,
    /// YYYY-MM-DD
    pub date: String,
    pub description: String,
    pub amount: f64,
    pub currency: Option<String>,
    pub status: TransactionStatus,
    pub raw: serde_json::Value,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Enrichment {
    pub account_id: String,
    pub transaction_id: String,
    pub clean_name: Option<String>,
    pub category: Option<String>,
    pub logo: Option<String>,
}

/// A stored transaction together with its optional enrichment overlay.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransactionRecord {
    pub transaction: Transaction,
    pub enrichment: Option<Enrichment>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncTrigger {
    Manual,
    Scheduled,
    Retry,
    Api,
}

impl SyncTrigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Manual => "manual",
            Self::Scheduled => "scheduled",
            Self::Retry => "retry",
            Self::Api => "api",
        }
    }
}

impl fmt::Display for SyncTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyncTrigger {
    type Err = BankSyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "manual" => Ok(Self::Manual),
            "scheduled" => Ok(Self::Scheduled),
            "retry" => Ok(Self::Retry),
            "api" => Ok(Self::Api),
            other => Err(BankSyncError::Other(format!("Unknown sync trigger: {other}"))),
        }
    }
}

/// Audit record for one sync pass. Written once, never updated.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncOperation {
    pub id: Option<i64>,
    pub started_at: String,
    pub ended_at: String,
    pub success: bool,
    pub accounts_processed: u32,
    pub transactions_added: u32,
    pub transactions_updated: u32,
    pub balances_updated: u32,
    pub errors: Vec<String>,
    pub logs: Vec<String>,
    pub trigger: SyncTrigger,
    pub retry_attempt: u32,
}

/// Derived balance at the end of a given day.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BalancePoint {
    pub date: String,
    pub balance: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_label_prefers_display_name() {
        let mut acct = Account {
            id: "acc-1".into(),
            institution_id: None,
            status: None,
            iban: None,
            name: Some("Main".into()),
            display_name: None,
            currency: None,
            logo: None,
            created: None,
            last_accessed: None,
            last_updated: None,
        };
        assert_eq!(acct.label(), "Main");
        acct.display_name = Some("Household".into());
        assert_eq!(acct.label(), "Household");
        acct.display_name = None;
        acct.name = None;
        assert_eq!(acct.label(), "acc-1");
    }

    #[test]
    fn test_trigger_parse() {
        assert_eq!("retry".parse::<SyncTrigger>().unwrap(), SyncTrigger::Retry);
        assert!("cron".parse::<SyncTrigger>().is_err());
        assert_eq!("pending".parse::<TransactionStatus>().unwrap(), TransactionStatus::Pending);
    }
}
