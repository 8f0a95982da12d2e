//! Translation of upstream aggregator payloads into canonical records.
//!
//! This is the only module that knows the vendor's JSON field names.

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::error::{BankSyncError, Result};
use crate::fmt::{iso_timestamp, normalize_timestamp, parse_date};
use crate::models::{AccountUpsert, Balance, Transaction, TransactionStatus};

/// Metadata of the account that owns a batch of transactions.
#[derive(Debug, Clone, Default)]
pub struct AccountContext {
    pub account_id: String,
    pub institution_id: Option<String>,
    pub iban: Option<String>,
}

impl From<&AccountUpsert> for AccountContext {
    fn from(acct: &AccountUpsert) -> Self {
        Self {
            account_id: acct.id.clone(),
            institution_id: acct.institution_id.clone(),
            iban: acct.iban.clone(),
        }
    }
}

/// Records that reconciled, plus the per-record failures that were skipped.
#[derive(Debug, Default)]
pub struct ReconciledBatch {
    pub transactions: Vec<Transaction>,
    pub rejected: Vec<BankSyncError>,
}

fn non_empty_str<'a>(raw: &'a Value, key: &str) -> Option<&'a str> {
    raw.get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

fn parse_amount(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// The upstream's stable transaction id, or the legacy internal id when that
/// is all the record carries.
pub fn transaction_identity(raw: &Value) -> Option<&str> {
    non_empty_str(raw, "transactionId").or_else(|| non_empty_str(raw, "internalTransactionId"))
}

fn transaction_date(raw: &Value, id: &str) -> Result<String> {
    let booking = non_empty_str(raw, "bookingDate")
        .or_else(|| non_empty_str(raw, "bookingDateTime"))
        .and_then(parse_date);
    let value = non_empty_str(raw, "valueDate")
        .or_else(|| non_empty_str(raw, "valueDateTime"))
        .and_then(parse_date);
    let date = match (booking, value) {
        (Some(b), Some(v)) => b.min(v),
        (Some(d), None) | (None, Some(d)) => d,
        (None, None) => return Err(BankSyncError::MissingDate(id.to_string())),
    };
    Ok(date.format("%Y-%m-%d").to_string())
}

fn description(raw: &Value) -> String {
    if let Some(desc) = non_empty_str(raw, "remittanceInformationUnstructured") {
        return desc.to_string();
    }
    if let Some(lines) = raw
        .get("remittanceInformationUnstructuredArray")
        .and_then(Value::as_array)
    {
        let joined = lines
            .iter()
            .filter_map(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join(" ");
        if !joined.is_empty() {
            return joined;
        }
    }
    non_empty_str(raw, "creditorName")
        .or_else(|| non_empty_str(raw, "debtorName"))
        .or_else(|| non_empty_str(raw, "additionalInformation"))
        .unwrap_or_default()
        .to_string()
}

/// Reconcile one raw upstream transaction into its canonical form.
pub fn reconcile_transaction(
    raw: &Value,
    account: &AccountContext,
    status: TransactionStatus,
) -> Result<Transaction> {
    let transaction_id = transaction_identity(raw).ok_or(BankSyncError::MissingIdentity)?;
    let date = transaction_date(raw, transaction_id)?;
    let amount_obj = raw.get("transactionAmount");
    let amount = amount_obj
        .and_then(|a| a.get("amount"))
        .and_then(parse_amount)
        .ok_or_else(|| BankSyncError::Other(format!("Transaction {transaction_id} has no amount")))?;
    let currency = amount_obj
        .and_then(|a| non_empty_str(a, "currency"))
        .map(str::to_string);

    Ok(Transaction {
        account_id: account.account_id.clone(),
        transaction_id: transaction_id.to_string(),
        internal_transaction_id: non_empty_str(raw, "internalTransactionId").map(str::to_string),
        institution_id: account.institution_id.clone(),
        iban: account.iban.clone(),
        date,
        description: description(raw),
        amount,
        currency,
        status,
        raw: raw.clone(),
    })
}

/// Reconcile a `{"transactions": {"booked": [...], "pending": [...]}}` payload.
/// Bad records are collected in `rejected` and never abort their siblings.
pub fn reconcile_transactions(payload: &Value, account: &AccountContext) -> ReconciledBatch {
    let body = payload.get("transactions").unwrap_or(payload);
    let mut batch = ReconciledBatch::default();
    for status in [TransactionStatus::Booked, TransactionStatus::Pending] {
        let Some(records) = body.get(status.as_str()).and_then(Value::as_array) else {
            continue;
        };
        for raw in records {
            match reconcile_transaction(raw, account, status) {
                Ok(txn) => batch.transactions.push(txn),
                Err(e) => batch.rejected.push(e),
            }
        }
    }
    batch
}

/// Build an account upsert from the upstream metadata payload. Details, when
/// present, are nested under `account`.
pub fn account_from_payload(account_id: &str, payload: &Value) -> AccountUpsert {
    let details = payload.get("account").unwrap_or(&Value::Null);
    let text = |v: &Value, key: &str| non_empty_str(v, key).map(str::to_string);
    AccountUpsert {
        id: account_id.to_string(),
        institution_id: text(payload, "institution_id"),
        status: text(payload, "status").or_else(|| text(details, "status")),
        iban: text(payload, "iban").or_else(|| text(details, "iban")),
        name: text(details, "name")
            .or_else(|| text(details, "product"))
            .or_else(|| text(payload, "owner_name"))
            .or_else(|| text(details, "ownerName")),
        display_name: None,
        currency: text(details, "currency"),
        logo: text(payload, "logo"),
        created: text(payload, "created").and_then(|s| normalize_timestamp(&s)),
        last_accessed: text(payload, "last_accessed").and_then(|s| normalize_timestamp(&s)),
    }
}

/// Translate a `{"balances": [...]}` payload. Rows without a usable amount
/// are dropped; rows without a timestamp get `fallback`.
pub fn balances_from_payload(
    account_id: &str,
    payload: &Value,
    fallback: DateTime<Utc>,
) -> Vec<Balance> {
    let Some(rows) = payload.get("balances").and_then(Value::as_array) else {
        return Vec::new();
    };
    rows.iter()
        .filter_map(|row| {
            let amount_obj = row.get("balanceAmount")?;
            let amount = amount_obj.get("amount").and_then(parse_amount)?;
            let balance_type = non_empty_str(row, "balanceType").unwrap_or("unknown");
            let timestamp = non_empty_str(row, "lastChangeDateTime")
                .or_else(|| non_empty_str(row, "referenceDate"))
                .and_then(normalize_timestamp)
                .unwrap_or_else(|| iso_timestamp(fallback));
            Some(Balance {
                account_id: account_id.to_string(),
                balance_type: balance_type.to_string(),
                amount,
                currency: non_empty_str(amount_obj, "currency").map(str::to_string),
                timestamp,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctx() -> AccountContext {
        AccountContext {
            account_id: "acc-1".into(),
            institution_id: Some("BANK_X".into()),
            iban: Some("DE001".into()),
        }
    }

    #[test]
    fn test_earlier_of_booking_and_value_date() {
        let raw = json!({
            "transactionId": "t1",
            "bookingDate": "2024-03-05",
            "valueDate": "2024-03-03",
            "transactionAmount": {"amount": "-12.50", "currency": "EUR"},
            "remittanceInformationUnstructured": "Coffee"
        });
        let txn = reconcile_transaction(&raw, &ctx(), TransactionStatus::Booked).unwrap();
        assert_eq!(txn.date, "2024-03-03");
        assert_eq!(txn.amount, -12.5);
        assert_eq!(txn.currency.as_deref(), Some("EUR"));
        assert_eq!(txn.description, "Coffee");
        assert_eq!(txn.institution_id.as_deref(), Some("BANK_X"));
        assert_eq!(txn.raw, raw);
    }

    #[test]
    fn test_single_date_is_used() {
        let raw = json!({
            "transactionId": "t1",
            "valueDateTime": "2024-01-09T08:00:00Z",
            "transactionAmount": {"amount": 3}
        });
        let txn = reconcile_transaction(&raw, &ctx(), TransactionStatus::Pending).unwrap();
        assert_eq!(txn.date, "2024-01-09");
        assert_eq!(txn.status, TransactionStatus::Pending);
    }

    #[test]
    fn test_description_falls_back_to_unstructured_lines() {
        let raw = json!({
            "transactionId": "t1",
            "bookingDate": "2024-01-01",
            "transactionAmount": {"amount": "1.00"},
            "remittanceInformationUnstructuredArray": ["CARD 1234", " ", "GROCER"]
        });
        let txn = reconcile_transaction(&raw, &ctx(), TransactionStatus::Booked).unwrap();
        assert_eq!(txn.description, "CARD 1234 GROCER");
    }

    #[test]
    fn test_internal_id_is_kept_as_reference() {
        let raw = json!({
            "transactionId": "stable",
            "internalTransactionId": "legacy-9",
            "bookingDate": "2024-01-01",
            "transactionAmount": {"amount": "1.00"}
        });
        let txn = reconcile_transaction(&raw, &ctx(), TransactionStatus::Booked).unwrap();
        assert_eq!(txn.transaction_id, "stable");
        assert_eq!(txn.internal_transaction_id.as_deref(), Some("legacy-9"));

        let only_internal = json!({
            "internalTransactionId": "legacy-9",
            "bookingDate": "2024-01-01",
            "transactionAmount": {"amount": "1.00"}
        });
        let txn = reconcile_transaction(&only_internal, &ctx(), TransactionStatus::Booked).unwrap();
        assert_eq!(txn.transaction_id, "legacy-9");
    }

    #[test]
    fn test_missing_identity_and_date() {
        let no_id = json!({"bookingDate": "2024-01-01", "transactionAmount": {"amount": "1"}});
        assert!(matches!(
            reconcile_transaction(&no_id, &ctx(), TransactionStatus::Booked),
            Err(BankSyncError::MissingIdentity)
        ));
        let no_date = json!({"transactionId": "t1", "transactionAmount": {"amount": "1"}});
        assert!(matches!(
            reconcile_transaction(&no_date, &ctx(), TransactionStatus::Booked),
            Err(BankSyncError::MissingDate(id)) if id == "t1"
        ));
    }

    #[test]
    fn test_bad_record_does_not_abort_batch() {
        let payload = json!({"transactions": {
            "booked": [
                {"transactionId": "a", "bookingDate": "2024-01-01", "transactionAmount": {"amount": "1"}},
                {"bookingDate": "2024-01-01", "transactionAmount": {"amount": "2"}},
                {"transactionId": "c", "bookingDate": "2024-01-02", "transactionAmount": {"amount": "3"}}
            ],
            "pending": [
                {"transactionId": "d", "valueDate": "2024-01-03", "transactionAmount": {"amount": "4"}}
            ]
        }});
        let batch = reconcile_transactions(&payload, &ctx());
        let ids: Vec<_> = batch.transactions.iter().map(|t| t.transaction_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "c", "d"]);
        assert_eq!(batch.rejected.len(), 1);
        assert_eq!(batch.transactions[2].status, TransactionStatus::Pending);
    }

    #[test]
    fn test_account_from_payload() {
        let payload = json!({
            "id": "acc-1",
            "institution_id": "BANK_X",
            "status": "READY",
            "iban": "DE001",
            "created": "2024-01-01T10:00:00.000Z",
            "account": {"currency": "EUR", "name": "Girokonto"}
        });
        let acct = account_from_payload("acc-1", &payload);
        assert_eq!(acct.currency.as_deref(), Some("EUR"));
        assert_eq!(acct.name.as_deref(), Some("Girokonto"));
        assert_eq!(acct.created.as_deref(), Some("2024-01-01T10:00:00Z"));
        assert!(acct.display_name.is_none());
    }

    #[test]
    fn test_balances_from_payload() {
        let fallback = DateTime::parse_from_rfc3339("2024-05-01T12:00:00Z").unwrap().with_timezone(&Utc);
        let payload = json!({"balances": [
            {"balanceAmount": {"amount": "350.00", "currency": "EUR"}, "balanceType": "interimAvailable", "referenceDate": "2024-04-30"},
            {"balanceAmount": {"amount": "300.00", "currency": "EUR"}, "balanceType": "closingBooked"},
            {"balanceType": "broken"}
        ]});
        let rows = balances_from_payload("acc-1", &payload, fallback);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].timestamp, "2024-04-30T00:00:00Z");
        assert_eq!(rows[1].timestamp, "2024-05-01T12:00:00Z");
        assert_eq!(rows[1].amount, 300.0);
    }
}
