//! Typed read/write operations over the migrated store.
//!
//! Every write runs in its own SQLite transaction and never spans a network
//! call; callers hand in fully reconciled records.

use chrono::Utc;
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, Value, ValueRef};
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::error::{BankSyncError, Result};
use crate::fmt::iso_timestamp;
use crate::models::{
    Account, AccountUpsert, Balance, BalancePoint, Enrichment, SyncOperation, SyncTrigger,
    Transaction, TransactionRecord, TransactionStatus,
};

// ---------------------------------------------------------------------------
// Column mapping
// ---------------------------------------------------------------------------

impl ToSql for TransactionStatus {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(self.as_str().into())
    }
}

impl FromSql for TransactionStatus {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value.as_str()?.parse().map_err(|e| FromSqlError::Other(Box::new(e)))
    }
}

impl ToSql for SyncTrigger {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(self.as_str().into())
    }
}

impl FromSql for SyncTrigger {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value.as_str()?.parse().map_err(|e| FromSqlError::Other(Box::new(e)))
    }
}

const ACCOUNT_COLUMNS: &str = "id, institution_id, status, iban, name, display_name, currency, logo, \
                               created, last_accessed, last_updated";

fn row_to_account(row: &Row) -> rusqlite::Result<Account> {
    Ok(Account {
        id: row.get(0)?,
        institution_id: row.get(1)?,
        status: row.get(2)?,
        iban: row.get(3)?,
        name: row.get(4)?,
        display_name: row.get(5)?,
        currency: row.get(6)?,
        logo: row.get(7)?,
        created: row.get(8)?,
        last_accessed: row.get(9)?,
        last_updated: row.get(10)?,
    })
}

fn row_to_balance(row: &Row) -> rusqlite::Result<Balance> {
    Ok(Balance {
        account_id: row.get(0)?,
        balance_type: row.get(1)?,
        amount: row.get(2)?,
        currency: row.get(3)?,
        timestamp: row.get(4)?,
    })
}

const TRANSACTION_COLUMNS: &str = "t.account_id, t.transaction_id, t.internal_transaction_id, \
    t.institution_id, t.iban, t.transaction_date, t.description, t.transaction_amount, \
    t.transaction_currency, t.transaction_status, t.raw_transaction";

const ENRICHMENT_JOIN: &str = "LEFT JOIN transaction_enrichments e \
    ON e.account_id = t.account_id AND e.transaction_id = t.transaction_id";

/// Stored payloads that no longer parse are surfaced as a JSON string.
fn parse_raw(raw: String) -> serde_json::Value {
    serde_json::from_str(&raw).unwrap_or(serde_json::Value::String(raw))
}

fn row_to_transaction(row: &Row) -> rusqlite::Result<Transaction> {
    Ok(Transaction {
        account_id: row.get(0)?,
        transaction_id: row.get(1)?,
        internal_transaction_id: row.get(2)?,
        institution_id: row.get(3)?,
        iban: row.get(4)?,
        date: row.get(5)?,
        description: row.get::<_, Option<String>>(6)?.unwrap_or_default(),
        amount: row.get(7)?,
        currency: row.get(8)?,
        status: row.get(9)?,
        raw: parse_raw(row.get(10)?),
    })
}

/// Transaction columns followed by `e.transaction_id, e.clean_name, e.category, e.logo`.
fn row_to_record(row: &Row) -> rusqlite::Result<TransactionRecord> {
    let transaction = row_to_transaction(row)?;
    let enrichment = match row.get::<_, Option<String>>(11)? {
        Some(_) => Some(Enrichment {
            account_id: transaction.account_id.clone(),
            transaction_id: transaction.transaction_id.clone(),
            clean_name: row.get(12)?,
            category: row.get(13)?,
            logo: row.get(14)?,
        }),
        None => None,
    };
    Ok(TransactionRecord { transaction, enrichment })
}

fn row_to_sync_operation(row: &Row) -> rusqlite::Result<SyncOperation> {
    let errors: String = row.get(8)?;
    let logs: String = row.get(9)?;
    Ok(SyncOperation {
        id: row.get(0)?,
        started_at: row.get(1)?,
        ended_at: row.get(2)?,
        success: row.get(3)?,
        accounts_processed: row.get(4)?,
        transactions_added: row.get(5)?,
        transactions_updated: row.get(6)?,
        balances_updated: row.get(7)?,
        errors: serde_json::from_str(&errors).unwrap_or_default(),
        logs: serde_json::from_str(&logs).unwrap_or_default(),
        trigger: row.get(10)?,
        retry_attempt: row.get(11)?,
    })
}

// ---------------------------------------------------------------------------
// Accounts
// ---------------------------------------------------------------------------

/// Insert or refresh an account. An existing display name survives unless
/// `data.display_name` is set.
pub fn upsert_account(conn: &Connection, data: &AccountUpsert) -> Result<()> {
    conn.execute(
        "INSERT INTO accounts (id, institution_id, status, iban, name, display_name, currency, logo, \
                               created, last_accessed, last_updated) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11) \
         ON CONFLICT(id) DO UPDATE SET \
            institution_id = COALESCE(excluded.institution_id, accounts.institution_id), \
            status = COALESCE(excluded.status, accounts.status), \
            iban = COALESCE(excluded.iban, accounts.iban), \
            name = COALESCE(excluded.name, accounts.name), \
            display_name = COALESCE(excluded.display_name, accounts.display_name), \
            currency = COALESCE(excluded.currency, accounts.currency), \
            logo = COALESCE(excluded.logo, accounts.logo), \
            created = COALESCE(accounts.created, excluded.created), \
            last_accessed = COALESCE(excluded.last_accessed, accounts.last_accessed), \
            last_updated = excluded.last_updated",
        params![
            data.id,
            data.institution_id,
            data.status,
            data.iban,
            data.name,
            data.display_name,
            data.currency,
            data.logo,
            data.created,
            data.last_accessed,
            iso_timestamp(Utc::now()),
        ],
    )?;
    Ok(())
}

/// Explicit user rename. `None` clears the display name.
pub fn set_account_display_name(conn: &Connection, account_id: &str, display_name: Option<&str>) -> Result<()> {
    let changed = conn.execute(
        "UPDATE accounts SET display_name = ?1 WHERE id = ?2",
        params![display_name, account_id],
    )?;
    if changed == 0 {
        return Err(BankSyncError::UnknownAccount(account_id.to_string()));
    }
    Ok(())
}

pub fn get_account(conn: &Connection, account_id: &str) -> Result<Option<Account>> {
    let account = conn
        .query_row(
            &format!("SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE id = ?1"),
            [account_id],
            row_to_account,
        )
        .optional()?;
    Ok(account)
}

pub fn list_accounts(conn: &Connection) -> Result<Vec<Account>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {ACCOUNT_COLUMNS} FROM accounts ORDER BY COALESCE(display_name, name, id)"
    ))?;
    let rows = stmt.query_map([], row_to_account)?;
    Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
}

// ---------------------------------------------------------------------------
// Balances
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BalanceAppendResult {
    pub inserted: usize,
    pub skipped: usize,
}

/// Append balance rows for `account_id`. Rows that repeat an existing
/// (account, type, timestamp) are counted as skipped.
pub fn append_balances(conn: &Connection, account_id: &str, rows: &[Balance]) -> Result<BalanceAppendResult> {
    let tx = conn.unchecked_transaction()?;
    let mut result = BalanceAppendResult::default();
    {
        let mut stmt = tx.prepare_cached(
            "INSERT OR IGNORE INTO balances (account_id, balance_type, amount, currency, timestamp) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
        )?;
        for row in rows {
            let changed = stmt.execute(params![account_id, row.balance_type, row.amount, row.currency, row.timestamp])?;
            if changed == 0 {
                result.skipped += 1;
            } else {
                result.inserted += 1;
            }
        }
    }
    tx.commit()?;
    Ok(result)
}

/// Latest row per balance type for one account.
pub fn current_balances(conn: &Connection, account_id: &str) -> Result<Vec<Balance>> {
    let mut stmt = conn.prepare(
        "SELECT b.account_id, b.balance_type, b.amount, b.currency, b.timestamp FROM balances b \
         WHERE b.account_id = ?1 AND b.timestamp = ( \
            SELECT MAX(timestamp) FROM balances \
            WHERE account_id = b.account_id AND balance_type = b.balance_type) \
         ORDER BY b.balance_type",
    )?;
    let rows = stmt.query_map([account_id], row_to_balance)?;
    Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
}

pub fn current_balance(conn: &Connection, account_id: &str, balance_type: &str) -> Result<Option<Balance>> {
    let balance = conn
        .query_row(
            "SELECT account_id, balance_type, amount, currency, timestamp FROM balances \
             WHERE account_id = ?1 AND balance_type = ?2 ORDER BY timestamp DESC LIMIT 1",
            [account_id, balance_type],
            row_to_balance,
        )
        .optional()?;
    Ok(balance)
}

/// Balance at the end of `date` (YYYY-MM-DD): the current balance minus every
/// transaction dated after it.
pub fn balance_at(conn: &Connection, account_id: &str, balance_type: &str, date: &str) -> Result<Option<f64>> {
    let Some(current) = current_balance(conn, account_id, balance_type)? else {
        return Ok(None);
    };
    let later: f64 = conn.query_row(
        "SELECT COALESCE(SUM(transaction_amount), 0) FROM transactions \
         WHERE account_id = ?1 AND transaction_date > ?2",
        [account_id, date],
        |row| row.get(0),
    )?;
    Ok(Some(current.amount - later))
}

/// End-of-day balance for every date that has transactions, oldest first.
pub fn historical_balances(conn: &Connection, account_id: &str, balance_type: &str) -> Result<Vec<BalancePoint>> {
    let Some(current) = current_balance(conn, account_id, balance_type)? else {
        return Ok(Vec::new());
    };
    let mut stmt = conn.prepare(
        "SELECT transaction_date, SUM(transaction_amount) FROM transactions \
         WHERE account_id = ?1 GROUP BY transaction_date ORDER BY transaction_date DESC",
    )?;
    let days = stmt
        .query_map([account_id], |row| Ok((row.get::<_, String>(0)?, row.get::<_, f64>(1)?)))?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let mut running = current.amount;
    let mut points = Vec::with_capacity(days.len());
    for (date, day_total) in days {
        points.push(BalancePoint { date, balance: running });
        running -= day_total;
    }
    points.reverse();
    Ok(points)
}

// ---------------------------------------------------------------------------
// Transactions
// ---------------------------------------------------------------------------

/// Insert or overwrite transactions keyed by (account_id, transaction_id).
/// A stored internal id is kept when the incoming record has none.
/// Returns the records whose key did not exist before this call.
pub fn upsert_transactions(conn: &Connection, account_id: &str, records: &[Transaction]) -> Result<Vec<Transaction>> {
    let tx = conn.unchecked_transaction()?;
    let mut added = Vec::new();
    {
        let mut exists = tx.prepare_cached(
            "SELECT 1 FROM transactions WHERE account_id = ?1 AND transaction_id = ?2",
        )?;
        let mut upsert = tx.prepare_cached(
            "INSERT INTO transactions (account_id, transaction_id, internal_transaction_id, institution_id, iban, \
                transaction_date, description, transaction_amount, transaction_currency, transaction_status, \
                raw_transaction) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11) \
             ON CONFLICT(account_id, transaction_id) DO UPDATE SET \
                internal_transaction_id = COALESCE(excluded.internal_transaction_id, transactions.internal_transaction_id), \
                institution_id = excluded.institution_id, \
                iban = excluded.iban, \
                transaction_date = excluded.transaction_date, \
                description = excluded.description, \
                transaction_amount = excluded.transaction_amount, \
                transaction_currency = excluded.transaction_currency, \
                transaction_status = excluded.transaction_status, \
                raw_transaction = excluded.raw_transaction",
        )?;
        for record in records {
            let is_new = !exists.exists(params![account_id, record.transaction_id])?;
            upsert.execute(params![
                account_id,
                record.transaction_id,
                record.internal_transaction_id,
                record.institution_id,
                record.iban,
                record.date,
                record.description,
                record.amount,
                record.currency,
                record.status,
                serde_json::to_string(&record.raw)?,
            ])?;
            if is_new {
                let mut stored = record.clone();
                stored.account_id = account_id.to_string();
                added.push(stored);
            }
        }
    }
    tx.commit()?;
    Ok(added)
}

pub fn get_transaction(conn: &Connection, account_id: &str, transaction_id: &str) -> Result<Option<TransactionRecord>> {
    let record = conn
        .query_row(
            &format!(
                "SELECT {TRANSACTION_COLUMNS}, e.transaction_id, e.clean_name, e.category, e.logo \
                 FROM transactions t {ENRICHMENT_JOIN} \
                 WHERE t.account_id = ?1 AND t.transaction_id = ?2"
            ),
            [account_id, transaction_id],
            row_to_record,
        )
        .optional()?;
    Ok(record)
}

/// Filters for transaction listings. Every set field narrows the result.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransactionQuery {
    pub account_id: Option<String>,
    pub from_date: Option<String>,
    pub to_date: Option<String>,
    pub min_amount: Option<f64>,
    pub max_amount: Option<f64>,
    pub search: Option<String>,
    pub status: Option<TransactionStatus>,
    pub limit: Option<u32>,
    pub offset: u32,
}

impl TransactionQuery {
    /// WHERE clause and its positional parameters.
    fn predicates(&self) -> (String, Vec<Value>) {
        let mut clauses: Vec<String> = Vec::new();
        let mut values: Vec<Value> = Vec::new();
        let mut push = |clause: &str, value: Value| {
            values.push(value);
            clauses.push(clause.replace('?', &format!("?{}", values.len())));
        };
        if let Some(account_id) = &self.account_id {
            push("t.account_id = ?", Value::Text(account_id.clone()));
        }
        if let Some(from) = &self.from_date {
            push("t.transaction_date >= ?", Value::Text(from.clone()));
        }
        if let Some(to) = &self.to_date {
            push("t.transaction_date <= ?", Value::Text(to.clone()));
        }
        if let Some(min) = self.min_amount {
            push("t.transaction_amount >= ?", Value::Real(min));
        }
        if let Some(max) = self.max_amount {
            push("t.transaction_amount <= ?", Value::Real(max));
        }
        if let Some(status) = self.status {
            push("t.transaction_status = ?", Value::Text(status.as_str().to_string()));
        }
        if let Some(search) = self.search.as_deref().filter(|s| !s.trim().is_empty()) {
            let escaped = search
                .trim()
                .replace('\\', "\\\\")
                .replace('%', "\\%")
                .replace('_', "\\_");
            push(
                "(t.description LIKE ? ESCAPE '\\' OR e.clean_name LIKE ? ESCAPE '\\')",
                Value::Text(format!("%{escaped}%")),
            );
        }
        let sql = if clauses.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", clauses.join(" AND "))
        };
        (sql, values)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TransactionPage {
    pub items: Vec<TransactionRecord>,
    pub total: u64,
}

pub fn query_transactions(conn: &Connection, query: &TransactionQuery) -> Result<TransactionPage> {
    let (where_sql, values) = query.predicates();
    let total: u64 = conn.query_row(
        &format!("SELECT COUNT(*) FROM transactions t {ENRICHMENT_JOIN} {where_sql}"),
        rusqlite::params_from_iter(values.iter()),
        |row| row.get(0),
    )?;

    let limit = query.limit.map(i64::from).unwrap_or(-1);
    let mut stmt = conn.prepare(&format!(
        "SELECT {TRANSACTION_COLUMNS}, e.transaction_id, e.clean_name, e.category, e.logo \
         FROM transactions t {ENRICHMENT_JOIN} {where_sql} \
         ORDER BY t.transaction_date DESC, t.rowid DESC LIMIT {limit} OFFSET {}",
        query.offset
    ))?;
    let items = stmt
        .query_map(rusqlite::params_from_iter(values.iter()), row_to_record)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(TransactionPage { items, total })
}

pub fn count_transactions(conn: &Connection, account_id: Option<&str>) -> Result<u64> {
    let count = match account_id {
        Some(id) => conn.query_row("SELECT COUNT(*) FROM transactions WHERE account_id = ?1", [id], |r| r.get(0))?,
        None => conn.query_row("SELECT COUNT(*) FROM transactions", [], |r| r.get(0))?,
    };
    Ok(count)
}

// ---------------------------------------------------------------------------
// Enrichments
// ---------------------------------------------------------------------------

/// Fails when the enriched transaction does not exist.
pub fn upsert_enrichment(conn: &Connection, enrichment: &Enrichment) -> Result<()> {
    conn.execute(
        "INSERT INTO transaction_enrichments (account_id, transaction_id, clean_name, category, logo, updated_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6) \
         ON CONFLICT(account_id, transaction_id) DO UPDATE SET \
            clean_name = excluded.clean_name, \
            category = excluded.category, \
            logo = excluded.logo, \
            updated_at = excluded.updated_at",
        params![
            enrichment.account_id,
            enrichment.transaction_id,
            enrichment.clean_name,
            enrichment.category,
            enrichment.logo,
            iso_timestamp(Utc::now()),
        ],
    )?;
    Ok(())
}

pub fn get_enrichment(conn: &Connection, account_id: &str, transaction_id: &str) -> Result<Option<Enrichment>> {
    let enrichment = conn
        .query_row(
            "SELECT account_id, transaction_id, clean_name, category, logo FROM transaction_enrichments \
             WHERE account_id = ?1 AND transaction_id = ?2",
            [account_id, transaction_id],
            |row| {
                Ok(Enrichment {
                    account_id: row.get(0)?,
                    transaction_id: row.get(1)?,
                    clean_name: row.get(2)?,
                    category: row.get(3)?,
                    logo: row.get(4)?,
                })
            },
        )
        .optional()?;
    Ok(enrichment)
}

// ---------------------------------------------------------------------------
// Sync operations
// ---------------------------------------------------------------------------

const SYNC_OPERATION_COLUMNS: &str = "id, started_at, ended_at, success, accounts_processed, \
    transactions_added, transactions_updated, balances_updated, errors, logs, trigger_type, retry_attempt";

/// Append an audit record and return its id. There is no update path.
pub fn record_sync_operation(conn: &Connection, op: &SyncOperation) -> Result<i64> {
    conn.execute(
        "INSERT INTO sync_operations (started_at, ended_at, success, accounts_processed, transactions_added, \
            transactions_updated, balances_updated, errors, logs, trigger_type, retry_attempt) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        params![
            op.started_at,
            op.ended_at,
            op.success,
            op.accounts_processed,
            op.transactions_added,
            op.transactions_updated,
            op.balances_updated,
            serde_json::to_string(&op.errors)?,
            serde_json::to_string(&op.logs)?,
            op.trigger,
            op.retry_attempt,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Most recent operations first.
pub fn list_sync_operations(conn: &Connection, limit: u32) -> Result<Vec<SyncOperation>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {SYNC_OPERATION_COLUMNS} FROM sync_operations ORDER BY id DESC LIMIT ?1"
    ))?;
    let rows = stmt.query_map([limit], row_to_sync_operation)?;
    Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
}

pub fn latest_sync_operation(conn: &Connection) -> Result<Option<SyncOperation>> {
    Ok(list_sync_operations(conn, 1)?.into_iter().next())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{get_connection, init_db};
    use serde_json::json;

    fn test_db() -> (tempfile::TempDir, Connection) {
        let dir = tempfile::tempdir().unwrap();
        let conn = get_connection(&dir.path().join("test.db")).unwrap();
        init_db(&conn).unwrap();
        (dir, conn)
    }

    fn account(id: &str) -> AccountUpsert {
        AccountUpsert {
            id: id.to_string(),
            institution_id: Some("BANK_X".into()),
            status: Some("READY".into()),
            name: Some("Girokonto".into()),
            currency: Some("EUR".into()),
            ..AccountUpsert::default()
        }
    }

    fn txn(id: &str, date: &str, amount: f64, description: &str) -> Transaction {
        Transaction {
            account_id: "acc-1".into(),
            transaction_id: id.into(),
            internal_transaction_id: None,
            institution_id: Some("BANK_X".into()),
            iban: None,
            date: date.into(),
            description: description.into(),
            amount,
            currency: Some("EUR".into()),
            status: TransactionStatus::Booked,
            raw: json!({"transactionId": id}),
        }
    }

    fn balance(balance_type: &str, amount: f64, timestamp: &str) -> Balance {
        Balance {
            account_id: "acc-1".into(),
            balance_type: balance_type.into(),
            amount,
            currency: Some("EUR".into()),
            timestamp: timestamp.into(),
        }
    }

    #[test]
    fn test_upsert_account_preserves_display_name() {
        let (_dir, conn) = test_db();
        upsert_account(&conn, &account("acc-1")).unwrap();
        set_account_display_name(&conn, "acc-1", Some("Household")).unwrap();

        let mut refreshed = account("acc-1");
        refreshed.status = Some("EXPIRED".into());
        upsert_account(&conn, &refreshed).unwrap();

        let stored = get_account(&conn, "acc-1").unwrap().unwrap();
        assert_eq!(stored.display_name.as_deref(), Some("Household"));
        assert_eq!(stored.status.as_deref(), Some("EXPIRED"));
        assert!(stored.last_updated.is_some());

        refreshed.display_name = Some("Joint".into());
        upsert_account(&conn, &refreshed).unwrap();
        let stored = get_account(&conn, "acc-1").unwrap().unwrap();
        assert_eq!(stored.display_name.as_deref(), Some("Joint"));
        assert_eq!(list_accounts(&conn).unwrap().len(), 1);
    }

    #[test]
    fn test_rename_unknown_account_fails() {
        let (_dir, conn) = test_db();
        assert!(matches!(
            set_account_display_name(&conn, "nope", Some("x")),
            Err(BankSyncError::UnknownAccount(_))
        ));
    }

    #[test]
    fn test_duplicate_balances_are_skipped() {
        let (_dir, conn) = test_db();
        let rows = vec![
            balance("closingBooked", 100.0, "2024-01-01T00:00:00Z"),
            balance("interimAvailable", 90.0, "2024-01-01T00:00:00Z"),
        ];
        let first = append_balances(&conn, "acc-1", &rows).unwrap();
        assert_eq!(first, BalanceAppendResult { inserted: 2, skipped: 0 });
        let second = append_balances(&conn, "acc-1", &rows).unwrap();
        assert_eq!(second, BalanceAppendResult { inserted: 0, skipped: 2 });
        let count: i64 = conn.query_row("SELECT count(*) FROM balances", [], |r| r.get(0)).unwrap();
        assert_eq!(count, 2);
    }

    #[test]
    fn test_current_balance_is_latest_timestamp() {
        let (_dir, conn) = test_db();
        append_balances(
            &conn,
            "acc-1",
            &[
                balance("closingBooked", 100.0, "2024-01-01T00:00:00Z"),
                balance("closingBooked", 150.0, "2024-01-03T00:00:00Z"),
                balance("closingBooked", 120.0, "2024-01-02T00:00:00Z"),
                balance("interimAvailable", 90.0, "2024-01-02T00:00:00Z"),
            ],
        )
        .unwrap();
        assert_eq!(current_balance(&conn, "acc-1", "closingBooked").unwrap().unwrap().amount, 150.0);
        let current = current_balances(&conn, "acc-1").unwrap();
        let summary: Vec<_> = current.iter().map(|b| (b.balance_type.as_str(), b.amount)).collect();
        assert_eq!(summary, vec![("closingBooked", 150.0), ("interimAvailable", 90.0)]);
    }

    #[test]
    fn test_upsert_transactions_reports_only_new_rows() {
        let (_dir, conn) = test_db();
        let batch = vec![txn("a", "2024-01-01", -5.0, "A"), txn("b", "2024-01-02", -6.0, "B")];
        let first = upsert_transactions(&conn, "acc-1", &batch).unwrap();
        assert_eq!(first.len(), 2);
        let second = upsert_transactions(&conn, "acc-1", &batch).unwrap();
        assert!(second.is_empty());
        assert_eq!(count_transactions(&conn, Some("acc-1")).unwrap(), 2);

        let mixed = vec![txn("b", "2024-01-02", -7.5, "B updated"), txn("c", "2024-01-03", 1.0, "C")];
        let added = upsert_transactions(&conn, "acc-1", &mixed).unwrap();
        let ids: Vec<_> = added.iter().map(|t| t.transaction_id.as_str()).collect();
        assert_eq!(ids, vec!["c"]);
        let b = get_transaction(&conn, "acc-1", "b").unwrap().unwrap();
        assert_eq!(b.transaction.amount, -7.5);
        assert_eq!(b.transaction.description, "B updated");
        assert_eq!(b.transaction.raw, json!({"transactionId": "b"}));
    }

    #[test]
    fn test_same_id_on_different_accounts_is_distinct() {
        let (_dir, conn) = test_db();
        upsert_transactions(&conn, "acc-1", &[txn("a", "2024-01-01", 1.0, "A")]).unwrap();
        let added = upsert_transactions(&conn, "acc-2", &[txn("a", "2024-01-01", 1.0, "A")]).unwrap();
        assert_eq!(added.len(), 1);
        assert_eq!(added[0].account_id, "acc-2");
        assert_eq!(count_transactions(&conn, None).unwrap(), 2);
    }

    #[test]
    fn test_enrichment_survives_reingestion() {
        let (_dir, conn) = test_db();
        upsert_transactions(&conn, "acc-1", &[txn("a", "2024-01-01", -3.0, "AMZN MKTP")]).unwrap();
        upsert_enrichment(
            &conn,
            &Enrichment {
                account_id: "acc-1".into(),
                transaction_id: "a".into(),
                clean_name: Some("Amazon".into()),
                category: Some("Shopping".into()),
                logo: None,
            },
        )
        .unwrap();
        upsert_transactions(&conn, "acc-1", &[txn("a", "2024-01-01", -3.5, "AMZN MKTP")]).unwrap();

        let record = get_transaction(&conn, "acc-1", "a").unwrap().unwrap();
        assert_eq!(record.enrichment.unwrap().clean_name.as_deref(), Some("Amazon"));
        assert!(get_enrichment(&conn, "acc-1", "a").unwrap().is_some());
    }

    #[test]
    fn test_enrichment_cascades_on_delete_and_requires_transaction() {
        let (_dir, conn) = test_db();
        let enrichment = Enrichment {
            account_id: "acc-1".into(),
            transaction_id: "a".into(),
            category: Some("Food".into()),
            ..Enrichment::default()
        };
        assert!(upsert_enrichment(&conn, &enrichment).is_err());

        upsert_transactions(&conn, "acc-1", &[txn("a", "2024-01-01", -3.0, "Lunch")]).unwrap();
        upsert_enrichment(&conn, &enrichment).unwrap();
        conn.execute("DELETE FROM transactions WHERE transaction_id = 'a'", []).unwrap();
        assert!(get_enrichment(&conn, "acc-1", "a").unwrap().is_none());
    }

    #[test]
    fn test_query_filters_and_pagination() {
        let (_dir, conn) = test_db();
        upsert_transactions(
            &conn,
            "acc-1",
            &[
                txn("a", "2024-01-01", -10.0, "Coffee Shop"),
                txn("b", "2024-01-05", -50.0, "Grocery"),
                txn("c", "2024-01-10", 2000.0, "Salary"),
                txn("d", "2024-02-01", -12.0, "coffee 100%"),
            ],
        )
        .unwrap();
        upsert_transactions(&conn, "acc-2", &[txn("e", "2024-01-03", -1.0, "Coffee")]).unwrap();

        let mut query = TransactionQuery {
            account_id: Some("acc-1".into()),
            ..TransactionQuery::default()
        };
        query.search = Some("coffee".into());
        let page = query_transactions(&conn, &query).unwrap();
        assert_eq!(page.total, 2);
        assert_eq!(page.items[0].transaction.transaction_id, "d");

        let query = TransactionQuery {
            from_date: Some("2024-01-02".into()),
            to_date: Some("2024-01-31".into()),
            ..TransactionQuery::default()
        };
        let ids: Vec<_> = query_transactions(&conn, &query)
            .unwrap()
            .items
            .into_iter()
            .map(|r| r.transaction.transaction_id)
            .collect();
        assert_eq!(ids, vec!["c", "b", "e"]);

        let query = TransactionQuery {
            account_id: Some("acc-1".into()),
            min_amount: Some(-20.0),
            max_amount: Some(0.0),
            ..TransactionQuery::default()
        };
        assert_eq!(query_transactions(&conn, &query).unwrap().total, 2);

        let query = TransactionQuery {
            search: Some("100%".into()),
            ..TransactionQuery::default()
        };
        assert_eq!(query_transactions(&conn, &query).unwrap().total, 1);

        let query = TransactionQuery {
            account_id: Some("acc-1".into()),
            limit: Some(2),
            offset: 1,
            ..TransactionQuery::default()
        };
        let page = query_transactions(&conn, &query).unwrap();
        assert_eq!(page.total, 4);
        let ids: Vec<_> = page.items.iter().map(|r| r.transaction.transaction_id.as_str()).collect();
        assert_eq!(ids, vec!["c", "b"]);
    }

    #[test]
    fn test_historical_balance_walks_back_from_current() {
        let (_dir, conn) = test_db();
        upsert_transactions(
            &conn,
            "acc-1",
            &[
                txn("t1", "2024-01-01", -100.0, "Rent"),
                txn("t2", "2024-01-02", 500.0, "Salary"),
                txn("t3", "2024-01-03", -50.0, "Groceries"),
            ],
        )
        .unwrap();
        append_balances(&conn, "acc-1", &[balance("interimAvailable", 350.0, "2024-01-03T18:00:00Z")]).unwrap();

        let points = historical_balances(&conn, "acc-1", "interimAvailable").unwrap();
        let summary: Vec<_> = points.iter().map(|p| (p.date.as_str(), p.balance)).collect();
        assert_eq!(summary, vec![("2024-01-01", -100.0), ("2024-01-02", 400.0), ("2024-01-03", 350.0)]);

        assert_eq!(balance_at(&conn, "acc-1", "interimAvailable", "2024-01-01").unwrap(), Some(-100.0));
        assert_eq!(balance_at(&conn, "acc-1", "interimAvailable", "2024-01-02").unwrap(), Some(400.0));
    }

    #[test]
    fn test_historical_balance_today_equals_current() {
        let (_dir, conn) = test_db();
        upsert_transactions(
            &conn,
            "acc-1",
            &[txn("t1", "2024-01-01", -33.33, "A"), txn("t2", "2024-01-02", 0.1, "B")],
        )
        .unwrap();
        append_balances(&conn, "acc-1", &[balance("closingBooked", 1234.56, "2024-01-02T00:00:00Z")]).unwrap();
        let today = Utc::now().format("%Y-%m-%d").to_string();
        assert_eq!(balance_at(&conn, "acc-1", "closingBooked", &today).unwrap(), Some(1234.56));
        assert_eq!(balance_at(&conn, "acc-1", "missingType", &today).unwrap(), None);
        assert!(historical_balances(&conn, "acc-2", "closingBooked").unwrap().is_empty());
    }

    #[test]
    fn test_sync_operations_are_appended() {
        let (_dir, conn) = test_db();
        let op = SyncOperation {
            id: None,
            started_at: "2024-01-01T06:00:00Z".into(),
            ended_at: "2024-01-01T06:00:05Z".into(),
            success: false,
            accounts_processed: 1,
            transactions_added: 3,
            transactions_updated: 2,
            balances_updated: 1,
            errors: vec!["acc-a: boom".into()],
            logs: vec!["started".into()],
            trigger: SyncTrigger::Retry,
            retry_attempt: 2,
        };
        let first = record_sync_operation(&conn, &op).unwrap();
        let second = record_sync_operation(&conn, &SyncOperation { success: true, ..op.clone() }).unwrap();
        assert!(second > first);

        let ops = list_sync_operations(&conn, 10).unwrap();
        assert_eq!(ops.len(), 2);
        assert_eq!(ops[1], SyncOperation { id: Some(first), ..op });
        let latest = latest_sync_operation(&conn).unwrap().unwrap();
        assert_eq!(latest.id, Some(second));
        assert!(latest.success);
    }
}
