//! Schema migration engine.
//!
//! Every step has a read-only `is_pending` check and an `apply` action that
//! only runs when the check says the step has not happened yet. Steps run in
//! `ALL_STEPS` order at startup; re-running on a migrated store is a no-op.

use std::collections::HashMap;

use rusqlite::types::Value as SqlValue;
use rusqlite::{params, Connection};
use tracing::{debug, info, warn};

use crate::db::{
    column_names, create_indexes, has_column, index_exists, primary_key_columns, table_exists,
    transactions_table_sql, ACCOUNTS_TABLE, ACCOUNT_BALANCE_INDEXES, BALANCES_TABLE,
    ENRICHMENTS_TABLE, SYNC_OPERATIONS_TABLE, TRANSACTION_INDEXES,
};
use crate::error::{BankSyncError, Result};
use crate::fmt::epoch_to_iso;

/// Rows converted per commit by the timestamp normalisation step.
pub const TIMESTAMP_BATCH_SIZE: usize = 500;

const COMPOSITE_KEY: [&str; 2] = ["account_id", "transaction_id"];

const BOOKKEEPING_TABLE: &str = "
CREATE TABLE IF NOT EXISTS schema_migrations (
    name TEXT PRIMARY KEY,
    applied_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ', 'now'))
);
";

// ---------------------------------------------------------------------------
// Step kinds
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationStep {
    BaseTables,
    BalanceTimestamps,
    InternalIdBackfill,
    CompositeKey,
    AccountDisplayName,
    AccountLogo,
    EnrichmentsTable,
    SyncOperationsTable,
    SecondaryIndexes,
}

pub const ALL_STEPS: &[MigrationStep] = &[
    MigrationStep::BaseTables,
    MigrationStep::BalanceTimestamps,
    MigrationStep::InternalIdBackfill,
    MigrationStep::CompositeKey,
    MigrationStep::AccountDisplayName,
    MigrationStep::AccountLogo,
    MigrationStep::EnrichmentsTable,
    MigrationStep::SyncOperationsTable,
    MigrationStep::SecondaryIndexes,
];

impl MigrationStep {
    pub fn name(&self) -> &'static str {
        match self {
            Self::BaseTables => "base_tables",
            Self::BalanceTimestamps => "balance_timestamps",
            Self::InternalIdBackfill => "internal_id_backfill",
            Self::CompositeKey => "composite_key",
            Self::AccountDisplayName => "account_display_name",
            Self::AccountLogo => "account_logo",
            Self::EnrichmentsTable => "transaction_enrichments_table",
            Self::SyncOperationsTable => "sync_operations_table",
            Self::SecondaryIndexes => "secondary_indexes",
        }
    }

    /// Read-only check: does this step still need to run?
    pub fn is_pending(&self, conn: &Connection) -> Result<bool> {
        match self {
            Self::BaseTables => Ok(!table_exists(conn, "accounts")?
                || !table_exists(conn, "balances")?
                || !table_exists(conn, "transactions")?),
            Self::BalanceTimestamps => balance_timestamps_pending(conn),
            Self::InternalIdBackfill => internal_id_backfill_pending(conn),
            Self::CompositeKey => Ok(primary_key_columns(conn, "transactions")? != COMPOSITE_KEY),
            Self::AccountDisplayName => Ok(!has_column(conn, "accounts", "display_name")?),
            Self::AccountLogo => Ok(!has_column(conn, "accounts", "logo")?),
            Self::EnrichmentsTable => Ok(!table_exists(conn, "transaction_enrichments")?),
            Self::SyncOperationsTable => Ok(!table_exists(conn, "sync_operations")?),
            Self::SecondaryIndexes => {
                for (name, _, _) in ACCOUNT_BALANCE_INDEXES.iter().chain(TRANSACTION_INDEXES) {
                    if !index_exists(conn, name)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
        }
    }

    pub fn apply(&self, conn: &Connection) -> Result<()> {
        match self {
            Self::BaseTables => {
                let tx = conn.unchecked_transaction()?;
                tx.execute_batch(ACCOUNTS_TABLE)?;
                tx.execute_batch(BALANCES_TABLE)?;
                tx.execute_batch(&transactions_table_sql("transactions"))?;
                tx.commit()?;
                Ok(())
            }
            Self::BalanceTimestamps => normalize_balance_timestamps(conn),
            Self::InternalIdBackfill => backfill_internal_ids(conn),
            Self::CompositeKey => with_foreign_keys_off(conn, adopt_composite_key),
            Self::AccountDisplayName => {
                conn.execute("ALTER TABLE accounts ADD COLUMN display_name TEXT", [])?;
                Ok(())
            }
            Self::AccountLogo => {
                conn.execute("ALTER TABLE accounts ADD COLUMN logo TEXT", [])?;
                Ok(())
            }
            Self::EnrichmentsTable => {
                conn.execute_batch(ENRICHMENTS_TABLE)?;
                Ok(())
            }
            Self::SyncOperationsTable => {
                conn.execute_batch(SYNC_OPERATIONS_TABLE)?;
                Ok(())
            }
            Self::SecondaryIndexes => {
                let tx = conn.unchecked_transaction()?;
                create_indexes(&tx, ACCOUNT_BALANCE_INDEXES)?;
                create_indexes(&tx, TRANSACTION_INDEXES)?;
                tx.commit()?;
                Ok(())
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Clone, PartialEq)]
pub struct MigrationReport {
    pub applied: Vec<&'static str>,
    pub skipped: Vec<&'static str>,
}

/// Bring the store to the current schema. Any failing step aborts the run.
pub fn run_migrations(conn: &Connection) -> Result<MigrationReport> {
    conn.execute_batch(BOOKKEEPING_TABLE)?;
    let mut report = MigrationReport::default();
    for step in ALL_STEPS {
        let name = step.name();
        let pending = step.is_pending(conn).map_err(|e| BankSyncError::Migration {
            step: name,
            reason: format!("precondition check failed: {e}"),
        })?;
        if !pending {
            debug!(step = name, "migration step already applied");
            report.skipped.push(name);
            continue;
        }
        info!(step = name, "applying migration step");
        step.apply(conn).map_err(|e| BankSyncError::Migration {
            step: name,
            reason: e.to_string(),
        })?;
        conn.execute(
            "INSERT OR REPLACE INTO schema_migrations (name) VALUES (?1)",
            [name],
        )?;
        report.applied.push(name);
    }
    Ok(report)
}

// ---------------------------------------------------------------------------
// Balance timestamps
// ---------------------------------------------------------------------------

const NUMERIC_TIMESTAMP: &str = "typeof(timestamp) IN ('integer', 'real')";

fn balance_timestamps_pending(conn: &Connection) -> Result<bool> {
    if !table_exists(conn, "balances")? {
        return Ok(false);
    }
    let mut stmt = conn.prepare(&format!("SELECT 1 FROM balances WHERE {NUMERIC_TIMESTAMP} LIMIT 1"))?;
    Ok(stmt.exists([])?)
}

/// Rewrite numeric epoch timestamps as ISO strings, one bounded batch per
/// commit. A converted row that collides with an existing one is a duplicate
/// and is removed.
fn normalize_balance_timestamps(conn: &Connection) -> Result<()> {
    let mut converted = 0usize;
    let mut duplicates = 0usize;
    loop {
        let tx = conn.unchecked_transaction()?;
        let batch: Vec<(i64, f64)> = {
            let mut stmt = tx.prepare(&format!(
                "SELECT rowid, timestamp FROM balances WHERE {NUMERIC_TIMESTAMP} ORDER BY rowid LIMIT ?1"
            ))?;
            let rows = stmt
                .query_map([TIMESTAMP_BATCH_SIZE as i64], |row| Ok((row.get(0)?, row.get(1)?)))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            rows
        };
        if batch.is_empty() {
            break;
        }
        for (rowid, epoch) in &batch {
            let iso = epoch_to_iso(*epoch).ok_or_else(|| {
                BankSyncError::Other(format!("balance row {rowid} has out-of-range timestamp {epoch}"))
            })?;
            let changed = tx.execute(
                "UPDATE OR IGNORE balances SET timestamp = ?1 WHERE rowid = ?2",
                params![iso, rowid],
            )?;
            if changed == 0 {
                tx.execute("DELETE FROM balances WHERE rowid = ?1", [rowid])?;
                duplicates += 1;
            } else {
                converted += 1;
            }
        }
        tx.commit()?;
        debug!(converted, "balance timestamp batch committed");
    }
    info!(converted, duplicates, "balance timestamps normalized");
    Ok(())
}

// ---------------------------------------------------------------------------
// Internal id backfill
// ---------------------------------------------------------------------------

const MISSING_INTERNAL_ID: &str =
    "(internal_transaction_id IS NULL OR internal_transaction_id = '') AND json_valid(raw_transaction)";

/// Payload keys an internal id may be recovered from. Before the composite
/// key, rows were keyed by the upstream id itself; afterwards only an
/// explicit `internalTransactionId` counts.
fn recovery_keys(conn: &Connection) -> Result<&'static [&'static str]> {
    if primary_key_columns(conn, "transactions")? == COMPOSITE_KEY {
        Ok(&["internalTransactionId"])
    } else {
        Ok(&["internalTransactionId", "transactionId"])
    }
}

fn recover_internal_id(raw: &str, keys: &[&str]) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(raw).ok()?;
    keys.iter()
        .filter_map(|key| value.get(*key))
        .filter_map(|v| match v {
            serde_json::Value::String(s) => Some(s.trim().to_string()),
            serde_json::Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
        .find(|s| !s.is_empty())
}

/// Rows missing an internal id paired with the id their payload yields.
fn backfill_candidates(conn: &Connection) -> Result<Vec<(i64, String)>> {
    if !has_column(conn, "transactions", "internal_transaction_id")?
        || !has_column(conn, "transactions", "raw_transaction")?
    {
        return Ok(Vec::new());
    }
    let keys = recovery_keys(conn)?;
    let payload_filter = keys
        .iter()
        .map(|key| format!("json_type(raw_transaction, '$.{key}') IN ('text', 'integer', 'real')"))
        .collect::<Vec<_>>()
        .join(" OR ");
    let mut stmt = conn.prepare(&format!(
        "SELECT rowid, raw_transaction FROM transactions \
         WHERE {MISSING_INTERNAL_ID} AND ({payload_filter}) ORDER BY rowid"
    ))?;
    let rows = stmt
        .query_map([], |row| Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?)))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows
        .into_iter()
        .filter_map(|(rowid, raw)| recover_internal_id(&raw, keys).map(|id| (rowid, id)))
        .collect())
}

fn internal_id_backfill_pending(conn: &Connection) -> Result<bool> {
    Ok(!backfill_candidates(conn)?.is_empty())
}

fn backfill_internal_ids(conn: &Connection) -> Result<()> {
    let tx = conn.unchecked_transaction()?;
    let missing = backfill_candidates(&tx)?;

    let mut backfilled = 0usize;
    for (rowid, recovered) in &missing {
        let mut candidate = recovered.clone();
        let mut suffix = 1;
        while tx
            .prepare_cached("SELECT 1 FROM transactions WHERE internal_transaction_id = ?1")?
            .exists([&candidate])?
        {
            candidate = format!("{recovered}_{suffix}");
            suffix += 1;
        }
        tx.execute(
            "UPDATE transactions SET internal_transaction_id = ?1 WHERE rowid = ?2",
            params![candidate, rowid],
        )?;
        backfilled += 1;
    }
    tx.commit()?;
    info!(backfilled, "internal transaction ids backfilled");
    Ok(())
}

// ---------------------------------------------------------------------------
// Composite key adoption
// ---------------------------------------------------------------------------

fn with_foreign_keys_off(conn: &Connection, f: fn(&Connection) -> Result<()>) -> Result<()> {
    conn.execute_batch("PRAGMA foreign_keys=OFF;")?;
    let result = f(conn);
    conn.execute_batch("PRAGMA foreign_keys=ON;")?;
    result
}

/// Columns of the composite table, copied from the old table when present.
const TRANSACTION_COLUMNS: &[&str] = &[
    "account_id",
    "transaction_id",
    "internal_transaction_id",
    "institution_id",
    "iban",
    "transaction_date",
    "description",
    "transaction_amount",
    "transaction_currency",
    "transaction_status",
    "raw_transaction",
    "created_at",
];

struct LegacyRow {
    rowid: i64,
    values: Vec<SqlValue>,
}

impl LegacyRow {
    fn text(&self, column: usize) -> Option<&str> {
        match &self.values[column] {
            SqlValue::Text(s) if !s.trim().is_empty() => Some(s.trim()),
            _ => None,
        }
    }
}

fn column_index(name: &str) -> usize {
    TRANSACTION_COLUMNS
        .iter()
        .position(|c| *c == name)
        .unwrap_or_default()
}

/// Stable id for a legacy row: its own transaction_id column, then the id in
/// the raw payload, then the legacy internal id.
fn composite_transaction_id(row: &LegacyRow) -> Option<String> {
    if let Some(id) = row.text(column_index("transaction_id")) {
        return Some(id.to_string());
    }
    let from_raw = row.text(column_index("raw_transaction")).and_then(|raw| {
        let value: serde_json::Value = serde_json::from_str(raw).ok()?;
        crate::identity::transaction_identity(&value).map(str::to_string)
    });
    from_raw.or_else(|| row.text(column_index("internal_transaction_id")).map(str::to_string))
}

/// Rebuild `transactions` under the (account_id, transaction_id) primary key.
/// Rows sharing a key collapse to the one with the latest transaction date,
/// ties going to the highest rowid.
fn adopt_composite_key(conn: &Connection) -> Result<()> {
    let existing = column_names(conn, "transactions")?;
    for required in ["account_id", "transaction_date", "transaction_amount"] {
        if !existing.iter().any(|c| c == required) {
            return Err(BankSyncError::Other(format!(
                "legacy transactions table has no {required} column"
            )));
        }
    }
    let select_list = TRANSACTION_COLUMNS
        .iter()
        .map(|c| {
            if existing.iter().any(|e| e == c) {
                c.to_string()
            } else {
                format!("NULL AS {c}")
            }
        })
        .collect::<Vec<_>>()
        .join(", ");

    let tx = conn.unchecked_transaction()?;
    let rows: Vec<LegacyRow> = {
        let mut stmt = tx.prepare(&format!("SELECT rowid, {select_list} FROM transactions ORDER BY rowid"))?;
        let rows = stmt
            .query_map([], |row| {
                let mut values = Vec::with_capacity(TRANSACTION_COLUMNS.len());
                for i in 0..TRANSACTION_COLUMNS.len() {
                    values.push(row.get::<_, SqlValue>(i + 1)?);
                }
                Ok(LegacyRow { rowid: row.get(0)?, values })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        rows
    };
    let total = rows.len();

    let date_idx = column_index("transaction_date");
    let mut survivors: HashMap<(String, String), LegacyRow> = HashMap::new();
    let mut unkeyed = 0usize;
    for mut row in rows {
        let (Some(account_id), Some(transaction_id)) = (
            row.text(column_index("account_id")).map(str::to_string),
            composite_transaction_id(&row),
        ) else {
            unkeyed += 1;
            continue;
        };
        row.values[column_index("transaction_id")] = SqlValue::Text(transaction_id.clone());
        let key = (account_id, transaction_id);
        let replace = match survivors.get(&key) {
            None => true,
            Some(kept) => {
                let new_date = row.text(date_idx).unwrap_or_default();
                let kept_date = kept.text(date_idx).unwrap_or_default();
                (new_date, row.rowid) > (kept_date, kept.rowid)
            }
        };
        if replace {
            survivors.insert(key, row);
        }
    }

    let mut kept: Vec<LegacyRow> = survivors.into_values().collect();
    kept.sort_by_key(|r| r.rowid);

    tx.execute_batch("DROP TABLE IF EXISTS transactions_new;")?;
    tx.execute_batch(&transactions_table_sql("transactions_new"))?;
    {
        let placeholders = (1..=TRANSACTION_COLUMNS.len())
            .map(|i| format!("?{i}"))
            .collect::<Vec<_>>()
            .join(", ");
        let mut insert = tx.prepare(&format!(
            "INSERT INTO transactions_new ({}) VALUES ({placeholders})",
            TRANSACTION_COLUMNS.join(", ")
        ))?;
        for row in &kept {
            let mut values = row.values.clone();
            if matches!(values[column_index("transaction_status")], SqlValue::Null) {
                values[column_index("transaction_status")] = SqlValue::Text("booked".into());
            }
            if matches!(values[column_index("raw_transaction")], SqlValue::Null) {
                values[column_index("raw_transaction")] = SqlValue::Text("{}".into());
            }
            if matches!(values[column_index("created_at")], SqlValue::Null) {
                values[column_index("created_at")] = SqlValue::Text(crate::fmt::iso_timestamp(chrono::Utc::now()));
            }
            insert.execute(rusqlite::params_from_iter(values.iter()))?;
        }
    }
    tx.execute_batch(
        "DROP TABLE transactions;
         ALTER TABLE transactions_new RENAME TO transactions;",
    )?;
    create_indexes(&tx, TRANSACTION_INDEXES)?;
    if table_exists(&tx, "transaction_enrichments")? {
        tx.execute(
            "DELETE FROM transaction_enrichments WHERE NOT EXISTS (
                SELECT 1 FROM transactions t
                WHERE t.account_id = transaction_enrichments.account_id
                  AND t.transaction_id = transaction_enrichments.transaction_id)",
            [],
        )?;
    }
    tx.commit()?;

    if unkeyed > 0 {
        warn!(unkeyed, "dropped legacy transactions without any usable identity");
    }
    info!(total, kept = kept.len(), "transactions rebuilt under composite key");
    Ok(())
}
