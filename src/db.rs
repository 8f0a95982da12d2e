use std::path::Path;

use rusqlite::Connection;

use crate::error::Result;
use crate::migrations::{run_migrations, MigrationReport};

pub const DB_FILE_NAME: &str = "banksync.db";

pub const ACCOUNTS_TABLE: &str = "
CREATE TABLE IF NOT EXISTS accounts (
    id TEXT PRIMARY KEY,
    institution_id TEXT,
    status TEXT,
    iban TEXT,
    name TEXT,
    display_name TEXT,
    currency TEXT,
    logo TEXT,
    created TEXT,
    last_accessed TEXT,
    last_updated TEXT
);
";

pub const BALANCES_TABLE: &str = "
CREATE TABLE IF NOT EXISTS balances (
    id INTEGER PRIMARY KEY,
    account_id TEXT NOT NULL,
    balance_type TEXT NOT NULL,
    amount REAL NOT NULL,
    currency TEXT,
    timestamp TEXT NOT NULL,
    UNIQUE (account_id, balance_type, timestamp)
);
";

/// Composite-key transactions table. `{name}` lets the rebuild step create
/// it under a temporary name.
pub fn transactions_table_sql(name: &str) -> String {
    format!(
        "CREATE TABLE IF NOT EXISTS {name} (
    account_id TEXT NOT NULL,
    transaction_id TEXT NOT NULL,
    internal_transaction_id TEXT,
    institution_id TEXT,
    iban TEXT,
    transaction_date TEXT NOT NULL,
    description TEXT,
    transaction_amount REAL NOT NULL,
    transaction_currency TEXT,
    transaction_status TEXT NOT NULL DEFAULT 'booked',
    raw_transaction TEXT NOT NULL DEFAULT '{{}}',
    created_at TEXT DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ', 'now')),
    PRIMARY KEY (account_id, transaction_id)
);"
    )
}

pub const ENRICHMENTS_TABLE: &str = "
CREATE TABLE IF NOT EXISTS transaction_enrichments (
    account_id TEXT NOT NULL,
    transaction_id TEXT NOT NULL,
    clean_name TEXT,
    category TEXT,
    logo TEXT,
    updated_at TEXT DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ', 'now')),
    PRIMARY KEY (account_id, transaction_id),
    FOREIGN KEY (account_id, transaction_id)
        REFERENCES transactions(account_id, transaction_id) ON DELETE CASCADE
);
";

pub const SYNC_OPERATIONS_TABLE: &str = "
CREATE TABLE IF NOT EXISTS sync_operations (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    started_at TEXT NOT NULL,
    ended_at TEXT NOT NULL,
    success INTEGER NOT NULL,
    accounts_processed INTEGER NOT NULL DEFAULT 0,
    transactions_added INTEGER NOT NULL DEFAULT 0,
    transactions_updated INTEGER NOT NULL DEFAULT 0,
    balances_updated INTEGER NOT NULL DEFAULT 0,
    errors TEXT NOT NULL DEFAULT '[]',
    logs TEXT NOT NULL DEFAULT '[]',
    trigger_type TEXT NOT NULL,
    retry_attempt INTEGER NOT NULL DEFAULT 0
);
CREATE INDEX IF NOT EXISTS idx_sync_operations_started ON sync_operations(started_at);
";

/// (index name, table, column list)
pub const ACCOUNT_BALANCE_INDEXES: &[(&str, &str, &str)] = &[
    ("idx_accounts_institution", "accounts", "institution_id"),
    ("idx_accounts_status", "accounts", "status"),
    ("idx_balances_account_timestamp", "balances", "account_id, timestamp"),
    ("idx_balances_account_type_timestamp", "balances", "account_id, balance_type, timestamp"),
];

pub const TRANSACTION_INDEXES: &[(&str, &str, &str)] = &[
    ("idx_transactions_date", "transactions", "transaction_date"),
    ("idx_transactions_amount", "transactions", "transaction_amount"),
    ("idx_transactions_internal_id", "transactions", "internal_transaction_id"),
];

pub fn create_indexes(conn: &Connection, indexes: &[(&str, &str, &str)]) -> Result<()> {
    for (name, table, columns) in indexes {
        conn.execute_batch(&format!("CREATE INDEX IF NOT EXISTS {name} ON {table}({columns});"))?;
    }
    Ok(())
}

pub fn table_exists(conn: &Connection, table: &str) -> Result<bool> {
    let mut stmt = conn.prepare("SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1")?;
    Ok(stmt.exists([table])?)
}

pub fn index_exists(conn: &Connection, index: &str) -> Result<bool> {
    let mut stmt = conn.prepare("SELECT 1 FROM sqlite_master WHERE type = 'index' AND name = ?1")?;
    Ok(stmt.exists([index])?)
}

pub fn column_names(conn: &Connection, table: &str) -> Result<Vec<String>> {
    let mut stmt = conn.prepare("SELECT name FROM pragma_table_info(?1) ORDER BY cid")?;
    let names = stmt
        .query_map([table], |row| row.get(0))?
        .collect::<std::result::Result<Vec<String>, _>>()?;
    Ok(names)
}

pub fn has_column(conn: &Connection, table: &str, column: &str) -> Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT count(*) FROM pragma_table_info(?1) WHERE name = ?2",
        [table, column],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

/// Primary key columns of `table` in key order.
pub fn primary_key_columns(conn: &Connection, table: &str) -> Result<Vec<String>> {
    let mut stmt = conn.prepare("SELECT name FROM pragma_table_info(?1) WHERE pk > 0 ORDER BY pk")?;
    let names = stmt
        .query_map([table], |row| row.get(0))?
        .collect::<std::result::Result<Vec<String>, _>>()?;
    Ok(names)
}

pub fn get_connection(db_path: &Path) -> Result<Connection> {
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let conn = Connection::open(db_path)?;
    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON; PRAGMA busy_timeout=5000;")?;
    Ok(conn)
}

/// Open the store and bring its schema up to date.
pub fn init_db(conn: &Connection) -> Result<MigrationReport> {
    run_migrations(conn)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_db() -> (tempfile::TempDir, Connection) {
        let dir = tempfile::tempdir().unwrap();
        let conn = get_connection(&dir.path().join("test.db")).unwrap();
        init_db(&conn).unwrap();
        (dir, conn)
    }

    #[test]
    fn test_init_db_creates_tables() {
        let (_dir, conn) = test_db();
        for expected in &["accounts", "balances", "transactions", "transaction_enrichments", "sync_operations"] {
            assert!(table_exists(&conn, expected).unwrap(), "missing table: {expected}");
        }
    }

    #[test]
    fn test_init_db_creates_indexes() {
        let (_dir, conn) = test_db();
        for (name, _, _) in ACCOUNT_BALANCE_INDEXES.iter().chain(TRANSACTION_INDEXES) {
            assert!(index_exists(&conn, name).unwrap(), "missing index: {name}");
        }
    }

    #[test]
    fn test_init_db_is_idempotent() {
        let (_dir, conn) = test_db();
        let report = init_db(&conn).unwrap();
        assert!(report.applied.is_empty(), "re-run applied {:?}", report.applied);
    }

    #[test]
    fn test_transactions_use_composite_key() {
        let (_dir, conn) = test_db();
        assert_eq!(
            primary_key_columns(&conn, "transactions").unwrap(),
            vec!["account_id".to_string(), "transaction_id".to_string()]
        );
    }

    #[test]
    fn test_get_connection_creates_parent_dir() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("data").join(DB_FILE_NAME);
        get_connection(&path).unwrap();
        assert!(path.exists());
    }
}
