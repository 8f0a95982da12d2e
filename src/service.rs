//! Async façade over the store. This is the only way the CLI, the
//! orchestrator and any outer surface reach persisted state.

use std::path::Path;
use std::sync::{Arc, Mutex};

use rusqlite::Connection;

use crate::db::{get_connection, init_db};
use crate::error::{BankSyncError, Result};
use crate::migrations::MigrationReport;
use crate::models::{
    Account, AccountUpsert, Balance, BalancePoint, Enrichment, SyncOperation, Transaction,
    TransactionRecord,
};
use crate::store::{self, BalanceAppendResult, TransactionPage, TransactionQuery};

#[derive(Clone)]
pub struct DatabaseService {
    conn: Arc<Mutex<Connection>>,
}

impl DatabaseService {
    /// Open the database file and run every pending migration before
    /// returning. A migration failure is returned as-is and nothing is served.
    pub fn open(db_path: &Path) -> Result<(Self, MigrationReport)> {
        let conn = get_connection(db_path)?;
        let report = init_db(&conn)?;
        Ok((Self::from_connection(conn), report))
    }

    /// Wrap an already migrated connection.
    pub fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
        }
    }

    async fn call<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let guard = conn
                .lock()
                .map_err(|_| BankSyncError::Other("database connection lock poisoned".into()))?;
            f(&*guard)
        })
        .await
        .map_err(|e| BankSyncError::Other(format!("database task failed: {e}")))?
    }

    pub async fn upsert_account(&self, data: AccountUpsert) -> Result<()> {
        self.call(move |conn| store::upsert_account(conn, &data)).await
    }

    pub async fn set_account_display_name(&self, account_id: String, display_name: Option<String>) -> Result<()> {
        self.call(move |conn| store::set_account_display_name(conn, &account_id, display_name.as_deref()))
            .await
    }

    pub async fn get_account(&self, account_id: String) -> Result<Option<Account>> {
        self.call(move |conn| store::get_account(conn, &account_id)).await
    }

    pub async fn list_accounts(&self) -> Result<Vec<Account>> {
        self.call(store::list_accounts).await
    }

    pub async fn append_balances(&self, account_id: String, rows: Vec<Balance>) -> Result<BalanceAppendResult> {
        self.call(move |conn| store::append_balances(conn, &account_id, &rows)).await
    }

    pub async fn current_balances(&self, account_id: String) -> Result<Vec<Balance>> {
        self.call(move |conn| store::current_balances(conn, &account_id)).await
    }

    pub async fn balance_at(&self, account_id: String, balance_type: String, date: String) -> Result<Option<f64>> {
        self.call(move |conn| store::balance_at(conn, &account_id, &balance_type, &date)).await
    }

    pub async fn historical_balances(&self, account_id: String, balance_type: String) -> Result<Vec<BalancePoint>> {
        self.call(move |conn| store::historical_balances(conn, &account_id, &balance_type)).await
    }

    pub async fn upsert_transactions(&self, account_id: String, records: Vec<Transaction>) -> Result<Vec<Transaction>> {
        self.call(move |conn| store::upsert_transactions(conn, &account_id, &records)).await
    }

    pub async fn get_transaction(&self, account_id: String, transaction_id: String) -> Result<Option<TransactionRecord>> {
        self.call(move |conn| store::get_transaction(conn, &account_id, &transaction_id)).await
    }

    pub async fn query_transactions(&self, query: TransactionQuery) -> Result<TransactionPage> {
        self.call(move |conn| store::query_transactions(conn, &query)).await
    }

    pub async fn count_transactions(&self, account_id: Option<String>) -> Result<u64> {
        self.call(move |conn| store::count_transactions(conn, account_id.as_deref())).await
    }

    pub async fn upsert_enrichment(&self, enrichment: Enrichment) -> Result<()> {
        self.call(move |conn| store::upsert_enrichment(conn, &enrichment)).await
    }

    pub async fn get_enrichment(&self, account_id: String, transaction_id: String) -> Result<Option<Enrichment>> {
        self.call(move |conn| store::get_enrichment(conn, &account_id, &transaction_id)).await
    }

    pub async fn record_sync_operation(&self, op: SyncOperation) -> Result<i64> {
        self.call(move |conn| store::record_sync_operation(conn, &op)).await
    }

    pub async fn list_sync_operations(&self, limit: u32) -> Result<Vec<SyncOperation>> {
        self.call(move |conn| store::list_sync_operations(conn, limit)).await
    }

    pub async fn latest_sync_operation(&self) -> Result<Option<SyncOperation>> {
        self.call(store::latest_sync_operation).await
    }

    /// Copy the live database to `dest` with the SQLite online-backup API.
    pub async fn backup_to(&self, dest: std::path::PathBuf) -> Result<()> {
        self.call(move |conn| {
            let mut dest_conn = Connection::open(&dest)?;
            let backup = rusqlite::backup::Backup::new(conn, &mut dest_conn)?;
            backup.run_to_completion(100, std::time::Duration::from_millis(10), None)?;
            Ok(())
        })
        .await
    }
}
