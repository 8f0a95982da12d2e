//! One sync pass: upstream → identity reconciliation → store, per account,
//! with partial-failure isolation and an unconditional audit record.

use std::sync::{Arc, Mutex};

use chrono::Utc;
use serde::Serialize;
use tracing::{error, info, warn};

use crate::error::{BankSyncError, Result};
use crate::fmt::iso_timestamp;
use crate::identity::{account_from_payload, balances_from_payload, reconcile_transactions, AccountContext};
use crate::models::{SyncOperation, SyncTrigger, Transaction};
use crate::notify::filter::NotificationFilter;
use crate::notify::{ExpiryInfo, Notifier};
use crate::service::DatabaseService;
use crate::settings::SyncSettings;
use crate::upstream::{Requisition, Upstream};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncState {
    Idle,
    Running,
    Completed,
    Failed,
}

/// In-memory view of the orchestrator, for status surfaces.
#[derive(Debug, Clone, Serialize)]
pub struct SyncStatus {
    pub state: SyncState,
    /// Passes currently in flight; above one only when a pass was forced.
    pub active_passes: u32,
    pub started_at: Option<String>,
    pub last_result: Option<SyncOperation>,
}

impl Default for SyncStatus {
    fn default() -> Self {
        Self {
            state: SyncState::Idle,
            active_passes: 0,
            started_at: None,
            last_result: None,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SyncRequest {
    pub trigger: SyncTrigger,
    pub retry_attempt: u32,
    /// Run even if another pass is marked running.
    pub force: bool,
}

impl SyncRequest {
    pub fn new(trigger: SyncTrigger) -> Self {
        Self {
            trigger,
            retry_attempt: 0,
            force: false,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ExpiryPolicy {
    pub threshold_days: i64,
    pub access_valid_for_days: i64,
}

impl From<&SyncSettings> for ExpiryPolicy {
    fn from(s: &SyncSettings) -> Self {
        Self {
            threshold_days: s.expiry_threshold_days,
            access_valid_for_days: s.access_valid_for_days,
        }
    }
}

#[derive(Debug, Default)]
struct AccountOutcome {
    added: Vec<Transaction>,
    updated: u32,
    balances: u32,
}

/// Log lines emitted during a pass, kept for the audit record.
#[derive(Default)]
struct PassLog {
    lines: Vec<String>,
}

impl PassLog {
    fn info(&mut self, msg: String) {
        info!("{msg}");
        self.lines.push(format!("{} INFO {msg}", iso_timestamp(Utc::now())));
    }

    fn warn(&mut self, msg: String) {
        warn!("{msg}");
        self.lines.push(format!("{} WARN {msg}", iso_timestamp(Utc::now())));
    }
}

pub struct SyncOrchestrator {
    upstream: Arc<dyn Upstream>,
    db: DatabaseService,
    notifier: Arc<dyn Notifier>,
    filter: NotificationFilter,
    expiry: ExpiryPolicy,
    status: Mutex<SyncStatus>,
}

impl SyncOrchestrator {
    pub fn new(
        upstream: Arc<dyn Upstream>,
        db: DatabaseService,
        notifier: Arc<dyn Notifier>,
        filter: NotificationFilter,
        expiry: ExpiryPolicy,
    ) -> Self {
        Self {
            upstream,
            db,
            notifier,
            filter,
            expiry,
            status: Mutex::new(SyncStatus::default()),
        }
    }

    pub fn status(&self) -> SyncStatus {
        self.status.lock().map(|s| s.clone()).unwrap_or_default()
    }

    fn begin(&self, force: bool, started_at: &str) -> Result<()> {
        let mut status = self
            .status
            .lock()
            .map_err(|_| BankSyncError::Other("sync status lock poisoned".into()))?;
        if status.active_passes > 0 && !force {
            return Err(BankSyncError::AlreadyRunning);
        }
        status.active_passes += 1;
        status.state = SyncState::Running;
        status.started_at = Some(started_at.to_string());
        Ok(())
    }

    /// The state leaves `Running` only when the last in-flight pass ends.
    fn finish(&self, op: Option<&SyncOperation>) {
        if let Ok(mut status) = self.status.lock() {
            status.active_passes = status.active_passes.saturating_sub(1);
            if status.active_passes == 0 {
                status.state = match op {
                    Some(op) if op.success => SyncState::Completed,
                    _ => SyncState::Failed,
                };
            }
            if let Some(op) = op {
                status.last_result = Some(op.clone());
            }
        }
    }

    /// Run one pass. Per-account failures land in the returned record;
    /// only a failure to enumerate accounts or to persist the audit record
    /// is returned as `Err`.
    pub async fn run(&self, request: SyncRequest) -> Result<SyncOperation> {
        let started_at = iso_timestamp(Utc::now());
        self.begin(request.force, &started_at)?;

        let result = self.run_pass(request, started_at).await;
        match &result {
            Ok(op) => self.finish(Some(op)),
            Err(e) => {
                error!(error = %e, "sync pass failed");
                self.finish(None);
            }
        }
        result
    }

    async fn run_pass(&self, request: SyncRequest, started_at: String) -> Result<SyncOperation> {
        let mut log = PassLog::default();
        log.info(format!(
            "starting {} sync (retry attempt {})",
            request.trigger, request.retry_attempt
        ));

        let mut op = SyncOperation {
            id: None,
            started_at,
            ended_at: String::new(),
            success: false,
            accounts_processed: 0,
            transactions_added: 0,
            transactions_updated: 0,
            balances_updated: 0,
            errors: Vec::new(),
            logs: Vec::new(),
            trigger: request.trigger,
            retry_attempt: request.retry_attempt,
        };

        let requisitions = match self.upstream.list_requisitions().await {
            Ok(reqs) => reqs,
            Err(e) => {
                op.errors.push(format!("listing linked accounts: {e}"));
                log.warn(format!("could not list linked accounts: {e}"));
                op.logs = log.lines;
                op.ended_at = iso_timestamp(Utc::now());
                self.db.record_sync_operation(op).await?;
                return Err(e);
            }
        };

        self.check_expiry(&requisitions, &mut log).await;

        let mut account_ids: Vec<String> = Vec::new();
        for req in &requisitions {
            for id in &req.accounts {
                if !account_ids.contains(id) {
                    account_ids.push(id.clone());
                }
            }
        }
        log.info(format!("{} linked account(s)", account_ids.len()));

        let mut added = Vec::new();
        for account_id in &account_ids {
            match self.sync_account(account_id, &mut log).await {
                Ok(outcome) => {
                    op.accounts_processed += 1;
                    op.transactions_added += outcome.added.len() as u32;
                    op.transactions_updated += outcome.updated;
                    op.balances_updated += outcome.balances;
                    log.info(format!(
                        "{account_id}: {} new, {} updated, {} balance(s)",
                        outcome.added.len(),
                        outcome.updated,
                        outcome.balances
                    ));
                    added.extend(outcome.added);
                }
                Err(e) => {
                    log.warn(format!("{account_id}: sync failed: {e}"));
                    op.errors.push(format!("{account_id}: {e}"));
                }
            }
        }

        let selected = self.filter.select(&added);
        if !selected.is_empty() {
            if let Err(e) = self.notifier.notify_new_transactions(&selected).await {
                log.warn(format!("new transaction notification failed: {e}"));
            }
        }

        op.success = op.errors.is_empty();
        op.ended_at = iso_timestamp(Utc::now());
        log.info(format!(
            "sync finished: {} account(s), {} added, {} error(s)",
            op.accounts_processed,
            op.transactions_added,
            op.errors.len()
        ));
        op.logs = log.lines;
        let id = self.db.record_sync_operation(op.clone()).await?;
        op.id = Some(id);
        Ok(op)
    }

    async fn sync_account(&self, account_id: &str, log: &mut PassLog) -> Result<AccountOutcome> {
        let meta = self.upstream.get_account(account_id).await?;
        let balances_payload = self.upstream.get_balances(account_id).await?;
        let transactions_payload = self.upstream.get_transactions(account_id).await?;

        let account = account_from_payload(account_id, &meta);
        let ctx = AccountContext::from(&account);
        self.db.upsert_account(account).await?;

        let balances = balances_from_payload(account_id, &balances_payload, Utc::now());
        let appended = self.db.append_balances(account_id.to_string(), balances).await?;

        let batch = reconcile_transactions(&transactions_payload, &ctx);
        if !batch.rejected.is_empty() {
            log.warn(format!(
                "{account_id}: skipped {} malformed transaction(s)",
                batch.rejected.len()
            ));
        }
        let total = batch.transactions.len();
        let added = self
            .db
            .upsert_transactions(account_id.to_string(), batch.transactions)
            .await?;

        Ok(AccountOutcome {
            updated: (total - added.len()) as u32,
            added,
            balances: appended.inserted as u32,
        })
    }

    async fn check_expiry(&self, requisitions: &[Requisition], log: &mut PassLog) {
        let now = Utc::now();
        for req in requisitions {
            let valid_for = req.access_valid_for_days.unwrap_or(self.expiry.access_valid_for_days);
            let Some(days_remaining) = req.days_remaining(valid_for, now) else {
                continue;
            };
            if !(0..=self.expiry.threshold_days).contains(&days_remaining) {
                continue;
            }
            let info = ExpiryInfo {
                requisition_id: req.id.clone(),
                institution_id: req.institution_id.clone(),
                days_remaining,
                expires_at: req
                    .expires_at(valid_for)
                    .map(|d| d.format("%Y-%m-%d").to_string())
                    .unwrap_or_default(),
                link: req.link.clone(),
            };
            log.warn(format!("requisition {} expires in {days_remaining} day(s)", req.id));
            if let Err(e) = self.notifier.notify_expiry(&info).await {
                log.warn(format!("expiry notification failed: {e}"));
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::{HashMap, HashSet};

    use async_trait::async_trait;
    use serde_json::{json, Value};

    use crate::error::{BankSyncError, Result};
    use crate::upstream::{Institution, Requisition, Upstream};

    /// In-memory upstream. Accounts listed in `failing` error on fetch.
    #[derive(Default)]
    pub struct FakeUpstream {
        pub requisitions: Vec<Requisition>,
        pub transactions: HashMap<String, Value>,
        pub failing: HashSet<String>,
        pub list_error: bool,
    }

    impl FakeUpstream {
        pub fn with_accounts(ids: &[&str]) -> Self {
            Self {
                requisitions: vec![Requisition {
                    id: "req-1".into(),
                    status: Some("LN".into()),
                    institution_id: Some("BANK_X".into()),
                    created: None,
                    accounts: ids.iter().map(|s| s.to_string()).collect(),
                    link: None,
                    access_valid_for_days: None,
                }],
                ..Self::default()
            }
        }
    }

    #[async_trait]
    impl Upstream for FakeUpstream {
        async fn list_institutions(&self, _country: &str) -> Result<Vec<Institution>> {
            Ok(Vec::new())
        }

        async fn create_requisition(&self, _institution_id: &str, _redirect_url: &str) -> Result<Requisition> {
            Err(BankSyncError::Other("not supported".into()))
        }

        async fn list_requisitions(&self) -> Result<Vec<Requisition>> {
            if self.list_error {
                return Err(BankSyncError::Upstream { status: 503, body: "down".into() });
            }
            Ok(self.requisitions.clone())
        }

        async fn get_account(&self, account_id: &str) -> Result<Value> {
            if self.failing.contains(account_id) {
                return Err(BankSyncError::Upstream { status: 500, body: "fetch failed".into() });
            }
            Ok(json!({
                "id": account_id,
                "institution_id": "BANK_X",
                "iban": format!("GB00{account_id}"),
                "account": {"currency": "EUR", "name": "Main"}
            }))
        }

        async fn get_balances(&self, _account_id: &str) -> Result<Value> {
            Ok(json!({"balances": [{
                "balanceAmount": {"amount": "350.00", "currency": "EUR"},
                "balanceType": "closingBooked",
                "referenceDate": "2024-01-31"
            }]}))
        }

        async fn get_transactions(&self, account_id: &str) -> Result<Value> {
            Ok(self
                .transactions
                .get(account_id)
                .cloned()
                .unwrap_or_else(|| json!({"booked": [], "pending": []})))
        }
    }
}
