//! Cron-driven invocation of the orchestrator with a bounded retry policy.

use std::sync::Arc;
use std::time::Duration;

use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info, warn};

use crate::error::{BankSyncError, Result};
use crate::models::SyncTrigger;
use crate::notify::{Notifier, SyncFailureInfo};
use crate::settings::SyncSettings;
use crate::sync::{SyncOrchestrator, SyncRequest};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub factor: u32,
    pub max_delay: Duration,
}

impl RetryPolicy {
    /// Delay before retry `attempt` (1-based): base * factor^(attempt-1),
    /// capped at `max_delay`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1);
        let multiplier = self.factor.max(1).saturating_pow(exp);
        self.base_delay.saturating_mul(multiplier).min(self.max_delay)
    }
}

impl From<&SyncSettings> for RetryPolicy {
    fn from(s: &SyncSettings) -> Self {
        Self {
            max_retries: s.max_retries,
            base_delay: Duration::from_secs(s.retry_delay_secs),
            factor: s.backoff_factor,
            max_delay: Duration::from_secs(s.max_retry_delay_secs),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    Succeeded { attempts: u32 },
    /// Another pass held the running flag.
    Skipped,
    Exhausted { attempts: u32, last_error: String },
}

pub struct SyncScheduler {
    orchestrator: Arc<SyncOrchestrator>,
    notifier: Arc<dyn Notifier>,
    policy: RetryPolicy,
}

impl SyncScheduler {
    pub fn new(orchestrator: Arc<SyncOrchestrator>, notifier: Arc<dyn Notifier>, policy: RetryPolicy) -> Self {
        Self {
            orchestrator,
            notifier,
            policy,
        }
    }

    /// One cycle: the initial attempt plus up to `max_retries` delayed
    /// retries, each tagged with its attempt number. Exhaustion sends a
    /// single failure notification and is not re-queued.
    pub async fn run_cycle(&self, trigger: SyncTrigger) -> CycleOutcome {
        let mut attempt: u32 = 0;
        loop {
            let request = SyncRequest {
                trigger: if attempt == 0 { trigger } else { SyncTrigger::Retry },
                retry_attempt: attempt,
                force: false,
            };
            let failure = match self.orchestrator.run(request).await {
                Ok(op) if op.success => {
                    info!(attempt, "sync cycle succeeded");
                    return CycleOutcome::Succeeded { attempts: attempt + 1 };
                }
                Ok(op) => op.errors.join("; "),
                Err(BankSyncError::AlreadyRunning) => {
                    info!("sync already running, skipping cycle");
                    return CycleOutcome::Skipped;
                }
                Err(e) => {
                    warn!(attempt, transient = e.is_transient(), error = %e, "sync pass raised");
                    e.to_string()
                }
            };

            if attempt >= self.policy.max_retries {
                let attempts = attempt + 1;
                error!(attempts, error = %failure, "sync cycle exhausted retries");
                let info = SyncFailureInfo {
                    trigger,
                    attempts,
                    last_error: failure.clone(),
                };
                if let Err(e) = self.notifier.notify_sync_failure(&info).await {
                    warn!(error = %e, "sync failure notification failed");
                }
                return CycleOutcome::Exhausted { attempts, last_error: failure };
            }

            attempt += 1;
            let delay = self.policy.delay_for(attempt);
            warn!(attempt, delay_secs = delay.as_secs(), error = %failure, "sync failed, retrying");
            tokio::time::sleep(delay).await;
        }
    }

    /// Register one job per cron expression and start the scheduler.
    pub async fn start(self: Arc<Self>, schedules: &[String]) -> Result<JobScheduler> {
        let sched = JobScheduler::new()
            .await
            .map_err(|e| BankSyncError::Other(format!("creating scheduler: {e}")))?;
        for expr in schedules {
            let this = Arc::clone(&self);
            let job = Job::new_async(expr.as_str(), move |_uuid, _lock| {
                let this = Arc::clone(&this);
                Box::pin(async move {
                    this.run_cycle(SyncTrigger::Scheduled).await;
                })
            })
            .map_err(|e| BankSyncError::Settings(format!("invalid cron expression '{expr}': {e}")))?;
            sched
                .add(job)
                .await
                .map_err(|e| BankSyncError::Other(format!("adding scheduler job: {e}")))?;
            info!(schedule = %expr, "scheduled sync job");
        }
        sched
            .start()
            .await
            .map_err(|e| BankSyncError::Other(format!("starting scheduler: {e}")))?;
        Ok(sched)
    }
}
