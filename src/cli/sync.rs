use anyhow::Context;
use tracing::info;

use crate::app::App;
use crate::models::SyncTrigger;
use crate::sync::SyncRequest;

pub async fn once(app: &App, force: bool) -> anyhow::Result<()> {
    let request = SyncRequest {
        force,
        ..SyncRequest::new(SyncTrigger::Manual)
    };
    let op = app.orchestrator.run(request).await.context("sync failed")?;

    println!(
        "{} in {} account(s): {} new, {} updated, {} balance(s)",
        if op.success { "Synced" } else { "Synced with errors" },
        op.accounts_processed,
        op.transactions_added,
        op.transactions_updated,
        op.balances_updated
    );
    for err in &op.errors {
        println!("  error: {err}");
    }
    if !op.success {
        anyhow::bail!("{} account(s) failed to sync", op.errors.len());
    }
    Ok(())
}

pub async fn scheduled(app: &App) -> anyhow::Result<()> {
    let schedules = &app.settings.sync.schedules;
    if schedules.is_empty() {
        anyhow::bail!("no sync schedules configured");
    }
    let mut sched = app
        .scheduler()
        .start(schedules)
        .await
        .context("starting scheduler")?;
    println!("Scheduler running ({}). Press Ctrl-C to stop.", schedules.join(", "));

    tokio::signal::ctrl_c().await.context("waiting for Ctrl-C")?;
    info!(status = ?app.orchestrator.status().state, "shutting down scheduler");
    sched
        .shutdown()
        .await
        .map_err(|e| anyhow::anyhow!("stopping scheduler: {e}"))?;
    Ok(())
}
