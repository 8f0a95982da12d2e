use comfy_table::{Cell, Table};

use crate::app::App;
use crate::fmt::format_bytes;
use crate::models::SyncOperation;

pub async fn run(app: &App) -> anyhow::Result<()> {
    let settings = &app.settings;
    let db_path = settings.db_path();

    println!("Data dir:   {}", settings.data_dir);
    println!("Database:   {}", db_path.display());
    if let Ok(meta) = std::fs::metadata(&db_path) {
        println!("DB size:    {}", format_bytes(meta.len()));
    }
    println!(
        "Upstream:   {}",
        if settings.upstream.secret_id.is_empty() { "(credentials not set)" } else { settings.upstream.base_url.as_str() }
    );
    println!("Schedules:  {}", settings.sync.schedules.join(", "));

    let accounts = app.db.list_accounts().await?;
    let transactions = app.db.count_transactions(None).await?;
    println!();
    println!("Accounts:      {}", accounts.len());
    println!("Transactions:  {transactions}");

    println!();
    match app.db.latest_sync_operation().await? {
        Some(op) => {
            println!("Last sync:     {} ({})", op.ended_at, op.trigger);
            println!("Result:        {}", outcome(&op));
            for err in &op.errors {
                println!("  error: {err}");
            }
        }
        None => println!("No sync has run yet. Run `banksync sync` to start."),
    }
    Ok(())
}

fn outcome(op: &SyncOperation) -> String {
    if op.success {
        format!("ok, {} new", op.transactions_added)
    } else {
        format!("failed, {} error(s)", op.errors.len())
    }
}

pub async fn history(app: &App, limit: u32) -> anyhow::Result<()> {
    let ops = app.db.list_sync_operations(limit).await?;
    if ops.is_empty() {
        println!("No sync operations recorded.");
        return Ok(());
    }

    let mut table = Table::new();
    table.set_header(vec!["ID", "Started", "Trigger", "Retry", "Accounts", "Added", "Updated", "Balances", "Result"]);
    for op in &ops {
        table.add_row(vec![
            Cell::new(op.id.unwrap_or_default()),
            Cell::new(&op.started_at),
            Cell::new(op.trigger),
            Cell::new(op.retry_attempt),
            Cell::new(op.accounts_processed),
            Cell::new(op.transactions_added),
            Cell::new(op.transactions_updated),
            Cell::new(op.balances_updated),
            Cell::new(outcome(op)),
        ]);
    }
    println!("Sync history\n{table}");
    Ok(())
}
