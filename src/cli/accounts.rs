use comfy_table::{Cell, Table};

use crate::app::App;
use crate::fmt::money;

pub async fn list(app: &App) -> anyhow::Result<()> {
    let accounts = app.db.list_accounts().await?;
    if accounts.is_empty() {
        println!("No accounts yet. Link a bank with `banksync link` and run `banksync sync`.");
        return Ok(());
    }

    let mut table = Table::new();
    table.set_header(vec!["ID", "Name", "Institution", "IBAN", "Balance", "Last Updated"]);
    for acct in &accounts {
        let balance = app
            .db
            .current_balances(acct.id.clone())
            .await?
            .into_iter()
            .next()
            .map(|b| money(b.amount, b.currency.as_deref().or(acct.currency.as_deref())))
            .unwrap_or_default();
        table.add_row(vec![
            Cell::new(&acct.id),
            Cell::new(acct.label()),
            Cell::new(acct.institution_id.as_deref().unwrap_or_default()),
            Cell::new(acct.iban.as_deref().unwrap_or_default()),
            Cell::new(balance),
            Cell::new(acct.last_updated.as_deref().unwrap_or_default()),
        ]);
    }
    println!("Accounts\n{table}");
    Ok(())
}

pub async fn rename(app: &App, account_id: &str, name: Option<String>) -> anyhow::Result<()> {
    let name = name.filter(|n| !n.trim().is_empty());
    app.db
        .set_account_display_name(account_id.to_string(), name.clone())
        .await?;
    match name {
        Some(n) => println!("Renamed {account_id} to '{n}'"),
        None => println!("Cleared display name for {account_id}"),
    }
    Ok(())
}
