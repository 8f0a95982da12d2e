use comfy_table::{Cell, CellAlignment, Table};

use crate::app::App;
use crate::fmt::{money, parse_date};
use crate::models::{Enrichment, TransactionStatus};
use crate::store::TransactionQuery;

pub struct QueryArgs {
    pub account: Option<String>,
    pub from_date: Option<String>,
    pub to_date: Option<String>,
    pub min_amount: Option<f64>,
    pub max_amount: Option<f64>,
    pub search: Option<String>,
    pub status: Option<String>,
    pub limit: u32,
    pub offset: u32,
}

pub async fn list(app: &App, args: QueryArgs) -> anyhow::Result<()> {
    let status = args
        .status
        .as_deref()
        .map(str::parse::<TransactionStatus>)
        .transpose()?;
    let query = TransactionQuery {
        account_id: args.account,
        from_date: args.from_date,
        to_date: args.to_date,
        min_amount: args.min_amount,
        max_amount: args.max_amount,
        search: args.search,
        status,
        limit: Some(args.limit),
        offset: args.offset,
    };
    let page = app.db.query_transactions(query).await?;

    let mut table = Table::new();
    table.set_header(vec!["Date", "Account", "Description", "Amount", "Status", "Category"]);
    for record in &page.items {
        let txn = &record.transaction;
        let enrichment = record.enrichment.as_ref();
        let description = enrichment
            .and_then(|e| e.clean_name.as_deref())
            .unwrap_or(&txn.description);
        table.add_row(vec![
            Cell::new(&txn.date),
            Cell::new(&txn.account_id),
            Cell::new(description),
            Cell::new(money(txn.amount, txn.currency.as_deref())).set_alignment(CellAlignment::Right),
            Cell::new(txn.status.as_str()),
            Cell::new(enrichment.and_then(|e| e.category.as_deref()).unwrap_or_default()),
        ]);
    }
    println!("{table}");
    let shown_to = args.offset as u64 + page.items.len() as u64;
    println!(
        "Showing {}-{} of {}",
        if page.items.is_empty() { 0 } else { args.offset as u64 + 1 },
        shown_to,
        page.total
    );
    Ok(())
}

pub async fn balance_history(app: &App, account_id: &str, balance_type: &str) -> anyhow::Result<()> {
    let account = app
        .db
        .get_account(account_id.to_string())
        .await?
        .ok_or_else(|| anyhow::anyhow!("unknown account: {account_id}"))?;
    let points = app
        .db
        .historical_balances(account_id.to_string(), balance_type.to_string())
        .await?;
    if points.is_empty() {
        println!("No {balance_type} balance or transactions for {}.", account.label());
        return Ok(());
    }

    let mut table = Table::new();
    table.set_header(vec!["Date", "Balance"]);
    for point in &points {
        table.add_row(vec![
            Cell::new(&point.date),
            Cell::new(money(point.balance, account.currency.as_deref())).set_alignment(CellAlignment::Right),
        ]);
    }
    println!("{} ({balance_type})\n{table}", account.label());
    Ok(())
}

pub async fn balance_on(app: &App, account_id: &str, balance_type: &str, date: &str) -> anyhow::Result<()> {
    if parse_date(date).is_none() {
        anyhow::bail!("invalid date '{date}', expected YYYY-MM-DD");
    }
    let currency = app
        .db
        .get_account(account_id.to_string())
        .await?
        .ok_or_else(|| anyhow::anyhow!("unknown account: {account_id}"))?
        .currency;
    match app
        .db
        .balance_at(account_id.to_string(), balance_type.to_string(), date.to_string())
        .await?
    {
        Some(balance) => println!("{date}: {}", money(balance, currency.as_deref())),
        None => println!("No {balance_type} balance stored for {account_id}."),
    }
    Ok(())
}

pub async fn show(app: &App, account_id: &str, transaction_id: &str) -> anyhow::Result<()> {
    let record = app
        .db
        .get_transaction(account_id.to_string(), transaction_id.to_string())
        .await?
        .ok_or_else(|| anyhow::anyhow!("no transaction {transaction_id} in account {account_id}"))?;
    let txn = &record.transaction;

    println!("Account:      {}", txn.account_id);
    println!("Transaction:  {}", txn.transaction_id);
    if let Some(internal) = &txn.internal_transaction_id {
        println!("Internal id:  {internal}");
    }
    println!("Date:         {}", txn.date);
    println!("Status:       {}", txn.status.as_str());
    println!("Amount:       {}", money(txn.amount, txn.currency.as_deref()));
    println!("Description:  {}", txn.description);
    if let Some(e) = &record.enrichment {
        println!("Clean name:   {}", e.clean_name.as_deref().unwrap_or_default());
        println!("Category:     {}", e.category.as_deref().unwrap_or_default());
    }
    println!();
    println!("{}", serde_json::to_string_pretty(&txn.raw)?);
    Ok(())
}

pub async fn enrich(
    app: &App,
    account_id: &str,
    transaction_id: &str,
    name: Option<String>,
    category: Option<String>,
    logo: Option<String>,
) -> anyhow::Result<()> {
    if app
        .db
        .get_transaction(account_id.to_string(), transaction_id.to_string())
        .await?
        .is_none()
    {
        anyhow::bail!("no transaction {transaction_id} in account {account_id}");
    }
    let mut enrichment = app
        .db
        .get_enrichment(account_id.to_string(), transaction_id.to_string())
        .await?
        .unwrap_or_else(|| Enrichment {
            account_id: account_id.to_string(),
            transaction_id: transaction_id.to_string(),
            ..Enrichment::default()
        });
    if name.is_some() {
        enrichment.clean_name = name;
    }
    if category.is_some() {
        enrichment.category = category;
    }
    if logo.is_some() {
        enrichment.logo = logo;
    }
    app.db.upsert_enrichment(enrichment).await?;
    println!("Updated enrichment for {transaction_id}");
    Ok(())
}
