use anyhow::Context;
use comfy_table::{Cell, Table};

use crate::app::App;

pub async fn institutions(app: &App, country: Option<String>) -> anyhow::Result<()> {
    let country = country.unwrap_or_else(|| app.settings.upstream.country.clone());
    let institutions = app
        .upstream
        .list_institutions(&country)
        .await
        .with_context(|| format!("listing institutions for {country}"))?;

    let mut table = Table::new();
    table.set_header(vec!["ID", "Name", "BIC", "History (days)"]);
    for inst in &institutions {
        table.add_row(vec![
            Cell::new(&inst.id),
            Cell::new(&inst.name),
            Cell::new(inst.bic.as_deref().unwrap_or_default()),
            Cell::new(inst.transaction_total_days.as_deref().unwrap_or_default()),
        ]);
    }
    println!("Institutions ({country})\n{table}");
    Ok(())
}

pub async fn create(app: &App, institution_id: &str) -> anyhow::Result<()> {
    let requisition = app
        .upstream
        .create_requisition(institution_id, &app.settings.upstream.redirect_url)
        .await
        .with_context(|| format!("creating link for {institution_id}"))?;

    println!("Requisition: {}", requisition.id);
    match requisition.link {
        Some(link) => println!("Open this link to authorise access:\n  {link}"),
        None => println!("Upstream returned no authorisation link."),
    }
    println!("Then run `banksync sync` to fetch the linked accounts.");
    Ok(())
}
