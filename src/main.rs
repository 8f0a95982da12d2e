mod app;
mod cli;
mod db;
mod error;
mod fmt;
mod identity;
mod logging;
mod migrations;
mod models;
mod notify;
mod scheduler;
mod service;
mod settings;
mod store;
mod sync;
mod upstream;

use anyhow::Context;
use clap::Parser;
use tracing::info;

use cli::{Cli, Commands};

#[tokio::main]
async fn main() {
    logging::setup_logging();
    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    if let Commands::Init { data_dir } = &cli.command {
        return cli::init::run(data_dir.clone());
    }

    let settings = settings::load_settings();
    let (app, report) = app::App::build(settings).context("opening database")?;
    for step in &report.applied {
        info!(step = *step, "migration applied");
    }

    match cli.command {
        Commands::Init { .. } => Ok(()),
        Commands::Migrate => cli::migrate::run(&report),
        Commands::Sync { force } => cli::sync::once(&app, force).await,
        Commands::Run => cli::sync::scheduled(&app).await,
        Commands::Status => cli::status::run(&app).await,
        Commands::History { limit } => cli::status::history(&app, limit).await,
        Commands::Accounts => cli::accounts::list(&app).await,
        Commands::RenameAccount { account, name } => cli::accounts::rename(&app, &account, name).await,
        Commands::Transactions {
            account,
            from_date,
            to_date,
            min_amount,
            max_amount,
            search,
            status,
            limit,
            offset,
        } => {
            let args = cli::transactions::QueryArgs {
                account,
                from_date,
                to_date,
                min_amount,
                max_amount,
                search,
                status,
                limit,
                offset,
            };
            cli::transactions::list(&app, args).await
        }
        Commands::BalanceHistory { account, balance_type, date } => match date {
            Some(date) => cli::transactions::balance_on(&app, &account, &balance_type, &date).await,
            None => cli::transactions::balance_history(&app, &account, &balance_type).await,
        },
        Commands::ShowTransaction { account, transaction } => {
            cli::transactions::show(&app, &account, &transaction).await
        }
        Commands::Enrich {
            account,
            transaction,
            name,
            category,
            logo,
        } => cli::transactions::enrich(&app, &account, &transaction, name, category, logo).await,
        Commands::Institutions { country } => cli::link::institutions(&app, country).await,
        Commands::Link { institution } => cli::link::create(&app, &institution).await,
        Commands::Backup { output } => cli::backup::run(&app, output).await,
    }
}
