pub mod accounts;
pub mod backup;
pub mod init;
pub mod link;
pub mod migrate;
pub mod status;
pub mod sync;
pub mod transactions;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "banksync", about = "Keep a local ledger of your open-banking accounts in sync.")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Write the settings file and create the database.
    Init {
        /// Data directory (default: the platform data dir)
        #[arg(long = "data-dir")]
        data_dir: Option<String>,
    },
    /// Bring the database schema up to date and show what changed.
    Migrate,
    /// Run one sync pass now.
    Sync {
        /// Run even if another pass is marked running
        #[arg(long)]
        force: bool,
    },
    /// Run scheduled syncs until interrupted (Ctrl-C).
    Run,
    /// Show data location, counts and the last sync.
    Status,
    /// List recent sync operations.
    History {
        #[arg(long, default_value = "10")]
        limit: u32,
    },
    /// List synced accounts.
    Accounts,
    /// Set or clear an account's display name.
    RenameAccount {
        /// Account id
        account: String,
        /// New display name (omit to clear)
        name: Option<String>,
    },
    /// Query stored transactions.
    Transactions {
        /// Account id
        #[arg(long)]
        account: Option<String>,
        /// Earliest date (YYYY-MM-DD)
        #[arg(long = "from")]
        from_date: Option<String>,
        /// Latest date (YYYY-MM-DD)
        #[arg(long = "to")]
        to_date: Option<String>,
        #[arg(long = "min-amount", allow_hyphen_values = true)]
        min_amount: Option<f64>,
        #[arg(long = "max-amount", allow_hyphen_values = true)]
        max_amount: Option<f64>,
        /// Match description or enriched name
        #[arg(long)]
        search: Option<String>,
        /// booked or pending
        #[arg(long)]
        status: Option<String>,
        #[arg(long, default_value = "50")]
        limit: u32,
        #[arg(long, default_value = "0")]
        offset: u32,
    },
    /// Show the derived end-of-day balance for every transaction date.
    BalanceHistory {
        /// Account id
        account: String,
        /// Balance type to anchor on
        #[arg(long = "type", default_value = "closingBooked")]
        balance_type: String,
        /// Only show the balance at the end of this date (YYYY-MM-DD)
        #[arg(long)]
        date: Option<String>,
    },
    /// Show one stored transaction with its enrichment and raw payload.
    ShowTransaction {
        /// Account id
        account: String,
        /// Transaction id
        transaction: String,
    },
    /// Attach a clean name, category or logo to a transaction.
    Enrich {
        /// Account id
        account: String,
        /// Transaction id
        transaction: String,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        category: Option<String>,
        #[arg(long)]
        logo: Option<String>,
    },
    /// List institutions available for linking.
    Institutions {
        /// Two-letter country code (default from settings)
        #[arg(long)]
        country: Option<String>,
    },
    /// Start linking a bank and print the authorisation link.
    Link {
        /// Institution id (see `banksync institutions`)
        institution: String,
    },
    /// Back up the database.
    Backup {
        /// Output path (default: <data_dir>/backups/banksync-YYYYMMDD-HHMMSS.db)
        #[arg(long)]
        output: Option<String>,
    },
}
