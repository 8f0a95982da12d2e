use std::path::PathBuf;

use anyhow::Context;

use crate::service::DatabaseService;
use crate::settings::{load_settings_from, save_settings, settings_file_exists, settings_path};

/// Write the settings file (keeping any existing values) and create the
/// database in the chosen data directory.
pub fn run(data_dir: Option<String>) -> anyhow::Result<()> {
    let existed = settings_file_exists();
    let mut settings = load_settings_from(&settings_path());
    if let Some(dir) = data_dir {
        settings.data_dir = dir;
    }
    save_settings(&settings).context("saving settings")?;

    let (_db, report) = DatabaseService::open(&settings.db_path())
        .with_context(|| format!("creating database in {}", settings.data_dir))?;

    println!(
        "{} {}",
        if existed { "Updated" } else { "Created" },
        settings_path().display()
    );
    println!("Data dir:   {}", PathBuf::from(&settings.data_dir).display());
    println!("Database:   {} ({} migration step(s) applied)", settings.db_path().display(), report.applied.len());
    println!();
    println!("Add your upstream secret_id and secret_key to the settings file, or set");
    println!("BANKSYNC_SECRET_ID and BANKSYNC_SECRET_KEY, then run `banksync link`.");
    Ok(())
}
