use std::path::PathBuf;

use anyhow::Context;

use crate::app::App;
use crate::fmt::format_bytes;

pub async fn run(app: &App, output: Option<String>) -> anyhow::Result<()> {
    let dest_path = match output {
        Some(p) => PathBuf::from(p),
        None => {
            let backups_dir = PathBuf::from(&app.settings.data_dir).join("backups");
            std::fs::create_dir_all(&backups_dir)
                .with_context(|| format!("creating {}", backups_dir.display()))?;
            let stamp = chrono::Local::now().format("%Y%m%d-%H%M%S");
            backups_dir.join(format!("banksync-{stamp}.db"))
        }
    };

    app.db.backup_to(dest_path.clone()).await.context("backing up database")?;

    let size = std::fs::metadata(&dest_path)?.len();
    println!("Backup saved to {}", dest_path.display());
    println!("Size: {}", format_bytes(size));
    Ok(())
}
