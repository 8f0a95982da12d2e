use std::path::Path;

use assert_cmd::Command;
use predicates::prelude::*;

/// A `banksync` command isolated to `home`: settings, data and secrets all
/// come from the temp directory, never from the real environment.
fn banksync(home: &Path) -> Command {
    let mut cmd = Command::cargo_bin("banksync").unwrap();
    cmd.env("HOME", home)
        .env("XDG_CONFIG_HOME", home.join(".config"))
        .env("XDG_DATA_HOME", home.join(".local/share"))
        .env("BANKSYNC_DATA_DIR", home.join("ledger"))
        .env("RUST_LOG", "warn")
        .env_remove("BANKSYNC_SECRET_ID")
        .env_remove("BANKSYNC_SECRET_KEY")
        .env_remove("BANKSYNC_DISCORD_WEBHOOK")
        .env_remove("BANKSYNC_TELEGRAM_TOKEN")
        .env_remove("BANKSYNC_TELEGRAM_CHAT_ID");
    cmd
}

#[test]
fn init_writes_settings_and_database() {
    let home = tempfile::tempdir().unwrap();
    let data_dir = home.path().join("books");

    banksync(home.path())
        .env_remove("BANKSYNC_DATA_DIR")
        .args(["init", "--data-dir"])
        .arg(&data_dir)
        .assert()
        .success()
        .stdout(predicate::str::contains("Created"));

    assert!(home.path().join(".config/banksync/settings.json").exists());
    assert!(data_dir.join("banksync.db").exists());
}

#[test]
fn migrate_is_idempotent() {
    let home = tempfile::tempdir().unwrap();

    banksync(home.path())
        .arg("migrate")
        .assert()
        .success()
        .stdout(predicate::str::contains("Applied:"));

    banksync(home.path())
        .arg("migrate")
        .assert()
        .success()
        .stdout(predicate::str::contains("Schema is up to date."));
}

#[test]
fn status_on_empty_ledger() {
    let home = tempfile::tempdir().unwrap();

    banksync(home.path())
        .arg("status")
        .assert()
        .success()
        .stdout(predicate::str::contains("Accounts:      0"))
        .stdout(predicate::str::contains("No sync has run yet"));

    banksync(home.path())
        .arg("transactions")
        .assert()
        .success()
        .stdout(predicate::str::contains("Showing 0-0 of 0"));
}

#[test]
fn rename_unknown_account_fails() {
    let home = tempfile::tempdir().unwrap();

    banksync(home.path())
        .args(["rename-account", "missing", "Savings"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Unknown account: missing"));
}

#[test]
fn sync_without_credentials_is_recorded() {
    let home = tempfile::tempdir().unwrap();

    banksync(home.path())
        .arg("sync")
        .assert()
        .failure()
        .stderr(predicate::str::contains("not configured"));

    banksync(home.path())
        .arg("history")
        .assert()
        .success()
        .stdout(predicate::str::contains("manual"))
        .stdout(predicate::str::contains("failed, 1 error(s)"));
}

#[test]
fn backup_copies_database() {
    let home = tempfile::tempdir().unwrap();
    let dest = home.path().join("copy.db");

    banksync(home.path())
        .args(["backup", "--output"])
        .arg(&dest)
        .assert()
        .success()
        .stdout(predicate::str::contains("Backup saved to"));

    assert!(dest.exists());
}
