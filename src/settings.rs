use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::db::DB_FILE_NAME;
use crate::error::{BankSyncError, Result};
use crate::notify::filter::FilterRule;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub data_dir: String,
    #[serde(default)]
    pub upstream: UpstreamSettings,
    #[serde(default)]
    pub sync: SyncSettings,
    #[serde(default)]
    pub notifications: NotificationSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamSettings {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub secret_id: String,
    #[serde(default)]
    pub secret_key: String,
    #[serde(default = "default_country")]
    pub country: String,
    #[serde(default = "default_redirect_url")]
    pub redirect_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncSettings {
    /// Six-field cron expressions (seconds first).
    #[serde(default = "default_schedules")]
    pub schedules: Vec<String>,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_delay_secs")]
    pub retry_delay_secs: u64,
    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: u32,
    #[serde(default = "default_max_retry_delay_secs")]
    pub max_retry_delay_secs: u64,
    #[serde(default = "default_expiry_threshold_days")]
    pub expiry_threshold_days: i64,
    #[serde(default = "default_access_valid_for_days")]
    pub access_valid_for_days: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NotificationSettings {
    #[serde(default)]
    pub discord_webhook: Option<String>,
    #[serde(default)]
    pub telegram_bot_token: Option<String>,
    #[serde(default)]
    pub telegram_chat_id: Option<String>,
    /// New-transaction alerts only fire for matching descriptions. Empty
    /// means every transaction matches.
    #[serde(default)]
    pub rules: Vec<FilterRule>,
    #[serde(default)]
    pub min_amount: Option<f64>,
}

fn default_base_url() -> String {
    "https://bankaccountdata.gocardless.com/api/v2".to_string()
}

fn default_country() -> String {
    "GB".to_string()
}

fn default_redirect_url() -> String {
    "http://localhost:8000/callback".to_string()
}

fn default_schedules() -> Vec<String> {
    vec!["0 0 6 * * *".to_string(), "0 0 18 * * *".to_string()]
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_delay_secs() -> u64 {
    300
}

fn default_backoff_factor() -> u32 {
    2
}

fn default_max_retry_delay_secs() -> u64 {
    3600
}

fn default_expiry_threshold_days() -> i64 {
    7
}

fn default_access_valid_for_days() -> i64 {
    90
}

impl Default for UpstreamSettings {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            secret_id: String::new(),
            secret_key: String::new(),
            country: default_country(),
            redirect_url: default_redirect_url(),
        }
    }
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            schedules: default_schedules(),
            max_retries: default_max_retries(),
            retry_delay_secs: default_retry_delay_secs(),
            backoff_factor: default_backoff_factor(),
            max_retry_delay_secs: default_max_retry_delay_secs(),
            expiry_threshold_days: default_expiry_threshold_days(),
            access_valid_for_days: default_access_valid_for_days(),
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir().to_string_lossy().to_string(),
            upstream: UpstreamSettings::default(),
            sync: SyncSettings::default(),
            notifications: NotificationSettings::default(),
        }
    }
}

impl Settings {
    pub fn db_path(&self) -> PathBuf {
        PathBuf::from(&self.data_dir).join(DB_FILE_NAME)
    }

    /// Secrets and the data directory can come from the environment instead
    /// of the settings file.
    pub fn apply_env_overrides<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        if let Some(v) = non_empty("BANKSYNC_DATA_DIR") {
            self.data_dir = v;
        }
        if let Some(v) = non_empty("BANKSYNC_SECRET_ID") {
            self.upstream.secret_id = v;
        }
        if let Some(v) = non_empty("BANKSYNC_SECRET_KEY") {
            self.upstream.secret_key = v;
        }
        if let Some(v) = non_empty("BANKSYNC_DISCORD_WEBHOOK") {
            self.notifications.discord_webhook = Some(v);
        }
        if let Some(v) = non_empty("BANKSYNC_TELEGRAM_TOKEN") {
            self.notifications.telegram_bot_token = Some(v);
        }
        if let Some(v) = non_empty("BANKSYNC_TELEGRAM_CHAT_ID") {
            self.notifications.telegram_chat_id = Some(v);
        }
        self
    }
}

fn config_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config")
        .join("banksync")
}

pub fn settings_path() -> PathBuf {
    config_dir().join("settings.json")
}

fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join("banksync")
}

pub fn load_settings_from(path: &Path) -> Settings {
    if !path.exists() {
        return Settings::default();
    }
    let content = std::fs::read_to_string(path).unwrap_or_default();
    serde_json::from_str(&content).unwrap_or_else(|e| {
        warn!(path = %path.display(), error = %e, "unreadable settings file, using defaults");
        Settings::default()
    })
}

/// Settings file merged with environment overrides.
pub fn load_settings() -> Settings {
    load_settings_from(&settings_path()).apply_env_overrides(|key| std::env::var(key).ok())
}

pub fn save_settings(settings: &Settings) -> Result<()> {
    let dir = config_dir();
    std::fs::create_dir_all(&dir)?;
    let json = serde_json::to_string_pretty(settings)
        .map_err(|e| BankSyncError::Settings(e.to_string()))?;
    std::fs::write(settings_path(), format!("{json}\n"))?;
    Ok(())
}

pub fn settings_file_exists() -> bool {
    settings_path().exists()
}
