use thiserror::Error;

#[derive(Error, Debug)]
pub enum BankSyncError {
    #[error("Database error: {0}")]
    Db(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Transaction has no usable identifier")]
    MissingIdentity,

    #[error("Transaction {0} has neither a booking nor a value date")]
    MissingDate(String),

    #[error("A sync is already running")]
    AlreadyRunning,

    #[error("Migration step '{step}' failed: {reason}")]
    Migration { step: &'static str, reason: String },

    #[error("Upstream returned {status}: {body}")]
    Upstream { status: u16, body: String },

    #[error("Upstream rate limit reached")]
    RateLimited,

    #[error("Unknown account: {0}")]
    UnknownAccount(String),

    #[error("Settings error: {0}")]
    Settings(String),

    #[error("{0}")]
    Other(String),
}

impl BankSyncError {
    /// Errors worth retrying on the next scheduled attempt.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::RateLimited => true,
            Self::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            Self::Upstream { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, BankSyncError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(BankSyncError::RateLimited.is_transient());
        assert!(BankSyncError::Upstream { status: 503, body: String::new() }.is_transient());
        assert!(!BankSyncError::Upstream { status: 401, body: String::new() }.is_transient());
        assert!(!BankSyncError::MissingIdentity.is_transient());
    }

    #[test]
    fn test_migration_error_names_step() {
        let err = BankSyncError::Migration { step: "composite_key", reason: "boom".into() };
        assert_eq!(err.to_string(), "Migration step 'composite_key' failed: boom");
    }
}
