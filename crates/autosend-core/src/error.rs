//! Error types shared across AutoSend crates.

use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, AutoSendError>;

/// Errors surfaced by stores, configuration and the scheduler lifecycle.
#[derive(Debug, Error)]
pub enum AutoSendError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Scheduler is already running")]
    AlreadyRunning,

    #[error("Scheduler is not running")]
    NotRunning,

    #[error("Scheduler is shutting down")]
    ShuttingDown,

    /// A lifecycle transition could not persist its state; the transition was aborted.
    #[error("Failed to persist scheduler state: {0}")]
    Persistence(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl AutoSendError {
    /// True for start-when-running / stop-when-stopped conflicts.
    pub fn is_lifecycle_conflict(&self) -> bool {
        matches!(self, Self::AlreadyRunning | Self::NotRunning)
    }
}
