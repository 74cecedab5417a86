use thiserror::Error;

#[derive(Error, Debug)]
pub enum MigrateError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Registry error: {0}")]
    Registry(String),

    #[error("Migration step {version} ({name}) failed: {reason}")]
    Step {
        version: u64,
        name: String,
        reason: String,
    },

    #[error("Document not found: {0}")]
    NotFound(String),

    #[error("Document already exists: {0}")]
    Conflict(String),

    #[error("Invalid filter: {0}")]
    InvalidFilter(String),

    #[error("Write queue error: {0}")]
    WriteQueue(String),
}

impl MigrateError {
    /// True for failures raised by a migration step rather than by storage.
    pub fn is_step_failure(&self) -> bool {
        matches!(self, MigrateError::Step { .. })
    }
}

pub type Result<T> = std::result::Result<T, MigrateError>;
