use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MboxError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Corrupt index: {0}")]
    CorruptIndex(String),

    #[error("Stale index: {0}")]
    StaleIndex(String),

    #[error("Range out of bounds: offset {offset} + length {length} exceeds archive size {size}")]
    OutOfRange { offset: u64, length: u64, size: u64 },

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Unit {unit} timed out after {timeout:?}")]
    UnitTimeout { unit: String, timeout: Duration },

    #[error("Write failed for {key}: {reason}")]
    WriteFailure { key: String, reason: String },

    #[error("Message {id} is too large to index ({length} bytes)")]
    RecordTooLarge { id: u64, length: u64 },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Worker error: {0}")]
    Worker(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl MboxError {
    /// Whether rebuilding the index is the expected recovery
    pub fn needs_rebuild(&self) -> bool {
        matches!(self, MboxError::CorruptIndex(_) | MboxError::StaleIndex(_))
    }
}

pub type Result<T> = std::result::Result<T, MboxError>;
