//! Error types for agentwal
//!
//! Provides a unified error type for all operations.

use thiserror::Error;

/// Result type alias using WalError
pub type Result<T> = std::result::Result<T, WalError>;

/// Unified error type for agentwal operations
#[derive(Debug, Error)]
pub enum WalError {
    // -------------------------------------------------------------------------
    // I/O Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // -------------------------------------------------------------------------
    // Log Errors
    // -------------------------------------------------------------------------
    #[error("WAL corruption in segment {segment} at offset {offset}: {reason}")]
    Corruption {
        segment: u64,
        offset: u64,
        reason: String,
    },

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Checkpoint error: {0}")]
    Checkpoint(String),

    #[error("WAL repair failed: {0}")]
    Repair(String),

    /// Repair failed and the whole log was discarded; wraps the original error.
    #[error("repair corrupted WAL: {0}")]
    Unrecoverable(Box<WalError>),

    // -------------------------------------------------------------------------
    // Validation Errors
    // -------------------------------------------------------------------------
    #[error("invalid sample: {0}")]
    InvalidSample(String),

    #[error("invalid exemplar: {0}")]
    InvalidExemplar(String),

    #[error("exemplar label length {length} exceeds maximum of {max} characters")]
    ExemplarLabelLength { length: usize, max: usize },

    #[error("invalid histogram: {0}")]
    InvalidHistogram(String),

    // -------------------------------------------------------------------------
    // Reference Errors
    // -------------------------------------------------------------------------
    #[error("unknown series: {0}")]
    UnknownSeries(String),

    // -------------------------------------------------------------------------
    // Lifecycle Errors
    // -------------------------------------------------------------------------
    #[error("WAL storage closed")]
    Closed,

    #[error("WAL storage already closed")]
    AlreadyClosed,

    // -------------------------------------------------------------------------
    // Configuration Errors
    // -------------------------------------------------------------------------
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),
}

impl WalError {
    /// Whether this error describes structural damage that `Wal::repair` can act on.
    pub fn is_corruption(&self) -> bool {
        matches!(self, WalError::Corruption { .. })
    }
}

impl From<bincode::Error> for WalError {
    fn from(err: bincode::Error) -> Self {
        WalError::Serialization(err.to_string())
    }
}
