//! Error types for S3Ferry
//!
//! Every failure a task can hit ends up as a [`TransferError`]. Workers never
//! hand these back to the caller directly: they are converted into outcome
//! counters by the result aggregator once the pool drains.

use humansize::{format_size, BINARY};
use std::path::PathBuf;
use thiserror::Error;

/// Main error type for transfer operations
#[derive(Error, Debug)]
pub enum TransferError {
    /// I/O error during local file operations
    #[error("I/O error at '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A remote call returned an error
    #[error("{operation} failed: {message}")]
    Remote { operation: String, message: String },

    /// A remote call succeeded but its response lacks a required field
    #[error("{operation} response is missing {field}")]
    MissingField {
        operation: &'static str,
        field: &'static str,
    },

    /// The task queue refused to admit a task
    #[error("Task queue rejected {task}: {reason}")]
    QueueRejected { task: String, reason: String },

    /// The task queue has been closed
    #[error("Task queue is closed")]
    QueueClosed,

    /// Transfer record is malformed
    #[error("Invalid transfer record: {0}")]
    InvalidRecord(String),

    /// Object exceeds the provider's maximum object size
    #[error(
        "Skipping file {name}. File exceeds maximum upload size of {}.",
        human_size(.limit)
    )]
    FileTooLarge { name: String, size: u64, limit: u64 },

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Streaming transfer error
    #[error("Stream transfer error: {0}")]
    Stream(String),

    /// A pool thread could not be started
    #[error("Failed to spawn {name} thread: {source}")]
    Spawn {
        name: String,
        #[source]
        source: std::io::Error,
    },

    /// A task panicked inside a worker
    #[error("Worker panicked: {0}")]
    WorkerPanic(String),
}

impl TransferError {
    /// Create an I/O error with path context
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Create a remote call error
    pub fn remote(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Remote {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::ConfigError(message.into())
    }

    /// Size violations are reported as warnings, not failures
    pub fn is_warning(&self) -> bool {
        matches!(self, Self::FileTooLarge { .. })
    }
}

fn human_size(bytes: &u64) -> String {
    format_size(*bytes, BINARY)
}

/// Result type alias for transfer operations
pub type Result<T> = std::result::Result<T, TransferError>;

impl From<serde_json::Error> for TransferError {
    fn from(err: serde_json::Error) -> Self {
        TransferError::ConfigError(err.to_string())
    }
}

/// Extension trait for adding path context to std::io::Result
pub trait IoResultExt<T> {
    /// Add path context to an I/O error
    fn with_path(self, path: impl Into<PathBuf>) -> Result<T>;
}

impl<T> IoResultExt<T> for std::io::Result<T> {
    fn with_path(self, path: impl Into<PathBuf>) -> Result<T> {
        self.map_err(|e| TransferError::io(path, e))
    }
}
