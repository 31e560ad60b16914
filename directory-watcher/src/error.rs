//! Error types for the directory watcher.

use thiserror::Error;

/// Result type alias for watcher operations.
pub type Result<T> = std::result::Result<T, WatcherError>;

/// Errors that can occur in the directory watcher.
#[derive(Error, Debug)]
pub enum WatcherError {
    /// Directory listing failed.
    #[error("failed to list directory: {0}")]
    Walk(#[from] walkdir::Error),

    /// Notify error.
    #[error("notify error: {0}")]
    Notify(#[from] notify::Error),

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// The detector could not be invoked or reported a failure.
    #[error("detector error: {0}")]
    Detector(String),

    /// A dispatch failed while the watcher is configured to halt on failure.
    #[error("dispatch of {identifier} failed: {reason}")]
    DispatchFailed { identifier: String, reason: String },

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),
}
