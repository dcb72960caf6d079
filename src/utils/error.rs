//! Error Handling Module
//!
//! Defines the error taxonomy for checkpoint loading, model lifecycle and inference.
//! Uses thiserror for ergonomic error definitions.

use std::path::PathBuf;

use thiserror::Error;

/// Maximum length of an error message stored as a load failure reason
pub const MAX_ERROR_LEN: usize = 500;

/// Main error type for breedvision operations
#[derive(Error, Debug)]
pub enum Error {
    /// Weights download failed (network, HTTP status, or write of the downloaded file)
    #[error("Download error: {0}")]
    Download(String),

    /// Weights file missing and no download was possible
    #[error("Path not found: {0}")]
    NotFound(PathBuf),

    /// Checkpoint could not be decoded or has an unrecognized layout
    #[error("Checkpoint format error: {0}")]
    Format(String),

    /// An allocation for a large buffer failed
    #[error("Out of memory: {0}")]
    OutOfMemory(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Error decoding or converting an uploaded image
    #[error("Image error: {0}")]
    Image(String),

    /// Error during a forward pass
    #[error("Inference error: {0}")]
    Inference(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Shared state lock was poisoned by a panicking thread
    #[error("State lock poisoned: {0}")]
    StatePoisoned(String),

    /// Anything else
    #[error("{0}")]
    Other(String),
}

/// Coarse failure class used by the retry policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Download,
    Format,
    OutOfMemory,
    Unknown,
}

impl Error {
    /// Classify this error for backoff purposes
    pub fn kind(&self) -> FailureKind {
        match self {
            Error::Download(_) | Error::NotFound(_) => FailureKind::Download,
            Error::Format(_) | Error::Serialization(_) => FailureKind::Format,
            Error::OutOfMemory(_) => FailureKind::OutOfMemory,
            Error::Io(e) if e.kind() == std::io::ErrorKind::OutOfMemory => FailureKind::OutOfMemory,
            _ => FailureKind::Unknown,
        }
    }

    /// Render this error as a message of at most [`MAX_ERROR_LEN`] characters
    pub fn bounded_message(&self) -> String {
        truncate_message(&self.to_string(), MAX_ERROR_LEN)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

impl From<image::ImageError> for Error {
    fn from(err: image::ImageError) -> Self {
        Error::Image(err.to_string())
    }
}

impl From<safetensors::SafeTensorError> for Error {
    fn from(err: safetensors::SafeTensorError) -> Self {
        Error::Format(err.to_string())
    }
}

impl From<std::collections::TryReserveError> for Error {
    fn from(err: std::collections::TryReserveError) -> Self {
        Error::OutOfMemory(err.to_string())
    }
}

/// Truncate a message to at most `max_chars` characters, marking the cut
pub fn truncate_message(message: &str, max_chars: usize) -> String {
    if message.chars().count() <= max_chars {
        return message.to_string();
    }
    let mut truncated: String = message.chars().take(max_chars.saturating_sub(3)).collect();
    truncated.push_str("...");
    truncated
}

/// Convenience Result type for breedvision operations
pub type Result<T> = std::result::Result<T, Error>;

/// Extension trait for adding context to errors
pub trait ResultExt<T> {
    /// Add context with a closure (lazy evaluation)
    fn with_context<F: FnOnce() -> String>(self, f: F) -> Result<T>;
}

impl<T, E: std::error::Error> ResultExt<T> for std::result::Result<T, E> {
    fn with_context<F: FnOnce() -> String>(self, f: F) -> Result<T> {
        self.map_err(|e| Error::Other(format!("{}: {}", f(), e)))
    }
}
