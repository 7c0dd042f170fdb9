//! Error types for tl-hls.

use std::io;
use thiserror::Error;

/// Result type for tl-hls operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for tl-hls operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The manifest text could not be parsed.
    #[error("Malformed manifest at line {line}: {message}")]
    Malformed { line: usize, message: String },
}

impl Error {
    /// Create a malformed manifest error for a 0-based line index.
    pub fn malformed(index: usize, msg: impl Into<String>) -> Self {
        Self::Malformed {
            line: index + 1,
            message: msg.into(),
        }
    }
}

impl From<Error> for tl_core::Error {
    fn from(err: Error) -> Self {
        match err {
            Error::Io(source) => tl_core::Error::Io { source },
            Error::Malformed { .. } => tl_core::Error::Internal(err.to_string()),
        }
    }
}
