//! Unified error type for the tvloom application.
//!
//! All crates funnel their failures into [`Error`], which carries enough context
//! for API handlers to derive an HTTP status code via [`Error::http_status`].

use std::fmt;

/// Unified error type covering all failure modes in tvloom.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The requested entity could not be found.
    #[error("{entity} not found: {id}")]
    NotFound {
        /// The kind of entity (e.g. "session", "channel").
        entity: String,
        /// The identifier that was looked up.
        id: String,
    },

    /// Request data failed validation.
    #[error("Validation error: {0}")]
    Validation(String),

    /// A conflicting resource already exists.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// An I/O operation failed.
    #[error("IO error: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// An external tool (ffmpeg, ffprobe) returned an error.
    #[error("Tool error [{tool}]: {message}")]
    Tool {
        /// Name of the tool that failed.
        tool: String,
        /// Human-readable error description.
        message: String,
    },

    /// The schedule could not produce a transcode job.
    #[error("Schedule error [{channel}]: {message}")]
    Schedule {
        /// Channel the job was requested for.
        channel: String,
        /// Human-readable error description.
        message: String,
    },

    /// The operation was cancelled before it could finish.
    #[error("Cancelled")]
    Cancelled,

    /// Catch-all for unexpected internal errors.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Map this error to an appropriate HTTP status code.
    pub fn http_status(&self) -> u16 {
        match self {
            Error::NotFound { .. } => 404,
            Error::Validation(_) => 400,
            Error::Conflict(_) => 409,
            Error::Io { .. } => 500,
            Error::Tool { .. } => 502,
            Error::Schedule { .. } => 503,
            Error::Cancelled => 503,
            Error::Internal(_) => 500,
        }
    }

    /// Convenience constructor for [`Error::NotFound`].
    pub fn not_found(entity: impl Into<String>, id: impl fmt::Display) -> Self {
        Error::NotFound {
            entity: entity.into(),
            id: id.to_string(),
        }
    }

    /// Convenience constructor for [`Error::Tool`].
    pub fn tool(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Tool {
            tool: tool.into(),
            message: message.into(),
        }
    }

    /// Convenience constructor for [`Error::Schedule`].
    pub fn schedule(channel: impl fmt::Display, message: impl Into<String>) -> Self {
        Error::Schedule {
            channel: channel.to_string(),
            message: message.into(),
        }
    }

    /// Whether this error represents a cooperative cancellation rather than a failure.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }
}

/// Result alias using the crate-level [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_display() {
        let err = Error::not_found("session", "104");
        assert_eq!(err.to_string(), "session not found: 104");
        assert_eq!(err.http_status(), 404);
    }

    #[test]
    fn validation_display() {
        let err = Error::Validation("channel number is empty".into());
        assert_eq!(err.to_string(), "Validation error: channel number is empty");
        assert_eq!(err.http_status(), 400);
    }

    #[test]
    fn conflict_display() {
        let err = Error::Conflict("session already active".into());
        assert_eq!(err.to_string(), "Conflict: session already active");
        assert_eq!(err.http_status(), 409);
    }

    #[test]
    fn io_from_std() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file missing");
        let err = Error::from(io_err);
        assert!(matches!(err, Error::Io { .. }));
        assert_eq!(err.http_status(), 500);
    }

    #[test]
    fn tool_display() {
        let err = Error::tool("ffmpeg", "exit code 1");
        assert_eq!(err.to_string(), "Tool error [ffmpeg]: exit code 1");
        assert_eq!(err.http_status(), 502);
    }

    #[test]
    fn schedule_display() {
        let err = Error::schedule("7", "no playout");
        assert_eq!(err.to_string(), "Schedule error [7]: no playout");
        assert_eq!(err.http_status(), 503);
    }

    #[test]
    fn cancelled_is_cancelled() {
        assert!(Error::Cancelled.is_cancelled());
        assert!(!Error::Internal("boom".into()).is_cancelled());
    }
}
