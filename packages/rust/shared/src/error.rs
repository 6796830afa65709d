//! Error types for Trendlyze.
//!
//! Library crates return [`TrendlyzeError`]. Per-record failures inside a
//! stage (a page that would not download, an annotation that timed out) are
//! not propagated: their `Display` text is stored on the record as
//! `embeddingError`, `analyzeError` or `clusterError`. The CLI wraps the
//! errors that do propagate with `color-eyre`.

use std::path::PathBuf;
use std::time::Duration;

/// Top-level error type for all Trendlyze operations.
#[derive(Debug, thiserror::Error)]
pub enum TrendlyzeError {
    /// Missing API key, unreadable config file, or an out-of-range setting.
    #[error("config error: {message}")]
    Config { message: String },

    /// An article page or model endpoint could not be reached or answered non-2xx.
    /// The message starts with the URL when there is one.
    #[error("network error: {0}")]
    Network(String),

    /// A source feed, model response, or date string that did not parse.
    #[error("parse error: {message}")]
    Parse { message: String },

    /// A stage snapshot could not be encoded, written, or read back.
    #[error("storage error: {0}")]
    Storage(String),

    /// The embedding, annotation, or topic capability returned an error.
    #[error("capability error: {0}")]
    Capability(String),

    /// A capability call did not answer within the configured timeout.
    #[error("{call} timed out after {}s", .elapsed.as_secs_f32())]
    Timeout { call: String, elapsed: Duration },

    /// Reading a source feed or writing a snapshot file failed.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// A bad run id, unknown stage, or a snapshot missing for a resume.
    #[error("validation error: {message}")]
    Validation { message: String },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, TrendlyzeError>;

impl TrendlyzeError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse {
            message: msg.into(),
        }
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Storage error from a database driver or encoder failure.
    pub fn storage(err: impl std::fmt::Display) -> Self {
        Self::Storage(err.to_string())
    }

    pub fn timeout(call: impl Into<String>, elapsed: Duration) -> Self {
        Self::Timeout {
            call: call.into(),
            elapsed,
        }
    }

    /// Wrap a `std::io::Error` with the path it happened at.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_formatting() {
        let err = TrendlyzeError::config("missing API key");
        assert_eq!(err.to_string(), "config error: missing API key");

        let err = TrendlyzeError::validation("stage 'merge' not found");
        assert!(err.to_string().contains("stage 'merge'"));

        let err = TrendlyzeError::Capability("HTTP 500".into());
        assert_eq!(err.to_string(), "capability error: HTTP 500");
    }

    #[test]
    fn timeout_names_the_call() {
        let err = TrendlyzeError::timeout("embedding", Duration::from_millis(1500));
        assert_eq!(err.to_string(), "embedding timed out after 1.5s");
    }

    #[test]
    fn storage_wraps_any_display() {
        let err = TrendlyzeError::storage("disk full");
        assert_eq!(err.to_string(), "storage error: disk full");
    }
}
