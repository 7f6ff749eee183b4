//! Error types for BreachWatch.
//!
//! Library crates use [`BreachWatchError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

/// Top-level error type for all BreachWatch operations.
#[derive(Debug, thiserror::Error)]
pub enum BreachWatchError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Transport-level failure (connect, TLS, timeout, body read).
    #[error("network error: {0}")]
    Network(String),

    /// A remote service answered with a non-success status.
    #[error("HTTP {status} from {url}")]
    Http { status: u16, url: String },

    /// Response body could not be decoded or had an unexpected shape.
    #[error("parse error: {message}")]
    Parse { message: String },

    /// Relational log error.
    #[error("storage error: {0}")]
    Storage(String),

    /// Search index error.
    #[error("index error: {0}")]
    Index(String),

    /// Asset inventory error.
    #[error("inventory error: {0}")]
    Inventory(String),

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, BreachWatchError>;

impl BreachWatchError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a parse error from any displayable message.
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse {
            message: msg.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Build an [`BreachWatchError::Http`] from a response status.
    pub fn http(status: u16, url: impl Into<String>) -> Self {
        Self::Http {
            status,
            url: url.into(),
        }
    }
}
