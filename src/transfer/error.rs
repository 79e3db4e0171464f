//! Error types for transfer backends.
//!
//! [`TransferError`] covers a single attempt. Every variant is recoverable by
//! the retry loop; [`SelectionError`] is the startup failure raised when no
//! backend passes its capability probe.

use std::path::PathBuf;

use thiserror::Error;

use super::BackendKind;
use crate::ErrorKind;

/// Errors that can occur during one transfer attempt.
#[derive(Debug, Error)]
pub enum TransferError {
    /// Network-level error (DNS resolution, connection refused, TLS errors, etc.)
    #[error("network error downloading {url}: {source}")]
    Network {
        /// The URL that failed to download.
        url: String,
        /// The underlying network error.
        #[source]
        source: reqwest::Error,
    },

    /// The attempt exceeded its time limit.
    #[error("timeout downloading {url}")]
    Timeout {
        /// The URL that timed out.
        url: String,
    },

    /// HTTP error response (4xx client errors, 5xx server errors).
    #[error("HTTP {status} downloading {url}")]
    HttpStatus {
        /// The URL that returned an error status.
        url: String,
        /// The HTTP status code.
        status: u16,
    },

    /// File system error during download (create file, write, etc.)
    #[error("IO error writing to {path}: {source}")]
    Io {
        /// The file path where the error occurred.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The external tool exited unsuccessfully.
    #[error("{tool} exited with {}: {stderr}", exit_label(.code))]
    ToolFailed {
        /// Backend that ran the tool.
        tool: BackendKind,
        /// Exit code, `None` when killed by a signal.
        code: Option<i32>,
        /// Last lines of the tool's stderr.
        stderr: String,
    },

    /// The external tool could not be spawned.
    #[error("cannot run {program}: {source}")]
    ToolUnavailable {
        /// Program name or path.
        program: String,
        /// Spawn error.
        #[source]
        source: std::io::Error,
    },

    /// The file on disk failed size verification.
    #[error("integrity check failed for {path}: {reason}")]
    Integrity {
        /// Verified path.
        path: PathBuf,
        /// Human-readable reason.
        reason: String,
    },
}

impl TransferError {
    /// Creates a network error from a reqwest error, promoting timeouts.
    pub fn network(url: impl Into<String>, source: reqwest::Error) -> Self {
        if source.is_timeout() {
            return Self::timeout(url);
        }
        Self::Network {
            url: url.into(),
            source,
        }
    }

    /// Creates an HTTP status error.
    pub fn http_status(url: impl Into<String>, status: u16) -> Self {
        Self::HttpStatus {
            url: url.into(),
            status,
        }
    }

    /// Creates a timeout error.
    pub fn timeout(url: impl Into<String>) -> Self {
        Self::Timeout { url: url.into() }
    }

    /// Creates an IO error.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Creates an integrity error.
    pub fn integrity(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::Integrity {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Returns the failure class of this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Integrity { .. } => ErrorKind::IntegrityError,
            _ => ErrorKind::TransferError,
        }
    }
}

/// Startup failure of backend selection.
#[derive(Debug, Error)]
pub enum SelectionError {
    /// Every candidate failed its capability probe.
    #[error("no transfer backend available (tried: {})", format_tried(.tried))]
    NoTransportAvailable {
        /// Backends probed, in order.
        tried: Vec<BackendKind>,
    },
}

impl SelectionError {
    /// Returns the failure class of this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::NoTransportAvailable
    }
}

fn exit_label(code: &Option<i32>) -> String {
    code.map_or_else(|| "signal".to_string(), |c| format!("status {c}"))
}

fn format_tried(tried: &[BackendKind]) -> String {
    if tried.is_empty() {
        return "none".to_string();
    }
    tried
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}
