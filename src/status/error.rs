use std::path::PathBuf;

use thiserror::Error;

use crate::ErrorKind;

/// Errors reading or writing the persisted status file.
#[derive(Debug, Error)]
pub enum StatusError {
    /// The status file exists but could not be read.
    #[error("cannot read status file {path}: {source}")]
    Read {
        /// Status file path.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The status file is not a valid record mapping.
    #[error("corrupt status file {path}: {source}")]
    Corrupt {
        /// Status file path.
        path: PathBuf,
        /// Parser error.
        #[source]
        source: serde_json::Error,
    },

    /// The mapping could not be serialized.
    #[error("cannot serialize status mapping: {0}")]
    Serialize(#[source] serde_json::Error),

    /// Writing or renaming the status file failed.
    #[error("cannot write status file {path}: {source}")]
    Write {
        /// Path being written.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },
}

impl StatusError {
    /// Returns the failure class of this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::PersistenceError
    }
}
