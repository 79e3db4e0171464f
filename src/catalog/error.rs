//! Error types for catalog loading and validation.

use std::path::PathBuf;

use thiserror::Error;

use crate::ErrorKind;

/// Errors raised while reading, parsing, or validating a task catalog.
///
/// Every variant belongs to the [`ErrorKind::InvalidCatalog`] class: the
/// catalog is rejected at construction time, never mid-run.
#[derive(Debug, Error)]
pub enum CatalogError {
    /// The catalog file could not be read.
    #[error("cannot read catalog {path}: {source}")]
    Read {
        /// Catalog path.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The catalog file is not valid JSON/TOML or does not match the schema.
    #[error("cannot parse catalog {path}: {message}")]
    Parse {
        /// Catalog path.
        path: PathBuf,
        /// Parser message.
        message: String,
    },

    /// A file descriptor has an empty remote path.
    #[error("group `{group}` file #{index} has an empty remote path")]
    EmptyRemotePath {
        /// Owning group name.
        group: String,
        /// Zero-based index inside the group.
        index: usize,
    },

    /// The remote path does not end in a usable file name.
    #[error("group `{group}` remote path `{path}` has no usable file name")]
    InvalidFilename {
        /// Owning group name.
        group: String,
        /// Offending remote path.
        path: String,
    },

    /// A group has no repository and the catalog has no default repository.
    #[error("group `{group}` has no repository and the catalog defines no default")]
    MissingRepository {
        /// Group name.
        group: String,
    },

    /// Size estimate is negative or not a finite number.
    #[error("group `{group}` file `{path}` has invalid size estimate {value}")]
    InvalidSizeEstimate {
        /// Group name.
        group: String,
        /// Remote path.
        path: String,
        /// Rejected value.
        value: f64,
    },

    /// Two descriptors derive the same local file name.
    #[error("local file name `{filename}` is produced by both `{first}` and `{second}`")]
    DuplicateFilename {
        /// Colliding local file name.
        filename: String,
        /// First remote path producing it.
        first: String,
        /// Second remote path producing it.
        second: String,
    },

    /// A global or transport setting is out of range.
    #[error("invalid setting `{field}`: {message}")]
    InvalidSetting {
        /// Setting name.
        field: &'static str,
        /// Why it was rejected.
        message: String,
    },

    /// Writing a generated catalog failed.
    #[error("cannot write catalog {path}: {source}")]
    Write {
        /// Destination path.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// Refused to overwrite an existing catalog.
    #[error("catalog {path} already exists (use --force to overwrite)")]
    AlreadyExists {
        /// Existing file.
        path: PathBuf,
    },
}

impl CatalogError {
    /// Returns the failure class of this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::InvalidCatalog
    }

    pub(crate) fn setting(field: &'static str, message: impl Into<String>) -> Self {
        Self::InvalidSetting {
            field,
            message: message.into(),
        }
    }
}
