//! Failure taxonomy shared by all fetcher components.
//!
//! Each module defines its own structured error type; [`ErrorKind`] is the
//! coarse classification used to decide whether an error is fatal to a run
//! or recovered locally by the retry loop.

use std::fmt;

/// Coarse classification of every error the fetcher can produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Malformed declarative input. Fatal at startup, never retried.
    InvalidCatalog,
    /// No backend passed capability probing. Fatal at startup.
    NoTransportAvailable,
    /// A single attempt's network or tool failure. Retried up to the task bound.
    TransferError,
    /// Downloaded bytes failed size-tolerance verification. Retried like
    /// [`ErrorKind::TransferError`].
    IntegrityError,
    /// The status store could not be read or written. Escalated.
    PersistenceError,
}

impl ErrorKind {
    /// Returns the stable label used in logs.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidCatalog => "invalid_catalog",
            Self::NoTransportAvailable => "no_transport_available",
            Self::TransferError => "transfer_error",
            Self::IntegrityError => "integrity_error",
            Self::PersistenceError => "persistence_error",
        }
    }

    /// Returns true when an error of this kind aborts the whole run.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::InvalidCatalog | Self::NoTransportAvailable | Self::PersistenceError
        )
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
