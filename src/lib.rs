//! Dataset Fetcher Core Library
//!
//! Resumable, concurrent fetching of large remote dataset catalogs. A
//! declarative catalog lists files grouped by priority; every file is
//! transferred by one backend chosen at startup, size-verified, retried with
//! exponential backoff, and checkpointed so a later run skips finished work.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//! - [`catalog`] - Catalog schema, validation, and priority-ordered task plans
//! - [`status`] - Persisted per-file transfer records
//! - [`transfer`] - Transfer backends (HTTP client, `wget`, `curl`) and selection
//! - [`verify`] - Size-tolerance verification of downloaded files
//! - [`retry`] - Per-task retry loop with exponential backoff
//! - [`scheduler`] - Bounded worker pool and run statistics

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod catalog;
mod error;
pub mod retry;
pub mod scheduler;
pub mod status;
pub mod transfer;
mod user_agent;
pub mod verify;

// Re-export commonly used types
pub use catalog::{Catalog, CatalogError, TaskCatalog, TaskPlan, TransferTask};
pub use error::ErrorKind;
pub use retry::{RetryPolicy, TaskOutcome};
pub use scheduler::{ConcurrencyScheduler, EngineError, RunStatistics, TaskReport};
pub use status::{StatusError, StatusStore, TransferRecord};
pub use transfer::{
    ApiBackend, BackendKind, SelectionError, ShellToolBackend, TransferBackend, TransferError,
    build_backends, select_backend,
};
pub use verify::IntegrityVerifier;
