//! Durable per-file transfer state.
//!
//! The [`StatusStore`] maps each local filename to its latest
//! [`TransferRecord`] and rewrites the whole mapping to disk on every
//! [`StatusStore::put`]. A missing file is an empty mapping; a corrupt one is
//! a [`StatusError`].
//!
//! Writers are serialized through an async gate held across the file write, so
//! the on-disk file always reflects the most recent completed `put`. Reads go
//! through a short synchronous lock and never wait on IO.

mod error;

pub use error::StatusError;

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::transfer::BackendKind;

/// File name of the status mapping inside the download directory.
pub const STATUS_FILE_NAME: &str = "download_status.json";

/// Persisted state of one file. Absence of a record means pending.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TransferRecord {
    /// An attempt is (or was, if the process died) in progress.
    Downloading {
        /// 1-based attempt number.
        attempt: u32,
        /// When the attempt started.
        started_at: DateTime<Utc>,
        /// Backend running the attempt.
        backend: BackendKind,
    },
    /// Transferred and verified.
    Completed {
        /// When verification succeeded.
        completed_at: DateTime<Utc>,
        /// Attempts used, including the successful one.
        attempts: u32,
        /// Backend that produced the file.
        backend: BackendKind,
        /// Size on disk at completion.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        size_bytes: Option<u64>,
    },
    /// Every attempt failed.
    Failed {
        /// When the last attempt failed.
        failed_at: DateTime<Utc>,
        /// Attempts made.
        attempts: u32,
        /// Message of the last failure.
        last_error: String,
        /// Backend used.
        backend: BackendKind,
    },
}

impl TransferRecord {
    /// Returns true for [`TransferRecord::Completed`].
    #[must_use]
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed { .. })
    }

    /// Lowercase state label.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Downloading { .. } => "downloading",
            Self::Completed { .. } => "completed",
            Self::Failed { .. } => "failed",
        }
    }
}

/// Shared, write-through store of [`TransferRecord`]s.
#[derive(Debug)]
pub struct StatusStore {
    path: PathBuf,
    records: Mutex<BTreeMap<String, TransferRecord>>,
    completed_externally: HashSet<String>,
    write_gate: tokio::sync::Mutex<()>,
}

impl StatusStore {
    /// Reads the persisted mapping at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`StatusError::Read`] or [`StatusError::Corrupt`] when the file
    /// exists but cannot be used. A missing file yields an empty mapping.
    pub fn load(path: &Path) -> Result<BTreeMap<String, TransferRecord>, StatusError> {
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(source) => {
                return Err(StatusError::Read {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };
        if text.trim().is_empty() {
            return Ok(BTreeMap::new());
        }
        serde_json::from_str(&text).map_err(|source| StatusError::Corrupt {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Opens the store at `path`, merging `completed_externally` into
    /// [`StatusStore::is_completed`].
    ///
    /// # Errors
    ///
    /// Returns the errors of [`StatusStore::load`].
    #[instrument(level = "debug", skip(completed_externally), fields(path = %path.display()))]
    pub fn open(path: &Path, completed_externally: HashSet<String>) -> Result<Self, StatusError> {
        let records = Self::load(path)?;

        let stale = records
            .values()
            .filter(|r| matches!(r, TransferRecord::Downloading { .. }))
            .count();
        if stale > 0 {
            warn!(
                stale,
                "status file has interrupted downloads; they will be retried"
            );
        }
        info!(
            records = records.len(),
            external_completed = completed_externally.len(),
            "status store opened"
        );

        Ok(Self {
            path: path.to_path_buf(),
            records: Mutex::new(records),
            completed_externally,
            write_gate: tokio::sync::Mutex::new(()),
        })
    }

    /// Opens `download_dir/download_status.json`.
    ///
    /// # Errors
    ///
    /// Returns the errors of [`StatusStore::load`].
    pub fn open_in(
        download_dir: &Path,
        completed_externally: HashSet<String>,
    ) -> Result<Self, StatusError> {
        Self::open(&download_dir.join(STATUS_FILE_NAME), completed_externally)
    }

    /// Path of the status file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current record for `filename`.
    #[must_use]
    pub fn get(&self, filename: &str) -> Option<TransferRecord> {
        self.lock_records().get(filename).cloned()
    }

    /// True when `filename` is completed here or in the external set.
    #[must_use]
    pub fn is_completed(&self, filename: &str) -> bool {
        self.completed_externally.contains(filename)
            || self
                .lock_records()
                .get(filename)
                .is_some_and(TransferRecord::is_completed)
    }

    /// Copy of the whole mapping.
    #[must_use]
    pub fn snapshot(&self) -> BTreeMap<String, TransferRecord> {
        self.lock_records().clone()
    }

    /// Filenames with a `Failed` record and their last error.
    #[must_use]
    pub fn failed_records(&self) -> Vec<(String, String)> {
        self.lock_records()
            .iter()
            .filter_map(|(name, record)| match record {
                TransferRecord::Failed { last_error, .. } => {
                    Some((name.clone(), last_error.clone()))
                }
                _ => None,
            })
            .collect()
    }

    /// Replaces the record for `filename` and rewrites the status file.
    ///
    /// The in-memory update is visible to [`StatusStore::get`] immediately;
    /// the call returns once the file has been replaced on disk.
    ///
    /// # Errors
    ///
    /// Returns [`StatusError`] if serialization or the file write fails.
    pub async fn put(&self, filename: &str, record: TransferRecord) -> Result<(), StatusError> {
        let _gate = self.write_gate.lock().await;

        let payload = {
            let mut records = self.lock_records();
            debug!(filename, status = record.label(), "status update");
            records.insert(filename.to_string(), record);
            serde_json::to_vec_pretty(&*records).map_err(StatusError::Serialize)?
        };

        self.persist(&payload).await
    }

    async fn persist(&self, payload: &[u8]) -> Result<(), StatusError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| StatusError::Write {
                    path: parent.to_path_buf(),
                    source,
                })?;
        }

        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, payload)
            .await
            .map_err(|source| StatusError::Write {
                path: tmp.clone(),
                source,
            })?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|source| StatusError::Write {
                path: self.path.clone(),
                source,
            })
    }

    fn lock_records(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, TransferRecord>> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
