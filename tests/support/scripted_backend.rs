//! A [`TransferBackend`] whose per-file behavior is scripted by the test.

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use fetcher_core::{BackendKind, TransferBackend, TransferError, TransferTask};

/// One scripted attempt.
#[derive(Debug, Clone)]
pub enum Step {
    /// Fail with an HTTP 503.
    Fail,
    /// Write a file of this many bytes and succeed.
    Write(u64),
    /// Sleep, then write a file matching the estimate.
    Slow(Duration),
    /// Panic inside the transfer.
    Panic,
}

/// Fake backend: each file consumes its script, then succeeds with a file
/// matching its size estimate (1 MiB when none).
#[derive(Debug)]
pub struct ScriptedBackend {
    kind: BackendKind,
    probe_ok: bool,
    scripts: Mutex<HashMap<String, VecDeque<Step>>>,
    calls: Mutex<Vec<String>>,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

/// Counts one running transfer until dropped, panics included.
struct InFlightGuard<'a>(&'a AtomicUsize);

impl<'a> InFlightGuard<'a> {
    fn enter(in_flight: &'a AtomicUsize, peak: &AtomicUsize) -> Self {
        let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        peak.fetch_max(now, Ordering::SeqCst);
        Self(in_flight)
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self {
            kind: BackendKind::Api,
            probe_ok: true,
            scripts: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            peak_in_flight: AtomicUsize::new(0),
        }
    }

    pub fn with_kind(mut self, kind: BackendKind, probe_ok: bool) -> Self {
        self.kind = kind;
        self.probe_ok = probe_ok;
        self
    }

    /// Queues `steps` for `filename`.
    pub fn script(self, filename: &str, steps: impl IntoIterator<Item = Step>) -> Self {
        self.scripts
            .lock()
            .expect("scripts lock")
            .entry(filename.to_string())
            .or_default()
            .extend(steps);
        self
    }

    /// Filenames in the order their attempts started.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().expect("calls lock").clone()
    }

    /// Highest number of transfers that ran at the same time.
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    /// Attempts made for `filename`.
    pub fn attempts(&self, filename: &str) -> usize {
        self.calls().iter().filter(|f| *f == filename).count()
    }
}

const MIB: u64 = 1_048_576;

fn estimate_bytes(task: &TransferTask) -> u64 {
    match task.size_estimate_mb {
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        Some(mb) if mb > 0.0 => (mb * 1_048_576.0) as u64,
        _ => MIB,
    }
}

async fn write_sparse(path: &Path, bytes: u64) -> Result<(), TransferError> {
    let file = tokio::fs::File::create(path)
        .await
        .map_err(|e| TransferError::io(path, e))?;
    file.set_len(bytes)
        .await
        .map_err(|e| TransferError::io(path, e))
}

#[async_trait]
impl TransferBackend for ScriptedBackend {
    fn kind(&self) -> BackendKind {
        self.kind
    }

    async fn probe(&self) -> bool {
        self.probe_ok
    }

    async fn transfer(
        &self,
        task: &TransferTask,
        download_dir: &Path,
    ) -> Result<PathBuf, TransferError> {
        let _running = InFlightGuard::enter(&self.in_flight, &self.peak_in_flight);
        self.calls
            .lock()
            .expect("calls lock")
            .push(task.local_filename.clone());
        let step = self
            .scripts
            .lock()
            .expect("scripts lock")
            .get_mut(&task.local_filename)
            .and_then(VecDeque::pop_front);

        tokio::fs::create_dir_all(download_dir)
            .await
            .map_err(|e| TransferError::io(download_dir, e))?;
        let target = task.target_path(download_dir);

        match step {
            Some(Step::Fail) => Err(TransferError::http_status(&task.remote_path, 503)),
            Some(Step::Panic) => panic!("scripted panic for {}", task.local_filename),
            Some(Step::Write(bytes)) => {
                write_sparse(&target, bytes).await?;
                Ok(target)
            }
            Some(Step::Slow(delay)) => {
                tokio::time::sleep(delay).await;
                write_sparse(&target, estimate_bytes(task)).await?;
                Ok(target)
            }
            None => {
                write_sparse(&target, estimate_bytes(task)).await?;
                Ok(target)
            }
        }
    }
}
