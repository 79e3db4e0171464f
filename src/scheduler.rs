//! Bounded concurrent dispatch of transfer tasks.
//!
//! The [`ConcurrencyScheduler`] offers tasks to workers in priority order and
//! never runs more than its concurrency limit at once. Each worker drives one
//! task through [`RetryPolicy::run`] before its permit is released.
//!
//! # Concurrency Model
//!
//! - Each task runs in its own Tokio task
//! - A semaphore permit is acquired, in priority order, before spawning
//! - Permits are released automatically when the task ends (RAII)
//! - A panicking task is recorded as failed; the pool keeps going
//!
//! # Interruption
//!
//! When the interrupt flag becomes `true` the scheduler stops dispatching,
//! waits up to the grace period for in-flight tasks, then aborts the rest.
//! Aborted tasks keep whatever record they last persisted.
//!
//! # Persistence failures
//!
//! A status-store write failure inside any worker stops dispatch of new
//! tasks. In-flight tasks are drained, then the failure is returned as
//! [`EngineError::Persistence`].

use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, error, info, instrument, warn};

use crate::catalog::{MAX_CONCURRENCY, MIN_CONCURRENCY, TaskPlan, TransferTask};
use crate::retry::{RetryPolicy, TaskOutcome};
use crate::status::{StatusError, StatusStore, TransferRecord};
use crate::transfer::{BackendKind, SHELL_TOOL_MAX_CONCURRENCY, TransferBackend};
use crate::verify::IntegrityVerifier;

/// Time in-flight tasks get to finish after an interrupt.
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(5);

/// Poll interval of the interrupt watcher while waiting for a permit.
const INTERRUPT_POLL: Duration = Duration::from_millis(50);

/// Error type for scheduler operations.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Invalid concurrency value provided.
    #[error(
        "invalid concurrency value {value}: must be between {MIN_CONCURRENCY} and {MAX_CONCURRENCY}"
    )]
    InvalidConcurrency {
        /// The invalid value that was provided.
        value: usize,
    },

    /// Semaphore was closed unexpectedly.
    #[error("semaphore closed unexpectedly")]
    SemaphoreClosed,

    /// A worker could not persist a status update.
    #[error("status store failure: {0}")]
    Persistence(#[from] StatusError),
}

impl EngineError {
    /// Returns the failure class of this error, if it has one.
    #[must_use]
    pub fn kind(&self) -> Option<crate::ErrorKind> {
        match self {
            Self::Persistence(e) => Some(e.kind()),
            Self::InvalidConcurrency { .. } | Self::SemaphoreClosed => None,
        }
    }
}

/// One finished task, in completion order.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskReport {
    /// Local filename of the task.
    pub filename: String,
    /// Terminal outcome.
    pub outcome: TaskOutcome,
}

/// Statistics from one scheduler run.
///
/// Counters are atomics so workers and a progress display can share one
/// instance. Completion order is preserved in [`RunStatistics::reports`].
#[derive(Debug)]
pub struct RunStatistics {
    total: AtomicUsize,
    completed: AtomicUsize,
    failed: AtomicUsize,
    skipped: AtomicUsize,
    interrupted: AtomicUsize,
    not_started: AtomicUsize,
    retried: AtomicUsize,
    was_interrupted: AtomicBool,
    started_at: DateTime<Utc>,
    finished_at: Mutex<Option<DateTime<Utc>>>,
    reports: Mutex<Vec<TaskReport>>,
}

impl Default for RunStatistics {
    fn default() -> Self {
        Self::new()
    }
}

impl RunStatistics {
    /// Creates a zeroed tracker stamped with the current time.
    #[must_use]
    pub fn new() -> Self {
        Self {
            total: AtomicUsize::new(0),
            completed: AtomicUsize::new(0),
            failed: AtomicUsize::new(0),
            skipped: AtomicUsize::new(0),
            interrupted: AtomicUsize::new(0),
            not_started: AtomicUsize::new(0),
            retried: AtomicUsize::new(0),
            was_interrupted: AtomicBool::new(false),
            started_at: Utc::now(),
            finished_at: Mutex::new(None),
            reports: Mutex::new(Vec::new()),
        }
    }

    /// Files considered in this run (dispatched plus skipped).
    #[must_use]
    pub fn total(&self) -> usize {
        self.total.load(Ordering::SeqCst)
    }

    /// Tasks that reached `Completed`.
    #[must_use]
    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }

    /// Tasks that reached `Failed`, including panicked tasks.
    #[must_use]
    pub fn failed(&self) -> usize {
        self.failed.load(Ordering::SeqCst)
    }

    /// Files excluded because they were already complete.
    #[must_use]
    pub fn skipped(&self) -> usize {
        self.skipped.load(Ordering::SeqCst)
    }

    /// Tasks stopped by an interrupt.
    #[must_use]
    pub fn interrupted(&self) -> usize {
        self.interrupted.load(Ordering::SeqCst)
    }

    /// Pending tasks never dispatched because the run stopped early.
    #[must_use]
    pub fn not_started(&self) -> usize {
        self.not_started.load(Ordering::SeqCst)
    }

    /// Extra attempts beyond the first, across all tasks.
    #[must_use]
    pub fn retried(&self) -> usize {
        self.retried.load(Ordering::SeqCst)
    }

    /// Tasks with a terminal outcome so far.
    #[must_use]
    pub fn finished(&self) -> usize {
        self.completed() + self.failed() + self.interrupted()
    }

    /// True when the run was cut short by an interrupt.
    #[must_use]
    pub fn was_interrupted(&self) -> bool {
        self.was_interrupted.load(Ordering::SeqCst)
    }

    /// Start of the run.
    #[must_use]
    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// End of the run, once finished.
    #[must_use]
    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        *self
            .finished_at
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Wall time between start and end (or now, while running).
    #[must_use]
    pub fn elapsed(&self) -> chrono::Duration {
        self.finished_at().unwrap_or_else(Utc::now) - self.started_at
    }

    /// `completed / (total - skipped)` in percent; `None` when nothing was attempted.
    #[must_use]
    pub fn success_rate(&self) -> Option<f64> {
        let attempted = self.total().saturating_sub(self.skipped());
        if attempted == 0 {
            return None;
        }
        #[allow(clippy::cast_precision_loss)]
        let rate = self.completed() as f64 / attempted as f64 * 100.0;
        Some(rate)
    }

    /// Finished tasks in completion order.
    #[must_use]
    pub fn reports(&self) -> Vec<TaskReport> {
        self.reports
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Failed tasks and their last error, in completion order.
    #[must_use]
    pub fn failures(&self) -> Vec<(String, String)> {
        self.reports()
            .into_iter()
            .filter_map(|report| match report.outcome {
                TaskOutcome::Failed { last_error, .. } => Some((report.filename, last_error)),
                _ => None,
            })
            .collect()
    }

    fn add_total(&self, count: usize) {
        self.total.fetch_add(count, Ordering::SeqCst);
    }

    fn add_skipped(&self, count: usize) {
        self.skipped.fetch_add(count, Ordering::SeqCst);
    }

    fn add_not_started(&self, count: usize) {
        self.not_started.fetch_add(count, Ordering::SeqCst);
    }

    fn set_interrupted(&self) {
        self.was_interrupted.store(true, Ordering::SeqCst);
    }

    fn mark_finished(&self) {
        *self
            .finished_at
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(Utc::now());
    }

    fn record(&self, filename: &str, outcome: TaskOutcome) {
        let counter = match &outcome {
            TaskOutcome::Completed { .. } => &self.completed,
            TaskOutcome::Failed { .. } => &self.failed,
            TaskOutcome::Interrupted { .. } => &self.interrupted,
        };
        counter.fetch_add(1, Ordering::SeqCst);
        let extra = usize::try_from(outcome.attempts().saturating_sub(1)).unwrap_or(0);
        self.retried.fetch_add(extra, Ordering::SeqCst);

        self.reports
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(TaskReport {
                filename: filename.to_string(),
                outcome,
            });
    }
}

/// Bounded worker pool for transfer tasks.
#[derive(Debug)]
pub struct ConcurrencyScheduler {
    semaphore: Arc<Semaphore>,
    concurrency: usize,
    policy: RetryPolicy,
    verifier: IntegrityVerifier,
    grace_period: Duration,
}

impl ConcurrencyScheduler {
    /// Creates a scheduler running at most `concurrency` tasks at once.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidConcurrency`] if the value is outside
    /// the valid range (1-100).
    #[instrument(level = "debug", skip(policy, verifier))]
    pub fn new(
        concurrency: usize,
        policy: RetryPolicy,
        verifier: IntegrityVerifier,
    ) -> Result<Self, EngineError> {
        if !(MIN_CONCURRENCY..=MAX_CONCURRENCY).contains(&concurrency) {
            return Err(EngineError::InvalidConcurrency { value: concurrency });
        }
        debug!(concurrency, "creating scheduler");

        Ok(Self {
            semaphore: Arc::new(Semaphore::new(concurrency)),
            concurrency,
            policy,
            verifier,
            grace_period: DEFAULT_GRACE_PERIOD,
        })
    }

    /// Creates a scheduler sized for `backend`; see [`effective_concurrency`].
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidConcurrency`] if `max_concurrent` is
    /// outside the valid range (1-100).
    pub fn for_backend(
        max_concurrent: usize,
        backend: BackendKind,
        policy: RetryPolicy,
        verifier: IntegrityVerifier,
    ) -> Result<Self, EngineError> {
        if !(MIN_CONCURRENCY..=MAX_CONCURRENCY).contains(&max_concurrent) {
            return Err(EngineError::InvalidConcurrency {
                value: max_concurrent,
            });
        }
        Self::new(
            effective_concurrency(max_concurrent, backend),
            policy,
            verifier,
        )
    }

    /// Replaces the post-interrupt grace period.
    #[must_use]
    pub fn with_grace_period(mut self, grace_period: Duration) -> Self {
        self.grace_period = grace_period;
        self
    }

    /// Returns the concurrency limit.
    #[must_use]
    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Runs a whole plan and returns its statistics.
    ///
    /// # Errors
    ///
    /// See [`ConcurrencyScheduler::run_with_stats`].
    pub async fn run(
        &self,
        plan: TaskPlan,
        backend: Arc<dyn TransferBackend>,
        store: Arc<StatusStore>,
        download_dir: &Path,
        interrupted: Arc<AtomicBool>,
    ) -> Result<RunStatistics, EngineError> {
        let stats = Arc::new(RunStatistics::new());
        self.run_with_stats(
            plan,
            backend,
            store,
            download_dir,
            Arc::clone(&stats),
            interrupted,
        )
        .await?;
        Ok(Arc::try_unwrap(stats).unwrap_or_else(|shared| snapshot_of(&shared)))
    }

    /// Runs a whole plan, recording into a caller-owned `stats`.
    ///
    /// Individual task failures never make this return an error; they are
    /// counted in `stats` and persisted as `Failed` records.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Persistence`] when a status update could not be
    /// written, and [`EngineError::SemaphoreClosed`] if the permit pool was
    /// closed.
    #[allow(clippy::too_many_lines)]
    #[instrument(skip_all, fields(concurrency = self.concurrency, download_dir = %download_dir.display()))]
    pub async fn run_with_stats(
        &self,
        plan: TaskPlan,
        backend: Arc<dyn TransferBackend>,
        store: Arc<StatusStore>,
        download_dir: &Path,
        stats: Arc<RunStatistics>,
        interrupted: Arc<AtomicBool>,
    ) -> Result<(), EngineError> {
        stats.add_total(plan.total());
        stats.add_skipped(plan.skipped.len());

        let halt = Arc::new(AtomicBool::new(false));
        let fatal: Arc<Mutex<Option<StatusError>>> = Arc::new(Mutex::new(None));
        let mut handles: Vec<(String, JoinHandle<()>)> = Vec::new();
        let pending = plan.tasks.len();
        let mut dispatched = 0usize;

        info!(
            pending = plan.tasks.len(),
            skipped = plan.skipped.len(),
            backend = %backend.kind(),
            "starting transfer run"
        );

        for task in plan.tasks {
            if interrupted.load(Ordering::SeqCst) {
                stats.set_interrupted();
                break;
            }
            if halt.load(Ordering::SeqCst) {
                break;
            }
            drain_finished(&mut handles, &store, &stats).await;

            // Race permit acquisition against the interrupt and halt flags so a
            // full pool does not delay shutdown.
            let permit = tokio::select! {
                biased;
                () = async {
                    while !interrupted.load(Ordering::SeqCst) && !halt.load(Ordering::SeqCst) {
                        tokio::time::sleep(INTERRUPT_POLL).await;
                    }
                } => None,
                result = self.semaphore.clone().acquire_owned() => {
                    Some(result.map_err(|_| EngineError::SemaphoreClosed)?)
                }
            };
            let Some(permit) = permit else {
                if interrupted.load(Ordering::SeqCst) {
                    stats.set_interrupted();
                }
                break;
            };

            debug!(file = %task.local_filename, priority = task.priority, "dispatching task");

            let filename = task.local_filename.clone();
            let backend = Arc::clone(&backend);
            let store = Arc::clone(&store);
            let stats = Arc::clone(&stats);
            let interrupted = Arc::clone(&interrupted);
            let halt = Arc::clone(&halt);
            let fatal = Arc::clone(&fatal);
            let download_dir = download_dir.to_path_buf();
            let policy = self.policy;
            let verifier = self.verifier;

            handles.push((
                filename,
                tokio::spawn(async move {
                    // Permit is dropped when this block exits (RAII)
                    let _permit = permit;
                    run_task(
                        &task,
                        backend.as_ref(),
                        &policy,
                        &verifier,
                        &store,
                        &download_dir,
                        &stats,
                        &interrupted,
                        &halt,
                        &fatal,
                    )
                    .await;
                }),
            ));
            dispatched += 1;
        }
        stats.add_not_started(pending - dispatched);
        drain_finished(&mut handles, &store, &stats).await;

        debug!(in_flight = handles.len(), "waiting for in-flight tasks");

        if interrupted.load(Ordering::SeqCst) {
            stats.set_interrupted();
            let deadline = tokio::time::Instant::now() + self.grace_period;
            for (filename, mut handle) in handles {
                let now = tokio::time::Instant::now();
                if now >= deadline {
                    abort_task(&filename, &handle, &stats);
                    continue;
                }
                match tokio::time::timeout(deadline - now, &mut handle).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => handle_task_join_error(&store, &filename, &e, &stats).await,
                    Err(_) => abort_task(&filename, &handle, &stats),
                }
            }
        } else {
            for (filename, handle) in handles {
                if let Err(e) = handle.await {
                    handle_task_join_error(&store, &filename, &e, &stats).await;
                }
            }
        }

        stats.mark_finished();
        info!(
            completed = stats.completed(),
            failed = stats.failed(),
            skipped = stats.skipped(),
            interrupted = stats.interrupted(),
            not_started = stats.not_started(),
            retried = stats.retried(),
            "transfer run finished"
        );

        let failure = fatal.lock().unwrap_or_else(PoisonError::into_inner).take();
        match failure {
            Some(e) => Err(EngineError::Persistence(e)),
            None => Ok(()),
        }
    }
}

/// Worker count for `backend`: shell tools are capped at
/// [`SHELL_TOOL_MAX_CONCURRENCY`] to avoid remote throttling.
#[must_use]
pub fn effective_concurrency(max_concurrent: usize, backend: BackendKind) -> usize {
    if backend.is_shell_tool() {
        max_concurrent.min(SHELL_TOOL_MAX_CONCURRENCY)
    } else {
        max_concurrent
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_task(
    task: &TransferTask,
    backend: &dyn TransferBackend,
    policy: &RetryPolicy,
    verifier: &IntegrityVerifier,
    store: &StatusStore,
    download_dir: &Path,
    stats: &RunStatistics,
    interrupted: &AtomicBool,
    halt: &AtomicBool,
    fatal: &Mutex<Option<StatusError>>,
) {
    match policy
        .run(task, backend, verifier, store, download_dir, interrupted)
        .await
    {
        Ok(outcome) => {
            match &outcome {
                TaskOutcome::Completed { message, .. } => info!(%message, "task completed"),
                TaskOutcome::Failed {
                    attempts,
                    last_error,
                } => warn!(
                    file = %task.local_filename,
                    attempts,
                    error = %last_error,
                    "task failed after all attempts"
                ),
                TaskOutcome::Interrupted { attempts } => {
                    info!(file = %task.local_filename, attempts, "task interrupted");
                }
            }
            stats.record(&task.local_filename, outcome);
            info!(
                finished = stats.finished(),
                total = stats.total().saturating_sub(stats.skipped()),
                "progress"
            );
        }
        Err(e) => {
            error!(file = %task.local_filename, error = %e, "cannot persist status; stopping dispatch");
            halt.store(true, Ordering::SeqCst);
            let mut slot = fatal.lock().unwrap_or_else(PoisonError::into_inner);
            if slot.is_none() {
                *slot = Some(e);
            }
        }
    }
}

async fn drain_finished(
    handles: &mut Vec<(String, JoinHandle<()>)>,
    store: &StatusStore,
    stats: &RunStatistics,
) {
    let mut idx = 0;
    while idx < handles.len() {
        if handles[idx].1.is_finished() {
            let (filename, handle) = handles.swap_remove(idx);
            if let Err(e) = handle.await {
                handle_task_join_error(store, &filename, &e, stats).await;
            }
        } else {
            idx += 1;
        }
    }
}

fn abort_task(filename: &str, handle: &JoinHandle<()>, stats: &RunStatistics) {
    warn!(file = filename, "aborting task after grace period");
    handle.abort();
    stats.record(filename, TaskOutcome::Interrupted { attempts: 0 });
}

async fn handle_task_join_error(
    store: &StatusStore,
    filename: &str,
    join_error: &JoinError,
    stats: &RunStatistics,
) {
    warn!(file = filename, error = %join_error, "transfer task panicked");

    let attempts = match store.get(filename) {
        Some(TransferRecord::Downloading { attempt, .. }) => attempt,
        _ => 0,
    };
    let last_error = format!("task panic: {join_error}");
    let backend = match store.get(filename) {
        Some(
            TransferRecord::Downloading { backend, .. }
            | TransferRecord::Completed { backend, .. }
            | TransferRecord::Failed { backend, .. },
        ) => backend,
        None => BackendKind::Api,
    };

    if let Err(e) = store
        .put(
            filename,
            TransferRecord::Failed {
                failed_at: Utc::now(),
                attempts,
                last_error: last_error.clone(),
                backend,
            },
        )
        .await
    {
        warn!(file = filename, error = %e, "failed to mark panicked task as failed");
    }

    stats.record(
        filename,
        TaskOutcome::Failed {
            attempts,
            last_error,
        },
    );
}

fn snapshot_of(shared: &RunStatistics) -> RunStatistics {
    let copy = RunStatistics::new();
    for (from, to) in [
        (&shared.total, &copy.total),
        (&shared.completed, &copy.completed),
        (&shared.failed, &copy.failed),
        (&shared.skipped, &copy.skipped),
        (&shared.interrupted, &copy.interrupted),
        (&shared.not_started, &copy.not_started),
        (&shared.retried, &copy.retried),
    ] {
        to.store(from.load(Ordering::SeqCst), Ordering::SeqCst);
    }
    if shared.was_interrupted() {
        copy.set_interrupted();
    }
    *copy.reports.lock().unwrap_or_else(PoisonError::into_inner) = shared.reports();
    *copy
        .finished_at
        .lock()
        .unwrap_or_else(PoisonError::into_inner) = shared.finished_at();
    copy
}
