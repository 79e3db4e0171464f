//! Transfer backends and capability-based backend selection.
//!
//! A [`TransferBackend`] moves one remote file to its deterministic target
//! path. Three kinds exist: the native HTTP client ([`ApiBackend`]) and the
//! external `wget`/`curl` tools ([`ShellToolBackend`]). At startup
//! [`select_backend`] probes candidates in preference order and returns the
//! first one that is usable; the choice is fixed for the rest of the run.

mod api;
mod error;
mod tool;

pub use api::ApiBackend;
pub use error::{SelectionError, TransferError};
pub use tool::ShellToolBackend;

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};
use url::Url;

use crate::catalog::{TransferTask, TransportSettings};

/// Time allowed for one capability probe.
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// Worker ceiling applied when a shell tool backend is selected.
pub const SHELL_TOOL_MAX_CONCURRENCY: usize = 2;

/// Kind of transfer backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Native HTTP client.
    Api,
    /// External `wget` process.
    Wget,
    /// External `curl` process.
    Curl,
}

impl BackendKind {
    /// Stable lowercase name.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Api => "api",
            Self::Wget => "wget",
            Self::Curl => "curl",
        }
    }

    /// Returns true for backends that spawn an external process.
    #[must_use]
    pub fn is_shell_tool(&self) -> bool {
        matches!(self, Self::Wget | Self::Curl)
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One way of transferring a remote file to local disk.
#[async_trait]
pub trait TransferBackend: Send + Sync + fmt::Debug {
    /// Which kind of backend this is.
    fn kind(&self) -> BackendKind;

    /// Cheap capability check. Never fails; `false` means unusable.
    async fn probe(&self) -> bool;

    /// Transfers `task` into `download_dir`, returning the written path.
    ///
    /// # Errors
    ///
    /// Returns [`TransferError`] when the attempt fails. Callers retry.
    async fn transfer(
        &self,
        task: &TransferTask,
        download_dir: &Path,
    ) -> Result<PathBuf, TransferError>;
}

/// Builds the resolve URL of one file: `{endpoint}/{prefix}{repo}/resolve/{revision}/{path}`.
///
/// Repository and path are split on `/` and every segment is
/// percent-encoded, so names containing spaces, `#`, `?` or `%` address the
/// intended file. The revision is always a single segment.
#[must_use]
pub fn resolve_url(transport: &TransportSettings, repository: &str, remote_path: &str) -> String {
    let segments = transport
        .repo_type
        .resolve_prefix()
        .split('/')
        .chain(repository.split('/'))
        .chain(["resolve", transport.revision.as_str()])
        .chain(remote_path.split('/'));
    endpoint_url(&transport.endpoint, segments)
}

/// Appends non-empty `segments` to `endpoint` as encoded path segments.
pub(crate) fn endpoint_url<'a>(
    endpoint: &str,
    segments: impl IntoIterator<Item = &'a str>,
) -> String {
    let segments = segments.into_iter().filter(|segment| !segment.is_empty());
    match Url::parse(endpoint) {
        Ok(mut url) if !url.cannot_be_a_base() => {
            if let Ok(mut path) = url.path_segments_mut() {
                path.pop_if_empty().extend(segments);
            }
            url.into()
        }
        // Unreachable for validated catalogs; keeps the raw form.
        _ => segments.fold(endpoint.trim_end_matches('/').to_string(), |mut out, segment| {
            out.push('/');
            out.push_str(segment);
            out
        }),
    }
}

/// Builds the candidate list in `transport.backends` order.
///
/// `probe_repository` is the repository the API backend queries during its
/// probe; `timeout` is the per-attempt limit.
///
/// # Errors
///
/// Returns [`TransferError::Network`] if the HTTP client cannot be built.
pub fn build_backends(
    transport: &TransportSettings,
    probe_repository: Option<&str>,
    timeout: Duration,
) -> Result<Vec<Arc<dyn TransferBackend>>, TransferError> {
    let mut candidates: Vec<Arc<dyn TransferBackend>> = Vec::new();
    for kind in &transport.backends {
        let backend: Arc<dyn TransferBackend> = match kind {
            BackendKind::Api => Arc::new(ApiBackend::new(
                transport.clone(),
                probe_repository.map(str::to_string),
                timeout,
            )?),
            BackendKind::Wget | BackendKind::Curl => {
                Arc::new(ShellToolBackend::new(*kind, transport.clone(), timeout))
            }
        };
        candidates.push(backend);
    }
    Ok(candidates)
}

/// Probes candidates in order and returns the first usable one.
///
/// Each probe is bounded by [`PROBE_TIMEOUT`]; a probe that times out counts
/// as a failure.
///
/// # Errors
///
/// Returns [`SelectionError::NoTransportAvailable`] when every probe fails.
#[instrument(skip(candidates), fields(candidates = candidates.len()))]
pub async fn select_backend(
    candidates: Vec<Arc<dyn TransferBackend>>,
) -> Result<Arc<dyn TransferBackend>, SelectionError> {
    select_backend_with_timeout(candidates, PROBE_TIMEOUT).await
}

/// [`select_backend`] with an explicit probe timeout.
///
/// # Errors
///
/// Returns [`SelectionError::NoTransportAvailable`] when every probe fails.
pub async fn select_backend_with_timeout(
    candidates: Vec<Arc<dyn TransferBackend>>,
    probe_timeout: Duration,
) -> Result<Arc<dyn TransferBackend>, SelectionError> {
    let mut tried = Vec::with_capacity(candidates.len());
    for backend in candidates {
        let kind = backend.kind();
        tried.push(kind);
        match tokio::time::timeout(probe_timeout, backend.probe()).await {
            Ok(true) => {
                info!(backend = %kind, "transfer backend selected");
                return Ok(backend);
            }
            Ok(false) => warn!(backend = %kind, "backend probe failed"),
            Err(_) => warn!(backend = %kind, timeout_secs = probe_timeout.as_secs(), "backend probe timed out"),
        }
    }
    Err(SelectionError::NoTransportAvailable { tried })
}
