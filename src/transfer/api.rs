//! Native HTTP backend built on `reqwest`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::Client;
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::{debug, instrument};

use super::{
    BackendKind, PROBE_TIMEOUT, TransferBackend, TransferError, endpoint_url, resolve_url,
};
use crate::catalog::{TransferTask, TransportSettings};
use crate::user_agent;

/// Connect timeout applied to every request.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Streams files over HTTP(S) from the configured endpoint.
///
/// The target file is truncated on every attempt; partial content from an
/// earlier attempt is never appended to.
#[derive(Debug, Clone)]
pub struct ApiBackend {
    client: Client,
    transport: TransportSettings,
    probe_repository: Option<String>,
}

impl ApiBackend {
    /// Creates a backend for `transport`.
    ///
    /// `timeout` bounds the gap between reads of one response body.
    ///
    /// # Errors
    ///
    /// Returns [`TransferError::Network`] if the client cannot be built.
    pub fn new(
        transport: TransportSettings,
        probe_repository: Option<String>,
        timeout: Duration,
    ) -> Result<Self, TransferError> {
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .read_timeout(timeout)
            .user_agent(user_agent::default_user_agent())
            .danger_accept_invalid_certs(transport.insecure)
            .build()
            .map_err(|e| TransferError::network(transport.endpoint.clone(), e))?;
        Ok(Self {
            client,
            transport,
            probe_repository,
        })
    }

    /// URL queried by [`TransferBackend::probe`].
    #[must_use]
    pub fn probe_url(&self) -> String {
        match &self.probe_repository {
            Some(repo) => endpoint_url(
                &self.transport.endpoint,
                ["api", self.transport.repo_type.api_segment()]
                    .into_iter()
                    .chain(repo.split('/')),
            ),
            None => self.transport.endpoint.trim_end_matches('/').to_string(),
        }
    }

    fn get(&self, url: &str) -> reqwest::RequestBuilder {
        let request = self.client.get(url);
        match &self.transport.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }
}

#[async_trait]
impl TransferBackend for ApiBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Api
    }

    #[instrument(level = "debug", skip(self))]
    async fn probe(&self) -> bool {
        let url = self.probe_url();
        match self.get(&url).timeout(PROBE_TIMEOUT).send().await {
            Ok(response) if response.status().is_success() => true,
            Ok(response) => {
                debug!(%url, status = response.status().as_u16(), "api probe rejected");
                false
            }
            Err(e) => {
                debug!(%url, error = %e, "api probe failed");
                false
            }
        }
    }

    #[instrument(skip(self, task), fields(file = %task.local_filename))]
    async fn transfer(
        &self,
        task: &TransferTask,
        download_dir: &Path,
    ) -> Result<PathBuf, TransferError> {
        let url = resolve_url(&self.transport, &task.repository, &task.remote_path);
        let target = task.target_path(download_dir);

        tokio::fs::create_dir_all(download_dir)
            .await
            .map_err(|e| TransferError::io(download_dir, e))?;

        let response = self
            .get(&url)
            .send()
            .await
            .map_err(|e| TransferError::network(&url, e))?;

        if !response.status().is_success() {
            return Err(TransferError::http_status(&url, response.status().as_u16()));
        }

        let mut file = File::create(&target)
            .await
            .map_err(|e| TransferError::io(&target, e))?;
        let bytes = stream_to_file(&mut file, response, &url, &target).await?;
        debug!(bytes, path = %target.display(), "api transfer finished");

        Ok(target)
    }
}

/// Streams response body to file, returning bytes written.
async fn stream_to_file(
    file: &mut File,
    response: reqwest::Response,
    url: &str,
    file_path: &Path,
) -> Result<u64, TransferError> {
    let mut writer = BufWriter::new(file);
    let mut stream = response.bytes_stream();
    let mut bytes_written: u64 = 0;

    while let Some(chunk_result) = stream.next().await {
        let chunk = chunk_result.map_err(|e| TransferError::network(url, e))?;

        writer
            .write_all(&chunk)
            .await
            .map_err(|e| TransferError::io(file_path, e))?;

        bytes_written += chunk.len() as u64;
    }

    writer
        .flush()
        .await
        .map_err(|e| TransferError::io(file_path, e))?;

    Ok(bytes_written)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::catalog::RepoType;

    fn backend(repo: Option<&str>, repo_type: RepoType) -> ApiBackend {
        let transport = TransportSettings {
            endpoint: "https://hub.example/".to_string(),
            repo_type,
            ..TransportSettings::default()
        };
        ApiBackend::new(transport, repo.map(str::to_string), Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn test_probe_url_uses_repo_type_segment() {
        assert_eq!(
            backend(Some("org/data"), RepoType::Dataset).probe_url(),
            "https://hub.example/api/datasets/org/data"
        );
        assert_eq!(
            backend(Some("org/m"), RepoType::Model).probe_url(),
            "https://hub.example/api/models/org/m"
        );
    }

    #[test]
    fn test_probe_url_without_repository_is_endpoint() {
        assert_eq!(
            backend(None, RepoType::Dataset).probe_url(),
            "https://hub.example"
        );
    }
}
