//! Backends that delegate to an external `wget` or `curl` process.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, instrument};

use super::{BackendKind, PROBE_TIMEOUT, TransferBackend, TransferError, resolve_url};
use crate::catalog::{TransferTask, TransportSettings};

/// Retries the tool itself performs inside one attempt.
const TOOL_TRIES: u32 = 3;

/// Seconds curl waits between its own retries.
const CURL_RETRY_DELAY_SECS: u32 = 2;

/// Outer deadline multiplier applied to the configured timeout.
const OUTER_TIMEOUT_FACTOR: u32 = 3;

/// Stderr lines kept in [`TransferError::ToolFailed`].
const STDERR_TAIL_LINES: usize = 5;

/// Runs `wget` or `curl` for each attempt.
///
/// Both tools are invoked in resume mode, so a partial file left by an
/// interrupted attempt is continued rather than restarted.
#[derive(Debug, Clone)]
pub struct ShellToolBackend {
    tool: BackendKind,
    program: String,
    transport: TransportSettings,
    timeout: Duration,
}

impl ShellToolBackend {
    /// Creates a backend running the tool named by `tool` from `PATH`.
    ///
    /// `tool` must be [`BackendKind::Wget`] or [`BackendKind::Curl`]; `timeout`
    /// is the per-attempt timeout handed to the tool.
    #[must_use]
    pub fn new(tool: BackendKind, transport: TransportSettings, timeout: Duration) -> Self {
        Self {
            tool,
            program: tool.as_str().to_string(),
            transport,
            timeout,
        }
    }

    /// Replaces the executable while keeping `tool`'s argument convention.
    #[must_use]
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    /// Executable that will be spawned.
    #[must_use]
    pub fn program(&self) -> &str {
        &self.program
    }

    /// Arguments for transferring `url` into `target`.
    #[must_use]
    pub fn command_args(&self, url: &str, target: &Path) -> Vec<String> {
        let secs = self.timeout.as_secs().max(1);
        let target = target.display().to_string();
        let mut args: Vec<String> = match self.tool {
            BackendKind::Curl => vec![
                "-C".into(),
                "-".into(),
                "--retry".into(),
                TOOL_TRIES.to_string(),
                "--retry-delay".into(),
                CURL_RETRY_DELAY_SECS.to_string(),
                "--max-time".into(),
                (secs * u64::from(OUTER_TIMEOUT_FACTOR)).to_string(),
                "-L".into(),
                "-f".into(),
                "-sS".into(),
            ],
            BackendKind::Wget | BackendKind::Api => vec![
                "-c".into(),
                format!("--tries={TOOL_TRIES}"),
                format!("--timeout={secs}"),
                "-nv".into(),
            ],
        };
        if self.transport.insecure {
            args.push(match self.tool {
                BackendKind::Curl => "-k".into(),
                BackendKind::Wget | BackendKind::Api => "--no-check-certificate".into(),
            });
        }
        if let Some(token) = &self.transport.token {
            args.push(match self.tool {
                BackendKind::Curl => "-H".into(),
                BackendKind::Wget | BackendKind::Api => "--header".into(),
            });
            args.push(format!("Authorization: Bearer {token}"));
        }
        args.push(match self.tool {
            BackendKind::Curl => "-o".into(),
            BackendKind::Wget | BackendKind::Api => "-O".into(),
        });
        args.push(target);
        args.push(url.to_string());
        args
    }

    fn outer_timeout(&self) -> Duration {
        self.timeout.max(Duration::from_secs(1)) * OUTER_TIMEOUT_FACTOR
    }
}

#[async_trait]
impl TransferBackend for ShellToolBackend {
    fn kind(&self) -> BackendKind {
        self.tool
    }

    #[instrument(level = "debug", skip(self), fields(program = %self.program))]
    async fn probe(&self) -> bool {
        let status = Command::new(&self.program)
            .arg("--version")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .status();
        match tokio::time::timeout(PROBE_TIMEOUT, status).await {
            Ok(Ok(status)) => status.success(),
            Ok(Err(e)) => {
                debug!(error = %e, "tool not runnable");
                false
            }
            Err(_) => false,
        }
    }

    #[instrument(skip(self, task), fields(tool = %self.tool, file = %task.local_filename))]
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

        let child = Command::new(&self.program)
            .args(self.command_args(&url, &target))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| TransferError::ToolUnavailable {
                program: self.program.clone(),
                source,
            })?;

        // Dropping the future on timeout drops the child, which kills it.
        let output = tokio::time::timeout(self.outer_timeout(), child.wait_with_output())
            .await
            .map_err(|_| TransferError::timeout(&url))?
            .map_err(|e| TransferError::io(&target, e))?;

        if !output.status.success() {
            return Err(TransferError::ToolFailed {
                tool: self.tool,
                code: output.status.code(),
                stderr: stderr_tail(&output.stderr),
            });
        }

        debug!(path = %target.display(), "tool transfer finished");
        Ok(target)
    }
}

fn stderr_tail(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let lines: Vec<&str> = text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect();
    let start = lines.len().saturating_sub(STDERR_TAIL_LINES);
    lines[start..].join(" | ")
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn backend(tool: BackendKind, insecure: bool) -> ShellToolBackend {
        let transport = TransportSettings {
            insecure,
            ..TransportSettings::default()
        };
        ShellToolBackend::new(tool, transport, Duration::from_secs(300))
    }

    #[test]
    fn test_wget_args_resume_with_tries_and_timeout() {
        let args = backend(BackendKind::Wget, false)
            .command_args("https://h/x.tgz", Path::new("/d/x.tgz"));
        assert_eq!(
            args,
            ["-c", "--tries=3", "--timeout=300", "-nv", "-O", "/d/x.tgz", "https://h/x.tgz"]
        );
    }

    #[test]
    fn test_curl_args_resume_follow_and_fail_on_http_error() {
        let args = backend(BackendKind::Curl, true)
            .command_args("https://h/x.tgz", Path::new("/d/x.tgz"));
        assert_eq!(
            args,
            [
                "-C", "-", "--retry", "3", "--retry-delay", "2", "--max-time", "900", "-L", "-f",
                "-sS", "-k", "-o", "/d/x.tgz", "https://h/x.tgz"
            ]
        );
    }

    #[test]
    fn test_insecure_wget_and_token_header() {
        let mut tool = backend(BackendKind::Wget, true);
        tool.transport.token = Some("secret".to_string());
        let args = tool.command_args("u", Path::new("t"));
        assert!(args.contains(&"--no-check-certificate".to_string()));
        assert!(args.contains(&"Authorization: Bearer secret".to_string()));
    }

    #[test]
    fn test_stderr_tail_keeps_last_lines() {
        let stderr = b"one\ntwo\n\nthree\nfour\nfive\nsix\n";
        assert_eq!(stderr_tail(stderr), "two | three | four | five | six");
    }

    #[tokio::test]
    async fn test_probe_missing_program_is_unusable() {
        let tool = backend(BackendKind::Curl, false).with_program("definitely-not-a-real-tool-xyz");
        assert!(!tool.probe().await);
    }

    #[tokio::test]
    async fn test_transfer_with_missing_program_is_tool_unavailable() {
        let dir = tempfile::TempDir::new().unwrap();
        let tool = backend(BackendKind::Wget, false).with_program("definitely-not-a-real-tool-xyz");
        let task = TransferTask {
            group: "g".into(),
            repository: "org/data".into(),
            remote_path: "a/b.bin".into(),
            local_filename: "b.bin".into(),
            size_estimate_mb: None,
            priority: 1,
            max_retries: 1,
        };
        let err = tool.transfer(&task, dir.path()).await.unwrap_err();
        assert!(matches!(err, TransferError::ToolUnavailable { .. }));
    }
}
