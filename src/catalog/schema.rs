//! Serde schema for the declarative catalog document.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use serde::de::{self, Deserializer, MapAccess, SeqAccess, Visitor};
use serde::{Deserialize, Serialize};

use crate::transfer::BackendKind;

/// Priority applied to groups that do not declare one.
pub const DEFAULT_PRIORITY: i64 = 99;

/// Default number of concurrent workers.
pub const DEFAULT_MAX_CONCURRENT: usize = 3;

/// Default maximum attempts per file.
pub const DEFAULT_MAX_RETRIES: u32 = 5;

/// Upper bound on `max_retries`, shared by the catalog and the CLI.
pub const MAX_RETRIES: u32 = 100;

/// Default exponential backoff base (seconds per `base^attempt`).
pub const DEFAULT_RETRY_DELAY_BASE: f64 = 2.0;

/// Default per-attempt timeout in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 300;

/// Default remote endpoint.
pub const DEFAULT_ENDPOINT: &str = "https://huggingface.co";

/// Default revision resolved on the remote repository.
pub const DEFAULT_REVISION: &str = "main";

/// Minimum allowed `max_concurrent`.
pub const MIN_CONCURRENCY: usize = 1;

/// Maximum allowed `max_concurrent`.
pub const MAX_CONCURRENCY: usize = 100;

/// Root of a catalog document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Catalog {
    /// Repository used by groups that do not name their own.
    #[serde(default)]
    pub repository: Option<String>,

    /// Run-wide tuning.
    #[serde(default)]
    pub global_settings: GlobalSettings,

    /// Remote endpoint and backend preferences.
    #[serde(default)]
    pub transport: TransportSettings,

    /// Filenames already known to be complete, grouped by label.
    #[serde(default)]
    pub completed_downloads: BTreeMap<String, Vec<String>>,

    /// Ordered task groups.
    ///
    /// Accepts a list of groups or a map of group name to group body. The map
    /// form keeps document order.
    #[serde(default, deserialize_with = "deserialize_task_groups")]
    pub download_tasks: Vec<TaskGroup>,
}

/// A named collection of files sharing a repository and priority.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskGroup {
    /// Group label, used in logs and summaries.
    pub name: String,

    /// Repository override; falls back to [`Catalog::repository`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repository: Option<String>,

    /// Lower value is dispatched first.
    #[serde(default = "default_priority")]
    pub priority: i64,

    /// Files in dispatch order.
    #[serde(default)]
    pub files: Vec<FileDescriptor>,
}

/// One remote file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileDescriptor {
    /// Path relative to the repository root.
    pub path: String,

    /// Advisory size in megabytes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size_estimate_mb: Option<f64>,
}

/// Run-wide settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GlobalSettings {
    /// Worker pool size before backend clamping.
    pub max_concurrent: usize,
    /// Maximum attempts per file (including the first).
    pub max_retries: u32,
    /// Backoff base; the delay after attempt `n` is `retry_delay_base^n` seconds.
    pub retry_delay_base: f64,
    /// Per-attempt timeout in seconds.
    pub timeout: u64,
    /// Download directory. Relative paths resolve against the catalog file.
    pub download_dir: PathBuf,
}

impl Default for GlobalSettings {
    fn default() -> Self {
        Self {
            max_concurrent: DEFAULT_MAX_CONCURRENT,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_delay_base: DEFAULT_RETRY_DELAY_BASE,
            timeout: DEFAULT_TIMEOUT_SECS,
            download_dir: PathBuf::from("downloads"),
        }
    }
}

/// Kind of remote repository, which decides URL layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RepoType {
    /// Dataset repository (`/datasets/{repo}` URLs).
    #[default]
    Dataset,
    /// Model repository (`/{repo}` URLs).
    Model,
}

impl RepoType {
    /// Path segment used by metadata API calls.
    #[must_use]
    pub fn api_segment(&self) -> &'static str {
        match self {
            Self::Dataset => "datasets",
            Self::Model => "models",
        }
    }

    /// Prefix inserted before the repository in file URLs.
    #[must_use]
    pub fn resolve_prefix(&self) -> &'static str {
        match self {
            Self::Dataset => "datasets/",
            Self::Model => "",
        }
    }
}

/// Endpoint and backend configuration injected into backend construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportSettings {
    /// Base URL of the remote service or its mirror.
    pub endpoint: String,
    /// Repository kind.
    pub repo_type: RepoType,
    /// Revision (branch, tag, or commit) to resolve files from.
    pub revision: String,
    /// Backends in preference order.
    pub backends: Vec<BackendKind>,
    /// Bearer token for the API client.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    /// Skip TLS certificate verification.
    pub insecure: bool,
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            repo_type: RepoType::Dataset,
            revision: DEFAULT_REVISION.to_string(),
            backends: vec![BackendKind::Api, BackendKind::Wget, BackendKind::Curl],
            token: None,
            insecure: false,
        }
    }
}

fn default_priority() -> i64 {
    DEFAULT_PRIORITY
}

/// Group body in the map form, where the key is the name.
#[derive(Deserialize)]
struct NamedGroupBody {
    #[serde(default)]
    repository: Option<String>,
    #[serde(default = "default_priority")]
    priority: i64,
    #[serde(default)]
    files: Vec<FileDescriptor>,
}

fn deserialize_task_groups<'de, D>(deserializer: D) -> Result<Vec<TaskGroup>, D::Error>
where
    D: Deserializer<'de>,
{
    struct GroupsVisitor;

    impl<'de> Visitor<'de> for GroupsVisitor {
        type Value = Vec<TaskGroup>;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("a list of task groups or a map of group name to group")
        }

        fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Self::Value, A::Error> {
            let mut groups = Vec::new();
            while let Some(group) = seq.next_element::<TaskGroup>()? {
                groups.push(group);
            }
            Ok(groups)
        }

        fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
            let mut groups = Vec::new();
            while let Some((name, body)) = map.next_entry::<String, NamedGroupBody>()? {
                groups.push(TaskGroup {
                    name,
                    repository: body.repository,
                    priority: body.priority,
                    files: body.files,
                });
            }
            Ok(groups)
        }

        fn visit_unit<E: de::Error>(self) -> Result<Self::Value, E> {
            Ok(Vec::new())
        }

        fn visit_none<E: de::Error>(self) -> Result<Self::Value, E> {
            Ok(Vec::new())
        }
    }

    deserializer.deserialize_any(GroupsVisitor)
}
