//! Task derivation from a declarative catalog.
//!
//! A [`TaskCatalog`] is a validated [`Catalog`] document. Validation happens
//! once at construction so malformed descriptors fail before any transfer
//! starts. [`TaskCatalog::plan`] turns the catalog plus a completeness
//! predicate into the priority-ordered list of [`TransferTask`]s.
//!
//! # Example
//!
//! ```
//! use fetcher_core::catalog::TaskCatalog;
//!
//! let catalog = TaskCatalog::from_json_str(
//!     r#"{
//!         "repository": "org/data",
//!         "download_tasks": [
//!             {"name": "late", "priority": 2, "files": [{"path": "x/b.tgz"}]},
//!             {"name": "early", "priority": 1, "files": [{"path": "x/a.tgz"}]}
//!         ]
//!     }"#,
//! )
//! .unwrap();
//!
//! let plan = catalog.plan(|_| false);
//! assert_eq!(plan.tasks[0].local_filename, "a.tgz");
//! assert_eq!(plan.tasks[1].local_filename, "b.tgz");
//! ```

mod error;
mod schema;
mod template;

pub use error::CatalogError;
pub use schema::{
    Catalog, DEFAULT_ENDPOINT, DEFAULT_MAX_CONCURRENT, DEFAULT_MAX_RETRIES, DEFAULT_PRIORITY,
    DEFAULT_RETRY_DELAY_BASE, DEFAULT_REVISION, DEFAULT_TIMEOUT_SECS, FileDescriptor,
    GlobalSettings, MAX_CONCURRENCY, MAX_RETRIES, MIN_CONCURRENCY, RepoType, TaskGroup,
    TransportSettings,
};
pub use template::write_template;

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use tracing::{debug, info, instrument};
use url::Url;

/// Catalog file syntax.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CatalogFormat {
    /// JSON, the default.
    Json,
    /// TOML (`.toml`).
    Toml,
    /// YAML (`.yaml`, `.yml`).
    Yaml,
}

impl CatalogFormat {
    /// Picks the syntax from the file extension; anything unknown is JSON.
    #[must_use]
    pub fn from_path(path: &Path) -> Self {
        let ext = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_ascii_lowercase);
        match ext.as_deref() {
            Some("toml") => Self::Toml,
            Some("yaml" | "yml") => Self::Yaml,
            _ => Self::Json,
        }
    }

    /// Parses a catalog document, returning the parser's message on failure.
    ///
    /// # Errors
    ///
    /// Returns the syntax or schema error reported by the parser.
    pub fn parse(self, text: &str) -> Result<Catalog, String> {
        match self {
            Self::Json => serde_json::from_str(text).map_err(|e| e.to_string()),
            Self::Toml => toml::from_str(text).map_err(|e| e.to_string()),
            Self::Yaml => serde_yaml::from_str(text).map_err(|e| e.to_string()),
        }
    }

    /// Renders a catalog document in this syntax.
    ///
    /// # Errors
    ///
    /// Returns the serializer's message on failure.
    pub fn render(self, catalog: &Catalog) -> Result<String, String> {
        match self {
            Self::Json => serde_json::to_string_pretty(catalog).map_err(|e| e.to_string()),
            Self::Toml => toml::to_string_pretty(catalog).map_err(|e| e.to_string()),
            Self::Yaml => serde_yaml::to_string(catalog).map_err(|e| e.to_string()),
        }
    }
}

/// Immutable descriptor of one pending file transfer.
#[derive(Debug, Clone, PartialEq)]
pub struct TransferTask {
    /// Group the file came from.
    pub group: String,
    /// Remote collection identifier.
    pub repository: String,
    /// Path relative to the repository root.
    pub remote_path: String,
    /// Basename of [`Self::remote_path`]; the on-disk name and status key.
    pub local_filename: String,
    /// Advisory size in megabytes.
    pub size_estimate_mb: Option<f64>,
    /// Lower value is dispatched first.
    pub priority: i64,
    /// Maximum attempts for this file.
    pub max_retries: u32,
}

impl TransferTask {
    /// Deterministic target path of this task inside `download_dir`.
    #[must_use]
    pub fn target_path(&self, download_dir: &Path) -> PathBuf {
        download_dir.join(&self.local_filename)
    }
}

/// Output of [`TaskCatalog::plan`].
#[derive(Debug, Clone, Default)]
pub struct TaskPlan {
    /// Pending tasks, sorted ascending by priority (stable).
    pub tasks: Vec<TransferTask>,
    /// Filenames excluded because they are already complete.
    pub skipped: Vec<String>,
}

impl TaskPlan {
    /// Number of files described by the catalog (pending plus skipped).
    #[must_use]
    pub fn total(&self) -> usize {
        self.tasks.len() + self.skipped.len()
    }
}

/// Per-group line of a [`CatalogSummary`].
#[derive(Debug, Clone, PartialEq)]
pub struct GroupSummary {
    /// Group name.
    pub name: String,
    /// Group priority.
    pub priority: i64,
    /// Number of files.
    pub file_count: usize,
    /// Sum of size estimates in megabytes.
    pub estimated_mb: f64,
}

/// Static overview of a catalog, printed after generating one.
#[derive(Debug, Clone, PartialEq)]
pub struct CatalogSummary {
    /// One entry per group, in catalog order.
    pub groups: Vec<GroupSummary>,
    /// Files across all groups.
    pub total_files: usize,
    /// Estimated megabytes across all groups.
    pub total_mb: f64,
    /// Entries in the external completed-file set.
    pub completed_count: usize,
}

impl CatalogSummary {
    /// Share of known files that are already complete, in percent.
    #[must_use]
    pub fn completion_rate(&self) -> f64 {
        let known = self.completed_count + self.total_files;
        if known == 0 {
            return 0.0;
        }
        #[allow(clippy::cast_precision_loss)]
        let rate = self.completed_count as f64 / known as f64 * 100.0;
        rate
    }
}

/// A validated catalog.
#[derive(Debug, Clone)]
pub struct TaskCatalog {
    catalog: Catalog,
    base_dir: Option<PathBuf>,
}

impl TaskCatalog {
    /// Validates a parsed catalog document.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError`] when any descriptor or setting is malformed.
    pub fn new(catalog: Catalog) -> Result<Self, CatalogError> {
        validate(&catalog)?;
        Ok(Self {
            catalog,
            base_dir: None,
        })
    }

    /// Parses and validates a JSON catalog.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::Parse`] for syntax/schema errors, or any
    /// validation error from [`TaskCatalog::new`].
    pub fn from_json_str(text: &str) -> Result<Self, CatalogError> {
        let catalog = serde_json::from_str(text).map_err(|e| CatalogError::Parse {
            path: PathBuf::from("<inline>"),
            message: e.to_string(),
        })?;
        Self::new(catalog)
    }

    /// Reads, parses and validates a catalog file.
    ///
    /// The syntax follows the extension; see [`CatalogFormat::from_path`].
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::Read`] when the file cannot be read,
    /// [`CatalogError::Parse`] when it cannot be parsed, or a validation error.
    #[instrument(level = "debug", fields(path = %path.display()))]
    pub fn load(path: &Path) -> Result<Self, CatalogError> {
        let text = std::fs::read_to_string(path).map_err(|source| CatalogError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        let catalog = CatalogFormat::from_path(path)
            .parse(&text)
            .map_err(|message| CatalogError::Parse {
                path: path.to_path_buf(),
                message,
            })?;

        let mut loaded = Self::new(catalog)?;
        loaded.base_dir = path.parent().map(Path::to_path_buf);
        debug!(
            groups = loaded.catalog.download_tasks.len(),
            files = loaded.file_count(),
            "catalog loaded"
        );
        Ok(loaded)
    }

    /// Applies run-time setting overrides and re-validates.
    ///
    /// An overriding `download_dir` is taken as given, not resolved against
    /// the catalog file's directory.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::InvalidSetting`] when an override is out of range.
    pub fn with_overrides(
        mut self,
        max_concurrent: Option<usize>,
        max_retries: Option<u32>,
        download_dir: Option<PathBuf>,
    ) -> Result<Self, CatalogError> {
        let settings = &mut self.catalog.global_settings;
        if let Some(value) = max_concurrent {
            settings.max_concurrent = value;
        }
        if let Some(value) = max_retries {
            settings.max_retries = value;
        }
        if let Some(dir) = download_dir {
            settings.download_dir = dir;
            self.base_dir = None;
        }
        validate_settings(&self.catalog.global_settings)?;
        Ok(self)
    }

    /// The underlying document.
    #[must_use]
    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// Run-wide settings.
    #[must_use]
    pub fn settings(&self) -> &GlobalSettings {
        &self.catalog.global_settings
    }

    /// Transport settings.
    #[must_use]
    pub fn transport(&self) -> &TransportSettings {
        &self.catalog.transport
    }

    /// Download directory, resolved against the catalog file's directory.
    #[must_use]
    pub fn download_dir(&self) -> PathBuf {
        let dir = &self.catalog.global_settings.download_dir;
        match &self.base_dir {
            Some(base) if dir.is_relative() && !base.as_os_str().is_empty() => base.join(dir),
            _ => dir.clone(),
        }
    }

    /// Repository used for capability probing: the catalog default, or the
    /// first group's repository.
    #[must_use]
    pub fn probe_repository(&self) -> Option<&str> {
        self.catalog.repository.as_deref().or_else(|| {
            self.catalog
                .download_tasks
                .iter()
                .find_map(|group| group.repository.as_deref())
        })
    }

    /// The external "already completed" judgment set.
    #[must_use]
    pub fn completed_set(&self) -> HashSet<String> {
        self.catalog
            .completed_downloads
            .values()
            .flatten()
            .cloned()
            .collect()
    }

    /// Total number of file descriptors.
    #[must_use]
    pub fn file_count(&self) -> usize {
        self.catalog
            .download_tasks
            .iter()
            .map(|group| group.files.len())
            .sum()
    }

    /// Produces the priority-ordered pending task list.
    ///
    /// Any filename for which `is_completed` returns true is excluded and
    /// reported once in [`TaskPlan::skipped`]. Sorting is stable, so equal
    /// priorities keep group-then-file order.
    #[must_use]
    pub fn plan<F>(&self, is_completed: F) -> TaskPlan
    where
        F: Fn(&str) -> bool,
    {
        let max_retries = self.catalog.global_settings.max_retries;
        let mut plan = TaskPlan::default();

        for group in &self.catalog.download_tasks {
            let Some(repository) = group
                .repository
                .as_deref()
                .or(self.catalog.repository.as_deref())
            else {
                continue;
            };

            for file in &group.files {
                let Some(local_filename) = local_filename(&file.path) else {
                    continue;
                };

                if is_completed(local_filename) {
                    info!(filename = local_filename, "skipping completed file");
                    plan.skipped.push(local_filename.to_string());
                    continue;
                }

                plan.tasks.push(TransferTask {
                    group: group.name.clone(),
                    repository: repository.to_string(),
                    remote_path: file.path.clone(),
                    local_filename: local_filename.to_string(),
                    size_estimate_mb: file.size_estimate_mb,
                    priority: group.priority,
                    max_retries,
                });
            }
        }

        plan.tasks.sort_by_key(|task| task.priority);
        debug!(
            pending = plan.tasks.len(),
            skipped = plan.skipped.len(),
            "task plan derived"
        );
        plan
    }

    /// Summarizes groups, sizes, and completion for display.
    #[must_use]
    pub fn summary(&self) -> CatalogSummary {
        let groups: Vec<GroupSummary> = self
            .catalog
            .download_tasks
            .iter()
            .map(|group| GroupSummary {
                name: group.name.clone(),
                priority: group.priority,
                file_count: group.files.len(),
                estimated_mb: group
                    .files
                    .iter()
                    .filter_map(|file| file.size_estimate_mb)
                    .sum(),
            })
            .collect();

        CatalogSummary {
            total_files: groups.iter().map(|g| g.file_count).sum(),
            total_mb: groups.iter().map(|g| g.estimated_mb).sum(),
            completed_count: self.completed_set().len(),
            groups,
        }
    }
}

/// Derives the local file name from a remote path (its last `/` segment).
///
/// Returns `None` for empty names and `.`/`..`.
#[must_use]
pub fn local_filename(remote_path: &str) -> Option<&str> {
    let name = remote_path.rsplit('/').next()?.trim();
    if name.is_empty() || name == "." || name == ".." || name.contains('\\') {
        return None;
    }
    Some(name)
}

fn validate(catalog: &Catalog) -> Result<(), CatalogError> {
    validate_settings(&catalog.global_settings)?;
    validate_transport(&catalog.transport)?;

    let mut seen: HashMap<&str, &str> = HashMap::new();
    for group in &catalog.download_tasks {
        let has_repository = group
            .repository
            .as_deref()
            .or(catalog.repository.as_deref())
            .is_some_and(|repo| !repo.trim().is_empty());
        if !has_repository {
            return Err(CatalogError::MissingRepository {
                group: group.name.clone(),
            });
        }

        for (index, file) in group.files.iter().enumerate() {
            if file.path.trim().is_empty() {
                return Err(CatalogError::EmptyRemotePath {
                    group: group.name.clone(),
                    index,
                });
            }

            let Some(name) = local_filename(&file.path) else {
                return Err(CatalogError::InvalidFilename {
                    group: group.name.clone(),
                    path: file.path.clone(),
                });
            };

            if let Some(value) = file.size_estimate_mb
                && (!value.is_finite() || value < 0.0)
            {
                return Err(CatalogError::InvalidSizeEstimate {
                    group: group.name.clone(),
                    path: file.path.clone(),
                    value,
                });
            }

            if let Some(first) = seen.insert(name, &file.path) {
                return Err(CatalogError::DuplicateFilename {
                    filename: name.to_string(),
                    first: first.to_string(),
                    second: file.path.clone(),
                });
            }
        }
    }

    Ok(())
}

fn validate_settings(settings: &GlobalSettings) -> Result<(), CatalogError> {
    if !(MIN_CONCURRENCY..=MAX_CONCURRENCY).contains(&settings.max_concurrent) {
        return Err(CatalogError::setting(
            "max_concurrent",
            format!(
                "{} is outside {MIN_CONCURRENCY}..={MAX_CONCURRENCY}",
                settings.max_concurrent
            ),
        ));
    }
    if !(1..=MAX_RETRIES).contains(&settings.max_retries) {
        return Err(CatalogError::setting(
            "max_retries",
            format!("{} is outside 1..={MAX_RETRIES}", settings.max_retries),
        ));
    }
    if !settings.retry_delay_base.is_finite() || settings.retry_delay_base <= 0.0 {
        return Err(CatalogError::setting(
            "retry_delay_base",
            format!("{} must be a positive number", settings.retry_delay_base),
        ));
    }
    if settings.timeout == 0 {
        return Err(CatalogError::setting("timeout", "must be at least 1 second"));
    }
    Ok(())
}

fn validate_transport(transport: &TransportSettings) -> Result<(), CatalogError> {
    let endpoint = Url::parse(&transport.endpoint).map_err(|e| {
        CatalogError::setting("transport.endpoint", format!("{}: {e}", transport.endpoint))
    })?;
    if !matches!(endpoint.scheme(), "http" | "https") {
        return Err(CatalogError::setting(
            "transport.endpoint",
            format!("unsupported scheme `{}`", endpoint.scheme()),
        ));
    }
    if transport.backends.is_empty() {
        return Err(CatalogError::setting(
            "transport.backends",
            "at least one backend is required",
        ));
    }
    if transport.revision.trim().is_empty() {
        return Err(CatalogError::setting(
            "transport.revision",
            "must not be empty",
        ));
    }
    Ok(())
}
