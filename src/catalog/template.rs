//! Starter catalog written by `--generate-config`.

use std::collections::BTreeMap;
use std::path::Path;

use tracing::info;

use super::schema::{
    Catalog, FileDescriptor, GlobalSettings, TaskGroup, TransportSettings,
};
use super::{CatalogError, CatalogFormat};

impl Catalog {
    /// A small, valid catalog showing every section of the format.
    #[must_use]
    pub fn template() -> Self {
        let group = |name: &str, priority: i64, files: &[(&str, f64)]| TaskGroup {
            name: name.to_string(),
            repository: None,
            priority,
            files: files
                .iter()
                .map(|(path, size)| FileDescriptor {
                    path: (*path).to_string(),
                    size_estimate_mb: Some(*size),
                })
                .collect(),
        };

        let mut completed_downloads = BTreeMap::new();
        completed_downloads.insert("annotations".to_string(), Vec::new());

        Self {
            repository: Some("your-org/your-dataset".to_string()),
            global_settings: GlobalSettings::default(),
            transport: TransportSettings::default(),
            completed_downloads,
            download_tasks: vec![
                group(
                    "metadata",
                    1,
                    &[("metadata/index.json", 0.5), ("metadata/splits.json", 0.2)],
                ),
                group(
                    "train_shards",
                    2,
                    &[
                        ("data/train-00000.tar.gz", 1024.0),
                        ("data/train-00001.tar.gz", 1024.0),
                    ],
                ),
                group("validation_shards", 3, &[("data/val-00000.tar.gz", 512.0)]),
            ],
        }
    }
}

/// Writes [`Catalog::template`] to `path` in the syntax its extension selects.
///
/// # Errors
///
/// Returns [`CatalogError::AlreadyExists`] when the file exists and `force`
/// is false, or [`CatalogError::Write`] on IO failure.
pub fn write_template(path: &Path, force: bool) -> Result<Catalog, CatalogError> {
    if path.exists() && !force {
        return Err(CatalogError::AlreadyExists {
            path: path.to_path_buf(),
        });
    }

    let catalog = Catalog::template();
    let text = CatalogFormat::from_path(path)
        .render(&catalog)
        .map_err(|message| CatalogError::Parse {
            path: path.to_path_buf(),
            message,
        })?;

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|source| CatalogError::Write {
            path: path.to_path_buf(),
            source,
        })?;
    }
    std::fs::write(path, text).map_err(|source| CatalogError::Write {
        path: path.to_path_buf(),
        source,
    })?;

    info!(path = %path.display(), "catalog template written");
    Ok(catalog)
}
