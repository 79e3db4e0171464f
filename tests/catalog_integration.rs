//! Integration tests for catalog loading, templates, and plan derivation.

use std::collections::HashSet;
use std::path::PathBuf;

use fetcher_core::catalog::{RepoType, write_template};
use fetcher_core::{BackendKind, CatalogError, StatusStore, TaskCatalog, TransferRecord};
use tempfile::TempDir;

mod support;
use support::write_catalog;

#[test]
fn test_toml_catalog_loads_with_transport_settings() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("catalog.toml");
    std::fs::write(
        &path,
        r#"
repository = "org/models"

[global_settings]
max_concurrent = 4
max_retries = 2
download_dir = "data"

[transport]
endpoint = "https://mirror.example.com"
repo_type = "model"
revision = "v1.0"
backends = ["curl", "api"]

[[download_tasks]]
name = "weights"
priority = 1

[[download_tasks.files]]
path = "ckpt/model.safetensors"
size_estimate_mb = 512.0
"#,
    )
    .unwrap();

    let catalog = TaskCatalog::load(&path).unwrap();
    assert_eq!(catalog.settings().max_concurrent, 4);
    assert_eq!(catalog.transport().repo_type, RepoType::Model);
    assert_eq!(
        catalog.transport().backends,
        vec![BackendKind::Curl, BackendKind::Api]
    );
    assert_eq!(catalog.download_dir(), dir.path().join("data"));

    let plan = catalog.plan(|_| false);
    assert_eq!(plan.tasks.len(), 1);
    assert_eq!(plan.tasks[0].local_filename, "model.safetensors");
    assert_eq!(plan.tasks[0].max_retries, 2);
}

#[test]
fn test_generated_template_loads_and_plans() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("download_catalog.json");

    write_template(&path, false).unwrap();
    let catalog = TaskCatalog::load(&path).unwrap();
    let plan = catalog.plan(|_| false);

    assert_eq!(plan.tasks.len(), catalog.file_count());
    assert!(plan.tasks.windows(2).all(|w| w[0].priority <= w[1].priority));
}

#[test]
fn test_template_refuses_to_overwrite_existing_catalog() {
    let dir = TempDir::new().unwrap();
    let path = write_catalog(dir.path(), r#"{"repository": "mine"}"#);

    assert!(matches!(
        write_template(&path, false),
        Err(CatalogError::AlreadyExists { .. })
    ));
    assert_eq!(
        std::fs::read_to_string(&path).unwrap(),
        r#"{"repository": "mine"}"#
    );
}

#[tokio::test]
async fn test_plan_skips_files_completed_in_status_and_catalog() {
    let dir = TempDir::new().unwrap();
    let path = write_catalog(
        dir.path(),
        r#"{
            "repository": "org/d",
            "completed_downloads": {"manual": ["a.bin"]},
            "download_tasks": [
                {"name": "g", "files": [
                    {"path": "x/a.bin"}, {"path": "x/b.bin"}, {"path": "x/c.bin"}
                ]}
            ]
        }"#,
    );
    let catalog = TaskCatalog::load(&path).unwrap();
    let download_dir = catalog.download_dir();

    {
        let store = StatusStore::open_in(&download_dir, HashSet::new()).unwrap();
        store
            .put(
                "b.bin",
                TransferRecord::Completed {
                    completed_at: chrono::Utc::now(),
                    attempts: 1,
                    backend: BackendKind::Wget,
                    size_bytes: None,
                },
            )
            .await
            .unwrap();
    }

    let store = StatusStore::open_in(&download_dir, catalog.completed_set()).unwrap();
    let plan = catalog.plan(|f| store.is_completed(f));

    assert_eq!(plan.skipped, vec!["a.bin".to_string(), "b.bin".to_string()]);
    assert_eq!(plan.tasks.len(), 1);
    assert_eq!(plan.tasks[0].local_filename, "c.bin");
}

#[test]
fn test_absolute_download_dir_is_not_rebased() {
    let dir = TempDir::new().unwrap();
    let absolute = dir.path().join("abs");
    let path = write_catalog(
        dir.path(),
        &format!(
            r#"{{"repository": "r", "global_settings": {{"download_dir": {}}}}}"#,
            serde_json::to_string(&absolute).unwrap()
        ),
    );

    let catalog = TaskCatalog::load(&path).unwrap();
    assert_eq!(catalog.download_dir(), absolute);
    assert_ne!(catalog.download_dir(), PathBuf::from("downloads"));
}

#[test]
fn test_yaml_catalog_with_named_groups_loads_and_plans() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("smart_download_config.yaml");
    std::fs::write(
        &path,
        r#"
base_path: ./openscene
chunk_size: 8192
verify_size: true
keep_temp: false
global_settings:
  max_concurrent: 3
  max_retries: 5
  retry_delay_base: 2
  timeout: 300
completed_downloads:
  maps:
  - nuplan-maps-v1.1.zip
download_tasks:
  mini_remaining:
    files:
    - path: openscene-v1.1/openscene_sensor_mini_camera_0.tgz
      size_estimate_mb: 1800
    - path: openscene-v1.1/openscene_sensor_mini_lidar_0.tgz
      size_estimate_mb: 900
    priority: 2
    repository: OpenDriveLab/OpenScene
  navhard_remaining:
    files:
    - path: navsim-v2/navhard_two_stage_curr_sensors.tgz
      size_estimate_mb: 2100
    priority: 3
    repository: OpenDriveLab/OpenScene
  test_remaining:
    files:
    - path: openscene-v1.1/openscene_sensor_test_camera_0.tgz
      size_estimate_mb: 1500
    - path: maps/nuplan-maps-v1.1.zip
      size_estimate_mb: 900
    priority: 2
    repository: OpenDriveLab/OpenScene
  trainval_remaining:
    files:
    - path: openscene-v1.1/openscene_sensor_trainval_camera_0.tgz
      size_estimate_mb: 4200
    priority: 1
    repository: OpenDriveLab/OpenScene
post_processing:
  auto_extract: true
  cleanup_archives: false
"#,
    )
    .unwrap();

    let catalog = TaskCatalog::load(&path).unwrap();
    assert!((catalog.settings().retry_delay_base - 2.0).abs() < f64::EPSILON);

    let summary = catalog.summary();
    let groups: Vec<_> = summary.groups.iter().map(|g| g.name.as_str()).collect();
    assert_eq!(
        groups,
        [
            "mini_remaining",
            "navhard_remaining",
            "test_remaining",
            "trainval_remaining"
        ]
    );
    assert_eq!(summary.total_files, 6);
    assert_eq!(summary.completed_count, 1);

    let completed = catalog.completed_set();
    let plan = catalog.plan(|f| completed.contains(f));
    let order: Vec<_> = plan
        .tasks
        .iter()
        .map(|t| t.local_filename.as_str())
        .collect();
    assert_eq!(
        order,
        [
            "openscene_sensor_trainval_camera_0.tgz",
            "openscene_sensor_mini_camera_0.tgz",
            "openscene_sensor_mini_lidar_0.tgz",
            "openscene_sensor_test_camera_0.tgz",
            "navhard_two_stage_curr_sensors.tgz",
        ]
    );
    assert_eq!(plan.skipped, vec!["nuplan-maps-v1.1.zip".to_string()]);
    assert!(
        plan.tasks
            .iter()
            .all(|t| t.repository == "OpenDriveLab/OpenScene" && t.max_retries == 5)
    );
}

#[test]
fn test_yaml_catalog_with_group_list_loads() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("catalog.yml");
    std::fs::write(
        &path,
        "repository: org/d\ndownload_tasks:\n- name: g\n  files:\n  - path: x/a.bin\n",
    )
    .unwrap();

    let catalog = TaskCatalog::load(&path).unwrap();
    assert_eq!(catalog.plan(|_| false).tasks[0].local_filename, "a.bin");
}

#[test]
fn test_malformed_yaml_is_parse_error() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("catalog.yaml");
    std::fs::write(&path, "download_tasks: [unclosed\n").unwrap();

    assert!(matches!(
        TaskCatalog::load(&path),
        Err(CatalogError::Parse { .. })
    ));
}
