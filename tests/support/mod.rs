//! Shared helpers for integration tests.

#![allow(dead_code)]

pub mod scripted_backend;
pub mod socket_guard;

use std::path::Path;

/// Writes a catalog JSON document to `dir/download_catalog.json`.
pub fn write_catalog(dir: &Path, json: &str) -> std::path::PathBuf {
    let path = dir.join("download_catalog.json");
    std::fs::write(&path, json).expect("write catalog");
    path
}
