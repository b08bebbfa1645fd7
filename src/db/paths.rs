// src/db/paths.rs
//! Centralized path derivation for Sideloader directories

use std::path::{Path, PathBuf};

const DATA_DIR_ENV: &str = "SIDELOADER_DATA_DIR";

/// Base data directory: `$SIDELOADER_DATA_DIR`, else the user data dir
pub fn data_dir() -> PathBuf {
    std::env::var(DATA_DIR_ENV)
        .map(PathBuf::from)
        .ok()
        .or_else(|| dirs::data_dir().map(|d| d.join("sideloader")))
        .unwrap_or_else(|| PathBuf::from(".sideloader"))
}

/// Default location of the database file
pub fn default_db_path() -> PathBuf {
    data_dir().join("sideloader.db")
}

/// Get the directory containing the database
pub fn db_dir(db_path: &str) -> PathBuf {
    Path::new(db_path)
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."))
        .to_path_buf()
}

/// Scratch space for downloads and extracted archive entries
pub fn cache_dir(db_path: &str) -> PathBuf {
    db_dir(db_path).join("cache")
}
