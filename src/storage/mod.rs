//! Persistent storage
//!
//! Private data directory, persisted preferences, and model staging. The
//! engine only ever writes inside this area; user-chosen model paths are
//! read-only.

pub mod resolver;
pub mod settings;

use std::fs;
use std::path::PathBuf;

use thiserror::Error;

/// Storage layer errors
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("no usable data directory on this host")]
    DataDirUnavailable,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Get the process-private data directory, creating it if needed
pub fn get_data_dir() -> Result<PathBuf, StorageError> {
    let dirs = directories::ProjectDirs::from("", "", "uiloom")
        .ok_or(StorageError::DataDirUnavailable)?;
    let dir = dirs.data_dir().to_path_buf();
    fs::create_dir_all(&dir)?;
    Ok(dir)
}

/// Directory where staged model copies live, creating it if needed
pub fn models_dir() -> Result<PathBuf, StorageError> {
    let dir = get_data_dir()?.join("models");
    fs::create_dir_all(&dir)?;
    Ok(dir)
}
