//! Cross-Platform Path Utilities
//!
//! Resolves the application data directory (~/.chronicle/) and the files in it.

use std::path::{Path, PathBuf};

use crate::utils::error::{AppError, AppResult};

/// Get the user's home directory
pub fn home_dir() -> AppResult<PathBuf> {
    dirs::home_dir().ok_or_else(|| AppError::config("Could not determine home directory"))
}

/// Get the Chronicle directory (~/.chronicle/)
pub fn chronicle_dir() -> AppResult<PathBuf> {
    Ok(home_dir()?.join(".chronicle"))
}

/// Get the config file path (~/.chronicle/config.json)
pub fn config_path() -> AppResult<PathBuf> {
    Ok(chronicle_dir()?.join("config.json"))
}

/// Get the database file path (~/.chronicle/data.db)
pub fn database_path() -> AppResult<PathBuf> {
    Ok(chronicle_dir()?.join("data.db"))
}

/// Ensure a directory exists, creating it if necessary
pub fn ensure_dir(path: &Path) -> AppResult<()> {
    if !path.exists() {
        std::fs::create_dir_all(path)?;
    }
    Ok(())
}
