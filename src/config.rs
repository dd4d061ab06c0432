//! Persistent configuration stored as JSON on disk.

use crate::platform;
use crate::AppError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Hosts file to edit.
    pub hosts_path: PathBuf,
    /// Flush the OS resolver cache after each change.
    pub flush_dns: bool,
    /// Record timed sessions on disk so a crashed session can be recovered.
    pub session_ledger: bool,
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            hosts_path: platform::hosts_file_path(),
            flush_dns: true,
            session_ledger: true,
            log_level: "info".to_string(),
        }
    }
}

pub fn default_path() -> PathBuf {
    platform::config_dir().join("config.json")
}

/// Load config from `path` (or the default location), returning defaults if
/// the file doesn't exist.
pub fn load(path: Option<&Path>) -> Result<Config, AppError> {
    let path = path.map(Path::to_path_buf).unwrap_or_else(default_path);
    if !path.exists() {
        return Ok(Config::default());
    }
    let data = fs::read_to_string(&path)?;
    serde_json::from_str(&data)
        .map_err(|e| AppError::Config(format!("Invalid config {}: {e}", path.display())))
}
