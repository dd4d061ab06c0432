//! On-disk record of the running timed session.
//!
//! Written when a session's block is applied and removed once its unblock
//! succeeds. A record left behind means the owning process died mid-session;
//! `hostblock recover` reads it back to finish the job.

use crate::platform;
use crate::AppError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct LedgerEntry {
    pub targets: Vec<String>,
    /// Unix seconds.
    pub started_at: u64,
    /// Unix seconds. `None` for a session without expiry.
    #[serde(default)]
    pub deadline: Option<u64>,
    pub pid: u32,
}

impl LedgerEntry {
    pub fn new(targets: Vec<String>, duration: Option<Duration>) -> Self {
        let now = unix_now();
        Self {
            targets,
            started_at: now,
            deadline: duration.map(|d| now.saturating_add(d.as_secs())),
            pid: std::process::id(),
        }
    }

    /// Time left before the deadline, `None` once it has passed.
    pub fn remaining(&self) -> Option<Duration> {
        match self.deadline {
            Some(deadline) => {
                let now = unix_now();
                (deadline > now).then(|| Duration::from_secs(deadline - now))
            }
            None => Some(Duration::MAX),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SessionLedger {
    path: PathBuf,
}

impl SessionLedger {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Ledger in the app's config directory.
    pub fn default_location() -> Self {
        Self::new(platform::config_dir().join("session.json"))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    pub fn load(&self) -> Result<Option<LedgerEntry>, AppError> {
        let data = match fs::read_to_string(&self.path) {
            Ok(data) => data,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Ok(Some(serde_json::from_str(&data)?))
    }

    /// Persist `entry`, creating the parent directory if needed.
    pub fn record(&self, entry: &LedgerEntry) -> Result<(), AppError> {
        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir)?;
        }
        let data = serde_json::to_string_pretty(entry)?;
        fs::write(&self.path, data)?;
        Ok(())
    }

    pub fn clear(&self) -> Result<(), AppError> {
        match fs::remove_file(&self.path) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
