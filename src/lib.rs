//! hostblock — temporary host blocking via the system hosts file.
//!
//! Block entries are `127.0.0.1<TAB>name` lines. Every edit goes through
//! [`store::BlockStore`], which performs a single locked read-modify-write
//! per operation. Timed sessions are driven by [`session::SessionController`],
//! which guarantees that exactly one unblock runs per session regardless of
//! whether the deadline, an interrupt, or an explicit request fires first.

pub mod config;
pub mod document;
pub mod entry;
pub mod ledger;
pub mod platform;
pub mod session;
pub mod store;
pub mod targets;

use std::io;
use std::path::PathBuf;
use thiserror::Error;

// =========================================================================
// Error type
// =========================================================================

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Hosts file {} is unavailable: {source}", path.display())]
    ResourceUnavailable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Permission denied on {} (running as admin/root?)", path.display())]
    PermissionDenied { path: PathBuf },

    #[error("Invalid target name {0:?}")]
    InvalidTarget(String),

    #[error("Invalid duration {0:?} (expected minutes, or a number with s/m/h suffix)")]
    InvalidDuration(String),

    #[error("No target names supplied")]
    EmptySourceList,

    #[error("Cannot read target list {}: {source}", path.display())]
    SourceList {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("A session is already recorded in {}; run `hostblock recover` if it is stale", .0.display())]
    SessionInProgress(PathBuf),

    #[error("Unblock failed, entries still present for {}: {reason}", targets.join(", "))]
    UnblockFailed { targets: Vec<String>, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl AppError {
    /// Classify an I/O failure on the hosts file.
    pub(crate) fn from_hosts_io(path: &std::path::Path, source: io::Error) -> Self {
        if source.kind() == io::ErrorKind::PermissionDenied {
            AppError::PermissionDenied {
                path: path.to_path_buf(),
            }
        } else {
            AppError::ResourceUnavailable {
                path: path.to_path_buf(),
                source,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn hosts_permission_error_is_classified() {
        let path = Path::new("/etc/hosts");
        let err = AppError::from_hosts_io(path, io::Error::from(io::ErrorKind::PermissionDenied));
        assert!(matches!(err, AppError::PermissionDenied { ref path } if path == Path::new("/etc/hosts")));
        assert!(err.to_string().contains("admin/root"));
    }

    #[test]
    fn other_hosts_errors_keep_their_source() {
        let path = Path::new("/etc/hosts");
        for kind in [io::ErrorKind::NotFound, io::ErrorKind::InvalidData] {
            match AppError::from_hosts_io(path, io::Error::from(kind)) {
                AppError::ResourceUnavailable { path: p, source } => {
                    assert_eq!(p, path);
                    assert_eq!(source.kind(), kind);
                }
                other => panic!("expected ResourceUnavailable, got {other:?}"),
            }
        }
    }
}
