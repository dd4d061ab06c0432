//! Safe hosts-file manipulation.
//!
//! This is the only place that reads or writes the hosts file. Each operation
//! opens the file, takes an advisory lock, reads the whole text once, writes
//! the whole new text once, and releases everything before returning.
//!
//! The lock only excludes other `hostblock` processes. Editors and other
//! tools that write the file without locking can still race a mutation and
//! lose an update.

use crate::document::HostsDocument;
use crate::entry;
use crate::platform;
use crate::AppError;
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Minimal hosts file written by [`BlockStore::restore_default`].
pub const DEFAULT_HOSTS: &str = "\
##
# Host Database
#
# localhost is used to configure the loopback interface
# when the system is booting.  Do not change this entry.
##
127.0.0.1\tlocalhost
255.255.255.255\tbroadcasthost
::1             localhost
";

#[derive(Debug, Clone)]
pub struct BlockStore {
    path: PathBuf,
    flush_dns: bool,
}

impl BlockStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            flush_dns: false,
        }
    }

    /// Flush the OS resolver cache after every write.
    pub fn with_dns_flush(mut self, enabled: bool) -> Self {
        self.flush_dns = enabled;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Names currently blocked, in file order.
    pub fn currently_blocked(&self) -> Result<Vec<String>, AppError> {
        let mut file = File::open(&self.path).map_err(|e| self.io_err(e))?;
        FileExt::lock_shared(&file).map_err(|e| self.io_err(e))?;
        let content = read_all(&mut file).map_err(|e| self.io_err(e))?;
        let _ = FileExt::unlock(&file);

        Ok(HostsDocument::parse(&content).list_blocked_targets())
    }

    /// Add an entry for every name not already blocked.
    pub fn apply_block<S: AsRef<str>>(&self, names: &[S]) -> Result<(), AppError> {
        for name in names {
            entry::validate(name.as_ref())?;
        }
        self.mutate(|doc| doc.with_entries_added(names))?;
        info!(path = %self.path.display(), count = names.len(), "block applied");
        Ok(())
    }

    /// Remove every entry for the given names.
    pub fn apply_unblock<S: AsRef<str>>(&self, names: &[S]) -> Result<(), AppError> {
        self.mutate(|doc| Ok(doc.with_entries_removed(names)))?;
        info!(path = %self.path.display(), count = names.len(), "unblock applied");
        Ok(())
    }

    /// Overwrite the hosts file with [`DEFAULT_HOSTS`].
    ///
    /// The file must already exist; a missing hosts file is reported rather
    /// than created.
    pub fn restore_default(&self) -> Result<(), AppError> {
        self.mutate(|_| Ok(HostsDocument::parse(DEFAULT_HOSTS)))?;
        info!(path = %self.path.display(), "hosts file restored to defaults");
        Ok(())
    }

    /// Single locked read-modify-write window.
    fn mutate<F>(&self, edit: F) -> Result<(), AppError>
    where
        F: FnOnce(&HostsDocument) -> Result<HostsDocument, AppError>,
    {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&self.path)
            .map_err(|e| self.io_err(e))?;
        FileExt::lock_exclusive(&file).map_err(|e| self.io_err(e))?;

        let result = self.rewrite(&mut file, edit);
        let _ = FileExt::unlock(&file);
        let changed = result?;

        if changed && self.flush_dns {
            platform::flush_dns();
        }
        Ok(())
    }

    fn rewrite<F>(&self, file: &mut File, edit: F) -> Result<bool, AppError>
    where
        F: FnOnce(&HostsDocument) -> Result<HostsDocument, AppError>,
    {
        let content = read_all(file).map_err(|e| self.io_err(e))?;
        let updated = edit(&HostsDocument::parse(&content))?.serialize();

        if updated == content {
            debug!(path = %self.path.display(), "hosts file already up to date");
            return Ok(false);
        }

        write_over(file, updated.as_bytes()).map_err(|e| self.io_err(e))?;
        Ok(true)
    }

    fn io_err(&self, e: std::io::Error) -> AppError {
        AppError::from_hosts_io(&self.path, e)
    }
}

fn read_all(file: &mut File) -> std::io::Result<String> {
    let mut content = String::new();
    file.read_to_string(&mut content)?;
    Ok(content)
}

// Write over the old bytes before truncating so the file is never observed
// empty.
fn write_over(file: &mut File, bytes: &[u8]) -> std::io::Result<()> {
    file.seek(SeekFrom::Start(0))?;
    file.write_all(bytes)?;
    file.set_len(bytes.len() as u64)?;
    file.sync_all()
}
