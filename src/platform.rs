//! OS-specific paths and utilities.

use std::path::PathBuf;
use std::process::Command;
use tracing::{debug, warn};

/// Return the system hosts file path.
///
/// Only seeds the default of `Config::hosts_path`; the store always works on
/// the configured path.
pub fn hosts_file_path() -> PathBuf {
    if cfg!(target_os = "windows") {
        let root = std::env::var("SystemRoot").unwrap_or_else(|_| r"C:\Windows".into());
        PathBuf::from(root).join(r"System32\drivers\etc\hosts")
    } else {
        PathBuf::from("/etc/hosts")
    }
}

/// Return the app's config directory.
///   macOS / Linux: ~/.hostblock/
///   Windows:       %APPDATA%\hostblock\
pub fn config_dir() -> PathBuf {
    if cfg!(target_os = "windows") {
        directories::BaseDirs::new()
            .map(|b| b.config_dir().join("hostblock"))
            .unwrap_or_else(|| PathBuf::from(r"C:\ProgramData\hostblock"))
    } else {
        directories::BaseDirs::new()
            .map(|b| b.home_dir().join(".hostblock"))
            .unwrap_or_else(|| PathBuf::from("/tmp/.hostblock"))
    }
}

/// Whether a process with this id is still running.
///
/// A process we may not signal still counts as alive. Always `false` off Unix,
/// and for pid 0.
pub fn process_alive(pid: u32) -> bool {
    #[cfg(unix)]
    {
        use nix::errno::Errno;
        use nix::sys::signal::kill;
        use nix::unistd::Pid;

        let Ok(raw) = i32::try_from(pid) else {
            return false;
        };
        if raw == 0 {
            return false;
        }
        match kill(Pid::from_raw(raw), None) {
            Ok(()) | Err(Errno::EPERM) => true,
            Err(_) => false,
        }
    }
    #[cfg(not(unix))]
    {
        let _ = pid;
        false
    }
}

/// Flush the OS DNS cache so hosts-file changes take effect immediately.
/// Failures are logged and otherwise ignored.
pub fn flush_dns() {
    if cfg!(target_os = "windows") {
        run_quietly("ipconfig", &["/flushdns"]);
    } else if cfg!(target_os = "macos") {
        run_quietly("dscacheutil", &["-flushcache"]);
        run_quietly("killall", &["-HUP", "mDNSResponder"]);
    }
}

fn run_quietly(program: &str, args: &[&str]) {
    match Command::new(program).args(args).output() {
        Ok(out) if out.status.success() => debug!(program, "DNS cache flushed"),
        Ok(out) => warn!(program, status = %out.status, "DNS cache flush failed"),
        Err(e) => warn!(program, error = %e, "DNS cache flush failed"),
    }
}
