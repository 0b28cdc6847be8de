//! Daemon lifecycle: process identity and detachment.
//!
//! # Responsibilities
//! - Describe where the daemon lives (`DaemonContext`)
//! - Find the running instance through its PID file
//! - Fork a detached child and wait for it to report readiness
//!
//! # Design Decisions
//! - The PID file is the only cross-process identity; it is never cached
//! - Liveness uses `kill(pid, 0)`; EPERM still means the process exists
//! - The running daemon holds an exclusive `flock` on its PID file
//! - Stale PID files found during a search are removed

pub mod pidfile;
pub mod process;

use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

use nix::errno::Errno;
use nix::fcntl::{Flock, FlockArg};
use nix::sys::signal::kill;
use nix::unistd::Pid;

pub use pidfile::PidFile;
pub use process::{fork_detached, Detached, Readiness, READINESS_TIMEOUT};

pub const PID_FILE_NAME: &str = "hostalias.pid";
pub const PID_FILE_PERM: u32 = 0o644;
pub const UMASK: u32 = 0o027;

/// Descriptor of the single daemon instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DaemonContext {
    /// Absolute path, so the child finds it after changing directory.
    pub pid_file: PathBuf,
    pub pid_file_perm: u32,
    pub work_dir: PathBuf,
    pub umask: u32,
    /// Receives the detached child's stdout and stderr; `/dev/null` if unset.
    pub log_file: Option<PathBuf>,
}

impl Default for DaemonContext {
    fn default() -> Self {
        let pid_file = match std::env::current_dir() {
            Ok(dir) => dir.join(PID_FILE_NAME),
            Err(_) => PathBuf::from(PID_FILE_NAME),
        };
        Self {
            pid_file,
            pid_file_perm: PID_FILE_PERM,
            work_dir: PathBuf::from("./"),
            umask: UMASK,
            log_file: None,
        }
    }
}

impl DaemonContext {
    /// Context whose PID file and working directory live in `dir`.
    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        Self {
            pid_file: dir.join(PID_FILE_NAME),
            work_dir: dir.to_path_buf(),
            ..Self::default()
        }
    }

    pub fn with_log_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.log_file = Some(path.into());
        self
    }

    /// PID of the live instance, if any.
    ///
    /// A locked file is live whatever it contains. An unlocked file is live
    /// only while the process it names is.
    pub fn search(&self) -> Option<i32> {
        let file = match File::open(&self.pid_file) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return None,
            Err(e) => {
                tracing::warn!(path = %self.pid_file.display(), error = %e, "Failed to open PID file");
                return None;
            }
        };

        let lock = match Flock::lock(file, FlockArg::LockSharedNonblock) {
            Ok(lock) => lock,
            Err((_, Errno::EWOULDBLOCK)) => {
                let owner = pidfile::locked_owner(&self.pid_file);
                if owner.is_none() {
                    tracing::warn!(path = %self.pid_file.display(), "PID file is locked but names no process");
                }
                return owner;
            }
            Err((_, errno)) => {
                tracing::warn!(path = %self.pid_file.display(), error = %errno, "Failed to lock PID file");
                return None;
            }
        };

        let Some(pid) = pidfile::read_pid(&self.pid_file) else {
            tracing::warn!(path = %self.pid_file.display(), "Ignoring unparsable PID file");
            return None;
        };
        if is_process_alive(pid) {
            return Some(pid);
        }

        // Holding the lock, so no start is writing this file.
        if !pidfile::same_file(&lock, &self.pid_file).unwrap_or(false) {
            return None;
        }
        tracing::debug!(pid, path = %self.pid_file.display(), "Removing stale PID file");
        if let Err(e) = fs::remove_file(&self.pid_file) {
            if e.kind() != io::ErrorKind::NotFound {
                tracing::warn!(path = %self.pid_file.display(), error = %e, "Failed to remove stale PID file");
            }
        }
        None
    }
}

/// Checks whether the process with the given PID is still alive.
pub fn is_process_alive(pid: i32) -> bool {
    // 0 and negatives address process groups.
    if pid <= 0 {
        return false;
    }
    match kill(Pid::from_raw(pid), None) {
        Ok(()) | Err(Errno::EPERM) => true,
        Err(_) => false,
    }
}

pub(crate) fn parse_pid(content: &str) -> Option<i32> {
    content.trim().parse::<i32>().ok().filter(|pid| *pid > 0)
}
