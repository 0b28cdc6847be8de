//! Exclusive PID file.
//!
//! The daemon holds an exclusive `flock` on the file for as long as it runs.
//! A competing start never deletes the file: it only rewrites one whose lock
//! it obtained, so the loser of a race always sees the winner's lock.

use std::fs::{self, File, OpenOptions, Permissions};
use std::io::{self, Write};
use std::os::unix::fs::{MetadataExt, OpenOptionsExt, PermissionsExt};
use std::path::{Path, PathBuf};
use std::time::Duration;

use nix::errno::Errno;
use nix::fcntl::{Flock, FlockArg};

use crate::daemon::{is_process_alive, parse_pid, DaemonContext};
use crate::error::{Error, Result};

/// How often, and how long, to wait on a lock holder that has not yet
/// written its PID.
const OWNER_POLLS: u32 = 50;
const OWNER_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Held by the running daemon; removed again on drop.
#[derive(Debug)]
pub struct PidFile {
    path: PathBuf,
    pid: i32,
    lock: Flock<File>,
}

impl PidFile {
    /// Locks the context's PID file and writes the current PID into it.
    ///
    /// A file nobody holds the lock on is stale and rewritten in place. A
    /// locked file, or one naming another live process, yields
    /// [`Error::AlreadyRunning`].
    pub fn acquire(ctx: &DaemonContext) -> Result<Self> {
        let pid = std::process::id() as i32;
        let path = &ctx.pid_file;

        for _ in 0..OWNER_POLLS {
            let file = open(path, ctx.pid_file_perm)?;
            let lock = match Flock::lock(file, FlockArg::LockExclusiveNonblock) {
                Ok(lock) => lock,
                Err((_, Errno::EWOULDBLOCK)) => {
                    // Held by a daemon, or for an instant by a status check.
                    if let Some(owner) = read_pid(path).filter(|owner| is_process_alive(*owner)) {
                        return Err(Error::AlreadyRunning { pid: owner });
                    }
                    std::thread::sleep(OWNER_POLL_INTERVAL);
                    continue;
                }
                Err((_, errno)) => return Err(errno.into()),
            };

            // The previous holder may have unlinked the file between open and lock.
            if !same_file(&lock, path)? {
                continue;
            }
            if let Some(owner) = read_pid(path).filter(|owner| *owner != pid && is_process_alive(*owner)) {
                return Err(Error::AlreadyRunning { pid: owner });
            }

            if fs::metadata(path)?.len() > 0 {
                tracing::info!(path = %path.display(), "Replacing stale PID file");
            }
            write_pid(&lock, ctx.pid_file_perm, pid)?;
            tracing::debug!(pid, path = %path.display(), "PID file acquired");
            return Ok(Self {
                path: path.clone(),
                pid,
                lock,
            });
        }

        Err(Error::AlreadyRunning {
            pid: read_pid(path).unwrap_or_default(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn pid(&self) -> i32 {
        self.pid
    }
}

impl Drop for PidFile {
    fn drop(&mut self) {
        // Only remove a file that still names us. The lock goes with the fd.
        if read_pid(&self.path) != Some(self.pid) || !same_file(&self.lock, &self.path).unwrap_or(false) {
            return;
        }
        match fs::remove_file(&self.path) {
            Ok(()) => tracing::debug!(path = %self.path.display(), "PID file released"),
            Err(e) => tracing::warn!(path = %self.path.display(), error = %e, "Failed to remove PID file"),
        }
    }
}

/// PID written by whoever holds the lock on `path`, giving a holder that is
/// still writing a moment to finish.
pub(crate) fn locked_owner(path: &Path) -> Option<i32> {
    for _ in 0..OWNER_POLLS {
        if let Some(pid) = read_pid(path) {
            return Some(pid);
        }
        std::thread::sleep(OWNER_POLL_INTERVAL);
    }
    None
}

/// Whether `file` is still the file linked at `path`.
pub(crate) fn same_file(file: &File, path: &Path) -> io::Result<bool> {
    let held = file.metadata()?;
    match fs::metadata(path) {
        Ok(linked) => Ok(held.dev() == linked.dev() && held.ino() == linked.ino()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

pub(crate) fn read_pid(path: &Path) -> Option<i32> {
    fs::read_to_string(path).ok().as_deref().and_then(parse_pid)
}

fn open(path: &Path, perm: u32) -> io::Result<File> {
    OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .mode(perm)
        .open(path)
}

fn write_pid(file: &File, perm: u32, pid: i32) -> io::Result<()> {
    file.set_len(0)?;
    // The umask may have narrowed the mode.
    file.set_permissions(Permissions::from_mode(perm))?;
    let mut writer = file;
    writeln!(writer, "{pid}")?;
    file.sync_all()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hold(path: &Path) -> Flock<File> {
        let file = OpenOptions::new().read(true).write(true).create(true).open(path).unwrap();
        Flock::lock(file, FlockArg::LockExclusiveNonblock).unwrap()
    }

    #[test]
    fn test_acquire_and_release() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = DaemonContext::in_dir(dir.path());

        let pid_file = PidFile::acquire(&ctx).unwrap();
        assert_eq!(pid_file.pid(), std::process::id() as i32);
        assert_eq!(fs::read_to_string(pid_file.path()).unwrap().trim(), pid_file.pid().to_string());
        let mode = fs::metadata(pid_file.path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o644);

        drop(pid_file);
        assert!(!ctx.pid_file.exists());
    }

    #[test]
    fn test_live_owner_is_already_running() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = DaemonContext::in_dir(dir.path());
        // PID 1 is always alive.
        fs::write(&ctx.pid_file, "1\n").unwrap();

        let err = PidFile::acquire(&ctx).unwrap_err();
        assert!(matches!(err, Error::AlreadyRunning { pid: 1 }));
        assert_eq!(fs::read_to_string(&ctx.pid_file).unwrap(), "1\n");
    }

    #[test]
    fn test_stale_file_is_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = DaemonContext::in_dir(dir.path());
        fs::write(&ctx.pid_file, format!("{}\n", i32::MAX)).unwrap();

        let pid_file = PidFile::acquire(&ctx).unwrap();
        assert_eq!(read_pid(&ctx.pid_file), Some(pid_file.pid()));
    }

    #[test]
    fn test_locked_empty_file_is_not_taken() {
        // A competing start between creating the file and writing its PID.
        let dir = tempfile::tempdir().unwrap();
        let ctx = DaemonContext::in_dir(dir.path());
        let winner = hold(&ctx.pid_file);

        let err = PidFile::acquire(&ctx).unwrap_err();
        assert!(matches!(err, Error::AlreadyRunning { .. }), "{err}");
        assert!(same_file(&winner, &ctx.pid_file).unwrap(), "winner's file was replaced");
        assert_eq!(fs::read_to_string(&ctx.pid_file).unwrap(), "");
    }

    #[test]
    fn test_locked_stale_pid_is_not_taken() {
        // Two starts both saw the same dead PID; the first has already locked.
        let dir = tempfile::tempdir().unwrap();
        let ctx = DaemonContext::in_dir(dir.path());
        fs::write(&ctx.pid_file, format!("{}\n", i32::MAX)).unwrap();
        let winner = hold(&ctx.pid_file);

        assert!(matches!(PidFile::acquire(&ctx), Err(Error::AlreadyRunning { .. })));
        assert!(same_file(&winner, &ctx.pid_file).unwrap());
    }

    #[test]
    fn test_second_acquire_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = DaemonContext::in_dir(dir.path());
        let first = PidFile::acquire(&ctx).unwrap();

        let err = PidFile::acquire(&ctx).unwrap_err();
        assert!(matches!(err, Error::AlreadyRunning { pid } if pid == first.pid()));
        assert_eq!(read_pid(&ctx.pid_file), Some(first.pid()));

        drop(first);
        assert!(!ctx.pid_file.exists());
        assert!(PidFile::acquire(&ctx).is_ok());
    }

    #[test]
    fn test_drop_leaves_foreign_file() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = DaemonContext::in_dir(dir.path());
        let pid_file = PidFile::acquire(&ctx).unwrap();

        fs::write(&ctx.pid_file, "1\n").unwrap();
        drop(pid_file);
        assert!(ctx.pid_file.exists());
    }
}
