//! Fork/detach with a readiness handshake.
//!
//! ```text
//! parent                              child
//!   pipe()
//!   fork() ─────────────────────────▶ setsid, umask, chdir, redirect stdio
//!   wait_ready(15s) ◀── "ok" ──────── engine loaded
//!                  ◀── "running N" ── PID file held by a live instance
//!                  ◀── "err: ..." ─── anything else failed
//!                  ◀── EOF ────────── child exited without reporting
//!   SIGTERM ────────────────────────▶ no report within the timeout
//! ```
//!
//! Must be called before any tokio runtime or other thread exists.

use std::fs::{File, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::os::fd::AsRawFd;
use std::sync::mpsc;
use std::time::Duration;

use nix::sys::signal::{kill, Signal};
use nix::sys::stat::{umask, Mode};
use nix::sys::wait::{waitpid, WaitPidFlag};
use nix::unistd::{chdir, dup2, fork, pipe, setsid, ForkResult, Pid};

use crate::daemon::DaemonContext;
use crate::error::{Error, Result};

/// How long `start` waits for the child to report.
pub const READINESS_TIMEOUT: Duration = Duration::from_secs(15);

/// Parent side of a forked daemon.
#[derive(Debug)]
pub struct Detached {
    pid: i32,
    report: File,
}

impl Detached {
    pub fn pid(&self) -> i32 {
        self.pid
    }

    /// Blocks until the child reports, returning its PID once it is ready.
    pub fn wait_ready(self, timeout: Duration) -> Result<i32> {
        let pid = self.pid;
        let (tx, rx) = mpsc::channel();
        let mut reader = BufReader::new(self.report);
        std::thread::spawn(move || {
            let mut line = String::new();
            let result = reader.read_line(&mut line).map(|_| line);
            let _ = tx.send(result);
        });

        let line = match rx.recv_timeout(timeout) {
            Ok(result) => result?,
            Err(_) => {
                // A late child would otherwise come up behind a reported failure.
                tracing::warn!(pid, "Daemon did not report in time, terminating it");
                if let Err(e) = kill(Pid::from_raw(pid), Signal::SIGTERM) {
                    tracing::warn!(pid, error = %e, "Failed to terminate daemon");
                }
                let _ = waitpid(Pid::from_raw(pid), Some(WaitPidFlag::WNOHANG));
                return Err(Error::ReadinessTimeout { pid });
            }
        };

        let line = line.trim_end();
        if line == "ok" {
            return Ok(pid);
        }

        // Reap the child if it is already gone.
        let _ = waitpid(Pid::from_raw(pid), Some(WaitPidFlag::WNOHANG));
        if let Some(owner) = line.strip_prefix("running ").and_then(|p| p.parse().ok()) {
            return Err(Error::AlreadyRunning { pid: owner });
        }
        match line.strip_prefix("err: ") {
            Some(message) => Err(Error::DaemonFailed(message.to_string())),
            None if line.is_empty() => Err(Error::DaemonFailed("daemon exited before becoming ready".into())),
            None => Err(Error::DaemonFailed(line.to_string())),
        }
    }
}

/// Child side of the handshake. Reports at most once; dropping it without
/// reporting closes the pipe, which the parent reads as a failure.
#[derive(Debug)]
pub struct Readiness {
    pipe: Option<File>,
}

impl Readiness {
    /// A readiness that reports nowhere, for foreground runs.
    pub fn none() -> Self {
        Self { pipe: None }
    }

    pub fn ready(mut self) {
        self.report("ok");
    }

    pub fn already_running(mut self, pid: i32) {
        self.report(&format!("running {pid}"));
    }

    pub fn fail(mut self, message: &str) {
        self.report(&format!("err: {}", message.replace('\n', " ")));
    }

    fn report(&mut self, line: &str) {
        if let Some(mut pipe) = self.pipe.take() {
            if let Err(e) = writeln!(pipe, "{line}") {
                tracing::warn!(error = %e, "Failed to report readiness");
            }
        }
    }
}

/// Forks a detached child running `child`, whose return value becomes the
/// child's exit status. Returns the parent's handle; never returns in the
/// child.
pub fn fork_detached<F>(ctx: &DaemonContext, child: F) -> Result<Detached>
where
    F: FnOnce(Readiness) -> i32,
{
    let (read_end, write_end) = pipe()?;

    // SAFETY: callers fork before any other thread exists, so the child
    // inherits a consistent single-threaded address space.
    match unsafe { fork() }? {
        ForkResult::Parent { child } => {
            drop(write_end);
            tracing::debug!(pid = child.as_raw(), "Forked daemon");
            Ok(Detached {
                pid: child.as_raw(),
                report: File::from(read_end),
            })
        }
        ForkResult::Child => {
            drop(read_end);
            let readiness = Readiness {
                pipe: Some(File::from(write_end)),
            };
            let code = match detach(ctx) {
                Ok(()) => child(readiness),
                Err(e) => {
                    readiness.fail(&format!("failed to detach: {e}"));
                    1
                }
            };
            std::process::exit(code)
        }
    }
}

/// New session, umask, working directory and stdio redirection.
fn detach(ctx: &DaemonContext) -> Result<()> {
    setsid()?;
    umask(Mode::from_bits_truncate(ctx.umask as _));
    chdir(ctx.work_dir.as_path())?;

    let null = OpenOptions::new().read(true).write(true).open("/dev/null")?;
    let output = match &ctx.log_file {
        Some(path) => OpenOptions::new().create(true).append(true).open(path)?,
        None => null.try_clone()?,
    };

    redirect(&null, 0)?;
    redirect(&output, 1)?;
    redirect(&output, 2)?;
    Ok(())
}

fn redirect(file: &File, target: i32) -> io::Result<()> {
    dup2(file.as_raw_fd(), target).map(drop).map_err(io::Error::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_readiness_protocol() {
        let cases: [(fn(Readiness), fn(&Result<i32>) -> bool); 4] = [
            (|r| r.ready(), |res| matches!(res, Ok(42))),
            (|r| r.already_running(7), |res| matches!(res, Err(Error::AlreadyRunning { pid: 7 }))),
            (|r| r.fail("bind failed\nport 80"), |res| {
                matches!(res, Err(Error::DaemonFailed(m)) if m == "bind failed port 80")
            }),
            (drop, |res| matches!(res, Err(Error::DaemonFailed(_)))),
        ];

        for (report, check) in cases {
            let (read_end, write_end) = pipe().unwrap();
            report(Readiness {
                pipe: Some(File::from(write_end)),
            });
            let detached = Detached {
                pid: 42,
                report: File::from(read_end),
            };
            let result = detached.wait_ready(Duration::from_secs(5));
            assert!(check(&result), "{result:?}");
        }
    }

    #[test]
    fn test_silent_child_times_out() {
        let (read_end, write_end) = pipe().unwrap();
        // No such process, so the SIGTERM goes nowhere.
        let detached = Detached {
            pid: i32::MAX,
            report: File::from(read_end),
        };
        let result = detached.wait_ready(Duration::from_millis(100));
        assert!(matches!(result, Err(Error::ReadinessTimeout { pid: i32::MAX })));
        drop(write_end);
    }

    #[test]
    fn test_silent_child_is_terminated() {
        let mut child = std::process::Command::new("sleep").arg("30").spawn().unwrap();
        let (read_end, write_end) = pipe().unwrap();
        let detached = Detached {
            pid: child.id() as i32,
            report: File::from(read_end),
        };

        let result = detached.wait_ready(Duration::from_millis(100));
        assert!(matches!(result, Err(Error::ReadinessTimeout { pid }) if pid == child.id() as i32));

        // wait_ready may already have reaped it.
        match child.wait() {
            Ok(status) => assert!(!status.success(), "child was left running"),
            Err(e) => assert_eq!(e.raw_os_error(), Some(nix::errno::Errno::ECHILD as i32)),
        }
        drop(write_end);
    }
}
