//! PID-file lifecycle as seen by status and start.

mod common;

use std::fs;

use hostalias::daemon::PidFile;
use hostalias::{Controller, DaemonContext, Error, HostsFile};

use common::test_config;

#[test]
fn test_stale_pid_file_reads_absent() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = DaemonContext::in_dir(dir.path());
    fs::write(&ctx.pid_file, format!("{}\n", i32::MAX)).unwrap();

    let config = test_config(dir.path(), 38719, 38780, &[]);
    let ctl = Controller::new(HostsFile::new(&config.hosts.path), config, ctx.clone());

    assert_eq!(ctl.status(), None);
    assert!(!ctx.pid_file.exists());
}

#[test]
fn test_start_is_mutually_exclusive() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = DaemonContext::in_dir(dir.path());
    let held = PidFile::acquire(&ctx).unwrap();

    let config = test_config(dir.path(), 38719, 38780, &[("api.local", ":4000")]);
    let hosts_path = config.hosts.path.clone();
    let mut ctl = Controller::new(HostsFile::new(&hosts_path), config, ctx.clone());

    assert_eq!(ctl.status(), Some(held.pid()));
    let err = ctl.start().unwrap_err();
    assert!(matches!(err, Error::AlreadyRunning { pid } if pid == held.pid()));
    assert!(err.is_state_conflict());
    // Refused before reconciling.
    assert_eq!(fs::read_to_string(&hosts_path).unwrap(), "127.0.0.1 localhost\n");

    drop(held);
    assert_eq!(ctl.status(), None);
}
