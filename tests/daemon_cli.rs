//! The built binary as a user drives it: start, status, reload, stop.

mod common;

use std::path::Path;
use std::process::Output;
use std::time::Duration;

use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use tokio::process::Command;

use hostalias::config::save_config;
use hostalias::daemon::{is_process_alive, PID_FILE_NAME};

use common::{get_via_proxy, start_mock_backend, test_config};

/// Terminates a daemon left behind by a failed assertion.
struct Reap(i32);

impl Drop for Reap {
    fn drop(&mut self) {
        if is_process_alive(self.0) {
            let _ = kill(Pid::from_raw(self.0), Signal::SIGTERM);
        }
    }
}

async fn hostalias(dir: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_hostalias"))
        .current_dir(dir)
        .arg("--config")
        .arg(dir.join("hostalias.toml"))
        .args(args)
        .env_remove("HOSTALIAS_CONFIG")
        .env_remove("RUST_LOG")
        .output()
        .await
        .unwrap()
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

/// The PID in "started (pid N)" or "running (pid N)".
fn pid_in(text: &str) -> Option<i32> {
    text.split("(pid ").nth(1)?.split(')').next()?.parse().ok()
}

#[tokio::test(flavor = "multi_thread")]
async fn test_start_status_reload_stop() {
    start_mock_backend("127.0.0.1:38901".parse().unwrap(), "daemon-a").await;
    start_mock_backend("127.0.0.1:38902".parse().unwrap(), "daemon-b").await;

    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(dir.path(), 38919, 38980, &[("api.local", ":38901")]);
    let config_path = dir.path().join("hostalias.toml");
    save_config(&config_path, &config).unwrap();
    let pid_path = dir.path().join(PID_FILE_NAME);

    let status = hostalias(dir.path(), &["status"]).await;
    assert!(stdout(&status).contains("not running"), "{}", stdout(&status));

    let started = hostalias(dir.path(), &["start"]).await;
    assert!(started.status.success(), "start failed: {}", stderr(&started));
    let pid = pid_in(&stdout(&started)).expect("start printed no pid");
    let _reap = Reap(pid);

    assert_eq!(std::fs::read_to_string(&pid_path).unwrap().trim(), pid.to_string());
    assert_eq!(pid_in(&stdout(&hostalias(dir.path(), &["status"]).await)), Some(pid));
    assert!(std::fs::read_to_string(&config.hosts.path).unwrap().contains("127.0.0.1 api.local"));
    let (code, body) = get_via_proxy(38980, "api.local", "/").await;
    assert_eq!((code, body.as_str()), (200, "daemon-a"));

    let again = hostalias(dir.path(), &["start"]).await;
    assert!(!again.status.success());
    assert!(stderr(&again).contains("already running"), "{}", stderr(&again));

    config.directives[0].upstream = ":38902".into();
    save_config(&config_path, &config).unwrap();
    let reloaded = hostalias(dir.path(), &["reload"]).await;
    assert!(reloaded.status.success(), "reload failed: {}", stderr(&reloaded));

    assert_eq!(pid_in(&stdout(&hostalias(dir.path(), &["status"]).await)), Some(pid));
    let (code, body) = get_via_proxy(38980, "api.local", "/").await;
    assert_eq!((code, body.as_str()), (200, "daemon-b"));

    let stopped = hostalias(dir.path(), &["stop"]).await;
    assert!(stopped.status.success(), "stop failed: {}", stderr(&stopped));

    let mut absent = false;
    for _ in 0..50 {
        if stdout(&hostalias(dir.path(), &["status"]).await).contains("not running") {
            absent = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    assert!(absent, "daemon still reported after stop");
    assert!(!pid_path.exists());
}
