//! Configuration file watcher for `run --watch`.
//!
//! The file's directory is watched rather than the file itself, so editors
//! that save by renaming a temporary file over it are still seen. Bursts of
//! events are debounced into a single read. A file that reads empty or does
//! not parse is treated as a write in progress: nothing is sent, and the
//! running config stays in place until the file parses again.

use std::ffi::OsStr;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::event::{AccessKind, AccessMode};
use notify::{Config as NotifyConfig, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::config::loader::{parse_config, ConfigError};
use crate::config::schema::Config;

/// Quiet period after the last event before the file is read.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(250);

/// A watcher that monitors the configuration file for changes.
pub struct ConfigWatcher {
    path: PathBuf,
    debounce: Duration,
    update_tx: mpsc::UnboundedSender<Config>,
}

/// Keeps the watch alive; dropping it stops updates.
pub struct WatchHandle {
    _watcher: RecommendedWatcher,
    task: JoinHandle<()>,
}

impl Drop for WatchHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

impl ConfigWatcher {
    /// Returns the watcher and a receiver for validated configuration updates.
    pub fn new(path: &Path) -> (Self, mpsc::UnboundedReceiver<Config>) {
        let (update_tx, update_rx) = mpsc::unbounded_channel();

        (
            Self {
                path: path.to_path_buf(),
                debounce: DEFAULT_DEBOUNCE,
                update_tx,
            },
            update_rx,
        )
    }

    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    /// Starts watching. Must be called from within a tokio runtime.
    pub fn run(self) -> Result<WatchHandle, notify::Error> {
        let dir = match self.path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let name = self.path.file_name().map(OsStr::to_os_string);

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) if touches(&event, name.as_deref()) => {
                    let _ = event_tx.send(());
                }
                Ok(_) => {}
                Err(e) => tracing::error!(error = ?e, "Watch error"),
            },
            NotifyConfig::default().with_poll_interval(Duration::from_secs(2)),
        )?;
        watcher.watch(&dir, RecursiveMode::NonRecursive)?;

        let task = tokio::spawn(forward(self.path.clone(), self.debounce, event_rx, self.update_tx));

        tracing::info!(path = %self.path.display(), "Config watcher started");
        Ok(WatchHandle {
            _watcher: watcher,
            task,
        })
    }
}

/// Whether `event` may have changed the file called `name`.
fn touches(event: &Event, name: Option<&OsStr>) -> bool {
    let writes = matches!(
        event.kind,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Access(AccessKind::Close(AccessMode::Write))
    );
    writes && event.paths.iter().any(|p| p.file_name() == name)
}

async fn forward(
    path: PathBuf,
    debounce: Duration,
    mut events: mpsc::UnboundedReceiver<()>,
    updates: mpsc::UnboundedSender<Config>,
) {
    while events.recv().await.is_some() {
        // Settle the burst.
        while let Ok(Some(())) = tokio::time::timeout(debounce, events.recv()).await {}

        match read(&path) {
            Ok(Some(config)) => {
                tracing::info!(path = %path.display(), "Config file changed, reloading");
                if updates.send(config).is_err() {
                    break;
                }
            }
            Ok(None) => tracing::debug!(path = %path.display(), "Config file empty or missing, waiting for the write to finish"),
            Err(e) => tracing::warn!(error = %e, "Ignoring config change, keeping current configuration"),
        }
    }
}

/// The file's config, or `None` while it is empty or briefly absent.
fn read(path: &Path) -> Result<Option<Config>, ConfigError> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(ConfigError::Io {
                path: path.display().to_string(),
                source,
            })
        }
    };
    if content.trim().is_empty() {
        return Ok(None);
    }
    parse_config(&content).map(Some)
}
