//! Control protocol: run, start, stop, status and reload.
//!
//! # Data Flow
//! ```text
//! run     → reconcile → document → ProxyEngine::load → block until stopped
//! start   → status? → reconcile → fork ─▶ child: PID file → run → "ok"
//! stop    → admin address → POST /stop
//! reload  → reconcile → document → admin address → POST /load
//! status  → PID file search
//! ```
//!
//! # Design Decisions
//! - The host table is always reconciled before a document reaches the engine
//! - `stop` and `reload` only talk to the admin API; they never touch the PID file
//! - `start` forks before any runtime exists and waits for the child's report

use std::future;
use std::path::Path;

use tokio::sync::mpsc::UnboundedReceiver;

use crate::admin::AdminClient;
use crate::config::watcher::ConfigWatcher;
use crate::config::Config;
use crate::daemon::{self, DaemonContext, PidFile, Readiness, READINESS_TIMEOUT};
use crate::engine::{LoadOutcome, ProxyEngine};
use crate::error::{Error, Result};
use crate::hosts::{Binding, HostTable};
use crate::lifecycle::signals;
use crate::reconcile::apply_config;

/// Drives one hostalias instance for a given config.
pub struct Controller<H> {
    hosts: H,
    config: Config,
    daemon: DaemonContext,
}

impl<H: HostTable> Controller<H> {
    pub fn new(hosts: H, config: Config, daemon: DaemonContext) -> Self {
        Self { hosts, config, daemon }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn hosts(&self) -> &H {
        &self.hosts
    }

    pub fn daemon(&self) -> &DaemonContext {
        &self.daemon
    }

    /// PID of the running daemon, if any. Never mutates state beyond
    /// removing a stale PID file.
    pub fn status(&self) -> Option<i32> {
        self.daemon.search()
    }

    /// Applies the config's directives to the host table.
    pub fn reconcile(&mut self) -> Result<Vec<Binding>> {
        apply_config(&mut self.hosts, &self.config)
    }

    /// Runs the engine in the foreground until it is stopped.
    pub async fn run(&mut self) -> Result<()> {
        self.serve(Readiness::none(), None).await
    }

    /// Like [`run`](Self::run), re-applying the config file whenever it changes.
    pub async fn run_with_watch(&mut self, path: &Path) -> Result<()> {
        self.serve(Readiness::none(), Some(path)).await
    }

    /// Starts a detached daemon and returns its PID once it is serving.
    ///
    /// Must be called before any tokio runtime or thread is created.
    pub fn start(&mut self) -> Result<i32> {
        if let Some(pid) = self.status() {
            return Err(Error::AlreadyRunning { pid });
        }
        self.reconcile()?;
        // Surface document errors here rather than in the child's log.
        self.document()?;

        let ctx = self.daemon.clone();
        let detached = daemon::fork_detached(&ctx, |readiness| self.daemon_main(readiness))?;
        let pid = detached.pid();
        tracing::info!(pid, "Waiting for daemon to become ready");
        detached.wait_ready(READINESS_TIMEOUT)?;
        tracing::info!(pid, "Daemon started");
        Ok(pid)
    }

    /// Asks the running daemon to stop.
    pub async fn stop(&self) -> Result<()> {
        let client = AdminClient::from_config(&self.config)?;
        client.stop().await?;
        tracing::info!(address = %client.address(), "Stop requested");
        Ok(())
    }

    /// Re-applies the config to the host table and the running daemon,
    /// without restarting it.
    pub async fn reload(&mut self) -> Result<()> {
        self.reconcile()?;
        let document = self.document()?;
        let client = AdminClient::from_config(&self.config)?;
        let response = client.load(document).await?;
        tracing::info!(address = %client.address(), response = %response.trim(), "Config reloaded");
        Ok(())
    }

    /// Body of the forked child. Returns its exit status.
    fn daemon_main(&mut self, readiness: Readiness) -> i32 {
        let _pid_file = match PidFile::acquire(&self.daemon) {
            Ok(pid_file) => pid_file,
            Err(Error::AlreadyRunning { pid }) => {
                readiness.already_running(pid);
                return 1;
            }
            Err(e) => {
                readiness.fail(&e.to_string());
                return 1;
            }
        };

        let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
            Ok(runtime) => runtime,
            Err(e) => {
                readiness.fail(&format!("failed to build runtime: {e}"));
                return 1;
            }
        };

        match runtime.block_on(self.serve(readiness, None)) {
            Ok(()) => 0,
            Err(e) => {
                tracing::error!(error = %e, "Daemon failed");
                1
            }
        }
    }

    async fn serve(&mut self, readiness: Readiness, watch: Option<&Path>) -> Result<()> {
        let engine = match self.boot().await {
            Ok(engine) => {
                readiness.ready();
                engine
            }
            Err(e) => {
                readiness.fail(&e.to_string());
                return Err(e);
            }
        };

        let (_watcher, mut updates) = match watch {
            Some(path) => {
                let (watcher, updates) = ConfigWatcher::new(path);
                (Some(watcher.run()?), Some(updates))
            }
            None => (None, None),
        };

        let stopped = engine.wait();
        tokio::pin!(stopped);
        let terminate = signals::terminate();
        tokio::pin!(terminate);
        let mut signalled = false;

        loop {
            tokio::select! {
                _ = &mut stopped => break,
                _ = &mut terminate, if !signalled => {
                    signalled = true;
                    engine.stop();
                }
                Some(config) = next_update(&mut updates) => self.apply_update(&engine, config).await,
            }
        }
        Ok(())
    }

    async fn boot(&mut self) -> Result<ProxyEngine> {
        let bindings = self.reconcile()?;
        let document = self.document()?;

        let engine = ProxyEngine::new();
        engine.load(&document, false).await?;
        if let Some(admin) = engine.admin_addr().await {
            tracing::info!(admin = %admin, aliases = bindings.len(), "Serving");
        }
        Ok(engine)
    }

    /// Reconciles and loads a config from the watcher, restoring the previous
    /// config on failure.
    async fn apply_update(&mut self, engine: &ProxyEngine, config: Config) {
        if config == self.config {
            tracing::debug!("Config unchanged");
            return;
        }
        let previous = std::mem::replace(&mut self.config, config);

        let result = async {
            self.reconcile()?;
            let document = self.document()?;
            Ok::<_, Error>(engine.load(&document, false).await?)
        }
        .await;

        match result {
            Ok(LoadOutcome::Unchanged) => tracing::debug!("Document unchanged"),
            Ok(outcome) => tracing::info!(outcome = %outcome, directives = self.config.directives.len(), "Config applied"),
            Err(e) => {
                tracing::error!(error = %e, "Failed to apply config change, keeping current configuration");
                self.config = previous;
                if let Err(e) = self.reconcile() {
                    tracing::warn!(error = %e, "Failed to restore host table");
                }
            }
        }
    }

    /// Serialized engine document, logging its warnings.
    fn document(&self) -> Result<Vec<u8>> {
        let (document, warnings) = self.config.engine_document()?;
        for warning in &warnings {
            match &warning.alias {
                Some(alias) => tracing::warn!(alias = %alias, "{}", warning.message),
                None => tracing::warn!("{}", warning.message),
            }
        }
        Ok(document)
    }
}

async fn next_update(updates: &mut Option<UnboundedReceiver<Config>>) -> Option<Config> {
    match updates {
        Some(rx) => rx.recv().await,
        None => future::pending().await,
    }
}
