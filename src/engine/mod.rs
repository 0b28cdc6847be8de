//! In-process reverse-proxy engine.
//!
//! # Data Flow
//! ```text
//! load(document)
//!     → parse + compile RouteTable          (reject before touching state)
//!     → bind admin + HTTP listeners         (first load only)
//!     → bind new listeners, drain old ones  (listen set changed)
//!     → ArcSwap route table                 (lock-free for request path)
//!
//! request → server::proxy_handler → RouteTable::get(Host) → upstream
//! ```
//!
//! # Design Decisions
//! - Every bind happens before anything is swapped, so a failed load leaves
//!   the previous state serving
//! - The admin listener is fixed for the engine's lifetime
//! - Listener bookkeeping sits behind a tokio Mutex; requests never take it

pub mod admin;
pub mod document;
pub mod routes;
pub mod server;

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;

use arc_swap::ArcSwap;
use axum::body::Body;
use axum::Router;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

pub use document::{EngineDocument, Warning};
pub use routes::{Route, RouteTable};

use crate::lifecycle::Shutdown;
use self::server::ProxyState;

/// Errors returned by [`ProxyEngine::load`].
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid engine document: {0}")]
    Document(#[from] serde_json::Error),

    #[error("invalid engine document: {0}")]
    InvalidDocument(String),

    #[error("invalid route for {host}: {reason}")]
    InvalidRoute { host: String, reason: String },

    #[error("invalid listen address {address:?}: {reason}")]
    InvalidListen { address: String, reason: String },

    #[error("admin address {0} is not a loopback address")]
    AdminNotLoopback(SocketAddr),

    #[error("failed to bind {address}: {source}")]
    Bind {
        address: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("engine is stopped")]
    Stopped,
}

/// What a successful load did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    /// First document; listeners were bound.
    Started,
    /// Routes (and possibly listeners) were replaced.
    Reloaded,
    /// Byte-identical document without force; nothing changed.
    Unchanged,
}

impl LoadOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            LoadOutcome::Started => "started",
            LoadOutcome::Reloaded => "reloaded",
            LoadOutcome::Unchanged => "unchanged",
        }
    }
}

impl fmt::Display for LoadOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A spawned axum server with its own stop switch.
struct ServerHandle {
    /// Address as written in the document.
    requested: SocketAddr,
    /// Address actually bound.
    local: SocketAddr,
    stop: Shutdown,
    task: JoinHandle<()>,
}

impl ServerHandle {
    fn spawn(listener: TcpListener, requested: SocketAddr, router: Router, name: &'static str) -> Result<Self, EngineError> {
        let local = listener.local_addr().map_err(|source| EngineError::Bind {
            address: requested,
            source,
        })?;
        let stop = Shutdown::new();
        let signal = stop.subscribe();

        let task = tokio::spawn(async move {
            tracing::info!(address = %local, server = name, "Listener started");
            let app = router.into_make_service_with_connect_info::<SocketAddr>();
            if let Err(e) = axum::serve(listener, app)
                .with_graceful_shutdown(signal.recv())
                .await
            {
                tracing::error!(address = %local, server = name, error = %e, "Listener failed");
            }
            tracing::info!(address = %local, server = name, "Listener stopped");
        });

        Ok(Self {
            requested,
            local,
            stop,
            task,
        })
    }

    async fn drain(self) {
        self.stop.trigger();
        if let Err(e) = self.task.await {
            tracing::warn!(address = %self.local, error = %e, "Listener task ended abnormally");
        }
    }
}

struct Active {
    bytes: Vec<u8>,
    document: EngineDocument,
    admin: ServerHandle,
    listeners: Vec<ServerHandle>,
}

struct EngineInner {
    routes: Arc<ArcSwap<RouteTable>>,
    active: Mutex<Option<Active>>,
    shutdown: Shutdown,
    client: Client<HttpConnector, Body>,
}

/// Handle to the proxy engine. Cheap to clone.
#[derive(Clone)]
pub struct ProxyEngine {
    inner: Arc<EngineInner>,
}

impl ProxyEngine {
    pub fn new() -> Self {
        let client = Client::builder(TokioExecutor::new()).build(HttpConnector::new());
        Self {
            inner: Arc::new(EngineInner {
                routes: Arc::new(ArcSwap::from_pointee(RouteTable::empty())),
                active: Mutex::new(None),
                shutdown: Shutdown::new(),
                client,
            }),
        }
    }

    /// Loads a serialized [`EngineDocument`].
    pub async fn load(&self, bytes: &[u8], force_reload: bool) -> Result<LoadOutcome, EngineError> {
        if self.inner.shutdown.is_triggered() {
            return Err(EngineError::Stopped);
        }

        let document = EngineDocument::from_slice(bytes)?;
        let table = RouteTable::compile(&document)?;
        let (admin_addr, http_addrs) = routes::listen_addrs(&document)?;

        let mut active = self.inner.active.lock().await;
        if self.inner.shutdown.is_triggered() {
            return Err(EngineError::Stopped);
        }

        let Some(current) = active.as_mut() else {
            let admin_listener = bind(admin_addr).await?;
            let mut bound = Vec::with_capacity(http_addrs.len());
            for addr in &http_addrs {
                bound.push((*addr, bind(*addr).await?));
            }

            let routes = table.len();
            self.inner.routes.store(Arc::new(table));
            let admin = ServerHandle::spawn(admin_listener, admin_addr, admin::setup_admin_router(self.clone()), "admin")?;
            let listeners = self.spawn_listeners(bound)?;

            tracing::info!(admin = %admin.local, listeners = listeners.len(), routes, "Engine started");
            *active = Some(Active {
                bytes: bytes.to_vec(),
                document,
                admin,
                listeners,
            });
            return Ok(LoadOutcome::Started);
        };

        if !force_reload && current.bytes == bytes {
            tracing::debug!("Document unchanged, skipping load");
            return Ok(LoadOutcome::Unchanged);
        }

        if document.admin.listen != current.document.admin.listen {
            tracing::warn!(
                current = %current.admin.local,
                requested = %document.admin.listen,
                "Admin address cannot change while running; keeping current listener"
            );
        }

        let mut drained = Vec::new();
        if document.http.listen != current.document.http.listen {
            // Keep listeners still wanted; bind the rest before touching anything.
            let mut bound = Vec::new();
            for addr in &http_addrs {
                if !current.listeners.iter().any(|h| h.requested == *addr) {
                    bound.push((*addr, bind(*addr).await?));
                }
            }

            let routes = table.len();
            self.inner.routes.store(Arc::new(table));
            let mut listeners = self.spawn_listeners(bound)?;
            for handle in std::mem::take(&mut current.listeners) {
                if http_addrs.contains(&handle.requested) {
                    listeners.push(handle);
                } else {
                    drained.push(handle);
                }
            }
            current.listeners = listeners;
            tracing::info!(listeners = current.listeners.len(), draining = drained.len(), routes, "Listen set changed");
        } else {
            tracing::info!(routes = table.len(), "Routes reloaded");
            self.inner.routes.store(Arc::new(table));
        }

        current.bytes = bytes.to_vec();
        current.document = document;
        drop(active);

        if !drained.is_empty() {
            tokio::spawn(async move {
                for handle in drained {
                    handle.drain().await;
                }
            });
        }
        Ok(LoadOutcome::Reloaded)
    }

    /// Requests a graceful stop of every listener.
    pub fn stop(&self) {
        tracing::info!("Engine stop requested");
        self.inner.shutdown.trigger();
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.shutdown.is_triggered()
    }

    /// Resolves once the engine was stopped and every listener has drained.
    pub async fn wait(&self) {
        self.inner.shutdown.subscribe().recv().await;

        let active = self.inner.active.lock().await.take();
        if let Some(active) = active {
            for handle in active.listeners {
                handle.drain().await;
            }
            active.admin.drain().await;
        }
        tracing::info!("Engine stopped");
    }

    pub async fn admin_addr(&self) -> Option<SocketAddr> {
        self.inner.active.lock().await.as_ref().map(|a| a.admin.local)
    }

    /// Bound addresses of the HTTP listeners.
    pub async fn listen_addrs(&self) -> Vec<SocketAddr> {
        self.inner
            .active
            .lock()
            .await
            .as_ref()
            .map(|a| a.listeners.iter().map(|h| h.local).collect())
            .unwrap_or_default()
    }

    /// The active document exactly as it was loaded.
    pub async fn document(&self) -> Option<Vec<u8>> {
        self.inner.active.lock().await.as_ref().map(|a| a.bytes.clone())
    }

    pub fn routes(&self) -> Arc<RouteTable> {
        self.inner.routes.load_full()
    }

    fn spawn_listeners(&self, bound: Vec<(SocketAddr, TcpListener)>) -> Result<Vec<ServerHandle>, EngineError> {
        let state = ProxyState {
            routes: self.inner.routes.clone(),
            client: self.inner.client.clone(),
        };
        bound
            .into_iter()
            .map(|(addr, listener)| ServerHandle::spawn(listener, addr, server::build_router(state.clone()), "http"))
            .collect()
    }
}

impl Default for ProxyEngine {
    fn default() -> Self {
        Self::new()
    }
}

async fn bind(address: SocketAddr) -> Result<TcpListener, EngineError> {
    TcpListener::bind(address)
        .await
        .map_err(|source| EngineError::Bind { address, source })
}
