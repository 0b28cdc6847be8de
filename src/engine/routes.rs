//! Route lookup by `Host`.
//!
//! # Design Decisions
//! - Compiled from an [`EngineDocument`] and immutable afterwards; reloads
//!   swap in a whole new table
//! - O(1) host lookup via HashMap, case-insensitive, port stripped
//! - Explicit no-match; unknown hosts are answered with 404

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Duration;

use crate::config::address::{parse_socket_addr, parse_upstream, Upstream};
use crate::config::validation::check_hostname;
use crate::engine::document::EngineDocument;
use crate::engine::EngineError;

/// A compiled route.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub host: String,
    pub upstream: Upstream,
}

/// Immutable routing snapshot served by the HTTP listeners.
#[derive(Debug)]
pub struct RouteTable {
    routes: HashMap<String, Route>,
    request_timeout: Duration,
}

impl RouteTable {
    /// Table answering 404 to everything, used before the first load.
    pub fn empty() -> Self {
        Self {
            routes: HashMap::new(),
            request_timeout: Duration::from_secs(30),
        }
    }

    /// Validates a document and compiles its routes.
    pub fn compile(document: &EngineDocument) -> Result<Self, EngineError> {
        if document.http.request_timeout_secs == 0 {
            return Err(EngineError::InvalidDocument(
                "http.request_timeout_secs must be greater than zero".into(),
            ));
        }

        let mut routes = HashMap::with_capacity(document.http.routes.len());
        for route in &document.http.routes {
            let host = route.host.to_ascii_lowercase();
            check_hostname(&host).map_err(|reason| EngineError::InvalidRoute {
                host: route.host.clone(),
                reason: reason.to_string(),
            })?;
            let upstream = parse_upstream(&route.upstream).map_err(|e| EngineError::InvalidRoute {
                host: route.host.clone(),
                reason: e.to_string(),
            })?;
            let compiled = Route {
                host: host.clone(),
                upstream,
            };
            if routes.insert(host, compiled).is_some() {
                return Err(EngineError::InvalidRoute {
                    host: route.host.clone(),
                    reason: "host routed more than once".into(),
                });
            }
        }

        Ok(Self {
            routes,
            request_timeout: Duration::from_secs(document.http.request_timeout_secs),
        })
    }

    /// Finds the route for a `Host` header value.
    pub fn get(&self, host: &str) -> Option<&Route> {
        self.routes.get(&normalize_host(host))
    }

    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

/// Resolves every listen address of a document, admin first.
pub(crate) fn listen_addrs(document: &EngineDocument) -> Result<(SocketAddr, Vec<SocketAddr>), EngineError> {
    let resolve = |address: &String| {
        parse_socket_addr(address).map_err(|e| EngineError::InvalidListen {
            address: address.clone(),
            reason: e.to_string(),
        })
    };

    let admin = resolve(&document.admin.listen)?;
    if !admin.ip().is_loopback() {
        return Err(EngineError::AdminNotLoopback(admin));
    }
    if document.http.listen.is_empty() {
        return Err(EngineError::InvalidDocument("http.listen is empty".into()));
    }
    let http = document
        .http
        .listen
        .iter()
        .map(resolve)
        .collect::<Result<Vec<_>, _>>()?;
    Ok((admin, http))
}

/// Lowercases, strips a port and a trailing dot.
fn normalize_host(raw: &str) -> String {
    let host = match raw.strip_prefix('[') {
        Some(rest) => rest.split(']').next().unwrap_or(rest),
        None => raw.split(':').next().unwrap_or(raw),
    };
    host.trim_end_matches('.').to_ascii_lowercase()
}
