//! Error types for hostalias.
//!
//! Subsystems keep their own error enums (`ConfigError`, `AddressError`,
//! `HostsError`, `EngineError`); this module folds them into the single
//! [`Error`] returned by the control protocol.

use std::net::SocketAddr;

use thiserror::Error;

use crate::config::address::AddressError;
use crate::config::loader::ConfigError;
use crate::engine::EngineError;
use crate::hosts::HostsError;

/// Main error type for the control protocol.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration could not be loaded, parsed or validated.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// A directive's upstream does not follow the address syntax.
    #[error("invalid upstream {upstream:?} for alias {alias}: {source}")]
    InvalidUpstream {
        alias: String,
        upstream: String,
        #[source]
        source: AddressError,
    },

    /// The engine document could not be generated.
    #[error("failed to build engine document: {0}")]
    Document(String),

    #[error("no directive for alias {0}")]
    UnknownAlias(String),

    /// Start was requested while a daemon instance is alive.
    #[error("daemon is already running (pid {pid})")]
    AlreadyRunning { pid: i32 },

    /// Nothing answered on the admin address.
    #[error("daemon not reachable at {address}")]
    NotReachable { address: SocketAddr },

    #[error("could not determine api address: {0}")]
    AdminAddress(String),

    #[error("request to {path} failed: {source}")]
    AdminRequest {
        path: &'static str,
        #[source]
        source: reqwest::Error,
    },

    /// The admin API answered with a non-success status.
    #[error("request to {path} returned {status}: {body}")]
    AdminStatus {
        path: &'static str,
        status: reqwest::StatusCode,
        body: String,
    },

    #[error("daemon process error: {0}")]
    Daemon(#[from] nix::Error),

    /// The detached child reported a failure before becoming ready.
    #[error("daemon failed to start: {0}")]
    DaemonFailed(String),

    /// The child sent no report in time and was sent SIGTERM.
    #[error("timed out waiting for daemon readiness (pid {pid} terminated)")]
    ReadinessTimeout { pid: i32 },

    #[error(transparent)]
    Hosts(#[from] HostsError),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("config watcher failed: {0}")]
    Watch(#[from] notify::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Returns `true` for daemon-state conflicts a caller may treat as benign.
    pub fn is_state_conflict(&self) -> bool {
        matches!(self, Self::AlreadyRunning { .. } | Self::NotReachable { .. })
    }
}

/// Result type alias using [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::AlreadyRunning { pid: 42 };
        assert_eq!(err.to_string(), "daemon is already running (pid 42)");
        assert!(err.is_state_conflict());

        let err = Error::AdminAddress("bad port".into());
        assert!(err.to_string().starts_with("could not determine api address"));
        assert!(!err.is_state_conflict());
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
    }
}
