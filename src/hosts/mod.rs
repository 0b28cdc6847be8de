//! Host table subsystem.
//!
//! # Data Flow
//! ```text
//! reconcile
//!     → HostTable::clear   (stage an empty managed set)
//!     → HostTable::set     (stage alias → 127.0.0.1, once per directive)
//!     → HostTable::apply   (commit; nothing reaches disk before this)
//! ```
//!
//! # Design Decisions
//! - Mutations are staged in memory; only `apply` touches the table
//! - Only the block owned by hostalias is ever rewritten
//! - The trait is the seam tests use to observe reconciliation

pub mod file;

use std::fmt;
use std::net::IpAddr;

use thiserror::Error;

pub use file::HostsFile;

/// Errors returned by host table operations.
#[derive(Debug, Error)]
pub enum HostsError {
    /// Filesystem I/O failed (typically `PermissionDenied` on `/etc/hosts`).
    #[error("hosts file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid hostname {hostname:?}: {reason}")]
    InvalidHostname {
        hostname: String,
        reason: &'static str,
    },

    /// The managed block was opened but never closed; refuse to rewrite.
    #[error("hosts file {path} has an unterminated hostalias block")]
    Malformed { path: String },
}

impl HostsError {
    /// Returns `true` if the underlying I/O error is `PermissionDenied`.
    pub fn is_permission_denied(&self) -> bool {
        matches!(self, Self::Io { source, .. } if source.kind() == std::io::ErrorKind::PermissionDenied)
    }
}

/// A hostname → IP binding owned by hostalias.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Binding {
    pub ip: IpAddr,
    pub hostname: String,
}

impl fmt::Display for Binding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.ip, self.hostname)
    }
}

/// Transactional mutator for the local host table.
///
/// Callers use `clear`, then `set` once per binding, then `apply`.
pub trait HostTable {
    /// Stage removal of every binding owned by this tool.
    fn clear(&mut self) -> Result<(), HostsError>;

    /// Stage a binding of `hostname` to `ip`.
    fn set(&mut self, ip: IpAddr, hostname: &str) -> Result<(), HostsError>;

    /// Commit staged changes.
    fn apply(&mut self) -> Result<(), HostsError>;
}

impl<T: HostTable + ?Sized> HostTable for &mut T {
    fn clear(&mut self) -> Result<(), HostsError> {
        (**self).clear()
    }

    fn set(&mut self, ip: IpAddr, hostname: &str) -> Result<(), HostsError> {
        (**self).set(ip, hostname)
    }

    fn apply(&mut self) -> Result<(), HostsError> {
        (**self).apply()
    }
}
