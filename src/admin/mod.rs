//! Admin API endpoint resolution and client.
//!
//! The engine serves the admin API (see `engine::admin`); this module is the
//! other side of it: where to find it and how `stop`/`reload` talk to it.

pub mod client;

use std::net::SocketAddr;

use crate::config::address::parse_socket_addr;
use crate::config::schema::{Config, DEFAULT_ADMIN_ADDRESS};
use crate::error::{Error, Result};

pub use client::AdminClient;

/// Resolves the loopback address of the admin API for `config`.
pub fn determine_api_address(config: &Config) -> Result<SocketAddr> {
    let raw = config.admin.address.as_deref().unwrap_or(DEFAULT_ADMIN_ADDRESS);
    let address = parse_socket_addr(raw).map_err(|e| Error::AdminAddress(format!("{raw:?}: {e}")))?;

    if !address.ip().is_loopback() {
        return Err(Error::AdminAddress(format!("{address} is not a loopback address")));
    }
    if address.port() == 0 {
        return Err(Error::AdminAddress(format!("{raw:?} has no usable port")));
    }
    Ok(address)
}
