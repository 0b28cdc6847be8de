//! Reconciliation of directives into host table bindings.
//!
//! # Responsibilities
//! - Replace every binding hostalias owns with one per directive
//! - Bind aliases to loopback only; the proxy forwards to the upstream
//! - Commit nothing unless every directive's upstream parses
//!
//! # Design Decisions
//! - `clear` first, so stale aliases never survive a reconcile
//! - Callers reconcile before building or loading an engine document

use std::net::{IpAddr, Ipv4Addr};

use crate::config::address::parse_upstream;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::hosts::{Binding, HostTable};

/// Every alias resolves here; the proxy listens on loopback.
pub const LOOPBACK: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

/// Applies `config` to the host table and returns the committed bindings.
pub fn apply_config<H: HostTable + ?Sized>(hosts: &mut H, config: &Config) -> Result<Vec<Binding>> {
    hosts.clear()?;

    let mut bindings = Vec::with_capacity(config.directives.len());
    for directive in &config.directives {
        let upstream = parse_upstream(&directive.upstream).map_err(|source| Error::InvalidUpstream {
            alias: directive.alias.clone(),
            upstream: directive.upstream.clone(),
            source,
        })?;
        hosts.set(LOOPBACK, &directive.alias)?;

        tracing::debug!(alias = %directive.alias, upstream = %upstream, "Staged alias");
        bindings.push(Binding {
            ip: LOOPBACK,
            hostname: directive.alias.to_ascii_lowercase(),
        });
    }

    hosts.apply()?;
    tracing::info!(bindings = bindings.len(), "Host table reconciled");
    Ok(bindings)
}
