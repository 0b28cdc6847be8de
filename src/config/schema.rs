//! Configuration schema definitions.
//!
//! This module defines the configuration file structure. All types derive
//! Serde traits; every section carries defaults so an empty file is valid.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Admin API address used when the config does not name one.
pub const DEFAULT_ADMIN_ADDRESS: &str = "127.0.0.1:2019";

/// Root configuration: what to alias and where the moving parts live.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Admin API settings of the proxy engine.
    pub admin: AdminConfig,

    /// Proxy listener settings.
    pub server: ServerConfig,

    /// Host table location.
    pub hosts: HostsConfig,

    /// Alias directives, in file order.
    #[serde(rename = "directive")]
    pub directives: Vec<Directive>,
}

impl Config {
    /// Looks up a directive by alias (case-insensitive).
    pub fn directive(&self, alias: &str) -> Option<&Directive> {
        self.directives
            .iter()
            .find(|d| d.alias.eq_ignore_ascii_case(alias))
    }

    /// Adds a directive, or replaces the upstream of an existing alias.
    ///
    /// Returns `true` when an existing directive was updated.
    pub fn upsert(&mut self, directive: Directive) -> bool {
        match self
            .directives
            .iter_mut()
            .find(|d| d.alias.eq_ignore_ascii_case(&directive.alias))
        {
            Some(existing) => {
                existing.upstream = directive.upstream;
                true
            }
            None => {
                self.directives.push(directive);
                false
            }
        }
    }

    /// Removes the directive for `alias`. Returns `true` if one was removed.
    pub fn remove(&mut self, alias: &str) -> bool {
        let before = self.directives.len();
        self.directives
            .retain(|d| !d.alias.eq_ignore_ascii_case(alias));
        self.directives.len() != before
    }
}

/// One alias → upstream mapping.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct Directive {
    /// Friendly domain name, e.g. `api.local`.
    pub alias: String,

    /// Address traffic for the alias is proxied to, e.g. `127.0.0.1:4000`.
    pub upstream: String,
}

impl Directive {
    pub fn new(alias: impl Into<String>, upstream: impl Into<String>) -> Self {
        Self {
            alias: alias.into(),
            upstream: upstream.into(),
        }
    }
}

/// Admin API configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct AdminConfig {
    /// Loopback address of the admin API (default `127.0.0.1:2019`).
    pub address: Option<String>,

    /// Timeout for each admin API request in seconds.
    pub timeout_secs: u64,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            address: None,
            timeout_secs: 10,
        }
    }
}

/// Proxy listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    /// Addresses the proxy accepts traffic on.
    pub listen: Vec<String>,

    /// Request timeout (total time for request/response) in seconds.
    pub request_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: vec!["127.0.0.1:80".to_string()],
            request_timeout_secs: 30,
        }
    }
}

/// Host table configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct HostsConfig {
    /// Hosts file holding the managed block.
    pub path: PathBuf,
}

impl Default for HostsConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("/etc/hosts"),
        }
    }
}
