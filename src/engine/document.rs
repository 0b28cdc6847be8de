//! Engine configuration document.
//!
//! The document is the only thing that crosses the admin API: `run` loads it
//! in-process, `reload` POSTs it to `/load`. It is JSON so the admin API can
//! echo it back from `/config`.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::admin::determine_api_address;
use crate::config::address::{parse_upstream, Scheme};
use crate::config::Config;
use crate::error::{Error, Result};

/// Root of the engine document.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct EngineDocument {
    pub admin: AdminDocument,
    pub http: HttpDocument,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct AdminDocument {
    /// Loopback address of the admin API.
    pub listen: String,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct HttpDocument {
    /// Addresses proxied traffic is accepted on.
    pub listen: Vec<String>,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Host routes, in directive order.
    #[serde(default)]
    pub routes: Vec<RouteDocument>,
}

fn default_request_timeout() -> u64 {
    30
}

/// One `Host` → upstream route.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct RouteDocument {
    pub host: String,
    /// Dial address, `host:port`.
    pub upstream: String,
}

/// A non-fatal finding produced while building a document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Warning {
    pub alias: Option<String>,
    pub message: String,
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.alias {
            Some(alias) => write!(f, "{alias}: {}", self.message),
            None => f.write_str(&self.message),
        }
    }
}

impl EngineDocument {
    /// Builds the document for `config`, collecting warnings.
    pub fn from_config(config: &Config) -> Result<(Self, Vec<Warning>)> {
        let admin = determine_api_address(config)?;
        let mut warnings = Vec::new();
        let mut routes = Vec::with_capacity(config.directives.len());

        if config.directives.is_empty() {
            warnings.push(Warning {
                alias: None,
                message: "no directives configured; the proxy will answer 404 to every host".into(),
            });
        }

        for directive in &config.directives {
            let upstream = parse_upstream(&directive.upstream).map_err(|source| Error::InvalidUpstream {
                alias: directive.alias.clone(),
                upstream: directive.upstream.clone(),
                source,
            })?;
            let alias = directive.alias.to_ascii_lowercase();

            if upstream.scheme == Some(Scheme::Https) {
                warnings.push(Warning {
                    alias: Some(alias.clone()),
                    message: format!("upstream {} is dialed over plain HTTP", directive.upstream),
                });
            }
            if upstream.host.eq_ignore_ascii_case(&alias) {
                warnings.push(Warning {
                    alias: Some(alias.clone()),
                    message: "upstream host is the alias itself; requests will loop through the proxy".into(),
                });
            }

            routes.push(RouteDocument {
                host: alias,
                upstream: upstream.dial(),
            });
        }

        let document = Self {
            admin: AdminDocument {
                listen: admin.to_string(),
            },
            http: HttpDocument {
                listen: config.server.listen.clone(),
                request_timeout_secs: config.server.request_timeout_secs,
                routes,
            },
        };
        Ok((document, warnings))
    }

    pub fn from_slice(bytes: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(bytes)
    }

    pub fn to_vec(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec_pretty(self)
    }
}

impl Config {
    /// Serialized engine document plus warnings.
    pub fn engine_document(&self) -> Result<(Vec<u8>, Vec<Warning>)> {
        let (document, warnings) = EngineDocument::from_config(self)?;
        let bytes = document
            .to_vec()
            .map_err(|e| Error::Document(e.to_string()))?;
        Ok((bytes, warnings))
    }
}
