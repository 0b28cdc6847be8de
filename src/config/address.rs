//! Address syntax shared by the config validator, the reconciler and the engine.
//!
//! # Grammar
//! ```text
//! address = [ scheme "://" ] host [ ":" port ] [ path ]
//! scheme  = "http" | "https"
//! host    = "[" ipv6 "]" | ipv4 | hostname | ""
//! ```
//!
//! # Design Decisions
//! - One parser for every consumer, so an upstream accepted by `set` is
//!   accepted by the engine's document loader as well
//! - Empty host means loopback when dialing
//! - `http` on 443 and `https` on 80 are rejected as contradictory

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use thiserror::Error;

/// Host used when an upstream omits one (`:4000`).
pub const LOOPBACK_HOST: &str = "127.0.0.1";

/// Errors produced while parsing an address.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AddressError {
    #[error("address is empty")]
    Empty,

    #[error("address contains whitespace")]
    Whitespace,

    #[error("unsupported scheme {0:?}")]
    UnsupportedScheme(String),

    #[error("missing port after ':'")]
    MissingPort,

    #[error("invalid port {0:?}")]
    InvalidPort(String),

    #[error("too many colons in {0:?}; IPv6 addresses must be bracketed")]
    TooManyColons(String),

    #[error("unterminated IPv6 literal in {0:?}")]
    UnterminatedBracket(String),

    #[error("invalid IPv6 literal {0:?}")]
    InvalidIpv6(String),

    #[error("invalid character {ch:?} in host {host:?}")]
    InvalidHost { host: String, ch: char },

    #[error("scheme {scheme} conflicts with port {port}")]
    SchemeConflict { scheme: Scheme, port: u16 },

    #[error("upstream must not contain a path (found {0:?})")]
    UnexpectedPath(String),

    #[error("host {0:?} is not an IP address or localhost")]
    NotAnIp(String),
}

/// URL scheme accepted in addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    Http,
    Https,
}

impl Scheme {
    /// Port implied by the scheme when none is given.
    pub fn default_port(self) -> u16 {
        match self {
            Scheme::Http => 80,
            Scheme::Https => 443,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Scheme::Http => "http",
            Scheme::Https => "https",
        }
    }
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A parsed address. Fields are kept as written; defaults are applied by
/// [`Address::into_upstream`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Address {
    pub scheme: Option<Scheme>,
    /// Host without IPv6 brackets; may be empty.
    pub host: String,
    pub port: Option<u16>,
    /// Path including the leading `/`, or empty.
    pub path: String,
}

impl Address {
    /// Converts into a dialable upstream, applying loopback and port defaults.
    pub fn into_upstream(self) -> Result<Upstream, AddressError> {
        if !self.path.is_empty() {
            return Err(AddressError::UnexpectedPath(self.path));
        }
        let port = self
            .port
            .or_else(|| self.scheme.map(Scheme::default_port))
            .unwrap_or(80);
        let host = if self.host.is_empty() {
            LOOPBACK_HOST.to_string()
        } else {
            self.host
        };
        Ok(Upstream {
            scheme: self.scheme,
            host,
            port,
        })
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(scheme) = self.scheme {
            write!(f, "{scheme}://")?;
        }
        if self.host.contains(':') {
            write!(f, "[{}]", self.host)?;
        } else {
            f.write_str(&self.host)?;
        }
        if let Some(port) = self.port {
            write!(f, ":{port}")?;
        }
        f.write_str(&self.path)
    }
}

/// Where proxied traffic for an alias is sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Upstream {
    pub scheme: Option<Scheme>,
    pub host: String,
    pub port: u16,
}

impl Upstream {
    /// `host:port` form used by the engine's client.
    pub fn dial(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    /// Resolves to a socket address without DNS: the host must be an IP
    /// literal or `localhost`.
    pub fn socket_addr(&self) -> Result<SocketAddr, AddressError> {
        let ip = if self.host.eq_ignore_ascii_case("localhost") {
            IpAddr::V4(Ipv4Addr::LOCALHOST)
        } else {
            self.host
                .parse()
                .map_err(|_| AddressError::NotAnIp(self.host.clone()))?
        };
        Ok(SocketAddr::new(ip, self.port))
    }
}

impl fmt::Display for Upstream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.dial())
    }
}

/// Parses an address string.
pub fn parse_address(input: &str) -> Result<Address, AddressError> {
    let input = input.trim();
    if input.is_empty() {
        return Err(AddressError::Empty);
    }
    if input.chars().any(char::is_whitespace) {
        return Err(AddressError::Whitespace);
    }

    let (scheme, rest) = match input.split_once("://") {
        Some((raw, rest)) => {
            let scheme = match raw.to_ascii_lowercase().as_str() {
                "http" => Scheme::Http,
                "https" => Scheme::Https,
                _ => return Err(AddressError::UnsupportedScheme(raw.to_string())),
            };
            (Some(scheme), rest)
        }
        None => (None, input),
    };

    let (authority, path) = match rest.find('/') {
        Some(idx) => rest.split_at(idx),
        None => (rest, ""),
    };

    let (host, port) = split_host_port(authority)?;

    if let (Some(scheme), Some(port)) = (scheme, port) {
        let conflicting = matches!((scheme, port), (Scheme::Http, 443) | (Scheme::Https, 80));
        if conflicting {
            return Err(AddressError::SchemeConflict { scheme, port });
        }
    }

    Ok(Address {
        scheme,
        host,
        port,
        path: path.to_string(),
    })
}

/// Parses an upstream: an address with defaults applied and no path.
pub fn parse_upstream(input: &str) -> Result<Upstream, AddressError> {
    parse_address(input)?.into_upstream()
}

/// Parses a bindable address such as a listener or the admin API.
pub fn parse_socket_addr(input: &str) -> Result<SocketAddr, AddressError> {
    parse_upstream(input)?.socket_addr()
}

fn split_host_port(authority: &str) -> Result<(String, Option<u16>), AddressError> {
    if let Some(rest) = authority.strip_prefix('[') {
        let end = rest
            .find(']')
            .ok_or_else(|| AddressError::UnterminatedBracket(authority.to_string()))?;
        let host = &rest[..end];
        if host.parse::<Ipv6Addr>().is_err() {
            return Err(AddressError::InvalidIpv6(host.to_string()));
        }
        let tail = &rest[end + 1..];
        let port = match tail.strip_prefix(':') {
            Some(port) => Some(parse_port(port)?),
            None if tail.is_empty() => None,
            None => {
                return Err(AddressError::InvalidHost {
                    host: authority.to_string(),
                    ch: tail.chars().next().unwrap_or(']'),
                })
            }
        };
        return Ok((host.to_string(), port));
    }

    let (host, port) = match authority.split_once(':') {
        Some((_, port)) if port.contains(':') => {
            return Err(AddressError::TooManyColons(authority.to_string()))
        }
        Some((host, port)) => (host, Some(parse_port(port)?)),
        None => (authority, None),
    };

    if let Some(ch) = host
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '-' | '.' | '_' | '*')))
    {
        return Err(AddressError::InvalidHost {
            host: host.to_string(),
            ch,
        });
    }

    Ok((host.to_ascii_lowercase(), port))
}

fn parse_port(raw: &str) -> Result<u16, AddressError> {
    if raw.is_empty() {
        return Err(AddressError::MissingPort);
    }
    raw.parse()
        .map_err(|_| AddressError::InvalidPort(raw.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_and_port() {
        let addr = parse_address("127.0.0.1:4000").unwrap();
        assert_eq!(addr.scheme, None);
        assert_eq!(addr.host, "127.0.0.1");
        assert_eq!(addr.port, Some(4000));
        assert_eq!(addr.path, "");
    }

    #[test]
    fn test_scheme_and_defaults() {
        let up = parse_upstream("https://example.com").unwrap();
        assert_eq!(up.scheme, Some(Scheme::Https));
        assert_eq!(up.port, 443);
        assert_eq!(up.dial(), "example.com:443");

        let up = parse_upstream("Localhost").unwrap();
        assert_eq!(up.dial(), "localhost:80");
    }

    #[test]
    fn test_empty_host_dials_loopback() {
        let up = parse_upstream(":3000").unwrap();
        assert_eq!(up.host, LOOPBACK_HOST);
        assert_eq!(up.dial(), "127.0.0.1:3000");
    }

    #[test]
    fn test_ipv6() {
        let up = parse_upstream("[::1]:8080").unwrap();
        assert_eq!(up.host, "::1");
        assert_eq!(up.dial(), "[::1]:8080");

        assert_eq!(
            parse_address("::1:8080"),
            Err(AddressError::TooManyColons("::1:8080".into()))
        );
        assert!(matches!(
            parse_address("[::1"),
            Err(AddressError::UnterminatedBracket(_))
        ));
        assert!(matches!(
            parse_address("[nope]:80"),
            Err(AddressError::InvalidIpv6(_))
        ));
    }

    #[test]
    fn test_rejects_bad_input() {
        assert_eq!(parse_address(""), Err(AddressError::Empty));
        assert_eq!(parse_address("a b:80"), Err(AddressError::Whitespace));
        assert_eq!(parse_address("localhost:"), Err(AddressError::MissingPort));
        assert_eq!(
            parse_address("localhost:http"),
            Err(AddressError::InvalidPort("http".into()))
        );
        assert_eq!(
            parse_address("localhost:70000"),
            Err(AddressError::InvalidPort("70000".into()))
        );
        assert_eq!(
            parse_address("ftp://localhost"),
            Err(AddressError::UnsupportedScheme("ftp".into()))
        );
        assert!(matches!(
            parse_address("exa$mple.com"),
            Err(AddressError::InvalidHost { ch: '$', .. })
        ));
    }

    #[test]
    fn test_scheme_port_conflict() {
        assert!(matches!(
            parse_address("http://localhost:443"),
            Err(AddressError::SchemeConflict { port: 443, .. })
        ));
        assert!(matches!(
            parse_address("https://localhost:80"),
            Err(AddressError::SchemeConflict { port: 80, .. })
        ));
        assert!(parse_address("https://localhost:8443").is_ok());
    }

    #[test]
    fn test_path_rejected_for_upstream() {
        let addr = parse_address("localhost:4000/api").unwrap();
        assert_eq!(addr.path, "/api");
        assert_eq!(
            addr.into_upstream(),
            Err(AddressError::UnexpectedPath("/api".into()))
        );
    }

    #[test]
    fn test_socket_addr() {
        assert_eq!(
            parse_socket_addr("localhost:2019").unwrap(),
            "127.0.0.1:2019".parse().unwrap()
        );
        assert_eq!(
            parse_socket_addr("[::1]:2019").unwrap(),
            "[::1]:2019".parse().unwrap()
        );
        assert_eq!(parse_socket_addr(":0").unwrap().port(), 0);
        assert_eq!(
            parse_socket_addr("example.com:80"),
            Err(AddressError::NotAnIp("example.com".into()))
        );
    }

    #[test]
    fn test_display_round_trips_written_form() {
        for input in ["http://api.local:8080/x", "[::1]:9000", ":3000"] {
            assert_eq!(parse_address(input).unwrap().to_string(), input);
        }
    }
}
