//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Aliases must be DNS hostnames and unique (case-insensitive)
//! - Upstreams, listen and admin addresses must follow the address syntax
//! - Value ranges (timeouts > 0, at least one listener)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: Config → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::collections::HashSet;
use std::fmt;

use crate::config::address::{parse_socket_addr, parse_upstream, AddressError};
use crate::config::schema::Config;

/// A single semantic problem in a config.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    InvalidAlias { alias: String, reason: &'static str },
    DuplicateAlias(String),
    InvalidUpstream { alias: String, source: AddressError },
    InvalidListen { address: String, source: AddressError },
    NoListeners,
    InvalidAdminAddress { address: String, source: AddressError },
    ZeroTimeout(&'static str),
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationError::InvalidAlias { alias, reason } => {
                write!(f, "alias {alias:?} is not a valid hostname: {reason}")
            }
            ValidationError::DuplicateAlias(alias) => write!(f, "alias {alias:?} is declared more than once"),
            ValidationError::InvalidUpstream { alias, source } => {
                write!(f, "upstream of {alias:?} is invalid: {source}")
            }
            ValidationError::InvalidListen { address, source } => {
                write!(f, "listen address {address:?} is invalid: {source}")
            }
            ValidationError::NoListeners => write!(f, "server.listen must name at least one address"),
            ValidationError::InvalidAdminAddress { address, source } => {
                write!(f, "admin address {address:?} is invalid: {source}")
            }
            ValidationError::ZeroTimeout(field) => write!(f, "{field} must be greater than zero"),
        }
    }
}

impl std::error::Error for ValidationError {}

/// Validates a config, collecting every problem found.
pub fn validate_config(config: &Config) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();
    let mut seen = HashSet::new();

    for directive in &config.directives {
        if let Err(reason) = check_hostname(&directive.alias) {
            errors.push(ValidationError::InvalidAlias {
                alias: directive.alias.clone(),
                reason,
            });
        } else if !seen.insert(directive.alias.to_ascii_lowercase()) {
            errors.push(ValidationError::DuplicateAlias(directive.alias.clone()));
        }

        if let Err(source) = parse_upstream(&directive.upstream) {
            errors.push(ValidationError::InvalidUpstream {
                alias: directive.alias.clone(),
                source,
            });
        }
    }

    if config.server.listen.is_empty() {
        errors.push(ValidationError::NoListeners);
    }
    for address in &config.server.listen {
        if let Err(source) = parse_socket_addr(address) {
            errors.push(ValidationError::InvalidListen {
                address: address.clone(),
                source,
            });
        }
    }

    if let Some(address) = &config.admin.address {
        if let Err(source) = parse_socket_addr(address) {
            errors.push(ValidationError::InvalidAdminAddress {
                address: address.clone(),
                source,
            });
        }
    }

    if config.admin.timeout_secs == 0 {
        errors.push(ValidationError::ZeroTimeout("admin.timeout_secs"));
    }
    if config.server.request_timeout_secs == 0 {
        errors.push(ValidationError::ZeroTimeout("server.request_timeout_secs"));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Checks DNS hostname rules: labels of `[A-Za-z0-9-]`, 1-63 chars,
/// no leading/trailing hyphen, 253 chars total.
pub fn check_hostname(name: &str) -> Result<(), &'static str> {
    if name.is_empty() {
        return Err("empty");
    }
    if name.len() > 253 {
        return Err("longer than 253 characters");
    }
    for label in name.split('.') {
        if label.is_empty() {
            return Err("empty label");
        }
        if label.len() > 63 {
            return Err("label longer than 63 characters");
        }
        if label.starts_with('-') || label.ends_with('-') {
            return Err("label starts or ends with '-'");
        }
        if !label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
            return Err("label contains characters other than letters, digits and '-'");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::Directive;

    #[test]
    fn test_valid_config() {
        let mut config = Config::default();
        config.directives.push(Directive::new("api.local", "127.0.0.1:4000"));
        config.directives.push(Directive::new("web.test", ":3000"));
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_collects_all_errors() {
        let mut config = Config::default();
        config.directives.push(Directive::new("api.local", "127.0.0.1:4000"));
        config.directives.push(Directive::new("API.local", "127.0.0.1:4001"));
        config.directives.push(Directive::new("bad_alias", "localhost:99999"));
        config.server.listen.clear();
        config.admin.timeout_secs = 0;

        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors.len(), 5);
        assert!(errors.contains(&ValidationError::DuplicateAlias("API.local".into())));
        assert!(errors.contains(&ValidationError::NoListeners));
        assert!(errors.contains(&ValidationError::ZeroTimeout("admin.timeout_secs")));
        assert!(errors
            .iter()
            .any(|e| matches!(e, ValidationError::InvalidAlias { alias, .. } if alias == "bad_alias")));
        assert!(errors
            .iter()
            .any(|e| matches!(e, ValidationError::InvalidUpstream { alias, .. } if alias == "bad_alias")));
    }

    #[test]
    fn test_check_hostname() {
        assert!(check_hostname("api.local").is_ok());
        assert!(check_hostname("a-b.c1").is_ok());
        assert!(check_hostname("").is_err());
        assert!(check_hostname("api..local").is_err());
        assert!(check_hostname("-api.local").is_err());
        assert!(check_hostname(&"a".repeat(64)).is_err());
        assert!(check_hostname("*.local").is_err());
    }
}
