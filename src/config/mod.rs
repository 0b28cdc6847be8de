//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! hostalias.toml
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks, address.rs for every address)
//!     → Config (validated, rebuilt on every invocation)
//!
//! run --watch:
//!     watcher.rs detects change
//!     → loader.rs loads new config
//!     → validation.rs validates
//!     → control re-reconciles and reloads the engine
//! ```
//!
//! # Design Decisions
//! - Config is never persisted by the daemon; every CLI call reads it fresh
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod address;
pub mod loader;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use address::{parse_address, parse_upstream, Address, AddressError, Upstream};
pub use loader::{load_config, load_or_default, save_config, ConfigError};
pub use schema::{AdminConfig, Config, Directive, HostsConfig, ServerConfig};
