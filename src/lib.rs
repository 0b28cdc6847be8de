//! hostalias: friendly local domain names for local and remote services.
//!
//! # Architecture Overview
//!
//! ```text
//!   CLI (main.rs)
//!     │
//!     ▼
//!   control::Controller ──▶ reconcile ──▶ hosts::HostTable   (alias → 127.0.0.1)
//!     │        │
//!     │        └──────────▶ config::Config::engine_document
//!     │                              │
//!     ├── run/start ────────▶ engine::ProxyEngine ◀── admin API (/load, /stop, /config)
//!     │                                                   ▲
//!     ├── stop/reload ──────▶ admin::AdminClient ─────────┘
//!     │
//!     └── start/status ─────▶ daemon (PID file, fork + readiness)
//! ```

// Core subsystems
pub mod config;
pub mod engine;
pub mod hosts;
pub mod reconcile;

// Process control
pub mod admin;
pub mod control;
pub mod daemon;

// Cross-cutting concerns
pub mod error;
pub mod lifecycle;

pub use config::Config;
pub use control::Controller;
pub use daemon::DaemonContext;
pub use engine::ProxyEngine;
pub use error::{Error, Result};
pub use hosts::{HostTable, HostsFile};
