//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Shutdown (shutdown.rs):
//!     admin /stop or signal → trigger → listeners stop accepting → drain → exit
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → engine stop
//! ```
//!
//! # Design Decisions
//! - Ordered startup: hosts reconciled first, then the engine, listeners last
//! - Ordered shutdown: stop accept, drain in-flight requests, release PID file

pub mod shutdown;
pub mod signals;

pub use shutdown::{Shutdown, ShutdownSignal};
