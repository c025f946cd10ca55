//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Validated config → store → password → audit → coordinator → HTTP server
//!     → register shutdown hooks → start background tasks → serve
//!
//! Shutdown (shutdown.rs):
//!     Signal received → notify waiters (server stops accepting, drains)
//!     → http-server (0) → security-coordinator (10) → audit-logger (20)
//!     → shared-store (30)
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → graceful shutdown
//! ```
//!
//! # Design Decisions
//! - Ordered startup: config first, then core, then listeners
//! - Shutdown has one global deadline (`shutdown.timeout_secs`)

pub mod shutdown;
pub mod signals;
pub mod startup;

pub use shutdown::{
    BoxError, FnHook, HookContext, ShutdownError, ShutdownHook, ShutdownManager, ShutdownSignal,
};
pub use signals::wait_for_signal;
pub use startup::{Application, StartupError};
