//! Audit logging subsystem.
//!
//! # Data Flow
//! ```text
//! coordinator (after handler)
//!     → capture.rs (request facts, redacted attributes)
//!     → event.rs (classify kind, category, level)
//!     → logger.rs
//!         ├─ tracing line (target "audit")
//!         ├─ shared store mirror (spawned, fire and forget)
//!         └─ file_sink.rs (mutex, rotate, append, fsync)
//! ```
//!
//! # Design Decisions
//! - Events are immutable once built; the public surface is append + query
//! - Audit failures never fail the request
//! - File and store sinks may order events differently; sort by timestamp
//!   when joining them

pub mod capture;
pub mod event;
pub mod file_sink;
pub mod logger;
pub mod redact;

use std::path::PathBuf;

pub use capture::CapturedRequest;
pub use event::{classify, AuditEvent, AuditLevel, EventCategory, EventKind};
pub use file_sink::FileSink;
pub use logger::{AuditLogger, AuditQuery};
pub use redact::{Redactor, REDACTED};

#[derive(Debug, thiserror::Error)]
pub enum AuditError {
    #[error("audit I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("audit event serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("audit file sink is disabled after an earlier failure")]
    SinkDisabled,

    #[error("audit background task failed: {0}")]
    Task(String),
}
