//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → logging.rs (structured tracing events)
//!     → metrics.rs (counters and histograms)
//!
//! Consumers:
//!     → Log aggregation (stdout, JSON in production)
//!     → Metrics endpoint (Prometheus scrape, when enabled)
//! ```
//!
//! # Design Decisions
//! - Structured logging (JSON) for machine parsing
//! - Request ID flows through all subsystems via the trace span
//! - Metrics are cheap (atomic increments) and no-ops until a recorder is installed

pub mod logging;
pub mod metrics;

/// Error raised while installing logging or metrics.
#[derive(Debug, thiserror::Error)]
pub enum ObservabilityError {
    #[error("failed to initialize logging: {0}")]
    Logging(String),

    #[error("failed to initialize metrics: {0}")]
    Metrics(String),
}
