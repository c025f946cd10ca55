//! ERP security gateway.
//!
//! # Architecture Overview
//!
//! ```text
//!     Client Request
//!     ──────────────▶ request id → trace → timeout → body limit
//!                         │
//!                         ▼
//!                 ┌───────────────────────────────────────────────┐
//!                 │            SECURITY COORDINATOR                │
//!                 │ (a) headers/CORS → (b) validation → (c) API key│
//!                 │ → (d) rate limit → (e) CSRF → (f) audit        │
//!                 │ → handler → (g) security events                │
//!                 └───────────────────────────────────────────────┘
//!                         │                    │
//!                         ▼                    ▼
//!                  shared store         audit file / store
//!
//!     SIGINT/SIGTERM → shutdown manager → hooks by priority
//! ```
//!
//! Usage: `erp-gateway [config.toml]`. Without a file, defaults plus
//! `ERP_*` environment overrides are used.

use std::path::PathBuf;

use erp_gateway::config::{load_config, load_from_env};
use erp_gateway::lifecycle::Application;
use erp_gateway::observability::{logging, metrics};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = match std::env::args_os().nth(1).map(PathBuf::from) {
        Some(path) => load_config(&path)?,
        None => load_from_env()?,
    };

    logging::init_logging(&config.observability)?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        bind_address = %config.server.bind_address,
        environment = ?config.security.environment,
        request_timeout_secs = config.server.request_timeout_secs,
        "erp-gateway starting"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr)?,
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let app = Application::build(config)?;
    app.run().await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
