//! ERP security gateway library.
//!
//! The cross-cutting middleware that sits in front of every ERP API request:
//! rate limiting, input validation, CSRF protection, API keys, audit logging
//! and coordinated shutdown, plus the password service used by handlers.

// Core subsystems
pub mod config;
pub mod http;
pub mod store;

// Services
pub mod audit;
pub mod password;

// Cross-cutting concerns
pub mod lifecycle;
pub mod observability;
pub mod security;

pub use config::GatewayConfig;
pub use http::HttpServer;
pub use lifecycle::{Application, ShutdownManager};
pub use security::SecurityCoordinator;
