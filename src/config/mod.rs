//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize, apply ERP_* overrides)
//!     → validation.rs (semantic checks)
//!     → GatewayConfig (validated, immutable)
//!     → each subsystem builds its own runtime view from its section
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; changes require a restart
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks
//! - Secrets (pepper) come from the environment, never serialized back

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, load_from_env, ConfigError};
pub use schema::{
    ApiKeyConfig, AuditConfig, CorsConfig, CsrfConfig, EndpointPolicyConfig, Environment,
    GatewayConfig, HeadersConfig, MonitorConfig, ObservabilityConfig, PasswordConfig,
    RateLimitConfig, RatePolicyConfig, RequiredFieldsConfig, SameSitePolicy, SecurityConfig,
    ServerConfig, ShutdownConfig, StageToggles, ValidationConfig,
};
