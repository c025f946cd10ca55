//! Configuration loading from disk and the environment.

use std::fs;
use std::path::Path;

use crate::config::schema::{Environment, GatewayConfig};
use crate::config::validation::{validate_config, ValidationError};

/// Error type for configuration loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid environment override {name}: {message}")]
    Env { name: &'static str, message: String },

    #[error("Validation failed: {}", join_errors(.0))]
    Validation(Vec<ValidationError>),
}

fn join_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Environment variable selecting development or production defaults.
pub const ENV_ENVIRONMENT: &str = "ERP_ENVIRONMENT";
/// Environment variable carrying the password pepper.
pub const ENV_PEPPER: &str = "ERP_PASSWORD_PEPPER";
/// Environment variable overriding the bind address.
pub const ENV_BIND_ADDRESS: &str = "ERP_BIND_ADDRESS";
/// Environment variable overriding the audit directory.
pub const ENV_AUDIT_DIR: &str = "ERP_AUDIT_DIR";

/// Load, apply environment overrides to, and validate a TOML file.
pub fn load_config(path: &Path) -> Result<GatewayConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    let mut config: GatewayConfig = toml::from_str(&content)?;

    apply_env_overrides(&mut config, |name| std::env::var(name).ok())?;
    validate_config(&config).map_err(ConfigError::Validation)?;

    Ok(config)
}

/// Defaults plus environment overrides, validated. Used when no file is given.
pub fn load_from_env() -> Result<GatewayConfig, ConfigError> {
    let mut config = GatewayConfig::default();
    apply_env_overrides(&mut config, |name| std::env::var(name).ok())?;
    validate_config(&config).map_err(ConfigError::Validation)?;
    Ok(config)
}

/// Apply `ERP_*` overrides using `lookup` as the variable source.
pub fn apply_env_overrides<F>(config: &mut GatewayConfig, lookup: F) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(value) = lookup(ENV_ENVIRONMENT) {
        config.security.environment =
            value
                .parse::<Environment>()
                .map_err(|message| ConfigError::Env {
                    name: ENV_ENVIRONMENT,
                    message,
                })?;
    }
    if let Some(pepper) = lookup(ENV_PEPPER) {
        config.password.pepper = pepper;
    }
    if let Some(addr) = lookup(ENV_BIND_ADDRESS) {
        config.server.bind_address = addr;
    }
    if let Some(dir) = lookup(ENV_AUDIT_DIR) {
        config.audit.directory = dir;
    }
    Ok(())
}
