//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (windows > 0, limits >= 1, sizes > 0)
//! - Validate cross-field constraints (SameSite=None needs Secure,
//!   password length plus pepper within the hashing input bound)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: GatewayConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::collections::HashSet;
use std::net::{IpAddr, SocketAddr};

use axum::http::Method;

use crate::config::schema::{GatewayConfig, RatePolicyConfig, SameSitePolicy};
use crate::password::MAX_HASH_INPUT_BYTES;

/// A single semantic problem in the configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path of the offending field.
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Validate a parsed configuration, collecting every problem found.
pub fn validate_config(config: &GatewayConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.server.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "server.bind_address",
            format!("'{}' is not a socket address", config.server.bind_address),
        ));
    }
    if config.server.request_timeout_secs == 0 {
        errors.push(ValidationError::new("server.request_timeout_secs", "must be > 0"));
    }

    check_ips(&config.security.trusted_proxies, "security.trusted_proxies", &mut errors);
    let mut key_ids = HashSet::new();
    for (i, key) in config.security.api_keys.iter().enumerate() {
        if key.id.is_empty() || key.key.is_empty() {
            errors.push(ValidationError::new(
                format!("security.api_keys[{i}]"),
                "id and key must be non-empty",
            ));
        }
        if !key_ids.insert(key.id.as_str()) {
            errors.push(ValidationError::new(
                format!("security.api_keys[{i}].id"),
                format!("duplicate credential id '{}'", key.id),
            ));
        }
    }
    if config.security.cors.enabled && config.security.cors.allowed_origins.is_empty() {
        errors.push(ValidationError::new(
            "security.cors.allowed_origins",
            "must list at least one origin when CORS is enabled",
        ));
    }

    let rl = &config.rate_limit;
    check_policy(&rl.default_policy, "rate_limit.default_policy", &mut errors);
    for (i, endpoint) in rl.endpoints.iter().enumerate() {
        let field = format!("rate_limit.endpoints[{i}]");
        check_policy(&endpoint.policy, &field, &mut errors);
        check_endpoint(&endpoint.method, &endpoint.route, &field, &mut errors);
    }
    if rl.penalty_enabled && (rl.penalty_base_secs == 0 || rl.penalty_factor == 0) {
        errors.push(ValidationError::new(
            "rate_limit.penalty_base_secs",
            "penalty base and factor must be > 0 when penalties are enabled",
        ));
    }
    check_ips(&rl.ip_allowlist, "rate_limit.ip_allowlist", &mut errors);
    check_ips(&rl.ip_denylist, "rate_limit.ip_denylist", &mut errors);

    let v = &config.validation;
    for (name, value) in [
        ("max_body_bytes", v.max_body_bytes),
        ("max_url_length", v.max_url_length),
        ("max_header_bytes", v.max_header_bytes),
        ("max_header_count", v.max_header_count),
        ("max_string_length", v.max_string_length),
        ("max_json_depth", v.max_json_depth),
        ("max_upload_bytes", v.max_upload_bytes),
    ] {
        if value == 0 {
            errors.push(ValidationError::new(format!("validation.{name}"), "must be > 0"));
        }
    }
    if v.min_string_length > v.max_string_length {
        errors.push(ValidationError::new(
            "validation.min_string_length",
            "must not exceed max_string_length",
        ));
    }
    for (field, pattern) in &v.field_patterns {
        if let Err(e) = regex::Regex::new(pattern) {
            errors.push(ValidationError::new(
                format!("validation.field_patterns.{field}"),
                format!("invalid regex: {e}"),
            ));
        }
    }
    for (i, required) in v.required_fields.iter().enumerate() {
        check_endpoint(
            &required.method,
            &required.route,
            &format!("validation.required_fields[{i}]"),
            &mut errors,
        );
    }

    let csrf = &config.csrf;
    let env = config.security.environment;
    if csrf.effective_same_site(env) == SameSitePolicy::None && !csrf.effective_secure(env) {
        errors.push(ValidationError::new(
            "csrf.secure",
            "SameSite=None requires the Secure attribute",
        ));
    }
    if csrf.token_bytes < 16 {
        errors.push(ValidationError::new("csrf.token_bytes", "must be at least 16"));
    }
    if csrf.cookie_name.is_empty() || csrf.header_name.is_empty() {
        errors.push(ValidationError::new("csrf.cookie_name", "cookie and header names are required"));
    }
    check_ips(&csrf.trusted_clients, "csrf.trusted_clients", &mut errors);

    let pw = &config.password;
    if pw.min_length == 0 || pw.min_length > pw.max_length {
        errors.push(ValidationError::new(
            "password.min_length",
            "must be between 1 and max_length",
        ));
    }
    if pw.max_length + pw.pepper.len() > MAX_HASH_INPUT_BYTES {
        errors.push(ValidationError::new(
            "password.max_length",
            format!(
                "max_length ({}) plus pepper ({} bytes) exceeds the {MAX_HASH_INPUT_BYTES}-byte hashing bound",
                pw.max_length,
                pw.pepper.len()
            ),
        ));
    }

    let audit = &config.audit;
    if audit.max_file_bytes == 0 {
        errors.push(ValidationError::new("audit.max_file_bytes", "must be > 0"));
    }
    if audit.retention_days == 0 {
        errors.push(ValidationError::new("audit.retention_days", "must be > 0"));
    }
    if audit.file_name.is_empty() || audit.file_name.contains(['/', '\\']) {
        errors.push(ValidationError::new(
            "audit.file_name",
            "must be a plain, non-empty file name",
        ));
    }
    if audit.cleanup_interval_secs == 0 {
        errors.push(ValidationError::new("audit.cleanup_interval_secs", "must be > 0"));
    }

    if config.monitor.window_secs == 0 || config.monitor.alert_threshold == 0 {
        errors.push(ValidationError::new(
            "monitor.window_secs",
            "window and alert threshold must be > 0",
        ));
    }

    if config.shutdown.timeout_secs == 0 {
        errors.push(ValidationError::new("shutdown.timeout_secs", "must be > 0"));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_policy(policy: &RatePolicyConfig, field: &str, errors: &mut Vec<ValidationError>) {
    if policy.requests == 0 {
        errors.push(ValidationError::new(format!("{field}.requests"), "must be >= 1"));
    }
    if policy.window_secs == 0 {
        errors.push(ValidationError::new(format!("{field}.window_secs"), "must be > 0"));
    }
    if !(policy.by_ip || policy.by_user || policy.by_api_key) {
        errors.push(ValidationError::new(
            field.to_string(),
            "at least one of by_ip, by_user, by_api_key must be set",
        ));
    }
}

fn check_endpoint(method: &str, route: &str, field: &str, errors: &mut Vec<ValidationError>) {
    if Method::from_bytes(method.as_bytes()).is_err() {
        errors.push(ValidationError::new(
            format!("{field}.method"),
            format!("'{method}' is not an HTTP method"),
        ));
    }
    if !route.starts_with('/') {
        errors.push(ValidationError::new(
            format!("{field}.route"),
            "must start with '/'",
        ));
    }
}

fn check_ips(list: &[String], field: &str, errors: &mut Vec<ValidationError>) {
    for entry in list {
        if entry.parse::<IpAddr>().is_err() {
            errors.push(ValidationError::new(
                field.to_string(),
                format!("'{entry}' is not an IP address"),
            ));
        }
    }
}
