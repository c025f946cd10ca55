//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the gateway.
//! All types derive Serde traits for deserialization from config files, and
//! every section is defaulted so a minimal (or empty) file is valid.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

/// Root configuration for the ERP gateway.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct GatewayConfig {
    /// Listener and request-phase settings.
    pub server: ServerConfig,

    /// Environment, stage toggles, API credentials, headers and CORS.
    pub security: SecurityConfig,

    /// Rate limiting policies and penalties.
    pub rate_limit: RateLimitConfig,

    /// Input validation bounds and deny patterns.
    pub validation: ValidationConfig,

    /// CSRF double-submit cookie settings.
    pub csrf: CsrfConfig,

    /// Password hashing and policy.
    pub password: PasswordConfig,

    /// Audit log sinks, rotation and retention.
    pub audit: AuditConfig,

    /// Security event monitor.
    pub monitor: MonitorConfig,

    /// Graceful shutdown.
    pub shutdown: ShutdownConfig,

    /// Logging and metrics.
    pub observability: ObservabilityConfig,
}

/// Deployment environment. Drives cookie, HSTS and CSP defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Development,
    #[default]
    Production,
}

impl Environment {
    pub fn is_production(self) -> bool {
        self == Environment::Production
    }
}

impl std::str::FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "development" | "dev" => Ok(Environment::Development),
            "production" | "prod" => Ok(Environment::Production),
            other => Err(format!("unknown environment '{other}'")),
        }
    }
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,

    /// Total time allowed for one request/response in seconds.
    pub request_timeout_secs: u64,

    /// Versioned API prefix stripped before audit classification.
    pub api_prefix: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            request_timeout_secs: 30,
            api_prefix: "/api/v1".to_string(),
        }
    }
}

/// Cross-cutting security settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SecurityConfig {
    pub environment: Environment,

    /// Individual pipeline stages. A disabled stage is skipped and logged at startup.
    pub stages: StageToggles,

    /// Peers allowed to supply `X-Forwarded-For` / `X-Real-IP`.
    pub trusted_proxies: Vec<String>,

    /// API credentials accepted by the API-key stage.
    pub api_keys: Vec<ApiKeyConfig>,

    pub headers: HeadersConfig,

    pub cors: CorsConfig,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            environment: Environment::default(),
            stages: StageToggles::default(),
            trusted_proxies: Vec::new(),
            api_keys: Vec::new(),
            headers: HeadersConfig::default(),
            cors: CorsConfig::default(),
        }
    }
}

/// Pipeline stage switches.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StageToggles {
    pub headers: bool,
    pub validation: bool,
    pub api_keys: bool,
    pub rate_limit: bool,
    pub csrf: bool,
    pub audit: bool,
    pub events: bool,
    /// HTML-sanitize string values of JSON responses.
    pub sanitize_responses: bool,
}

impl Default for StageToggles {
    fn default() -> Self {
        Self {
            headers: true,
            validation: true,
            api_keys: true,
            rate_limit: true,
            csrf: true,
            audit: true,
            events: true,
            sanitize_responses: false,
        }
    }
}

/// A single API credential.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ApiKeyConfig {
    /// Public identifier recorded as the credential id.
    pub id: String,

    /// Secret presented by the client.
    pub key: String,

    /// Roles granted to callers using this key.
    #[serde(default)]
    pub roles: Vec<String>,
}

/// Response security headers.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HeadersConfig {
    /// `Strict-Transport-Security` max-age (production only).
    pub hsts_max_age_secs: u64,

    /// CSP directives, e.g. `default-src = ["'self'"]` (production only).
    pub csp_directives: BTreeMap<String, Vec<String>>,

    /// Entries joined into `Permissions-Policy`.
    pub permissions_policy: Vec<String>,
}

impl Default for HeadersConfig {
    fn default() -> Self {
        let mut csp = BTreeMap::new();
        csp.insert("default-src".to_string(), vec!["'self'".to_string()]);
        csp.insert("frame-ancestors".to_string(), vec!["'none'".to_string()]);
        csp.insert("object-src".to_string(), vec!["'none'".to_string()]);
        csp.insert(
            "img-src".to_string(),
            vec!["'self'".to_string(), "data:".to_string()],
        );
        Self {
            hsts_max_age_secs: 31_536_000,
            csp_directives: csp,
            permissions_policy: vec![
                "camera=()".to_string(),
                "microphone=()".to_string(),
                "geolocation=()".to_string(),
            ],
        }
    }
}

/// Cross-origin request settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CorsConfig {
    pub enabled: bool,

    /// Exact origins or `*.example.com` wildcards.
    pub allowed_origins: Vec<String>,

    pub allowed_methods: Vec<String>,

    pub allowed_headers: Vec<String>,

    pub allow_credentials: bool,

    pub max_age_secs: u64,

    /// Upper bound on memoised origin verdicts.
    pub origin_cache_capacity: usize,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            allowed_origins: Vec::new(),
            allowed_methods: ["GET", "POST", "PUT", "PATCH", "DELETE", "OPTIONS"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            allowed_headers: [
                "Content-Type",
                "Authorization",
                "X-API-Key",
                "X-CSRF-Token",
                "X-Request-ID",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            allow_credentials: true,
            max_age_secs: 600,
            origin_cache_capacity: 1024,
        }
    }
}

/// Rate policy as written in config.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RatePolicyConfig {
    /// Requests allowed per window (>= 1).
    pub requests: u32,

    /// Window length in seconds (> 0).
    pub window_secs: u64,

    pub by_ip: bool,
    pub by_user: bool,
    pub by_api_key: bool,
}

impl Default for RatePolicyConfig {
    fn default() -> Self {
        Self {
            requests: 100,
            window_secs: 60,
            by_ip: true,
            by_user: false,
            by_api_key: false,
        }
    }
}

/// Per-endpoint override. `route` may end in `/*`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EndpointPolicyConfig {
    pub method: String,
    pub route: String,
    #[serde(flatten)]
    pub policy: RatePolicyConfig,
}

impl EndpointPolicyConfig {
    fn by_ip(method: &str, route: &str, requests: u32, window_secs: u64) -> Self {
        Self {
            method: method.to_string(),
            route: route.to_string(),
            policy: RatePolicyConfig {
                requests,
                window_secs,
                ..RatePolicyConfig::default()
            },
        }
    }
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Shared-store key prefix for counters and penalty markers.
    pub key_prefix: String,

    /// Policy applied when no endpoint override matches.
    pub default_policy: RatePolicyConfig,

    pub endpoints: Vec<EndpointPolicyConfig>,

    pub penalty_enabled: bool,
    pub penalty_base_secs: u64,
    pub penalty_factor: u32,

    /// If non-empty, only these addresses are admitted.
    pub ip_allowlist: Vec<String>,

    /// Always rejected, checked before anything else.
    pub ip_denylist: Vec<String>,

    /// Principals holding the `admin` role bypass limits.
    pub exempt_admins: bool,

    /// Upper bound on one store round-trip before failing open.
    pub store_timeout_ms: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            key_prefix: "ratelimit:".to_string(),
            default_policy: RatePolicyConfig::default(),
            endpoints: vec![
                EndpointPolicyConfig::by_ip("POST", "/api/v1/auth/login", 5, 60),
                EndpointPolicyConfig::by_ip("POST", "/api/v1/users/register", 10, 3600),
                EndpointPolicyConfig::by_ip("POST", "/api/v1/auth/*", 20, 60),
            ],
            penalty_enabled: true,
            penalty_base_secs: 60,
            penalty_factor: 2,
            ip_allowlist: Vec::new(),
            ip_denylist: Vec::new(),
            exempt_admins: true,
            store_timeout_ms: 250,
        }
    }
}

/// Required top-level body fields for one endpoint.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RequiredFieldsConfig {
    pub method: String,
    pub route: String,
    pub fields: Vec<String>,
}

/// Input validation configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ValidationConfig {
    /// Reject on content violations instead of logging them.
    pub strict_mode: bool,

    pub max_body_bytes: usize,
    pub max_url_length: usize,
    pub max_header_bytes: usize,
    pub max_header_count: usize,
    pub max_query_params: usize,
    pub max_form_fields: usize,
    pub min_string_length: usize,
    pub max_string_length: usize,
    pub max_json_depth: usize,

    /// Upper bound on the `limit` pagination parameter.
    pub max_page_limit: u64,

    /// Max length per named field, applied anywhere in a JSON body.
    pub field_max_lengths: HashMap<String, usize>,

    /// Full-match regex per named field.
    pub field_patterns: HashMap<String, String>,

    pub required_fields: Vec<RequiredFieldsConfig>,

    /// Media types accepted on requests with a body.
    pub allowed_content_types: Vec<String>,

    /// Lower-case extensions including the dot.
    pub allowed_upload_extensions: Vec<String>,

    pub max_upload_bytes: usize,

    /// Headers whose values are exempt from pattern checks.
    pub unchecked_headers: Vec<String>,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        let mut field_max_lengths = HashMap::new();
        field_max_lengths.insert("email".to_string(), 254);
        field_max_lengths.insert("username".to_string(), 50);
        field_max_lengths.insert("password".to_string(), 128);
        field_max_lengths.insert("name".to_string(), 200);
        field_max_lengths.insert("description".to_string(), 5000);

        let mut field_patterns = HashMap::new();
        field_patterns.insert(
            "email".to_string(),
            r"[A-Za-z0-9._%+\-]+@[A-Za-z0-9.\-]+\.[A-Za-z]{2,}".to_string(),
        );
        field_patterns.insert("username".to_string(), r"[A-Za-z0-9_.\-]{1,50}".to_string());

        Self {
            strict_mode: true,
            max_body_bytes: 10 * 1024 * 1024,
            max_url_length: 2048,
            max_header_bytes: 8192,
            max_header_count: 100,
            max_query_params: 50,
            max_form_fields: 100,
            min_string_length: 0,
            max_string_length: 10_000,
            max_json_depth: 32,
            max_page_limit: 1000,
            field_max_lengths,
            field_patterns,
            required_fields: vec![
                RequiredFieldsConfig {
                    method: "POST".to_string(),
                    route: "/api/v1/users/register".to_string(),
                    fields: vec![
                        "email".to_string(),
                        "password".to_string(),
                        "username".to_string(),
                    ],
                },
                RequiredFieldsConfig {
                    method: "POST".to_string(),
                    route: "/api/v1/auth/login".to_string(),
                    fields: vec!["email".to_string(), "password".to_string()],
                },
            ],
            allowed_content_types: vec![
                "application/json".to_string(),
                "application/x-www-form-urlencoded".to_string(),
                "multipart/form-data".to_string(),
                "text/plain".to_string(),
            ],
            allowed_upload_extensions: [".pdf", ".png", ".jpg", ".jpeg", ".csv", ".xlsx", ".txt"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            max_upload_bytes: 5 * 1024 * 1024,
            unchecked_headers: vec!["cookie".to_string(), "authorization".to_string()],
        }
    }
}

/// `SameSite` attribute of the CSRF cookie.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SameSitePolicy {
    Strict,
    Lax,
    None,
}

/// CSRF protection configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CsrfConfig {
    pub cookie_name: String,
    pub header_name: String,
    pub form_field: String,
    pub query_param: String,

    /// Random bytes per token (before base64url encoding).
    pub token_bytes: usize,

    /// `None` derives from the environment (secure in production).
    pub secure: Option<bool>,
    pub http_only: bool,

    /// `None` derives from the environment (Strict in production, Lax otherwise).
    pub same_site: Option<SameSitePolicy>,
    pub path: String,
    pub domain: Option<String>,
    pub max_age_secs: i64,

    /// Paths treated like safe methods. Entries may end in `/*`.
    pub exempt_paths: Vec<String>,

    /// Origins (exact or `*.suffix`) that bypass CSRF checks.
    pub trusted_origins: Vec<String>,

    /// Client addresses that bypass CSRF checks.
    pub trusted_clients: Vec<String>,

    /// Skip CSRF when an API credential was accepted.
    pub bypass_with_api_key: bool,
}

impl Default for CsrfConfig {
    fn default() -> Self {
        Self {
            cookie_name: "_csrf".to_string(),
            header_name: "X-CSRF-Token".to_string(),
            form_field: "_csrf".to_string(),
            query_param: "csrf_token".to_string(),
            token_bytes: 32,
            secure: None,
            http_only: false,
            same_site: None,
            path: "/".to_string(),
            domain: None,
            max_age_secs: 12 * 3600,
            exempt_paths: vec![
                "/health".to_string(),
                "/api/v1/auth/login".to_string(),
                "/api/v1/auth/register".to_string(),
                "/api/v1/users/register".to_string(),
            ],
            trusted_origins: Vec::new(),
            trusted_clients: Vec::new(),
            bypass_with_api_key: true,
        }
    }
}

impl CsrfConfig {
    /// `Secure` attribute after applying the environment default.
    pub fn effective_secure(&self, env: Environment) -> bool {
        self.secure.unwrap_or(env.is_production())
    }

    /// `SameSite` attribute after applying the environment default.
    pub fn effective_same_site(&self, env: Environment) -> SameSitePolicy {
        self.same_site.unwrap_or(if env.is_production() {
            SameSitePolicy::Strict
        } else {
            SameSitePolicy::Lax
        })
    }
}

/// Password hashing and policy configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PasswordConfig {
    /// bcrypt work factor, clamped to the algorithm's legal range.
    pub cost: u32,

    pub min_length: usize,

    /// Bounded so that `max_length + pepper` fits the hashing input limit.
    pub max_length: usize,

    pub require_uppercase: bool,
    pub require_lowercase: bool,
    pub require_digit: bool,
    pub require_symbol: bool,

    /// Reject common and near-common passwords.
    pub reject_common: bool,

    /// Additional site-specific passwords to reject.
    pub extra_denylist: Vec<String>,

    /// Process-wide pepper. Usually supplied through `ERP_PASSWORD_PEPPER`.
    #[serde(skip_serializing)]
    pub pepper: String,
}

impl Default for PasswordConfig {
    fn default() -> Self {
        Self {
            cost: 12,
            min_length: 8,
            max_length: 48,
            require_uppercase: true,
            require_lowercase: true,
            require_digit: true,
            require_symbol: true,
            reject_common: true,
            extra_denylist: Vec::new(),
            pepper: String::new(),
        }
    }
}

/// Audit logging configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AuditConfig {
    /// Write JSON lines to `directory/file_name`.
    pub file_enabled: bool,
    pub directory: String,
    pub file_name: String,

    /// Rotate once the current file reaches this size.
    pub max_file_bytes: u64,

    /// Rotated files older than this are deleted by cleanup.
    pub retention_days: u64,

    /// Period of the background retention scanner.
    pub cleanup_interval_secs: u64,

    /// Mirror events into the shared store.
    pub store_enabled: bool,
    pub store_prefix: String,

    /// Requests slower than this are classified as slow.
    pub slow_request_ms: u64,

    /// Case-insensitive substrings marking an attribute as sensitive.
    pub sensitive_fields: Vec<String>,

    /// Headers always redacted when captured.
    pub sensitive_headers: Vec<String>,

    /// Request headers copied into event attributes.
    pub capture_headers: Vec<String>,

    /// Capture (redacted) JSON request bodies.
    pub capture_body: bool,
    pub max_captured_body_bytes: usize,

    /// Events kept in memory for queries when no file sink is configured.
    pub memory_capacity: usize,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            file_enabled: true,
            directory: "logs/audit".to_string(),
            file_name: "audit.log".to_string(),
            max_file_bytes: 100 * 1024 * 1024,
            retention_days: 90,
            cleanup_interval_secs: 3600,
            store_enabled: false,
            store_prefix: "audit:".to_string(),
            slow_request_ms: 1000,
            sensitive_fields: [
                "password",
                "secret",
                "token",
                "key",
                "auth",
                "credential",
                "ssn",
                "credit_card",
                "card_number",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            sensitive_headers: [
                "authorization",
                "cookie",
                "set-cookie",
                "x-api-key",
                "x-csrf-token",
                "proxy-authorization",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            capture_headers: [
                "content-type",
                "referer",
                "origin",
                "authorization",
                "x-api-key",
                "x-forwarded-for",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            capture_body: true,
            max_captured_body_bytes: 16 * 1024,
            memory_capacity: 10_000,
        }
    }
}

/// Security event monitor configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Sliding window for per-client event counts.
    pub window_secs: u64,

    /// Events within the window that raise an alert.
    pub alert_threshold: u32,

    /// Interval at which idle client counters are dropped.
    pub prune_interval_secs: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            window_secs: 300,
            alert_threshold: 20,
            prune_interval_secs: 60,
        }
    }
}

/// Graceful shutdown configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ShutdownConfig {
    /// Global deadline for all hooks.
    pub timeout_secs: u64,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self { timeout_secs: 30 }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// JSON log lines instead of the human format.
    pub json_logs: bool,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logs: false,
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_yields_defaults() {
        let config: GatewayConfig = toml::from_str("").unwrap();
        assert_eq!(config.server.bind_address, "0.0.0.0:8080");
        assert_eq!(config.shutdown.timeout_secs, 30);
        assert_eq!(config.csrf.cookie_name, "_csrf");
        assert!(config.security.environment.is_production());
    }

    #[test]
    fn endpoint_policy_flattens() {
        let config: GatewayConfig = toml::from_str(
            r#"
            [[rate_limit.endpoints]]
            method = "GET"
            route = "/api/v1/reports/*"
            requests = 3
            window_secs = 10
            by_user = true
            "#,
        )
        .unwrap();
        let endpoint = &config.rate_limit.endpoints[0];
        assert_eq!(endpoint.route, "/api/v1/reports/*");
        assert_eq!(endpoint.policy.requests, 3);
        assert!(endpoint.policy.by_ip);
        assert!(endpoint.policy.by_user);
    }

    #[test]
    fn environment_parses_aliases() {
        assert_eq!("dev".parse::<Environment>(), Ok(Environment::Development));
        assert_eq!("Production".parse::<Environment>(), Ok(Environment::Production));
        assert!("staging".parse::<Environment>().is_err());
    }
}
