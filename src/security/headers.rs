//! Security response headers.
//!
//! # Responsibilities
//! - Emit the fixed hardening headers on every response
//! - Add HSTS and Content-Security-Policy in production
//!
//! # Design Decisions
//! - Header values are rendered once at construction
//! - CSP directives are emitted in sorted order so the value is stable

use axum::http::{header, HeaderMap, HeaderName, HeaderValue};

use crate::config::{Environment, HeadersConfig};

#[derive(Debug, thiserror::Error)]
#[error("invalid value for header {name}: {value:?}")]
pub struct HeaderConfigError {
    pub name: &'static str,
    pub value: String,
}

/// Pre-rendered set of response headers.
#[derive(Debug, Clone)]
pub struct SecurityHeaders {
    headers: Vec<(HeaderName, HeaderValue)>,
}

impl SecurityHeaders {
    pub fn new(config: &HeadersConfig, environment: Environment) -> Result<Self, HeaderConfigError> {
        let mut headers = vec![
            (header::X_CONTENT_TYPE_OPTIONS, HeaderValue::from_static("nosniff")),
            (header::X_FRAME_OPTIONS, HeaderValue::from_static("DENY")),
            (header::X_XSS_PROTECTION, HeaderValue::from_static("1; mode=block")),
            (
                header::REFERRER_POLICY,
                HeaderValue::from_static("strict-origin-when-cross-origin"),
            ),
        ];

        if !config.permissions_policy.is_empty() {
            headers.push((
                HeaderName::from_static("permissions-policy"),
                value("Permissions-Policy", config.permissions_policy.join(", "))?,
            ));
        }

        if environment.is_production() {
            headers.push((
                header::STRICT_TRANSPORT_SECURITY,
                value(
                    "Strict-Transport-Security",
                    format!("max-age={}; includeSubDomains", config.hsts_max_age_secs),
                )?,
            ));
            if let Some(csp) = content_security_policy(config) {
                headers.push((
                    header::CONTENT_SECURITY_POLICY,
                    value("Content-Security-Policy", csp)?,
                ));
            }
        }

        Ok(Self { headers })
    }

    pub fn apply(&self, target: &mut HeaderMap) {
        for (name, value) in &self.headers {
            target.insert(name.clone(), value.clone());
        }
    }
}

fn value(name: &'static str, rendered: String) -> Result<HeaderValue, HeaderConfigError> {
    HeaderValue::from_str(&rendered).map_err(|_| HeaderConfigError {
        name,
        value: rendered,
    })
}

/// `directive src src; directive src` from the configured map.
pub fn content_security_policy(config: &HeadersConfig) -> Option<String> {
    if config.csp_directives.is_empty() {
        return None;
    }
    let rendered = config
        .csp_directives
        .iter()
        .map(|(directive, sources)| {
            if sources.is_empty() {
                directive.clone()
            } else {
                format!("{directive} {}", sources.join(" "))
            }
        })
        .collect::<Vec<_>>()
        .join("; ");
    Some(rendered)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn production_adds_hsts_and_csp() {
        let headers = SecurityHeaders::new(&HeadersConfig::default(), Environment::Production).unwrap();
        let mut map = HeaderMap::new();
        headers.apply(&mut map);
        assert_eq!(map["x-frame-options"], "DENY");
        assert_eq!(
            map["strict-transport-security"],
            "max-age=31536000; includeSubDomains"
        );
        assert_eq!(
            map["content-security-policy"],
            "default-src 'self'; frame-ancestors 'none'; img-src 'self' data:; object-src 'none'"
        );
        assert_eq!(
            map["permissions-policy"],
            "camera=(), microphone=(), geolocation=()"
        );
    }

    #[test]
    fn development_omits_hsts_and_csp() {
        let headers =
            SecurityHeaders::new(&HeadersConfig::default(), Environment::Development).unwrap();
        let mut map = HeaderMap::new();
        headers.apply(&mut map);
        assert_eq!(map["x-content-type-options"], "nosniff");
        assert!(map.get("strict-transport-security").is_none());
        assert!(map.get("content-security-policy").is_none());
    }
}
