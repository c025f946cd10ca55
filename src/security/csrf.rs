//! CSRF protection with stateless double-submit tokens.
//!
//! # Responsibilities
//! - Issue a fresh token cookie on safe methods and exempt paths
//! - Require the cookie token to be echoed (header, form field or query) on
//!   every state-changing request
//! - Bypass trusted origins, trusted client addresses and, optionally,
//!   requests that authenticated with an API credential
//!
//! # Design Decisions
//! - No server-side token state; the cookie is the only copy
//! - Tokens compare in constant time; a length mismatch is decided on length
//!   alone
//! - Any ambiguity (missing cookie, missing echo, bad encoding) rejects

use std::collections::HashSet;
use std::net::IpAddr;

use axum::body::Bytes;
use axum::http::{header, request::Parts, HeaderValue, Method};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use cookie::{Cookie, SameSite};
use rand::rngs::OsRng;
use rand::RngCore;
use subtle::ConstantTimeEq;

use crate::config::{CsrfConfig, Environment, SameSitePolicy};
use crate::security::context::RequestContext;
use crate::security::cors::{referer_origin, OriginMatcher};
use crate::security::route_matches;
use crate::security::validation::media_type;

const MIN_TOKEN_BYTES: usize = 16;
const ORIGIN_CACHE_CAPACITY: usize = 1024;

#[derive(Debug, thiserror::Error)]
pub enum CsrfConfigError {
    #[error("SameSite=None requires the Secure cookie attribute")]
    InsecureSameSiteNone,

    #[error("token_bytes must be at least {MIN_TOKEN_BYTES}, got {0}")]
    TokenTooShort(usize),

    #[error("invalid CSRF header name '{0}'")]
    InvalidHeaderName(String),

    #[error("cookie name must not be empty")]
    EmptyCookieName,
}

/// Result of the CSRF stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CsrfOutcome {
    /// Safe request: a new token and the `Set-Cookie` value carrying it.
    Issued(String, HeaderValue),
    Verified,
    Bypassed(&'static str),
    Rejected(&'static str),
}

#[derive(Debug)]
pub struct CsrfProtector {
    config: CsrfConfig,
    header_name: axum::http::HeaderName,
    secure: bool,
    same_site: SameSite,
    trusted_origins: OriginMatcher,
    trusted_clients: HashSet<IpAddr>,
}

impl CsrfProtector {
    pub fn new(config: &CsrfConfig, environment: Environment) -> Result<Self, CsrfConfigError> {
        let secure = config.effective_secure(environment);
        let same_site = config.effective_same_site(environment);
        if same_site == SameSitePolicy::None && !secure {
            return Err(CsrfConfigError::InsecureSameSiteNone);
        }
        if config.token_bytes < MIN_TOKEN_BYTES {
            return Err(CsrfConfigError::TokenTooShort(config.token_bytes));
        }
        if config.cookie_name.trim().is_empty() {
            return Err(CsrfConfigError::EmptyCookieName);
        }
        let header_name = axum::http::HeaderName::try_from(config.header_name.to_ascii_lowercase())
            .map_err(|_| CsrfConfigError::InvalidHeaderName(config.header_name.clone()))?;

        Ok(Self {
            header_name,
            secure,
            same_site: match same_site {
                SameSitePolicy::Strict => SameSite::Strict,
                SameSitePolicy::Lax => SameSite::Lax,
                SameSitePolicy::None => SameSite::None,
            },
            trusted_origins: OriginMatcher::new(&config.trusted_origins, ORIGIN_CACHE_CAPACITY),
            trusted_clients: config
                .trusted_clients
                .iter()
                .filter_map(|c| c.parse().ok())
                .collect(),
            config: config.clone(),
        })
    }

    pub fn bypass_with_api_key(&self) -> bool {
        self.config.bypass_with_api_key
    }

    pub fn check(&self, parts: &Parts, body: &Bytes, ctx: &RequestContext) -> CsrfOutcome {
        if is_safe(&parts.method) || self.is_exempt(parts.uri.path()) {
            let token = self.generate_token();
            return match self.set_cookie(&token) {
                Some(cookie) => CsrfOutcome::Issued(token, cookie),
                None => CsrfOutcome::Rejected("could not encode CSRF cookie"),
            };
        }

        if ctx.api_key_authenticated && self.config.bypass_with_api_key {
            return CsrfOutcome::Bypassed("api credential");
        }
        if self.from_trusted_origin(parts) {
            return CsrfOutcome::Bypassed("trusted origin");
        }
        if ctx
            .client_ip
            .is_some_and(|ip| self.trusted_clients.contains(&ip))
        {
            return CsrfOutcome::Bypassed("trusted client");
        }

        let Some(cookie_token) = self.cookie_token(parts) else {
            return CsrfOutcome::Rejected("missing CSRF cookie");
        };
        let Some(request_token) = self.request_token(parts, body) else {
            return CsrfOutcome::Rejected("missing CSRF token");
        };
        if tokens_match(&cookie_token, &request_token) {
            CsrfOutcome::Verified
        } else {
            CsrfOutcome::Rejected("CSRF token mismatch")
        }
    }

    pub fn generate_token(&self) -> String {
        let mut bytes = vec![0u8; self.config.token_bytes];
        OsRng.fill_bytes(&mut bytes);
        URL_SAFE_NO_PAD.encode(&bytes)
    }

    fn set_cookie(&self, token: &str) -> Option<HeaderValue> {
        let mut builder = Cookie::build((self.config.cookie_name.clone(), token.to_string()))
            .path(self.config.path.clone())
            .secure(self.secure)
            .http_only(self.config.http_only)
            .same_site(self.same_site)
            .max_age(cookie::time::Duration::seconds(self.config.max_age_secs));
        if let Some(domain) = &self.config.domain {
            builder = builder.domain(domain.clone());
        }
        HeaderValue::from_str(&builder.build().to_string()).ok()
    }

    fn is_exempt(&self, path: &str) -> bool {
        self.config
            .exempt_paths
            .iter()
            .any(|pattern| route_matches(pattern, path))
    }

    fn from_trusted_origin(&self, parts: &Parts) -> bool {
        if self.trusted_origins.is_empty() {
            return false;
        }
        let origin = parts
            .headers
            .get(header::ORIGIN)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .or_else(|| {
                parts
                    .headers
                    .get(header::REFERER)
                    .and_then(|v| v.to_str().ok())
                    .and_then(referer_origin)
            });
        origin.is_some_and(|o| self.trusted_origins.is_allowed(&o))
    }

    fn cookie_token(&self, parts: &Parts) -> Option<String> {
        parts
            .headers
            .get_all(header::COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .flat_map(Cookie::split_parse)
            .filter_map(Result::ok)
            .find(|c| c.name() == self.config.cookie_name)
            .map(|c| c.value().to_string())
            .filter(|v| !v.is_empty())
    }

    /// Header, then form field, then query parameter.
    fn request_token(&self, parts: &Parts, body: &Bytes) -> Option<String> {
        if let Some(token) = parts
            .headers
            .get(&self.header_name)
            .and_then(|v| v.to_str().ok())
        {
            return Some(token.trim().to_string()).filter(|t| !t.is_empty());
        }

        if media_type(&parts.headers).as_deref() == Some("application/x-www-form-urlencoded") {
            let from_form = url::form_urlencoded::parse(body)
                .find(|(k, _)| k == self.config.form_field.as_str())
                .map(|(_, v)| v.into_owned());
            if from_form.is_some() {
                return from_form.filter(|t| !t.is_empty());
            }
        }

        parts.uri.query().and_then(|q| {
            url::form_urlencoded::parse(q.as_bytes())
                .find(|(k, _)| k == self.config.query_param.as_str())
                .map(|(_, v)| v.into_owned())
                .filter(|t| !t.is_empty())
        })
    }
}

pub fn is_safe(method: &Method) -> bool {
    matches!(
        *method,
        Method::GET | Method::HEAD | Method::OPTIONS | Method::TRACE
    )
}

/// Constant-time token comparison.
pub fn tokens_match(a: &str, b: &str) -> bool {
    a.len() == b.len() && bool::from(a.as_bytes().ct_eq(b.as_bytes()))
}
