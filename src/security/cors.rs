//! Origin matching and CORS.
//!
//! # Responsibilities
//! - Decide whether an origin is allowed (exact or `*.suffix` wildcard)
//! - Answer preflight requests and decorate cross-origin responses
//!
//! # Design Decisions
//! - Verdicts are memoised in a bounded, append-only cache; once the cap is
//!   reached new origins are evaluated but no longer cached
//! - The same matcher type serves CORS and CSRF trusted origins

use std::collections::HashSet;

use axum::body::Body;
use axum::http::{header, HeaderMap, HeaderValue, Method, StatusCode};
use axum::response::Response;
use dashmap::DashMap;
use url::Url;

use crate::config::CorsConfig;

/// Exact and wildcard origin allow-list with a memoised verdict cache.
#[derive(Debug)]
pub struct OriginMatcher {
    any: bool,
    exact: HashSet<String>,
    /// Host suffixes including the leading dot, e.g. `.example.com`.
    suffixes: Vec<String>,
    cache: DashMap<String, bool>,
    capacity: usize,
}

impl OriginMatcher {
    pub fn new(patterns: &[String], capacity: usize) -> Self {
        let mut any = false;
        let mut exact = HashSet::new();
        let mut suffixes = Vec::new();
        for pattern in patterns {
            let pattern = pattern.trim().trim_end_matches('/').to_ascii_lowercase();
            if pattern == "*" {
                any = true;
            } else if let Some(suffix) = pattern.strip_prefix("*.") {
                suffixes.push(format!(".{suffix}"));
            } else if !pattern.is_empty() {
                exact.insert(pattern);
            }
        }
        Self {
            any,
            exact,
            suffixes,
            cache: DashMap::new(),
            capacity,
        }
    }

    pub fn is_empty(&self) -> bool {
        !self.any && self.exact.is_empty() && self.suffixes.is_empty()
    }

    pub fn is_allowed(&self, origin: &str) -> bool {
        let origin = origin.trim().trim_end_matches('/').to_ascii_lowercase();
        if let Some(verdict) = self.cache.get(&origin) {
            return *verdict;
        }
        let verdict = self.evaluate(&origin);
        if self.cache.len() < self.capacity {
            self.cache.insert(origin, verdict);
        }
        verdict
    }

    fn evaluate(&self, origin: &str) -> bool {
        if self.any || self.exact.contains(origin) {
            return true;
        }
        let Ok(url) = Url::parse(origin) else {
            return false;
        };
        let Some(host) = url.host_str() else {
            return false;
        };
        self.suffixes.iter().any(|suffix| host.ends_with(suffix.as_str()))
    }

    pub fn cached_len(&self) -> usize {
        self.cache.len()
    }
}

/// Origin of a `Referer` URL (`scheme://host[:port]`).
pub fn referer_origin(referer: &str) -> Option<String> {
    let url = Url::parse(referer).ok()?;
    let origin = url.origin();
    origin.is_tuple().then(|| origin.ascii_serialization())
}

/// Outcome of the CORS check for one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CorsDecision {
    /// No `Origin` header, or CORS disabled.
    NotCors,
    Allowed(HeaderValue),
    Preflight(HeaderValue),
    Rejected,
}

/// CORS policy.
#[derive(Debug)]
pub struct Cors {
    enabled: bool,
    matcher: OriginMatcher,
    allow_methods: HeaderValue,
    allow_headers: HeaderValue,
    allow_credentials: bool,
    max_age: HeaderValue,
}

impl Cors {
    pub fn new(config: &CorsConfig) -> Self {
        let join = |items: &[String]| {
            HeaderValue::from_str(&items.join(", ")).unwrap_or_else(|_| HeaderValue::from_static(""))
        };
        Self {
            enabled: config.enabled,
            matcher: OriginMatcher::new(&config.allowed_origins, config.origin_cache_capacity),
            allow_methods: join(&config.allowed_methods),
            allow_headers: join(&config.allowed_headers),
            allow_credentials: config.allow_credentials,
            max_age: HeaderValue::from(config.max_age_secs),
        }
    }

    pub fn check(&self, method: &Method, headers: &HeaderMap) -> CorsDecision {
        if !self.enabled {
            return CorsDecision::NotCors;
        }
        let Some(origin) = headers.get(header::ORIGIN) else {
            return CorsDecision::NotCors;
        };
        let allowed = origin
            .to_str()
            .map(|o| self.matcher.is_allowed(o))
            .unwrap_or(false);
        if !allowed {
            return CorsDecision::Rejected;
        }
        if method == Method::OPTIONS && headers.contains_key(header::ACCESS_CONTROL_REQUEST_METHOD) {
            CorsDecision::Preflight(origin.clone())
        } else {
            CorsDecision::Allowed(origin.clone())
        }
    }

    /// Headers for an allowed cross-origin response.
    pub fn apply(&self, origin: &HeaderValue, headers: &mut HeaderMap) {
        headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, origin.clone());
        headers.append(header::VARY, HeaderValue::from_static("Origin"));
        if self.allow_credentials {
            headers.insert(
                header::ACCESS_CONTROL_ALLOW_CREDENTIALS,
                HeaderValue::from_static("true"),
            );
        }
    }

    /// `204` answer to an allowed preflight.
    pub fn preflight_response(&self, origin: &HeaderValue) -> Response {
        let mut response = Response::new(Body::empty());
        *response.status_mut() = StatusCode::NO_CONTENT;
        let headers = response.headers_mut();
        self.apply(origin, headers);
        headers.insert(header::ACCESS_CONTROL_ALLOW_METHODS, self.allow_methods.clone());
        headers.insert(header::ACCESS_CONTROL_ALLOW_HEADERS, self.allow_headers.clone());
        headers.insert(header::ACCESS_CONTROL_MAX_AGE, self.max_age.clone());
        response
    }
}
