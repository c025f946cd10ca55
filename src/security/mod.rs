//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming request:
//!     → coordinator.rs (single middleware, stages in fixed order)
//!         → headers.rs / cors.rs (response headers, origin policy)
//!         → validation/ (size, shape and pattern checks)
//!         → api_key.rs (optional credential authentication)
//!         → rate_limit/ (fixed-window admission control)
//!         → csrf.rs (double-submit token)
//!         → audit (wraps the handler)
//!         → events.rs (security event monitor)
//!     → Handler
//! ```
//!
//! # Design Decisions
//! - Defense in depth: multiple layers of protection
//! - CSRF and validation fail closed; rate limiting fails open on store faults
//! - No trust in client input, forwarding headers only from trusted proxies

pub mod api_key;
pub mod context;
pub mod coordinator;
pub mod cors;
pub mod csrf;
pub mod events;
pub mod headers;
pub mod rate_limit;
pub mod validation;

pub use context::{AuthMethod, Principal, RequestContext, TrustedProxies};
pub use coordinator::{CoordinatorBuildError, SecurityCoordinator};

/// Match a request path against a route pattern.
///
/// A pattern ending in `/*` matches its prefix and everything below it;
/// any other pattern matches exactly.
pub fn route_matches(pattern: &str, path: &str) -> bool {
    match pattern.strip_suffix("/*") {
        Some(prefix) => {
            path == prefix
                || (path.starts_with(prefix) && path[prefix.len()..].starts_with('/'))
        }
        None => pattern == path,
    }
}

#[cfg(test)]
mod tests {
    use super::route_matches;

    #[test]
    fn wildcard_routes() {
        assert!(route_matches("/api/v1/auth/*", "/api/v1/auth/refresh"));
        assert!(route_matches("/api/v1/auth/*", "/api/v1/auth"));
        assert!(!route_matches("/api/v1/auth/*", "/api/v1/authz"));
        assert!(route_matches("/health", "/health"));
        assert!(!route_matches("/health", "/health/live"));
    }
}
