//! Fixed-window rate limiting with penalties.
//!
//! # Responsibilities
//! - Select the policy for (method, route)
//! - Count requests per client identifier and window in the shared store
//! - Apply penalty markers and IP allow/deny lists
//! - Emit `X-RateLimit-*` and `Retry-After` headers
//!
//! # Design Decisions
//! - The store's atomic increment is the only source of truth; there is no
//!   in-process lock
//! - Store errors and timeouts fail open
//! - Deny list beats allow list beats admin exemption
//!
//! # Data Flow
//! ```text
//! RateRequest → deny/allow lists → admin exemption
//!     → PolicyTable::lookup → ClientIdentifier
//!     → penalty marker? → incr_with_ttl → RateDecision
//! ```

pub mod limiter;
pub mod policy;

use axum::http::{HeaderMap, HeaderValue};

use crate::http::response::ApiError;

pub use limiter::{RateLimiter, RateRequest};
pub use policy::{ClientIdentifier, EndpointKey, PolicyTable, RatePolicy};

/// Invalid rate limiting configuration.
#[derive(Debug, thiserror::Error)]
pub enum RateLimitConfigError {
    #[error("rate policy '{policy}': {reason}")]
    InvalidPolicy { policy: String, reason: String },

    #[error("penalty duration must be positive")]
    InvalidPenalty,

    #[error("invalid IP address '{0}'")]
    InvalidAddress(String),
}

/// Counter state reported in response headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateStatus {
    pub limit: u32,
    pub remaining: u32,
    /// Absolute epoch seconds at which the window resets.
    pub reset_epoch: u64,
}

/// Outcome of one limiter check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RateDecision {
    Allowed(RateStatus),
    Exceeded { status: RateStatus, retry_after: u64 },
    Penalized { status: RateStatus, retry_after: u64 },
    IpBlocked,
    IpNotAllowed,
    /// Admin principal, limits not applied.
    Exempt,
    /// No identifier source available for the selected policy.
    NotApplicable,
}

impl RateDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(
            self,
            RateDecision::Allowed(_) | RateDecision::Exempt | RateDecision::NotApplicable
        )
    }

    pub fn denial_code(&self) -> Option<&'static str> {
        self.to_error().map(|e| e.code())
    }

    /// Rejection to send, if denied.
    pub fn to_error(&self) -> Option<ApiError> {
        match self {
            RateDecision::Exceeded { .. } => Some(ApiError::RateLimitExceeded),
            RateDecision::Penalized { .. } => Some(ApiError::RateLimitPenalty),
            RateDecision::IpBlocked => Some(ApiError::IpBlocked),
            RateDecision::IpNotAllowed => Some(ApiError::IpNotAllowed),
            RateDecision::Allowed(_) | RateDecision::Exempt | RateDecision::NotApplicable => None,
        }
    }

    /// Write `X-RateLimit-*` headers, plus `Retry-After` on denial.
    pub fn apply_headers(&self, headers: &mut HeaderMap) {
        let (status, retry_after) = match self {
            RateDecision::Allowed(status) => (status, None),
            RateDecision::Exceeded {
                status,
                retry_after,
            }
            | RateDecision::Penalized {
                status,
                retry_after,
            } => (status, Some(*retry_after)),
            _ => return,
        };
        headers.insert("x-ratelimit-limit", HeaderValue::from(status.limit));
        headers.insert("x-ratelimit-remaining", HeaderValue::from(status.remaining));
        headers.insert("x-ratelimit-reset", HeaderValue::from(status.reset_epoch));
        if let Some(secs) = retry_after {
            headers.insert(axum::http::header::RETRY_AFTER, HeaderValue::from(secs));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn denial_headers_include_retry_after() {
        let decision = RateDecision::Exceeded {
            status: RateStatus {
                limit: 5,
                remaining: 0,
                reset_epoch: 1_700_000_160,
            },
            retry_after: 120,
        };
        let mut headers = HeaderMap::new();
        decision.apply_headers(&mut headers);
        assert_eq!(headers["x-ratelimit-limit"], "5");
        assert_eq!(headers["x-ratelimit-remaining"], "0");
        assert_eq!(headers["x-ratelimit-reset"], "1700000160");
        assert_eq!(headers["retry-after"], "120");
        assert_eq!(decision.denial_code(), Some("RATE_LIMIT_EXCEEDED"));
    }

    #[test]
    fn allowed_has_no_retry_after() {
        let mut headers = HeaderMap::new();
        RateDecision::Allowed(RateStatus {
            limit: 100,
            remaining: 99,
            reset_epoch: 1,
        })
        .apply_headers(&mut headers);
        assert!(headers.get("retry-after").is_none());
        assert_eq!(headers["x-ratelimit-remaining"], "99");

        let mut none = HeaderMap::new();
        RateDecision::Exempt.apply_headers(&mut none);
        assert!(none.is_empty());
    }
}
