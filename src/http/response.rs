//! Error responses shared by every pipeline stage and handler.
//!
//! # Responsibilities
//! - Map each rejection to its HTTP status and stable code
//! - Render the uniform `{"error", "code", "details"?}` body
//!
//! # Design Decisions
//! - One enum for all client-visible failures; stages never build error
//!   bodies by hand
//! - `details` appears only for field-level validation failures

use std::collections::BTreeMap;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};

/// Wire shape of every error response.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorBody {
    pub error: String,
    pub code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<BTreeMap<String, String>>,
}

/// Client-visible failure raised by a pipeline stage or handler.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ApiError {
    #[error("{message}")]
    Validation {
        message: String,
        details: BTreeMap<String, String>,
    },

    #[error("{0}")]
    InvalidQuery(String),

    #[error("{0}")]
    PayloadTooLarge(String),

    #[error("{0}")]
    UriTooLong(String),

    #[error("{0}")]
    HeadersTooLarge(String),

    #[error("{0}")]
    UnsupportedMediaType(String),

    #[error("invalid API key")]
    InvalidApiKey,

    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    CsrfValidationFailed(String),

    #[error("origin not allowed")]
    OriginNotAllowed,

    #[error("rate limit exceeded")]
    RateLimitExceeded,

    #[error("too many requests, client is temporarily blocked")]
    RateLimitPenalty,

    #[error("client address is blocked")]
    IpBlocked,

    #[error("client address is not allowed")]
    IpNotAllowed,

    #[error("internal server error")]
    Internal,
}

impl ApiError {
    /// Single-field validation failure.
    pub fn field(field: impl Into<String>, message: impl Into<String>) -> Self {
        let field = field.into();
        let message = message.into();
        let mut details = BTreeMap::new();
        details.insert(field.clone(), message.clone());
        ApiError::Validation {
            message: format!("{field}: {message}"),
            details,
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Validation { .. } | ApiError::InvalidQuery(_) => StatusCode::BAD_REQUEST,
            ApiError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::UriTooLong(_) => StatusCode::URI_TOO_LONG,
            ApiError::HeadersTooLarge(_) => StatusCode::REQUEST_HEADER_FIELDS_TOO_LARGE,
            ApiError::UnsupportedMediaType(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            ApiError::InvalidApiKey | ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::CsrfValidationFailed(_)
            | ApiError::OriginNotAllowed
            | ApiError::IpBlocked
            | ApiError::IpNotAllowed => StatusCode::FORBIDDEN,
            ApiError::RateLimitExceeded | ApiError::RateLimitPenalty => {
                StatusCode::TOO_MANY_REQUESTS
            }
            ApiError::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ApiError::Validation { .. } => "VALIDATION_ERROR",
            ApiError::InvalidQuery(_) => "INVALID_QUERY_PARAMS",
            ApiError::PayloadTooLarge(_)
            | ApiError::UriTooLong(_)
            | ApiError::HeadersTooLarge(_) => "REQUEST_TOO_LARGE",
            ApiError::UnsupportedMediaType(_) => "UNSUPPORTED_MEDIA_TYPE",
            ApiError::InvalidApiKey => "INVALID_API_KEY",
            ApiError::Unauthorized(_) => "UNAUTHORIZED",
            ApiError::CsrfValidationFailed(_) => "CSRF_VALIDATION_FAILED",
            ApiError::OriginNotAllowed => "ORIGIN_NOT_ALLOWED",
            ApiError::RateLimitExceeded => "RATE_LIMIT_EXCEEDED",
            ApiError::RateLimitPenalty => "RATE_LIMIT_PENALTY",
            ApiError::IpBlocked => "IP_BLOCKED",
            ApiError::IpNotAllowed => "IP_NOT_ALLOWED",
            ApiError::Internal => "INTERNAL_ERROR",
        }
    }

    pub fn body(&self) -> ErrorBody {
        let details = match self {
            ApiError::Validation { details, .. } if !details.is_empty() => Some(details.clone()),
            _ => None,
        };
        ErrorBody {
            error: self.to_string(),
            code: self.code().to_string(),
            details,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status(), Json(self.body())).into_response()
    }
}
