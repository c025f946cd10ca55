//! Request identification helpers.
//!
//! The id itself is assigned by `tower_http::request_id` before the security
//! pipeline runs; this module only names the header and reads it back.

use axum::http::{HeaderMap, HeaderName};

/// Header carrying the request correlation id.
pub const X_REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");

/// Request id from headers, if one was assigned.
pub fn request_id(headers: &HeaderMap) -> Option<&str> {
    headers.get(&X_REQUEST_ID).and_then(|v| v.to_str().ok())
}

/// Extension trait for reading the request id from anything with headers.
pub trait RequestIdExt {
    fn request_id(&self) -> Option<&str>;
}

impl<B> RequestIdExt for axum::http::Request<B> {
    fn request_id(&self) -> Option<&str> {
        request_id(self.headers())
    }
}

impl RequestIdExt for axum::http::request::Parts {
    fn request_id(&self) -> Option<&str> {
        request_id(&self.headers)
    }
}
