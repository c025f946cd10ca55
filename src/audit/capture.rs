//! Request capture for the audit stage.
//!
//! What is known before the handler runs is captured up front; status,
//! sizes and duration are filled in once the response exists.

use std::time::Duration;

use axum::body::Bytes;
use axum::http::{header, request::Parts};
use serde_json::{Map, Value};

use super::event::{classify, level_for, AuditEvent};
use super::logger::AuditLogger;
use crate::security::context::{Principal, RequestContext};
use crate::security::validation::media_type;

pub const SESSION_HEADER: &str = "x-session-id";

/// Request facts gathered before the handler runs.
#[derive(Debug, Clone)]
pub struct CapturedRequest {
    pub method: String,
    pub path: String,
    pub request_id: String,
    pub client_ip: Option<String>,
    pub user_agent: Option<String>,
    pub session_id: Option<String>,
    pub request_bytes: u64,
    pub attributes: Map<String, Value>,
}

impl CapturedRequest {
    pub fn capture(logger: &AuditLogger, parts: &Parts, body: &Bytes, ctx: &RequestContext) -> Self {
        let config = logger.config();
        let redactor = logger.redactor();
        let header_str = |name: &str| {
            parts
                .headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        };

        let mut attributes = Map::new();
        if let Some(query) = parts.uri.query() {
            attributes.insert("query".into(), Value::Object(redactor.capture_query(query)));
        }
        let headers = redactor.capture_headers(&parts.headers, &config.capture_headers);
        if !headers.is_empty() {
            attributes.insert("headers".into(), Value::Object(headers));
        }
        if config.capture_body
            && !body.is_empty()
            && body.len() <= config.max_captured_body_bytes
            && media_type(&parts.headers).as_deref() == Some("application/json")
        {
            if let Ok(value) = serde_json::from_slice::<Value>(body) {
                attributes.insert("body".into(), redactor.redact(&value));
            }
        }

        Self {
            method: parts.method.to_string(),
            path: parts.uri.path().to_string(),
            request_id: ctx.request_id.clone(),
            client_ip: ctx.client_ip.map(|ip| ip.to_string()),
            user_agent: header_str(header::USER_AGENT.as_str()),
            session_id: header_str(SESSION_HEADER),
            request_bytes: body.len() as u64,
            attributes,
        }
    }

    /// Complete the event once the response is known.
    pub fn into_event(
        self,
        principal: &Principal,
        status: u16,
        response_bytes: u64,
        duration: Duration,
        api_prefix: &str,
        slow: Duration,
    ) -> AuditEvent {
        let route = self
            .path
            .strip_prefix(api_prefix)
            .filter(|rest| rest.is_empty() || rest.starts_with('/'))
            .unwrap_or(&self.path);
        let kind = classify(route, &self.method, status, duration, slow);

        let mut event = AuditEvent::new(kind);
        event.level = level_for(kind, status);
        event.principal = principal.is_authenticated().then(|| principal.clone());
        event.client_ip = self.client_ip;
        event.user_agent = self.user_agent;
        event.method = self.method;
        event.route = self.path;
        event.status = status;
        event.duration_ms = duration.as_millis().min(u64::MAX as u128) as u64;
        event.request_bytes = self.request_bytes;
        event.response_bytes = response_bytes;
        event.success = status < 400;
        event.attributes = self.attributes;
        event.request_id = self.request_id;
        event.session_id = self.session_id;
        event
    }
}
