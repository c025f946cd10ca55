//! Audit event model and classification.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::security::context::Principal;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditLevel {
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventCategory {
    Authentication,
    UserManagement,
    Administration,
    Security,
    Performance,
    Request,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventKind {
    AuthLoginSuccess,
    AuthLoginFailed,
    AuthRegisterSuccess,
    AuthRegisterFailed,
    AuthLogout,
    AuthTokenRefresh,
    AuthPasswordReset,
    AuthOther,
    UserCreated,
    UserUpdated,
    UserDeleted,
    AdminAction,
    SecurityUnauthorized,
    SecurityForbidden,
    SecurityRateLimited,
    SecurityServerError,
    PerformanceSlowRequest,
    RequestProcessed,
}

impl EventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::AuthLoginSuccess => "AUTH_LOGIN_SUCCESS",
            EventKind::AuthLoginFailed => "AUTH_LOGIN_FAILED",
            EventKind::AuthRegisterSuccess => "AUTH_REGISTER_SUCCESS",
            EventKind::AuthRegisterFailed => "AUTH_REGISTER_FAILED",
            EventKind::AuthLogout => "AUTH_LOGOUT",
            EventKind::AuthTokenRefresh => "AUTH_TOKEN_REFRESH",
            EventKind::AuthPasswordReset => "AUTH_PASSWORD_RESET",
            EventKind::AuthOther => "AUTH_OTHER",
            EventKind::UserCreated => "USER_CREATED",
            EventKind::UserUpdated => "USER_UPDATED",
            EventKind::UserDeleted => "USER_DELETED",
            EventKind::AdminAction => "ADMIN_ACTION",
            EventKind::SecurityUnauthorized => "SECURITY_UNAUTHORIZED",
            EventKind::SecurityForbidden => "SECURITY_FORBIDDEN",
            EventKind::SecurityRateLimited => "SECURITY_RATE_LIMITED",
            EventKind::SecurityServerError => "SECURITY_SERVER_ERROR",
            EventKind::PerformanceSlowRequest => "PERFORMANCE_SLOW_REQUEST",
            EventKind::RequestProcessed => "REQUEST_PROCESSED",
        }
    }

    pub fn category(self) -> EventCategory {
        match self {
            EventKind::AuthLoginSuccess
            | EventKind::AuthLoginFailed
            | EventKind::AuthRegisterSuccess
            | EventKind::AuthRegisterFailed
            | EventKind::AuthLogout
            | EventKind::AuthTokenRefresh
            | EventKind::AuthPasswordReset
            | EventKind::AuthOther => EventCategory::Authentication,
            EventKind::UserCreated | EventKind::UserUpdated | EventKind::UserDeleted => {
                EventCategory::UserManagement
            }
            EventKind::AdminAction => EventCategory::Administration,
            EventKind::SecurityUnauthorized
            | EventKind::SecurityForbidden
            | EventKind::SecurityRateLimited
            | EventKind::SecurityServerError => EventCategory::Security,
            EventKind::PerformanceSlowRequest => EventCategory::Performance,
            EventKind::RequestProcessed => EventCategory::Request,
        }
    }
}

impl std::str::FromStr for EventKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        serde_json::from_value(Value::String(s.trim().to_ascii_uppercase()))
            .map_err(|_| format!("unknown event kind '{s}'"))
    }
}

/// Derive the event kind for a request. First match wins.
///
/// `path` has the API version prefix already stripped.
pub fn classify(path: &str, method: &str, status: u16, duration: Duration, slow: Duration) -> EventKind {
    let ok = (200..300).contains(&status);
    let under = |prefix: &str| path == prefix || path.starts_with(&format!("{prefix}/"));

    if under("/auth/login") && method == "POST" {
        return if ok {
            EventKind::AuthLoginSuccess
        } else {
            EventKind::AuthLoginFailed
        };
    }
    if under("/auth/register") && method == "POST" {
        return if ok {
            EventKind::AuthRegisterSuccess
        } else {
            EventKind::AuthRegisterFailed
        };
    }
    if under("/auth") {
        return match path.trim_start_matches("/auth/").split('/').next() {
            Some("logout") => EventKind::AuthLogout,
            Some("refresh") => EventKind::AuthTokenRefresh,
            Some("password-reset" | "reset-password" | "forgot-password") => {
                EventKind::AuthPasswordReset
            }
            _ => EventKind::AuthOther,
        };
    }
    if under("/users") {
        match method {
            "POST" => return EventKind::UserCreated,
            "PUT" | "PATCH" => return EventKind::UserUpdated,
            "DELETE" => return EventKind::UserDeleted,
            _ => {}
        }
    }
    if under("/admin") {
        return EventKind::AdminAction;
    }
    match status {
        401 => return EventKind::SecurityUnauthorized,
        403 => return EventKind::SecurityForbidden,
        429 => return EventKind::SecurityRateLimited,
        500..=599 => return EventKind::SecurityServerError,
        _ => {}
    }
    if duration > slow {
        return EventKind::PerformanceSlowRequest;
    }
    EventKind::RequestProcessed
}

/// Level from status and kind.
pub fn level_for(kind: EventKind, status: u16) -> AuditLevel {
    if status >= 500 {
        return AuditLevel::Error;
    }
    match kind {
        EventKind::AuthLoginFailed
        | EventKind::AuthRegisterFailed
        | EventKind::AdminAction
        | EventKind::SecurityUnauthorized
        | EventKind::SecurityForbidden
        | EventKind::SecurityRateLimited
        | EventKind::PerformanceSlowRequest => AuditLevel::Warning,
        _ if status >= 400 => AuditLevel::Warning,
        _ => AuditLevel::Info,
    }
}

/// One immutable audit record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub level: AuditLevel,
    pub kind: EventKind,
    pub category: EventCategory,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub principal: Option<Principal>,
    #[serde(default)]
    pub client_ip: Option<String>,
    #[serde(default)]
    pub user_agent: Option<String>,
    pub method: String,
    pub route: String,
    pub status: u16,
    pub duration_ms: u64,
    pub request_bytes: u64,
    pub response_bytes: u64,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default)]
    pub attributes: Map<String, Value>,
    pub request_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

impl AuditEvent {
    /// New event of `kind` with a fresh id and the current time.
    pub fn new(kind: EventKind) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            level: level_for(kind, 0),
            kind,
            category: kind.category(),
            principal: None,
            client_ip: None,
            user_agent: None,
            method: String::new(),
            route: String::new(),
            status: 0,
            duration_ms: 0,
            request_bytes: 0,
            response_bytes: 0,
            success: true,
            message: None,
            attributes: Map::new(),
            request_id: String::new(),
            session_id: None,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    pub fn with_principal(mut self, principal: Principal) -> Self {
        self.principal = Some(principal);
        self
    }

    pub fn with_level(mut self, level: AuditLevel) -> Self {
        self.level = level;
        self
    }

    pub fn user_id(&self) -> Option<&str> {
        self.principal.as_ref().and_then(|p| p.user_id.as_deref())
    }
}
