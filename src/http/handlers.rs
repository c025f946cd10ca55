//! Route handlers.
//!
//! Just enough surface to drive the security pipeline end to end. Nothing
//! here persists data.

use std::collections::BTreeMap;

use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::{Extension, Json};
use serde::Deserialize;
use serde_json::json;

use crate::http::response::ApiError;
use crate::password::{PasswordError, PasswordService};
use crate::security::context::RequestContext;

/// Services shared by handlers.
#[derive(Clone)]
pub struct AppServices {
    pub passwords: PasswordService,
}

pub async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

/// The token the CSRF stage issued for this (safe) request.
pub async fn csrf_token(ctx: Option<Extension<RequestContext>>) -> impl IntoResponse {
    let token = ctx.and_then(|Extension(ctx)| ctx.csrf_token);
    Json(json!({ "csrf_token": token }))
}

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
}

pub async fn register(
    State(services): State<AppServices>,
    Json(request): Json<RegisterRequest>,
) -> Result<Response, ApiError> {
    if request.email.trim().is_empty() {
        return Err(ApiError::field("email", "is required"));
    }

    match services.passwords.validate(&request.password) {
        Ok(()) => {}
        Err(PasswordError::Policy(violations)) => {
            let reasons = violations
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(", ");
            let mut details = BTreeMap::new();
            details.insert("password".to_string(), reasons);
            return Err(ApiError::Validation {
                message: "password does not meet policy".to_string(),
                details,
            });
        }
        Err(e) => {
            tracing::error!(error = %e, "Password validation failed");
            return Err(ApiError::Internal);
        }
    }

    let strength = services.passwords.strength(&request.password);
    Ok((
        StatusCode::CREATED,
        Json(json!({
            "email": request.email,
            "strength": strength,
        })),
    )
        .into_response())
}

/// No user repository is wired, so every attempt fails.
pub async fn login() -> ApiError {
    ApiError::Unauthorized("invalid credentials".to_string())
}

pub async fn echo(request: Request) -> impl IntoResponse {
    Json(json!({
        "method": request.method().as_str(),
        "path": request.uri().path(),
    }))
}
