//! Security coordinator.
//!
//! # Responsibilities
//! - Run the per-request stages in a fixed order with short-circuit semantics
//! - Apply security headers to every response, terminal ones included
//! - Own the lifecycle of background components (audit scanner, event monitor)
//!
//! # Design Decisions
//! - One middleware, stages run sequentially on the request task
//! - A stage returns `Continue` or `Terminate(response)`; after a terminal
//!   response no later stage runs and the handler is not invoked
//! - Disabled stages are skipped silently and reported once at startup
//!
//! # Data Flow
//! ```text
//! (a) headers + CORS → (b) validation → (c) API key → (d) rate limit
//!     → (e) CSRF → (f) audit ⟨handler⟩ → (g) security events
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use axum::body::{Body, Bytes, HttpBody};
use axum::extract::{Request, State};
use axum::http::{header, request::Parts, HeaderMap, HeaderValue};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use chrono::Utc;

use crate::audit::{AuditLogger, CapturedRequest};
use crate::config::{GatewayConfig, StageToggles};
use crate::http::request::request_id;
use crate::http::response::ApiError;
use crate::observability::metrics;
use crate::security::api_key::{ApiKeyAuthenticator, ApiKeyOutcome};
use crate::security::context::{AuthMethod, Principal, RequestContext, TrustedProxies};
use crate::security::cors::{Cors, CorsDecision};
use crate::security::csrf::{CsrfConfigError, CsrfOutcome, CsrfProtector};
use crate::security::events::{SecurityEvent, SecurityEventKind, SecurityEventMonitor};
use crate::security::headers::{HeaderConfigError, SecurityHeaders};
use crate::security::rate_limit::{RateDecision, RateLimitConfigError, RateLimiter, RateRequest};
use crate::security::validation::{
    InputValidator, PatternError, Sanitizer, ValidatorBuildError,
};
use crate::store::SharedStore;

/// Largest JSON response the sanitizer will rewrite.
const MAX_SANITIZED_RESPONSE_BYTES: usize = 16 * 1024 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum CoordinatorBuildError {
    #[error(transparent)]
    Headers(#[from] HeaderConfigError),

    #[error(transparent)]
    Validator(#[from] ValidatorBuildError),

    #[error(transparent)]
    RateLimit(#[from] RateLimitConfigError),

    #[error(transparent)]
    Csrf(#[from] CsrfConfigError),

    #[error(transparent)]
    Sanitizer(#[from] PatternError),
}

/// Outcome of one stage.
enum Stage {
    Continue,
    Terminate(Response),
}

/// Everything decided before the handler that must land on the response.
#[derive(Default)]
struct Decorations {
    cors_origin: Option<HeaderValue>,
    rate: Option<RateDecision>,
    set_cookie: Option<HeaderValue>,
}

/// Components the coordinator composes.
pub struct SecurityComponents {
    pub headers: SecurityHeaders,
    pub cors: Cors,
    pub validator: InputValidator,
    pub api_keys: ApiKeyAuthenticator,
    pub rate_limiter: RateLimiter,
    pub csrf: CsrfProtector,
    pub audit: Arc<AuditLogger>,
    pub events: Arc<SecurityEventMonitor>,
    pub sanitizer: Sanitizer,
    pub trusted_proxies: TrustedProxies,
}

impl SecurityComponents {
    pub fn from_config(
        config: &GatewayConfig,
        store: Arc<dyn SharedStore>,
        audit: Arc<AuditLogger>,
    ) -> Result<Self, CoordinatorBuildError> {
        let security = &config.security;
        Ok(Self {
            headers: SecurityHeaders::new(&security.headers, security.environment)?,
            cors: Cors::new(&security.cors),
            validator: InputValidator::new(&config.validation)?,
            api_keys: ApiKeyAuthenticator::new(&security.api_keys),
            rate_limiter: RateLimiter::new(&config.rate_limit, store)?,
            csrf: CsrfProtector::new(&config.csrf, security.environment)?,
            audit,
            events: SecurityEventMonitor::new(&config.monitor),
            sanitizer: Sanitizer::new()?,
            trusted_proxies: TrustedProxies::new(&security.trusted_proxies),
        })
    }
}

/// Coordinator settings derived from the gateway config.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    pub stages: StageToggles,
    pub api_prefix: String,
    pub max_body_bytes: usize,
}

impl CoordinatorConfig {
    pub fn from_config(config: &GatewayConfig) -> Self {
        Self {
            stages: config.security.stages.clone(),
            api_prefix: config.server.api_prefix.clone(),
            max_body_bytes: config.validation.max_body_bytes,
        }
    }
}

pub struct SecurityCoordinator {
    components: SecurityComponents,
    config: CoordinatorConfig,
    running: AtomicBool,
}

impl SecurityCoordinator {
    pub fn new(components: SecurityComponents, config: CoordinatorConfig) -> Self {
        let stages = &config.stages;
        for (name, enabled) in [
            ("headers", stages.headers),
            ("validation", stages.validation),
            ("api_keys", stages.api_keys),
            ("rate_limit", stages.rate_limit),
            ("csrf", stages.csrf),
            ("audit", stages.audit),
            ("events", stages.events),
        ] {
            if !enabled {
                tracing::warn!(stage = name, "Security stage disabled");
            }
        }
        Self {
            components,
            config,
            running: AtomicBool::new(false),
        }
    }

    pub fn from_config(
        config: &GatewayConfig,
        store: Arc<dyn SharedStore>,
        audit: Arc<AuditLogger>,
    ) -> Result<Self, CoordinatorBuildError> {
        let components = SecurityComponents::from_config(config, store, audit)?;
        Ok(Self::new(components, CoordinatorConfig::from_config(config)))
    }

    pub fn audit(&self) -> &Arc<AuditLogger> {
        &self.components.audit
    }

    pub fn events(&self) -> &Arc<SecurityEventMonitor> {
        &self.components.events
    }

    /// Start background components. Idempotent.
    pub async fn start(&self) {
        if self.running.swap(true, Ordering::AcqRel) {
            return;
        }
        if self.config.stages.audit {
            self.components.audit.start().await;
        }
        if self.config.stages.events {
            self.components.events.start().await;
        }
        tracing::info!("Security coordinator started");
    }

    /// Stop background components. Idempotent.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::AcqRel) {
            return;
        }
        self.components.events.stop().await;
        self.components.audit.stop().await;
        tracing::info!("Security coordinator stopped");
    }

    /// Run the pipeline around `next`.
    pub async fn handle(&self, request: Request, next: Next) -> Response {
        let started = Instant::now();
        let (mut parts, body) = request.into_parts();
        let method = parts.method.to_string();
        let path = parts.uri.path().to_string();

        let request_id = request_id(&parts.headers)
            .map(str::to_string)
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let client_ip = self
            .components
            .trusted_proxies
            .client_ip(&parts.extensions, &parts.headers);
        let mut ctx = RequestContext::new(request_id, client_ip);
        if let Some(principal) = parts.extensions.get::<Principal>() {
            ctx.principal = principal.clone();
        }

        let mut decorations = Decorations::default();
        let response = match self
            .before_handler(&mut parts, body, &mut ctx, &mut decorations)
            .await
        {
            Ok((stage_body, captured)) => {
                parts.extensions.insert(ctx.clone());
                parts.extensions.insert(ctx.principal.clone());
                let request = Request::from_parts(parts, Body::from(stage_body));
                let response = next.run(request).await;
                let response = self.maybe_sanitize(response).await;
                self.after_handler(response, &ctx, captured, &method, &path, started)
                    .await
            }
            Err(terminal) => terminal,
        };

        let response = self.decorate(response, &decorations);
        metrics::record_request(&method, response.status().as_u16(), started);
        response
    }

    /// Stages (a) to (e) and the request half of (f).
    async fn before_handler(
        &self,
        parts: &mut Parts,
        body: Body,
        ctx: &mut RequestContext,
        decorations: &mut Decorations,
    ) -> Result<(Bytes, Option<CapturedRequest>), Response> {
        let stages = &self.config.stages;

        // (a) CORS. Security headers themselves are applied in `decorate`.
        if let Stage::Terminate(response) = self.cors_stage(parts, ctx, decorations) {
            return Err(response);
        }

        let body = match axum::body::to_bytes(body, self.config.max_body_bytes).await {
            Ok(bytes) => bytes,
            Err(_) => {
                let error = ApiError::PayloadTooLarge(format!(
                    "request body exceeds {} bytes",
                    self.config.max_body_bytes
                ));
                return Err(self.reject(parts, ctx, SecurityEventKind::ValidationRejected, error));
            }
        };

        // (b)
        if stages.validation {
            if let Err(error) = self.components.validator.validate_request(parts, &body).await {
                return Err(self.reject(parts, ctx, SecurityEventKind::ValidationRejected, error));
            }
        }

        // (c)
        if stages.api_keys {
            if let Stage::Terminate(response) = self.api_key_stage(parts, ctx) {
                return Err(response);
            }
        }

        // (d)
        if stages.rate_limit {
            if let Stage::Terminate(response) = self.rate_limit_stage(parts, ctx, decorations).await {
                return Err(response);
            }
        }

        // (e)
        let api_key_bypass =
            ctx.api_key_authenticated && self.components.csrf.bypass_with_api_key();
        if stages.csrf && !api_key_bypass {
            if let Stage::Terminate(response) = self.csrf_stage(parts, &body, ctx, decorations) {
                return Err(response);
            }
        }

        // (f) request half
        let captured = stages
            .audit
            .then(|| CapturedRequest::capture(&self.components.audit, parts, &body, ctx));

        Ok((body, captured))
    }

    fn cors_stage(
        &self,
        parts: &Parts,
        ctx: &RequestContext,
        decorations: &mut Decorations,
    ) -> Stage {
        match self.components.cors.check(&parts.method, &parts.headers) {
            CorsDecision::NotCors => Stage::Continue,
            CorsDecision::Allowed(origin) => {
                decorations.cors_origin = Some(origin);
                Stage::Continue
            }
            CorsDecision::Preflight(origin) => {
                Stage::Terminate(self.components.cors.preflight_response(&origin))
            }
            CorsDecision::Rejected => Stage::Terminate(self.reject(
                parts,
                ctx,
                SecurityEventKind::OriginRejected,
                ApiError::OriginNotAllowed,
            )),
        }
    }

    fn api_key_stage(&self, parts: &Parts, ctx: &mut RequestContext) -> Stage {
        match self.components.api_keys.authenticate(&parts.headers) {
            ApiKeyOutcome::Absent => Stage::Continue,
            ApiKeyOutcome::Invalid => Stage::Terminate(self.reject(
                parts,
                ctx,
                SecurityEventKind::InvalidApiKey,
                ApiError::InvalidApiKey,
            )),
            ApiKeyOutcome::Authenticated(credential) => {
                let principal = &mut ctx.principal;
                principal.credential_id = credential.credential_id;
                principal.roles.extend(credential.roles);
                if principal.auth_method == AuthMethod::Anonymous {
                    principal.auth_method = AuthMethod::ApiKey;
                }
                ctx.api_key_authenticated = true;
                Stage::Continue
            }
        }
    }

    async fn rate_limit_stage(
        &self,
        parts: &Parts,
        ctx: &RequestContext,
        decorations: &mut Decorations,
    ) -> Stage {
        let request = RateRequest {
            method: parts.method.as_str(),
            path: parts.uri.path(),
            client_ip: ctx.client_ip,
            principal: &ctx.principal,
        };
        let decision = self.components.rate_limiter.check(&request).await;
        decision.record_metrics();

        match decision.to_error() {
            None => {
                decorations.rate = Some(decision);
                Stage::Continue
            }
            Some(error) => {
                let kind = match decision {
                    RateDecision::IpBlocked | RateDecision::IpNotAllowed => {
                        SecurityEventKind::IpBlocked
                    }
                    _ => SecurityEventKind::RateLimited,
                };
                let mut response = self.reject(parts, ctx, kind, error);
                decision.apply_headers(response.headers_mut());
                Stage::Terminate(response)
            }
        }
    }

    fn csrf_stage(
        &self,
        parts: &Parts,
        body: &Bytes,
        ctx: &mut RequestContext,
        decorations: &mut Decorations,
    ) -> Stage {
        match self.components.csrf.check(parts, body, ctx) {
            CsrfOutcome::Issued(token, cookie) => {
                ctx.csrf_token = Some(token);
                decorations.set_cookie = Some(cookie);
                Stage::Continue
            }
            CsrfOutcome::Verified => Stage::Continue,
            CsrfOutcome::Bypassed(reason) => {
                tracing::debug!(request_id = %ctx.request_id, reason, "CSRF check bypassed");
                Stage::Continue
            }
            CsrfOutcome::Rejected(reason) => {
                metrics::record_csrf_rejected();
                Stage::Terminate(self.reject(
                    parts,
                    ctx,
                    SecurityEventKind::CsrfRejected,
                    ApiError::CsrfValidationFailed(reason.to_string()),
                ))
            }
        }
    }

    /// (f) response half and (g).
    async fn after_handler(
        &self,
        response: Response,
        ctx: &RequestContext,
        captured: Option<CapturedRequest>,
        method: &str,
        path: &str,
        started: Instant,
    ) -> Response {
        let status = response.status().as_u16();

        if let Some(captured) = captured {
            let response_bytes = response_size(&response);
            let event = captured.into_event(
                &ctx.principal,
                status,
                response_bytes,
                started.elapsed(),
                &self.config.api_prefix,
                self.components.audit.slow_threshold(),
            );
            self.components.audit.record(event).await;
        }

        if self.config.stages.events {
            if let Some(kind) = SecurityEventKind::from_status(status) {
                self.components.events.emit(SecurityEvent {
                    kind,
                    at: Utc::now(),
                    client_ip: ctx.client_ip,
                    request_id: ctx.request_id.clone(),
                    method: method.to_string(),
                    path: path.to_string(),
                    status,
                    detail: "handler response".to_string(),
                });
            }
        }
        response
    }

    /// Terminal response for a stage, reported as a security event.
    fn reject(
        &self,
        parts: &Parts,
        ctx: &RequestContext,
        kind: SecurityEventKind,
        error: ApiError,
    ) -> Response {
        if self.config.stages.events {
            self.components.events.emit(SecurityEvent {
                kind,
                at: Utc::now(),
                client_ip: ctx.client_ip,
                request_id: ctx.request_id.clone(),
                method: parts.method.to_string(),
                path: parts.uri.path().to_string(),
                status: error.status().as_u16(),
                detail: error.to_string(),
            });
        }
        error.into_response()
    }

    /// Stage (a) output plus everything earlier stages asked to attach.
    fn decorate(&self, mut response: Response, decorations: &Decorations) -> Response {
        let headers = response.headers_mut();
        if let Some(rate) = &decorations.rate {
            rate.apply_headers(headers);
        }
        if let Some(cookie) = &decorations.set_cookie {
            headers.append(header::SET_COOKIE, cookie.clone());
        }
        if let Some(origin) = &decorations.cors_origin {
            self.components.cors.apply(origin, headers);
        }
        if self.config.stages.headers {
            self.components.headers.apply(headers);
        }
        response
    }

    async fn maybe_sanitize(&self, response: Response) -> Response {
        if !self.config.stages.sanitize_responses || !is_json(response.headers()) {
            return response;
        }
        let (mut parts, body) = response.into_parts();
        let bytes = match axum::body::to_bytes(body, MAX_SANITIZED_RESPONSE_BYTES).await {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::error!(error = %e, "Failed to buffer response for sanitizing");
                return ApiError::Internal.into_response();
            }
        };
        let Ok(mut value) = serde_json::from_slice::<serde_json::Value>(&bytes) else {
            return Response::from_parts(parts, Body::from(bytes));
        };
        self.components.sanitizer.sanitize_json(&mut value);
        match serde_json::to_vec(&value) {
            Ok(rewritten) => {
                parts.headers.remove(header::CONTENT_LENGTH);
                Response::from_parts(parts, Body::from(rewritten))
            }
            Err(_) => Response::from_parts(parts, Body::from(bytes)),
        }
    }
}

fn is_json(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.starts_with("application/json"))
}

fn response_size(response: &Response) -> u64 {
    response
        .headers()
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
        .or_else(|| response.body().size_hint().exact())
        .unwrap_or(0)
}

/// Axum middleware entry point.
pub async fn security_middleware(
    State(coordinator): State<Arc<SecurityCoordinator>>,
    request: Request,
    next: Next,
) -> Response {
    coordinator.handle(request, next).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AuditConfig, Environment};
    use crate::store::MemoryStore;
    use axum::routing::get;
    use axum::Router;
    use tower::ServiceExt;

    fn coordinator(config: &GatewayConfig) -> Arc<SecurityCoordinator> {
        let audit = AuditLogger::new(
            &AuditConfig {
                file_enabled: false,
                ..config.audit.clone()
            },
            None,
        )
        .unwrap();
        Arc::new(
            SecurityCoordinator::from_config(config, Arc::new(MemoryStore::new()), audit).unwrap(),
        )
    }

    fn app(coordinator: Arc<SecurityCoordinator>) -> Router {
        Router::new()
            .route("/api/v1/orders", get(|| async { "orders" }).post(|| async { "created" }))
            .route("/api/v1/boom", get(|| async { axum::http::StatusCode::INTERNAL_SERVER_ERROR }))
            .layer(axum::middleware::from_fn_with_state(coordinator, security_middleware))
    }

    fn request(method: &str, uri: &str) -> axum::http::request::Builder {
        axum::http::Request::builder().method(method).uri(uri)
    }

    #[tokio::test]
    async fn headers_on_success_and_terminal_responses() {
        let app = app(coordinator(&GatewayConfig::default()));

        let ok = app
            .clone()
            .oneshot(request("GET", "/api/v1/orders").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(ok.status(), 200);
        assert_eq!(ok.headers()["x-frame-options"], "DENY");
        assert!(ok.headers().contains_key(header::SET_COOKIE));

        let rejected = app
            .oneshot(request("POST", "/api/v1/orders").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(rejected.status(), 403);
        assert_eq!(rejected.headers()["x-content-type-options"], "nosniff");
        assert!(rejected.headers().contains_key("strict-transport-security"));
    }

    #[tokio::test]
    async fn valid_api_key_skips_csrf_and_invalid_key_is_401() {
        let mut config = GatewayConfig::default();
        config.security.api_keys = vec![crate::config::ApiKeyConfig {
            id: "billing".into(),
            key: "k-billing-0123456789".into(),
            roles: vec![],
        }];
        let app = app(coordinator(&config));

        let ok = app
            .clone()
            .oneshot(
                request("POST", "/api/v1/orders")
                    .header("x-api-key", "k-billing-0123456789")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(ok.status(), 200);

        let bad = app
            .oneshot(
                request("POST", "/api/v1/orders")
                    .header("x-api-key", "nope")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(bad.status(), 401);
        let body = axum::body::to_bytes(bad.into_body(), 1024).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["code"], "INVALID_API_KEY");
    }

    #[tokio::test]
    async fn disabled_stages_are_skipped() {
        let mut config = GatewayConfig::default();
        config.security.environment = Environment::Development;
        config.security.stages.csrf = false;
        config.security.stages.headers = false;
        let app = app(coordinator(&config));
        let response = app
            .oneshot(request("POST", "/api/v1/orders").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), 200);
        assert!(!response.headers().contains_key("x-frame-options"));
    }

    #[tokio::test]
    async fn sanitizes_json_responses_when_enabled() {
        let mut config = GatewayConfig::default();
        config.security.stages.sanitize_responses = true;
        let app = Router::new()
            .route(
                "/api/v1/notes",
                get(|| async { axum::Json(serde_json::json!({"note": "<b>hi</b>"})) }),
            )
            .layer(axum::middleware::from_fn_with_state(
                coordinator(&config),
                security_middleware,
            ));
        let response = app
            .oneshot(request("GET", "/api/v1/notes").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let body = axum::body::to_bytes(response.into_body(), 1024).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["note"], "&lt;b&gt;hi&lt;&#x2F;b&gt;");
    }

    #[tokio::test]
    async fn start_and_stop_are_idempotent() {
        let coordinator = coordinator(&GatewayConfig::default());
        coordinator.start().await;
        coordinator.start().await;
        coordinator.stop().await;
        coordinator.stop().await;
    }

    #[tokio::test]
    async fn server_errors_reach_the_client_unchanged() {
        let app = app(coordinator(&GatewayConfig::default()));
        let response = app
            .oneshot(request("GET", "/api/v1/boom").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), 500);
    }
}
