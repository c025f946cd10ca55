//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create the Axum Router with the handlers
//! - Wire up the outer layers (request id, tracing, timeout, body limit)
//! - Mount the security coordinator as one middleware
//! - Serve until the shutdown signal fires, then drain
//!
//! # Design Decisions
//! - Layer order, outermost first: request id, propagate id, trace, timeout,
//!   body limit, security coordinator
//! - `router()` is public so tests can drive the full stack in-process

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::DefaultBodyLimit;
use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use tokio::net::TcpListener;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::config::GatewayConfig;
use crate::http::handlers::{self, AppServices};
use crate::lifecycle::shutdown::ShutdownSignal;
use crate::security::coordinator::{security_middleware, SecurityCoordinator};

/// HTTP host for the security pipeline.
pub struct HttpServer {
    router: Router,
}

impl HttpServer {
    pub fn new(
        config: &GatewayConfig,
        coordinator: Arc<SecurityCoordinator>,
        services: AppServices,
    ) -> Self {
        Self {
            router: Self::build_router(config, coordinator, services),
        }
    }

    /// Build the Axum router with all middleware layers.
    #[allow(deprecated)]
    fn build_router(
        config: &GatewayConfig,
        coordinator: Arc<SecurityCoordinator>,
        services: AppServices,
    ) -> Router {
        let prefix = config.server.api_prefix.trim_end_matches('/');
        let api = Router::new()
            .route("/csrf-token", get(handlers::csrf_token))
            .route("/users/register", post(handlers::register))
            .route("/auth/login", post(handlers::login));

        let routes = Router::new().route("/health", get(handlers::health));
        let routes = if prefix.is_empty() {
            routes.merge(api)
        } else {
            routes.nest(prefix, api)
        };

        routes
            .fallback(handlers::echo)
            .with_state(services)
            .layer(middleware::from_fn_with_state(coordinator, security_middleware))
            .layer(DefaultBodyLimit::max(config.validation.max_body_bytes))
            .layer(TimeoutLayer::new(Duration::from_secs(
                config.server.request_timeout_secs,
            )))
            .layer(TraceLayer::new_for_http())
            .layer(PropagateRequestIdLayer::x_request_id())
            .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
    }

    pub fn router(&self) -> Router {
        self.router.clone()
    }

    /// Serve on `listener` until `shutdown` fires, then drain in-flight
    /// requests.
    pub async fn run(self, listener: TcpListener, shutdown: ShutdownSignal) -> std::io::Result<()> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        let app = self
            .router
            .into_make_service_with_connect_info::<SocketAddr>();

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown.wait())
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}
