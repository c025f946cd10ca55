//! Startup orchestration.
//!
//! # Responsibilities
//! - Build every subsystem from a validated configuration, in dependency
//!   order: store, password service, audit logger, coordinator, HTTP server
//! - Register the shutdown hooks that tear them down again
//! - Start background tasks, serve, and run shutdown when told to stop
//!
//! # Design Decisions
//! - Fail fast: any construction error is fatal
//! - Listeners start last (traffic only when ready)
//! - Hook priorities mirror construction order in reverse: stop accepting
//!   first, close the store last

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::audit::{AuditError, AuditLogger};
use crate::config::{ConfigError, GatewayConfig};
use crate::http::{AppServices, HttpServer};
use crate::lifecycle::shutdown::{BoxError, FnHook, HookContext, ShutdownError, ShutdownManager};
use crate::lifecycle::signals::wait_for_signal;
use crate::password::{PasswordError, PasswordService};
use crate::security::{CoordinatorBuildError, SecurityCoordinator};
use crate::store::{MemoryStore, SharedStore};

pub const HTTP_SERVER_HOOK: &str = "http-server";
pub const COORDINATOR_HOOK: &str = "security-coordinator";
pub const AUDIT_HOOK: &str = "audit-logger";
pub const STORE_HOOK: &str = "shared-store";

#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Password(#[from] PasswordError),

    #[error(transparent)]
    Audit(#[from] AuditError),

    #[error(transparent)]
    Security(#[from] CoordinatorBuildError),

    #[error(transparent)]
    Shutdown(#[from] ShutdownError),

    #[error("failed to bind {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: std::io::Error,
    },
}

type ServerTask = Arc<Mutex<Option<JoinHandle<std::io::Result<()>>>>>;

/// Fully wired gateway, ready to serve.
pub struct Application {
    config: GatewayConfig,
    coordinator: Arc<SecurityCoordinator>,
    server: HttpServer,
    shutdown: Arc<ShutdownManager>,
    server_task: ServerTask,
}

impl Application {
    /// Build with the in-process store.
    pub fn build(config: GatewayConfig) -> Result<Self, StartupError> {
        tracing::warn!("No shared store supplied, rate limits are per process");
        Self::build_with_store(config, Arc::new(MemoryStore::new()))
    }

    pub fn build_with_store(
        config: GatewayConfig,
        store: Arc<dyn SharedStore>,
    ) -> Result<Self, StartupError> {
        let passwords = PasswordService::new(&config.password, config.password.pepper.as_bytes())?;

        let audit_store = config.audit.store_enabled.then(|| store.clone());
        let audit = AuditLogger::new(&config.audit, audit_store)?;

        let coordinator = Arc::new(SecurityCoordinator::from_config(
            &config,
            store.clone(),
            audit.clone(),
        )?);
        let server = HttpServer::new(&config, coordinator.clone(), AppServices { passwords });

        let shutdown = Arc::new(ShutdownManager::new(Duration::from_secs(
            config.shutdown.timeout_secs,
        )));
        let server_task: ServerTask = Arc::default();
        register_hooks(&shutdown, &server_task, &coordinator, &audit, &store)?;

        tracing::info!(
            environment = ?config.security.environment,
            hooks = ?shutdown.hook_names(),
            "Application built"
        );

        Ok(Self {
            config,
            coordinator,
            server,
            shutdown,
            server_task,
        })
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    pub fn coordinator(&self) -> &Arc<SecurityCoordinator> {
        &self.coordinator
    }

    pub fn shutdown_manager(&self) -> Arc<ShutdownManager> {
        self.shutdown.clone()
    }

    /// The full router, for in-process use.
    pub fn router(&self) -> Router {
        self.server.router()
    }

    /// Bind the configured address and serve until SIGINT or SIGTERM.
    pub async fn run(self) -> Result<(), StartupError> {
        let address = self.config.server.bind_address.clone();
        let listener = TcpListener::bind(&address)
            .await
            .map_err(|source| StartupError::Bind { address, source })?;
        self.serve(listener, async {
            wait_for_signal().await;
        })
        .await
    }

    /// Serve on `listener` until `stop` resolves, then shut down.
    pub async fn serve<F>(self, listener: TcpListener, stop: F) -> Result<(), StartupError>
    where
        F: Future<Output = ()> + Send,
    {
        self.coordinator.start().await;

        let signal = self.shutdown.subscribe();
        let handle = tokio::spawn(self.server.run(listener, signal));
        *self.server_task.lock().await = Some(handle);

        stop.await;
        self.shutdown.shutdown().await?;
        Ok(())
    }
}

fn register_hooks(
    shutdown: &ShutdownManager,
    server_task: &ServerTask,
    coordinator: &Arc<SecurityCoordinator>,
    audit: &Arc<AuditLogger>,
    store: &Arc<dyn SharedStore>,
) -> Result<(), ShutdownError> {
    let task = server_task.clone();
    shutdown.register(Arc::new(FnHook::new(
        HTTP_SERVER_HOOK,
        0,
        move |ctx: HookContext| {
            let task = task.clone();
            async move {
                // The notification already told the server to drain.
                let Some(handle) = task.lock().await.take() else {
                    return Ok(());
                };
                match tokio::time::timeout_at(ctx.deadline, handle).await {
                    Ok(Ok(result)) => result.map_err(BoxError::from),
                    Ok(Err(join_error)) => Err(BoxError::from(join_error)),
                    Err(elapsed) => Err(BoxError::from(elapsed)),
                }
            }
        },
    )))?;

    let coordinator = coordinator.clone();
    shutdown.register(Arc::new(FnHook::new(COORDINATOR_HOOK, 10, move |_ctx| {
        let coordinator = coordinator.clone();
        async move {
            coordinator.stop().await;
            Ok::<(), BoxError>(())
        }
    })))?;

    let audit = audit.clone();
    shutdown.register(Arc::new(FnHook::new(AUDIT_HOOK, 20, move |_ctx| {
        let audit = audit.clone();
        async move {
            audit.stop().await;
            Ok::<(), BoxError>(())
        }
    })))?;

    let store = store.clone();
    shutdown.register(Arc::new(FnHook::new(STORE_HOOK, 30, move |_ctx| {
        let store = store.clone();
        async move { store.close().await.map_err(BoxError::from) }
    })))?;

    Ok(())
}
