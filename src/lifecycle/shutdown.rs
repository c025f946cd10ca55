//! Shutdown coordination for the gateway.
//!
//! # Responsibilities
//! - Keep the registry of named, prioritized shutdown hooks
//! - Run hooks in ascending priority under one global deadline
//! - Broadcast "shutting down" to any number of waiters, exactly once
//!
//! # Design Decisions
//! - Hooks run one at a time; a lower priority number finishes (or times
//!   out) before the next hook starts
//! - Each hook runs on its own task, so a panicking hook is reported as an
//!   error instead of unwinding the manager
//! - A hook that misses the deadline is recorded and left running; the
//!   manager moves on
//! - Errors are collected and returned together after every hook ran

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::time::Instant;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, thiserror::Error)]
pub enum ShutdownError {
    #[error("shutdown hook name must not be empty")]
    EmptyName,

    #[error("shutdown hook {0:?} is already registered")]
    DuplicateHook(String),

    #[error("cannot register {0:?}: shutdown already started")]
    AlreadyShuttingDown(String),

    #[error("shutdown hook {name:?} failed: {message}")]
    HookFailed { name: String, message: String },

    #[error("shutdown hook {name:?} did not finish before the deadline")]
    HookTimedOut { name: String },

    #[error("shutdown hook {name:?} panicked")]
    HookPanicked { name: String },

    #[error("{} shutdown hook(s) failed: {}", .0.len(), join_errors(.0))]
    Aggregate(Vec<ShutdownError>),
}

impl ShutdownError {
    /// Individual hook failures inside an aggregate.
    pub fn failures(&self) -> &[ShutdownError] {
        match self {
            ShutdownError::Aggregate(errors) => errors,
            other => std::slice::from_ref(other),
        }
    }
}

fn join_errors(errors: &[ShutdownError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// What a hook gets to work with while closing.
#[derive(Debug, Clone, Copy)]
pub struct HookContext {
    pub deadline: Instant,
}

impl HookContext {
    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.deadline
    }
}

/// A named closer run during shutdown.
///
/// Lower `priority` numbers run first. Implementations should respect
/// `ctx.deadline` and return promptly once it passes.
#[async_trait]
pub trait ShutdownHook: Send + Sync {
    fn name(&self) -> &str;

    fn priority(&self) -> i32;

    async fn close(&self, ctx: HookContext) -> Result<(), BoxError>;
}

/// Adapter turning an async closure into a [`ShutdownHook`].
pub struct FnHook<F> {
    name: String,
    priority: i32,
    close: F,
}

impl<F, Fut> FnHook<F>
where
    F: Fn(HookContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), BoxError>> + Send,
{
    pub fn new(name: impl Into<String>, priority: i32, close: F) -> Self {
        Self {
            name: name.into(),
            priority,
            close,
        }
    }
}

#[async_trait]
impl<F, Fut> ShutdownHook for FnHook<F>
where
    F: Fn(HookContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), BoxError>> + Send,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    async fn close(&self, ctx: HookContext) -> Result<(), BoxError> {
        (self.close)(ctx).await
    }
}

/// Receiver side of the shutdown notification.
#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    rx: watch::Receiver<bool>,
}

impl ShutdownSignal {
    /// Resolves once shutdown has started. Also resolves if the manager is
    /// dropped.
    pub async fn wait(mut self) {
        let _ = self.rx.wait_for(|started| *started).await;
    }

    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow()
    }
}

pub struct ShutdownManager {
    hooks: Mutex<Vec<Arc<dyn ShutdownHook>>>,
    timeout: Duration,
    started: AtomicBool,
    notify: watch::Sender<bool>,
}

impl ShutdownManager {
    pub fn new(timeout: Duration) -> Self {
        let (notify, _) = watch::channel(false);
        Self {
            hooks: Mutex::new(Vec::new()),
            timeout,
            started: AtomicBool::new(false),
            notify,
        }
    }

    pub fn register(&self, hook: Arc<dyn ShutdownHook>) -> Result<(), ShutdownError> {
        let name = hook.name().to_string();
        if name.is_empty() {
            return Err(ShutdownError::EmptyName);
        }
        if self.is_shutting_down() {
            return Err(ShutdownError::AlreadyShuttingDown(name));
        }

        let mut hooks = self.hooks.lock().unwrap_or_else(|e| e.into_inner());
        if hooks.iter().any(|h| h.name() == name) {
            return Err(ShutdownError::DuplicateHook(name));
        }
        tracing::debug!(hook = %name, priority = hook.priority(), "Shutdown hook registered");
        hooks.push(hook);
        // Stable: equal priorities keep registration order.
        hooks.sort_by_key(|h| h.priority());
        Ok(())
    }

    /// Registered hook names in execution order.
    pub fn hook_names(&self) -> Vec<String> {
        self.hooks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|h| h.name().to_string())
            .collect()
    }

    pub fn subscribe(&self) -> ShutdownSignal {
        ShutdownSignal {
            rx: self.notify.subscribe(),
        }
    }

    pub fn is_shutting_down(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }

    /// Run every hook with the configured timeout as the deadline.
    pub async fn shutdown(&self) -> Result<(), ShutdownError> {
        self.shutdown_by(None).await
    }

    /// Run every hook. The effective deadline is the earlier of `deadline`
    /// and now plus the configured timeout.
    ///
    /// Only the first call does any work; later calls return `Ok(())`.
    pub async fn shutdown_by(&self, deadline: Option<Instant>) -> Result<(), ShutdownError> {
        if self.started.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.notify.send_replace(true);

        let own_deadline = Instant::now() + self.timeout;
        let deadline = deadline.map_or(own_deadline, |d| d.min(own_deadline));
        let hooks = self
            .hooks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();

        tracing::info!(hooks = hooks.len(), timeout_secs = self.timeout.as_secs(), "Shutdown started");

        let mut errors = Vec::new();
        for hook in hooks {
            let name = hook.name().to_string();
            let ctx = HookContext { deadline };
            let started = std::time::Instant::now();
            let task = tokio::spawn(async move { hook.close(ctx).await });

            match tokio::time::timeout_at(deadline, task).await {
                Ok(Ok(Ok(()))) => {
                    tracing::info!(hook = %name, elapsed_ms = started.elapsed().as_millis() as u64, "Shutdown hook completed");
                }
                Ok(Ok(Err(e))) => {
                    tracing::error!(hook = %name, error = %e, "Shutdown hook failed");
                    errors.push(ShutdownError::HookFailed {
                        name,
                        message: e.to_string(),
                    });
                }
                Ok(Err(join_error)) => {
                    tracing::error!(hook = %name, error = %join_error, "Shutdown hook panicked");
                    errors.push(ShutdownError::HookPanicked { name });
                }
                Err(_) => {
                    tracing::error!(hook = %name, "Shutdown hook timed out");
                    errors.push(ShutdownError::HookTimedOut { name });
                }
            }
        }

        if errors.is_empty() {
            tracing::info!("Shutdown complete");
            Ok(())
        } else {
            Err(ShutdownError::Aggregate(errors))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    type Log = Arc<Mutex<Vec<i32>>>;

    fn recording(log: &Log, priority: i32, fail: bool) -> Arc<dyn ShutdownHook> {
        let log = log.clone();
        Arc::new(FnHook::new(format!("hook-{priority}"), priority, move |_ctx| {
            let log = log.clone();
            async move {
                log.lock().unwrap().push(priority);
                if fail {
                    Err::<(), BoxError>("boom".into())
                } else {
                    Ok(())
                }
            }
        }))
    }

    #[tokio::test]
    async fn hooks_run_in_priority_order_and_errors_aggregate() {
        let log: Log = Arc::default();
        let manager = ShutdownManager::new(Duration::from_secs(5));
        manager.register(recording(&log, 3, false)).unwrap();
        manager.register(recording(&log, 1, false)).unwrap();
        manager.register(recording(&log, 2, true)).unwrap();

        let err = manager.shutdown().await.unwrap_err();
        assert_eq!(*log.lock().unwrap(), vec![1, 2, 3]);
        assert_eq!(err.failures().len(), 1);
        assert!(matches!(
            &err.failures()[0],
            ShutdownError::HookFailed { name, .. } if name == "hook-2"
        ));
    }

    #[tokio::test]
    async fn second_shutdown_is_a_no_op() {
        let log: Log = Arc::default();
        let manager = ShutdownManager::new(Duration::from_secs(5));
        manager.register(recording(&log, 1, true)).unwrap();

        assert!(manager.shutdown().await.is_err());
        assert!(manager.shutdown().await.is_ok());
        assert_eq!(*log.lock().unwrap(), vec![1]);
    }

    #[tokio::test]
    async fn duplicate_and_late_registration_rejected() {
        let log: Log = Arc::default();
        let manager = ShutdownManager::new(Duration::from_secs(5));
        manager.register(recording(&log, 1, false)).unwrap();
        assert!(matches!(
            manager.register(recording(&log, 1, false)),
            Err(ShutdownError::DuplicateHook(_))
        ));

        manager.shutdown().await.unwrap();
        assert!(matches!(
            manager.register(recording(&log, 9, false)),
            Err(ShutdownError::AlreadyShuttingDown(_))
        ));
    }

    #[tokio::test]
    async fn equal_priorities_keep_registration_order() {
        let manager = ShutdownManager::new(Duration::from_secs(1));
        for name in ["b", "a", "c"] {
            manager
                .register(Arc::new(FnHook::new(name, 5, |_| async {
                    Ok::<(), BoxError>(())
                })))
                .unwrap();
        }
        assert_eq!(manager.hook_names(), vec!["b", "a", "c"]);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_hook_times_out_and_later_hooks_still_run() {
        let log: Log = Arc::default();
        let manager = ShutdownManager::new(Duration::from_secs(2));
        let started = Instant::now();
        manager
            .register(Arc::new(FnHook::new("stuck", 0, |_| async {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok::<(), BoxError>(())
            })))
            .unwrap();
        manager.register(recording(&log, 1, false)).unwrap();

        let err = manager.shutdown().await.unwrap_err();
        assert!(matches!(
            &err.failures()[0],
            ShutdownError::HookTimedOut { name } if name == "stuck"
        ));
        assert!(started.elapsed() < Duration::from_secs(60));
    }

    #[tokio::test]
    async fn panicking_hook_is_reported() {
        let manager = ShutdownManager::new(Duration::from_secs(1));
        manager
            .register(Arc::new(FnHook::new("panics", 0, |_| async {
                if true {
                    panic!("hook exploded");
                }
                Ok::<(), BoxError>(())
            })))
            .unwrap();
        let err = manager.shutdown().await.unwrap_err();
        assert!(matches!(&err.failures()[0], ShutdownError::HookPanicked { .. }));
    }

    #[tokio::test]
    async fn context_deadline_caps_configured_timeout() {
        let manager = ShutdownManager::new(Duration::from_secs(30));
        let seen = Arc::new(Mutex::new(None));
        let seen_hook = seen.clone();
        manager
            .register(Arc::new(FnHook::new("watcher", 0, move |ctx: HookContext| {
                let seen = seen_hook.clone();
                async move {
                    *seen.lock().unwrap() = Some(ctx.remaining());
                    Ok::<(), BoxError>(())
                }
            })))
            .unwrap();

        let deadline = Instant::now() + Duration::from_secs(1);
        manager.shutdown_by(Some(deadline)).await.unwrap();
        let remaining = seen.lock().unwrap().unwrap();
        assert!(remaining <= Duration::from_secs(1));
    }

    #[tokio::test]
    async fn every_subscriber_observes_the_notification() {
        let manager = Arc::new(ShutdownManager::new(Duration::from_secs(1)));
        let waiters: Vec<_> = (0..3)
            .map(|_| tokio::spawn(manager.subscribe().wait()))
            .collect();
        assert!(!manager.subscribe().is_triggered());

        manager.shutdown().await.unwrap();
        for waiter in waiters {
            waiter.await.unwrap();
        }
        assert!(manager.subscribe().is_triggered());
        assert!(manager.is_shutting_down());
    }
}
