//! Audit logger service.
//!
//! # Responsibilities
//! - Fan each event out to the log stream, the shared store and the file sink
//! - Answer read-only queries over recorded events
//! - Run the periodic retention scanner
//!
//! # Design Decisions
//! - `record` never fails and never blocks on the shared store
//! - The only mutating operation is append; there is no update or delete
//! - Queries read the files when the file sink is configured, otherwise a
//!   bounded buffer of recent events

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{watch, Mutex as AsyncMutex};
use tokio::task::JoinHandle;

use super::event::{AuditEvent, AuditLevel, EventCategory, EventKind};
use super::file_sink::FileSink;
use super::redact::Redactor;
use super::AuditError;
use crate::config::AuditConfig;
use crate::observability::metrics;
use crate::store::SharedStore;

/// Filter for [`AuditLogger::query`]. Empty fields match everything.
#[derive(Debug, Clone, Default)]
pub struct AuditQuery {
    pub kind: Option<EventKind>,
    pub category: Option<EventCategory>,
    pub min_level: Option<AuditLevel>,
    pub user_id: Option<String>,
    pub client_ip: Option<String>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    /// Keep only the most recent `limit` matches.
    pub limit: Option<usize>,
}

impl AuditQuery {
    pub fn matches(&self, event: &AuditEvent) -> bool {
        self.kind.map_or(true, |k| event.kind == k)
            && self.category.map_or(true, |c| event.category == c)
            && self.min_level.map_or(true, |l| event.level >= l)
            && self
                .user_id
                .as_deref()
                .map_or(true, |u| event.user_id() == Some(u))
            && self
                .client_ip
                .as_deref()
                .map_or(true, |ip| event.client_ip.as_deref() == Some(ip))
            && self.since.map_or(true, |t| event.timestamp >= t)
            && self.until.map_or(true, |t| event.timestamp <= t)
    }

    /// Filter `events` (oldest first) and apply the limit.
    pub fn apply<'a>(&self, events: impl IntoIterator<Item = &'a AuditEvent>) -> Vec<AuditEvent> {
        let mut matched: Vec<AuditEvent> = events
            .into_iter()
            .filter(|e| self.matches(e))
            .cloned()
            .collect();
        if let Some(limit) = self.limit {
            let excess = matched.len().saturating_sub(limit);
            matched.drain(..excess);
        }
        matched
    }
}

struct Scanner {
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
}

pub struct AuditLogger {
    config: AuditConfig,
    redactor: Redactor,
    file: Option<Arc<FileSink>>,
    store: Option<Arc<dyn SharedStore>>,
    recent: Mutex<VecDeque<AuditEvent>>,
    scanner: AsyncMutex<Option<Scanner>>,
}

impl std::fmt::Debug for AuditLogger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditLogger")
            .field("file", &self.file)
            .field("store", &self.store.is_some())
            .finish()
    }
}

impl AuditLogger {
    /// Build the logger. `store` is only used when `store_enabled` is set.
    pub fn new(
        config: &AuditConfig,
        store: Option<Arc<dyn SharedStore>>,
    ) -> Result<Arc<Self>, AuditError> {
        let file = if config.file_enabled {
            Some(Arc::new(FileSink::new(
                &config.directory,
                config.file_name.clone(),
                config.max_file_bytes,
                retention(config),
            )?))
        } else {
            None
        };
        let store = if config.store_enabled { store } else { None };

        Ok(Arc::new(Self {
            redactor: Redactor::from_config(config),
            file,
            store,
            recent: Mutex::new(VecDeque::new()),
            scanner: AsyncMutex::new(None),
            config: config.clone(),
        }))
    }

    pub fn config(&self) -> &AuditConfig {
        &self.config
    }

    pub fn redactor(&self) -> &Redactor {
        &self.redactor
    }

    pub fn slow_threshold(&self) -> Duration {
        Duration::from_millis(self.config.slow_request_ms)
    }

    /// Append one event to every configured sink. Failures are logged only.
    pub async fn record(&self, event: AuditEvent) {
        metrics::record_audit_event(event.kind.as_str());
        emit_log(&event);

        if let Some(store) = &self.store {
            match serde_json::to_string(&event) {
                Ok(json) => {
                    let store = Arc::clone(store);
                    let key = format!("{}{}", self.config.store_prefix, event.id);
                    let ttl = retention(&self.config);
                    tokio::spawn(async move {
                        if let Err(e) = store.set_with_ttl(&key, &json, ttl).await {
                            metrics::record_audit_sink_failure("store");
                            tracing::warn!(key = %key, error = %e, "Audit store write failed");
                        }
                    });
                }
                Err(e) => tracing::warn!(error = %e, "Audit event not serializable"),
            }
        }

        match &self.file {
            Some(sink) if !sink.is_disabled() => {
                let sink = Arc::clone(sink);
                let written = tokio::task::spawn_blocking(move || sink.append(&event)).await;
                let failure = match written {
                    Ok(Ok(())) => None,
                    Ok(Err(e)) => Some(e.to_string()),
                    Err(e) => Some(e.to_string()),
                };
                if let Some(error) = failure {
                    metrics::record_audit_sink_failure("file");
                    tracing::error!(error = %error, "Audit file write failed, file sink disabled");
                }
            }
            Some(_) => {}
            None => {
                let mut recent = self.recent.lock().unwrap_or_else(|e| e.into_inner());
                if recent.len() >= self.config.memory_capacity.max(1) {
                    recent.pop_front();
                }
                recent.push_back(event);
            }
        }
    }

    /// Matching events, oldest first.
    pub async fn query(&self, query: &AuditQuery) -> Result<Vec<AuditEvent>, AuditError> {
        match &self.file {
            Some(sink) => {
                let sink = Arc::clone(sink);
                let events = tokio::task::spawn_blocking(move || sink.read_all())
                    .await
                    .map_err(|e| AuditError::Task(e.to_string()))??;
                Ok(query.apply(&events))
            }
            None => {
                let recent = self.recent.lock().unwrap_or_else(|e| e.into_inner());
                Ok(query.apply(recent.iter()))
            }
        }
    }

    /// Remove rotated files past retention. No-op without a file sink.
    pub async fn cleanup(&self) -> Result<usize, AuditError> {
        let Some(sink) = &self.file else {
            return Ok(0);
        };
        let sink = Arc::clone(sink);
        tokio::task::spawn_blocking(move || sink.cleanup())
            .await
            .map_err(|e| AuditError::Task(e.to_string()))?
    }

    /// Spawn the retention scanner. Calling twice is a no-op.
    pub async fn start(self: &Arc<Self>) {
        let mut scanner = self.scanner.lock().await;
        if scanner.is_some() || self.file.is_none() {
            return;
        }
        let (stop, mut stop_rx) = watch::channel(false);
        let every = Duration::from_secs(self.config.cleanup_interval_secs.max(1));
        let logger = Arc::clone(self);
        let task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        match logger.cleanup().await {
                            Ok(0) => {}
                            Ok(removed) => tracing::info!(removed, "Audit retention cleanup"),
                            Err(e) => tracing::warn!(error = %e, "Audit retention cleanup failed"),
                        }
                    }
                    _ = stop_rx.changed() => break,
                }
            }
        });
        *scanner = Some(Scanner { stop, task });
        tracing::info!(
            interval_secs = every.as_secs(),
            retention_days = self.config.retention_days,
            "Audit retention scanner started"
        );
    }

    /// Stop and join the retention scanner. Calling twice is a no-op.
    pub async fn stop(&self) {
        let Some(Scanner { stop, task }) = self.scanner.lock().await.take() else {
            return;
        };
        let _ = stop.send(true);
        if let Err(e) = task.await {
            tracing::error!(error = %e, "Audit retention scanner failed");
        }
        tracing::info!("Audit retention scanner stopped");
    }
}

fn retention(config: &AuditConfig) -> Duration {
    Duration::from_secs(config.retention_days.saturating_mul(86_400))
}

fn emit_log(event: &AuditEvent) {
    macro_rules! audit_line {
        ($level:ident) => {
            tracing::$level!(
                target: "audit",
                event_id = %event.id,
                kind = event.kind.as_str(),
                category = ?event.category,
                request_id = %event.request_id,
                user_id = event.user_id().unwrap_or("-"),
                client_ip = event.client_ip.as_deref().unwrap_or("-"),
                method = %event.method,
                route = %event.route,
                status = event.status,
                duration_ms = event.duration_ms,
                request_bytes = event.request_bytes,
                response_bytes = event.response_bytes,
                success = event.success,
                attributes = %serde_json::Value::Object(event.attributes.clone()),
                "{}",
                event.message.as_deref().unwrap_or("audit event")
            )
        };
    }
    match event.level {
        AuditLevel::Info => audit_line!(info),
        AuditLevel::Warning => audit_line!(warn),
        AuditLevel::Error => audit_line!(error),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn memory_config() -> AuditConfig {
        AuditConfig {
            file_enabled: false,
            memory_capacity: 3,
            ..AuditConfig::default()
        }
    }

    #[tokio::test]
    async fn memory_buffer_is_bounded() {
        let logger = AuditLogger::new(&memory_config(), None).unwrap();
        for _ in 0..5 {
            logger.record(AuditEvent::new(EventKind::RequestProcessed)).await;
        }
        let all = logger.query(&AuditQuery::default()).await.unwrap();
        assert_eq!(all.len(), 3);
    }

    #[tokio::test]
    async fn query_filters_and_limits() {
        let logger = AuditLogger::new(
            &AuditConfig {
                memory_capacity: 100,
                ..memory_config()
            },
            None,
        )
        .unwrap();
        logger.record(AuditEvent::new(EventKind::AuthLoginFailed)).await;
        logger.record(AuditEvent::new(EventKind::RequestProcessed)).await;
        let last = AuditEvent::new(EventKind::AuthLoginFailed).with_message("third");
        logger.record(last.clone()).await;

        let failed = logger
            .query(&AuditQuery {
                kind: Some(EventKind::AuthLoginFailed),
                ..AuditQuery::default()
            })
            .await
            .unwrap();
        assert_eq!(failed.len(), 2);

        let newest = logger
            .query(&AuditQuery {
                limit: Some(1),
                ..AuditQuery::default()
            })
            .await
            .unwrap();
        assert_eq!(newest, vec![last]);

        let warnings = logger
            .query(&AuditQuery {
                min_level: Some(AuditLevel::Warning),
                ..AuditQuery::default()
            })
            .await
            .unwrap();
        assert_eq!(warnings.len(), 2);
    }

    #[tokio::test]
    async fn store_mirror_uses_event_key() {
        let store = Arc::new(MemoryStore::new());
        let logger = AuditLogger::new(
            &AuditConfig {
                store_enabled: true,
                ..memory_config()
            },
            Some(store.clone() as Arc<dyn SharedStore>),
        )
        .unwrap();
        let event = AuditEvent::new(EventKind::AdminAction);
        logger.record(event.clone()).await;

        let key = format!("audit:{}", event.id);
        let mut stored = None;
        for _ in 0..50 {
            stored = store.get(&key).await.unwrap();
            if stored.is_some() {
                break;
            }
            tokio::task::yield_now().await;
        }
        let stored: AuditEvent = serde_json::from_str(&stored.unwrap()).unwrap();
        assert_eq!(stored, event);
    }

    #[tokio::test]
    async fn file_sink_backs_queries() {
        let dir = tempfile::tempdir().unwrap();
        let logger = AuditLogger::new(
            &AuditConfig {
                directory: dir.path().display().to_string(),
                ..AuditConfig::default()
            },
            None,
        )
        .unwrap();
        let event = AuditEvent::new(EventKind::UserCreated).with_attribute("user", "u1");
        logger.record(event.clone()).await;
        assert_eq!(logger.query(&AuditQuery::default()).await.unwrap(), vec![event]);
        assert_eq!(logger.cleanup().await.unwrap(), 0);

        logger.start().await;
        logger.start().await;
        logger.stop().await;
        logger.stop().await;
    }
}
