//! Security event monitor.
//!
//! # Responsibilities
//! - Receive security events from the pipeline without blocking requests
//! - Count events per client over a sliding window
//! - Raise one alert per client when the count crosses the threshold
//!
//! # Data Flow
//! ```text
//! coordinator ──emit()──▶ unbounded mpsc ──▶ monitor task
//!                                              ├─ WARN log per event
//!                                              ├─ sliding window per client
//!                                              └─ ERROR alert on threshold
//! ```

use std::collections::{HashMap, VecDeque};
use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;

use crate::config::MonitorConfig;
use crate::observability::metrics;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SecurityEventKind {
    ValidationRejected,
    InvalidApiKey,
    RateLimited,
    IpBlocked,
    CsrfRejected,
    OriginRejected,
    Unauthorized,
    Forbidden,
    ServerError,
}

impl SecurityEventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            SecurityEventKind::ValidationRejected => "validation_rejected",
            SecurityEventKind::InvalidApiKey => "invalid_api_key",
            SecurityEventKind::RateLimited => "rate_limited",
            SecurityEventKind::IpBlocked => "ip_blocked",
            SecurityEventKind::CsrfRejected => "csrf_rejected",
            SecurityEventKind::OriginRejected => "origin_rejected",
            SecurityEventKind::Unauthorized => "unauthorized",
            SecurityEventKind::Forbidden => "forbidden",
            SecurityEventKind::ServerError => "server_error",
        }
    }

    /// Kind for a handler response status, if it is security relevant.
    pub fn from_status(status: u16) -> Option<Self> {
        match status {
            401 => Some(SecurityEventKind::Unauthorized),
            403 => Some(SecurityEventKind::Forbidden),
            429 => Some(SecurityEventKind::RateLimited),
            500..=599 => Some(SecurityEventKind::ServerError),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SecurityEvent {
    pub kind: SecurityEventKind,
    pub at: DateTime<Utc>,
    pub client_ip: Option<IpAddr>,
    pub request_id: String,
    pub method: String,
    pub path: String,
    pub status: u16,
    pub detail: String,
}

/// Sliding-window counter per client.
#[derive(Debug)]
pub struct EventWindow {
    window: Duration,
    threshold: u32,
    clients: HashMap<String, VecDeque<Instant>>,
}

impl EventWindow {
    pub fn new(window: Duration, threshold: u32) -> Self {
        Self {
            window,
            threshold: threshold.max(1),
            clients: HashMap::new(),
        }
    }

    /// Record one event; true exactly when this event reaches the threshold.
    pub fn observe(&mut self, client: &str, now: Instant) -> bool {
        let window = self.window;
        let seen = self.clients.entry(client.to_string()).or_default();
        while seen
            .front()
            .is_some_and(|t| now.saturating_duration_since(*t) >= window)
        {
            seen.pop_front();
        }
        seen.push_back(now);
        seen.len() == self.threshold as usize
    }

    /// Drop clients with no event inside the window.
    pub fn prune(&mut self, now: Instant) {
        let window = self.window;
        self.clients.retain(|_, seen| {
            seen.back()
                .is_some_and(|t| now.saturating_duration_since(*t) < window)
        });
    }

    pub fn tracked_clients(&self) -> usize {
        self.clients.len()
    }
}

struct Running {
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
}

/// Background consumer of security events.
pub struct SecurityEventMonitor {
    config: MonitorConfig,
    tx: mpsc::UnboundedSender<SecurityEvent>,
    rx: Mutex<Option<mpsc::UnboundedReceiver<SecurityEvent>>>,
    running: Mutex<Option<Running>>,
}

impl SecurityEventMonitor {
    pub fn new(config: &MonitorConfig) -> Arc<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            config: config.clone(),
            tx,
            rx: Mutex::new(Some(rx)),
            running: Mutex::new(None),
        })
    }

    /// Queue an event. Never blocks; dropped silently once the monitor is gone.
    pub fn emit(&self, event: SecurityEvent) {
        metrics::record_security_event(event.kind.as_str());
        let _ = self.tx.send(event);
    }

    /// Spawn the consumer task. Calling twice is a no-op.
    pub async fn start(&self) {
        let mut running = self.running.lock().await;
        if running.is_some() {
            return;
        }
        let Some(rx) = self.rx.lock().await.take() else {
            tracing::debug!("Security event monitor already consumed its channel");
            return;
        };
        let (stop, stop_rx) = watch::channel(false);
        let window = EventWindow::new(
            Duration::from_secs(self.config.window_secs),
            self.config.alert_threshold,
        );
        let prune_every = Duration::from_secs(self.config.prune_interval_secs.max(1));
        let task = tokio::spawn(run(rx, stop_rx, window, prune_every));
        *running = Some(Running { stop, task });
        tracing::info!(
            window_secs = self.config.window_secs,
            alert_threshold = self.config.alert_threshold,
            "Security event monitor started"
        );
    }

    /// Stop and join the consumer task. Calling twice is a no-op.
    pub async fn stop(&self) {
        let Some(Running { stop, task }) = self.running.lock().await.take() else {
            return;
        };
        let _ = stop.send(true);
        if let Err(e) = task.await {
            tracing::error!(error = %e, "Security event monitor task failed");
        }
        tracing::info!("Security event monitor stopped");
    }
}

async fn run(
    mut rx: mpsc::UnboundedReceiver<SecurityEvent>,
    mut stop: watch::Receiver<bool>,
    mut window: EventWindow,
    prune_every: Duration,
) {
    let mut prune = tokio::time::interval(prune_every);
    loop {
        tokio::select! {
            event = rx.recv() => {
                let Some(event) = event else { break };
                handle(&mut window, &event);
            }
            _ = prune.tick() => window.prune(Instant::now()),
            _ = stop.changed() => break,
        }
    }
    // Drain what was queued before the stop request.
    while let Ok(event) = rx.try_recv() {
        handle(&mut window, &event);
    }
}

fn handle(window: &mut EventWindow, event: &SecurityEvent) {
    let client = event
        .client_ip
        .map(|ip| ip.to_string())
        .unwrap_or_else(|| "unknown".to_string());
    tracing::warn!(
        kind = event.kind.as_str(),
        client = %client,
        request_id = %event.request_id,
        method = %event.method,
        path = %event.path,
        status = event.status,
        detail = %event.detail,
        "Security event"
    );
    if window.observe(&client, Instant::now()) {
        tracing::error!(
            client = %client,
            events = window.threshold,
            window_secs = window.window.as_secs(),
            "Security alert: client exceeded event threshold"
        );
    }
}
