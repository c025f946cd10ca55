//! In-process store backed by `DashMap`.
//!
//! Used when no shared store handle is configured. Counters are only
//! consistent within this process, so multiple gateway replicas each enforce
//! their own limits.

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::time::Instant;

use super::{SharedStore, StoreError};

#[derive(Debug, Clone)]
enum Value {
    Counter(u64),
    Text(String),
}

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    expires_at: Instant,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at > now
    }
}

/// How often writes sweep out expired entries.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Thread-safe in-memory store with lazy expiry.
///
/// Keys that are never touched again (old windows, departed clients, audit
/// mirrors) are dropped by a sweep that writes trigger at most once per
/// `sweep_every`.
#[derive(Debug)]
pub struct MemoryStore {
    entries: DashMap<String, Entry>,
    sweep_every: Duration,
    next_sweep: Mutex<Instant>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::with_sweep_interval(DEFAULT_SWEEP_INTERVAL)
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sweep_interval(sweep_every: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            sweep_every,
            next_sweep: Mutex::new(Instant::now() + sweep_every),
        }
    }

    /// Drop every expired entry. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.is_live(now));
        before.saturating_sub(self.entries.len())
    }

    /// Sweep if the interval has passed. Must not be called while holding an
    /// entry guard; `retain` locks every shard.
    fn maybe_sweep(&self, now: Instant) {
        // Another writer holding the lock is already sweeping.
        let Ok(mut next) = self.next_sweep.try_lock() else {
            return;
        };
        if now < *next {
            return;
        }
        *next = now + self.sweep_every;
        drop(next);

        let removed = self.purge_expired();
        if removed > 0 {
            tracing::debug!(removed, remaining = self.entries.len(), "Expired store entries swept");
        }
    }

    /// Number of stored entries, including expired ones not yet purged.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl SharedStore for MemoryStore {
    async fn incr_with_ttl(&self, key: &str, ttl: Duration) -> Result<u64, StoreError> {
        let now = Instant::now();
        self.maybe_sweep(now);
        // The entry guard holds the shard lock, making increment + TTL-set one step.
        let mut entry = self.entries.entry(key.to_string()).or_insert_with(|| Entry {
            value: Value::Counter(0),
            expires_at: now + ttl,
        });
        if !entry.is_live(now) {
            entry.value = Value::Counter(0);
        }
        let next = match entry.value {
            Value::Counter(n) => n + 1,
            Value::Text(_) => return Err(StoreError::NotACounter(key.to_string())),
        };
        entry.value = Value::Counter(next);
        entry.expires_at = now + ttl;
        Ok(next)
    }

    async fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        let now = Instant::now();
        self.maybe_sweep(now);
        let mut created = false;
        let mut entry = self.entries.entry(key.to_string()).or_insert_with(|| {
            created = true;
            Entry {
                value: Value::Text(value.to_string()),
                expires_at: now + ttl,
            }
        });
        if !created && !entry.is_live(now) {
            *entry = Entry {
                value: Value::Text(value.to_string()),
                expires_at: now + ttl,
            };
            created = true;
        }
        Ok(created)
    }

    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError> {
        let now = Instant::now();
        self.maybe_sweep(now);
        self.entries.insert(
            key.to_string(),
            Entry {
                value: Value::Text(value.to_string()),
                expires_at: now + ttl,
            },
        );
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let now = Instant::now();
        Ok(self.entries.get(key).filter(|e| e.is_live(now)).map(|e| {
            match &e.value {
                Value::Counter(n) => n.to_string(),
                Value::Text(s) => s.clone(),
            }
        }))
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>, StoreError> {
        let now = Instant::now();
        Ok(self
            .entries
            .get(key)
            .filter(|e| e.is_live(now))
            .map(|e| e.expires_at - now))
    }

    async fn close(&self) -> Result<(), StoreError> {
        self.entries.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn counter_increments_and_expires() {
        tokio::time::pause();
        let store = MemoryStore::new();
        let ttl = Duration::from_secs(10);

        assert_eq!(store.incr_with_ttl("k", ttl).await.unwrap(), 1);
        assert_eq!(store.incr_with_ttl("k", ttl).await.unwrap(), 2);
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("2"));

        tokio::time::advance(Duration::from_secs(11)).await;
        assert_eq!(store.get("k").await.unwrap(), None);
        assert_eq!(store.incr_with_ttl("k", ttl).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn set_if_absent_never_overwrites_live_marker() {
        tokio::time::pause();
        let store = MemoryStore::new();
        let ttl = Duration::from_secs(30);

        assert!(store.set_if_absent("p", "1", ttl).await.unwrap());
        tokio::time::advance(Duration::from_secs(10)).await;
        assert!(!store.set_if_absent("p", "2", ttl).await.unwrap());

        let remaining = store.ttl("p").await.unwrap().unwrap();
        assert_eq!(remaining, Duration::from_secs(20));
        assert_eq!(store.get("p").await.unwrap().as_deref(), Some("1"));
    }

    #[tokio::test]
    async fn text_value_is_not_a_counter() {
        let store = MemoryStore::new();
        store
            .set_with_ttl("t", "hello", Duration::from_secs(5))
            .await
            .unwrap();
        assert!(matches!(
            store.incr_with_ttl("t", Duration::from_secs(5)).await,
            Err(StoreError::NotACounter(_))
        ));
    }

    #[tokio::test]
    async fn concurrent_increments_are_totally_ordered() {
        let store = Arc::new(MemoryStore::new());
        let mut handles = Vec::new();
        for _ in 0..50 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store
                    .incr_with_ttl("shared", Duration::from_secs(60))
                    .await
                    .unwrap()
            }));
        }
        let mut seen = Vec::new();
        for handle in handles {
            seen.push(handle.await.unwrap());
        }
        seen.sort_unstable();
        assert_eq!(seen, (1..=50).collect::<Vec<u64>>());
    }

    #[tokio::test]
    async fn purge_drops_expired_entries() {
        tokio::time::pause();
        let store = MemoryStore::new();
        store.set_with_ttl("a", "1", Duration::from_secs(1)).await.unwrap();
        store.set_with_ttl("b", "1", Duration::from_secs(100)).await.unwrap();
        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(store.purge_expired(), 1);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn departed_clients_do_not_accumulate() {
        let store = MemoryStore::new();
        let window = Duration::from_secs(60);

        for client in 0..500 {
            let key = format!("rl:ip:10.0.{}.{}:window", client / 256, client % 256);
            assert_eq!(store.incr_with_ttl(&key, window).await.unwrap(), 1);
            assert!(store.len() <= 2, "{} entries after client {client}", store.len());
            tokio::time::advance(Duration::from_secs(61)).await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn sweep_waits_for_the_interval() {
        let store = MemoryStore::with_sweep_interval(Duration::from_secs(300));
        for i in 0..10 {
            store
                .set_with_ttl(&format!("audit:{i}"), "{}", Duration::from_secs(1))
                .await
                .unwrap();
        }
        tokio::time::advance(Duration::from_secs(5)).await;
        store.set_with_ttl("audit:late", "{}", Duration::from_secs(1)).await.unwrap();
        assert_eq!(store.len(), 11);

        tokio::time::advance(Duration::from_secs(300)).await;
        store.set_with_ttl("audit:last", "{}", Duration::from_secs(1)).await.unwrap();
        assert_eq!(store.len(), 1);
    }
}
