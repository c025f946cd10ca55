//! Shared key/value store used by the rate limiter and the audit mirror.
//!
//! # Data Flow
//! ```text
//! rate_limit  → incr_with_ttl (window counters)
//!             → set_if_absent / ttl (penalty markers)
//! audit       → set_with_ttl (mirrored events)
//! ```
//!
//! # Design Decisions
//! - The production store client is an external collaborator; this module
//!   only fixes the narrow interface the gateway consumes
//! - Increment and TTL-set are one atomic step in every implementation
//! - `MemoryStore` is the in-process fallback and is not cross-process correct

pub mod memory;

use std::time::Duration;

use async_trait::async_trait;

pub use memory::MemoryStore;

/// Error returned by store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("value at '{0}' is not an integer counter")]
    NotACounter(String),

    #[error("store operation timed out")]
    Timeout,
}

/// Narrow interface onto the shared key/value store.
#[async_trait]
pub trait SharedStore: Send + Sync {
    /// Atomically increment `key` and (re)set its TTL. Returns the new value.
    async fn incr_with_ttl(&self, key: &str, ttl: Duration) -> Result<u64, StoreError>;

    /// Set `key` only if absent. Returns true when this call created it.
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration)
        -> Result<bool, StoreError>;

    /// Overwrite `key` with a TTL.
    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError>;

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Remaining TTL, or `None` when the key does not exist.
    async fn ttl(&self, key: &str) -> Result<Option<Duration>, StoreError>;

    /// Release connections. Called once during shutdown.
    async fn close(&self) -> Result<(), StoreError> {
        Ok(())
    }
}
