//! Counter store abstraction for the distributed rate limiter.
//!
//! The store exposes exactly one mutating primitive: an atomic
//! increment-with-expiry. The gateway never reads a counter and writes it
//! back; the store's atomicity is the sole synchronization point across
//! gateway workers and gateway nodes.

pub mod cluster;
pub mod memory;
pub mod slot;

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

pub use cluster::ClusterCounterStore;
pub use memory::MemoryCounterStore;

/// Errors surfaced by a counter store
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("counter store unreachable: {0}")]
    Unreachable(String),

    #[error("redirect budget exhausted after {0} hops")]
    TooManyRedirects(u32),

    #[error("counter store operation timed out")]
    Timeout,
}

/// Atomic counter capability backed by a (possibly sharded) key-value store
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Atomically increment the counter at `key` by 1 and return the new
    /// value.
    ///
    /// If the key did not previously exist it is created with `ttl` applied
    /// as part of the same atomic operation, so no counter is ever left
    /// without an expiry. Implementations must also self-heal a counter
    /// found without a TTL.
    async fn increment_with_expiry(&self, key: &str, ttl: Duration) -> Result<i64, StoreError>;
}
