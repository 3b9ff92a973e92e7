use super::{CounterStore, StoreError};
use async_trait::async_trait;
use dashmap::DashMap;
use std::time::{Duration, Instant};

/// Single counter entry; replaced in place once its window has passed
struct CounterEntry {
    value: i64,
    expires_at: Instant,
}

/// In-process counter store.
///
/// Carries the same contract as the cluster store: the increment is atomic
/// (the map entry is held exclusively for the whole read-modify-write) and a
/// counter always has an expiry. Used when no seed nodes are configured,
/// which keeps single-node deployments and the test suite off the network.
/// It does not coordinate across processes; multi-node gateways need the
/// cluster store.
#[derive(Default)]
pub struct MemoryCounterStore {
    counters: DashMap<String, CounterEntry>,
}

impl MemoryCounterStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current value of a counter, if it exists and has not expired.
    /// Exposed so operators (and tests) can inspect a bucket without
    /// charging it.
    pub fn peek(&self, key: &str) -> Option<i64> {
        self.counters
            .get(key)
            .filter(|entry| entry.expires_at > Instant::now())
            .map(|entry| entry.value)
    }
}

#[async_trait]
impl CounterStore for MemoryCounterStore {
    async fn increment_with_expiry(&self, key: &str, ttl: Duration) -> Result<i64, StoreError> {
        let now = Instant::now();
        let mut entry = self
            .counters
            .entry(key.to_string())
            .or_insert_with(|| CounterEntry {
                value: 0,
                expires_at: now + ttl,
            });

        // Window boundary: an expired counter restarts at zero with a fresh
        // TTL, mirroring key expiry in the external store
        if entry.expires_at <= now {
            entry.value = 0;
            entry.expires_at = now + ttl;
        }

        entry.value += 1;
        Ok(entry.value)
    }
}
