use super::slot::key_slot;
use super::{CounterStore, StoreError};
use async_trait::async_trait;
use redis::{aio::ConnectionManager, Script};
use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Lua script for the atomic increment-with-expiry primitive.
///
/// KEYS[1] = the counter key
/// ARGV[1] = window duration (seconds)
///
/// The expiry is applied in the same script invocation as the increment, so
/// a counter can never be created without a TTL. A counter found with no TTL
/// (e.g., written by an older deployment) is healed on the next call.
///
/// Returns: the counter value after the increment.
const INCREMENT_WITH_EXPIRY_SCRIPT: &str = r#"
local current = redis.call('INCR', KEYS[1])

if current == 1 then
    redis.call('EXPIRE', KEYS[1], ARGV[1])
elseif redis.call('TTL', KEYS[1]) == -1 then
    redis.call('EXPIRE', KEYS[1], ARGV[1])
end

return current
"#;

/// Cluster-aware counter store client.
///
/// Maps each key to its owning shard with the cluster CRC16 slot function
/// and keeps a slot routing table that is updated only from `MOVED`/`ASK`
/// redirections returned by the store itself. The gateway never manages
/// cluster topology; it only reacts to what the store reports.
pub struct ClusterCounterStore {
    /// Seed node URLs supplied at startup
    seeds: Vec<String>,
    /// Slot -> node URL, learned from redirections
    slots: RwLock<HashMap<u16, String>>,
    /// One managed connection per node, created lazily
    connections: Mutex<HashMap<String, ConnectionManager>>,
    /// Redirect hop budget per operation
    max_redirects: u32,
    /// Per-operation deadline
    op_timeout: Duration,
}

impl ClusterCounterStore {
    /// Create a new cluster store client from seed node URLs.
    ///
    /// Connections are established lazily on first use, so construction
    /// never blocks on the store being up.
    pub fn new(seeds: Vec<String>, max_redirects: u32, op_timeout: Duration) -> Self {
        assert!(!seeds.is_empty(), "at least one seed node is required");
        Self {
            seeds,
            slots: RwLock::new(HashMap::new()),
            connections: Mutex::new(HashMap::new()),
            max_redirects,
            op_timeout,
        }
    }

    /// Pick the node to try first for a slot: the learned owner if we have
    /// one, otherwise a seed chosen deterministically from the slot.
    fn route_for(&self, slot: u16) -> String {
        if let Some(addr) = self.slots.read().expect("slot map poisoned").get(&slot) {
            return addr.clone();
        }
        self.seeds[slot as usize % self.seeds.len()].clone()
    }

    /// Next seed to try after a failed node, wrapping around the seed list
    fn next_seed(&self, failed: &str) -> String {
        let idx = self
            .seeds
            .iter()
            .position(|s| s == failed)
            .map(|i| (i + 1) % self.seeds.len())
            .unwrap_or(0);
        self.seeds[idx].clone()
    }

    /// Record a slot ownership change reported by the store
    fn record_move(&self, slot: u16, addr: &str) {
        debug!(slot, addr, "Following slot redirection");
        self.slots
            .write()
            .expect("slot map poisoned")
            .insert(slot, addr.to_string());
    }

    /// Get or lazily create the managed connection for a node
    async fn connection_for(&self, addr: &str) -> Result<ConnectionManager, StoreError> {
        let mut connections = self.connections.lock().await;
        if let Some(conn) = connections.get(addr) {
            return Ok(conn.clone());
        }

        let client = redis::Client::open(addr)
            .map_err(|e| StoreError::Unreachable(format!("invalid node URL {}: {}", addr, e)))?;
        let conn = tokio::time::timeout(self.op_timeout, ConnectionManager::new(client))
            .await
            .map_err(|_| StoreError::Timeout)?
            .map_err(|e| StoreError::Unreachable(format!("connect to {} failed: {}", addr, e)))?;

        connections.insert(addr.to_string(), conn.clone());
        Ok(conn)
    }

    /// Drop a cached connection after a node failure so the next attempt
    /// reconnects from scratch
    async fn drop_connection(&self, addr: &str) {
        self.connections.lock().await.remove(addr);
    }
}

/// Normalize a `host:port` address from a redirection into a node URL
fn normalize_node_addr(addr: &str) -> String {
    if addr.starts_with("redis://") || addr.starts_with("rediss://") {
        addr.to_string()
    } else {
        format!("redis://{}", addr)
    }
}

#[async_trait]
impl CounterStore for ClusterCounterStore {
    async fn increment_with_expiry(&self, key: &str, ttl: Duration) -> Result<i64, StoreError> {
        let slot = key_slot(key);
        let mut target = self.route_for(slot);
        let mut hops = 0u32;
        let mut failed_nodes = 0usize;
        // One shot at every seed before declaring the store down
        let node_budget = self.seeds.len().max(1);

        loop {
            let mut conn = match self.connection_for(&target).await {
                Ok(conn) => conn,
                Err(e) => {
                    failed_nodes += 1;
                    if failed_nodes >= node_budget {
                        return Err(e);
                    }
                    warn!(node = %target, error = %e, "Counter store node unreachable, trying next seed");
                    target = self.next_seed(&target);
                    continue;
                }
            };

            let script = Script::new(INCREMENT_WITH_EXPIRY_SCRIPT);
            let mut invocation = script.key(key);
            invocation.arg(ttl.as_secs());
            let op = invocation.invoke_async::<_, i64>(&mut conn);

            match tokio::time::timeout(self.op_timeout, op).await {
                Ok(Ok(value)) => return Ok(value),
                Ok(Err(e)) => {
                    // Slot moved to another node: follow the redirection,
                    // bounded so a flapping topology cannot loop us forever.
                    if let Some((addr, moved_slot)) = e.redirect_node() {
                        hops += 1;
                        if hops > self.max_redirects {
                            return Err(StoreError::TooManyRedirects(self.max_redirects));
                        }
                        let addr = normalize_node_addr(addr);
                        self.record_move(moved_slot, &addr);
                        target = addr;
                        continue;
                    }

                    if e.is_io_error() || e.is_connection_refusal() || e.is_connection_dropped() {
                        self.drop_connection(&target).await;
                        failed_nodes += 1;
                        if failed_nodes >= node_budget {
                            return Err(StoreError::Unreachable(e.to_string()));
                        }
                        warn!(node = %target, error = %e, "Counter store node failed, trying next seed");
                        target = self.next_seed(&target);
                        continue;
                    }

                    return Err(StoreError::Unreachable(e.to_string()));
                }
                Err(_) => {
                    self.drop_connection(&target).await;
                    failed_nodes += 1;
                    if failed_nodes >= node_budget {
                        return Err(StoreError::Timeout);
                    }
                    warn!(node = %target, "Counter store operation timed out, trying next seed");
                    target = self.next_seed(&target);
                }
            }
        }
    }
}
