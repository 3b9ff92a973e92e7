//! Distributed rate limiting.
//!
//! Split into three pieces with one-way dependencies:
//!
//! - [`types`]: key derivation from client identity and scope
//! - [`policy`]: the pure allow/deny decision
//! - [`middleware`]: glue between the request path and the counter store
//!
//! The store increment is the only synchronization point; the middleware
//! holds no per-key locks of its own, so the `max`-per-window guarantee
//! holds across gateway processes, not just within one.

pub mod middleware;
pub mod policy;
pub mod types;

pub use middleware::{rate_limit_middleware, RateLimiterState};
pub use policy::{decide, Decision};
pub use types::RateLimitKey;
