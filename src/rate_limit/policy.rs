//! Pure rate limit decision logic. No I/O, no clock: time accounting is
//! entirely delegated to the counter store's key expiry.

/// Outcome of a rate limit check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Deny,
}

/// Decide whether a request may proceed.
///
/// `current` is the counter value *after* the increment for this request has
/// already happened, so `current <= max` allows exactly `max` requests per
/// window: the request that pushes the count to `max + 1` is the first one
/// denied.
pub fn decide(current: i64, max: u32) -> Decision {
    if current <= i64::from(max) {
        Decision::Allow
    } else {
        Decision::Deny
    }
}

/// Requests left in the window after this one, clamped at zero
pub fn remaining(current: i64, max: u32) -> i64 {
    (i64::from(max) - current).max(0)
}
