use super::policy::{self, Decision};
use super::types::RateLimitKey;
use crate::config::{FailPolicy, RateLimitConfig};
use crate::error::GatewayError;
use crate::store::CounterStore;
use axum::{
    extract::{ConnectInfo, Request, State},
    http::{HeaderMap, HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use metrics::counter;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Paths served by the gateway itself; never charged against a client bucket
const BYPASS_PATHS: &[&str] = &["/health", "/readiness", "/metrics"];

/// Rate limiter middleware state
#[derive(Clone)]
pub struct RateLimiterState {
    /// The counter store backing the limiter
    store: Arc<dyn CounterStore>,
    /// Window configuration, immutable for the process lifetime
    config: RateLimitConfig,
}

impl RateLimiterState {
    pub fn new(store: Arc<dyn CounterStore>, config: RateLimitConfig) -> Self {
        Self { store, config }
    }
}

/// Axum middleware enforcing the rate limit.
///
/// Performs exactly one store increment per inbound request, allowed or
/// denied, so a denied client cannot probe for free. The token is charged
/// before routing; a client that disconnects mid-upstream keeps the charge.
pub async fn rate_limit_middleware(
    State(state): State<RateLimiterState>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    request: Request,
    next: Next,
) -> Response {
    let path = request.uri().path();

    if !state.config.enabled || BYPASS_PATHS.contains(&path) {
        return next.run(request).await;
    }

    let client = client_identity(
        state.config.trust_forwarded_for,
        request.headers(),
        connect_info.as_ref(),
    );
    let key = RateLimitKey::derive(state.config.scope, &client, path);
    let window = Duration::from_secs(state.config.window_secs);

    let current = match state
        .store
        .increment_with_expiry(&key.to_store_key(), window)
        .await
    {
        Ok(current) => current,
        Err(e) => {
            counter!("skygate_store_errors_total").increment(1);
            warn!(error = %e, client = %client, "Counter store unavailable");

            return match state.config.on_store_error {
                FailPolicy::Allow => {
                    debug!(client = %client, "Failing open, request proceeds unlimited");
                    next.run(request).await
                }
                FailPolicy::Deny => {
                    GatewayError::StoreUnavailable(e.to_string()).into_response()
                }
            };
        }
    };

    match policy::decide(current, state.config.max_requests) {
        Decision::Deny => {
            counter!("skygate_rate_limited_total").increment(1);
            warn!(
                client = %client,
                current,
                limit = state.config.max_requests,
                "Rate limit exceeded"
            );
            rate_limited_response(state.config.max_requests, state.config.window_secs)
        }
        Decision::Allow => {
            debug!(client = %client, current, "Rate limit check passed");
            let remaining = policy::remaining(current, state.config.max_requests);
            let mut response = next.run(request).await;
            apply_rate_limit_headers(
                response.headers_mut(),
                state.config.max_requests,
                remaining,
            );
            response
        }
    }
}

/// Derive the client identity for the rate limit key.
///
/// The first `X-Forwarded-For` hop wins only when the configuration says the
/// header can be trusted (gateway behind a reverse proxy that overwrites
/// it); otherwise the peer address from the connection is used, so a
/// directly-connected client cannot mint fresh buckets by spoofing headers.
fn client_identity(
    trust_forwarded_for: bool,
    headers: &HeaderMap,
    connect_info: Option<&ConnectInfo<SocketAddr>>,
) -> String {
    if trust_forwarded_for {
        if let Some(forwarded) = headers.get("X-Forwarded-For").and_then(|v| v.to_str().ok()) {
            if let Some(first) = forwarded.split(',').next() {
                let first = first.trim();
                if !first.is_empty() {
                    return first.to_string();
                }
            }
        }
    }

    connect_info
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Build the 429 response with a machine-readable reason body
fn rate_limited_response(limit: u32, window_secs: u64) -> Response {
    let mut headers = HeaderMap::new();
    apply_rate_limit_headers(&mut headers, limit, 0);
    if let Ok(retry) = HeaderValue::from_str(&window_secs.to_string()) {
        headers.insert("Retry-After", retry);
    }

    let body = serde_json::json!({
        "error": format!("Rate limit of {} requests per {} seconds exceeded", limit, window_secs),
        "status": 429,
        "limit": limit,
        "retry_after": window_secs,
    });

    (StatusCode::TOO_MANY_REQUESTS, headers, body.to_string()).into_response()
}

fn apply_rate_limit_headers(headers: &mut HeaderMap, limit: u32, remaining: i64) {
    if let Ok(value) = HeaderValue::from_str(&limit.to_string()) {
        headers.insert("X-RateLimit-Limit", value);
    }
    if let Ok(value) = HeaderValue::from_str(&remaining.to_string()) {
        headers.insert("X-RateLimit-Remaining", value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(ip: &str) -> ConnectInfo<SocketAddr> {
        ConnectInfo(format!("{}:40000", ip).parse().unwrap())
    }

    #[test]
    fn test_client_identity_prefers_forwarded_for_when_trusted() {
        let mut headers = HeaderMap::new();
        headers.insert("X-Forwarded-For", "203.0.113.9, 10.0.0.1".parse().unwrap());

        let info = addr("192.168.1.1");
        assert_eq!(client_identity(true, &headers, Some(&info)), "203.0.113.9");
    }

    #[test]
    fn test_client_identity_ignores_forwarded_for_when_untrusted() {
        let mut headers = HeaderMap::new();
        headers.insert("X-Forwarded-For", "203.0.113.9".parse().unwrap());

        // A spoofed header must not change the bucket identity
        let info = addr("192.168.1.1");
        assert_eq!(client_identity(false, &headers, Some(&info)), "192.168.1.1");
    }

    #[test]
    fn test_client_identity_falls_back_to_peer() {
        let headers = HeaderMap::new();
        let info = addr("192.168.1.1");
        assert_eq!(client_identity(true, &headers, Some(&info)), "192.168.1.1");
    }

    #[test]
    fn test_client_identity_without_connection_info() {
        let headers = HeaderMap::new();
        assert_eq!(client_identity(true, &headers, None), "unknown");
    }

    #[test]
    fn test_rate_limited_response_shape() {
        let response = rate_limited_response(5, 60);
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);

        let headers = response.headers();
        assert_eq!(headers.get("X-RateLimit-Limit").unwrap(), "5");
        assert_eq!(headers.get("X-RateLimit-Remaining").unwrap(), "0");
        assert_eq!(headers.get("Retry-After").unwrap(), "60");
    }
}
