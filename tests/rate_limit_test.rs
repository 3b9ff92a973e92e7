use async_trait::async_trait;
use axum::body::Body;
use futures::future::join_all;
use http::{Request, StatusCode};
use skygate::config::{FailPolicy, GatewayConfig, KeyScope};
use skygate::store::{CounterStore, MemoryCounterStore, StoreError};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;
use wiremock::{
    matchers::{method, path},
    Mock, MockServer, ResponseTemplate,
};

/// Store that is always down, for exercising the fail policy
struct UnavailableStore;

#[async_trait]
impl CounterStore for UnavailableStore {
    async fn increment_with_expiry(&self, _key: &str, _ttl: Duration) -> Result<i64, StoreError> {
        Err(StoreError::Unreachable("test outage".to_string()))
    }
}

fn test_config(upstream: &str, max_requests: u32, window_secs: u64) -> GatewayConfig {
    let yaml = format!(
        r#"
server:
  host: "127.0.0.1"
  port: 0
  timeout_secs: 5

routes:
  - path: "/booking-service/{{*path}}"
    upstream: "{upstream}"

rate_limit:
  max_requests: {max_requests}
  window_secs: {window_secs}
  trust_forwarded_for: true
"#
    );
    GatewayConfig::from_yaml(&yaml).unwrap()
}

async fn mock_upstream() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/booking-service/bookings"))
        .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
        .mount(&server)
        .await;
    server
}

fn request(client_ip: &str) -> Request<Body> {
    Request::builder()
        .uri("/booking-service/bookings")
        .header("X-Forwarded-For", client_ip)
        .body(Body::empty())
        .unwrap()
}

#[tokio::test]
async fn exactly_max_requests_allowed_per_window() {
    let upstream = mock_upstream().await;
    let config = test_config(&upstream.uri(), 5, 60);
    let app = skygate::build_app(&config, Arc::new(MemoryCounterStore::new())).unwrap();

    for i in 0..5 {
        let response = app.clone().oneshot(request("10.0.0.1")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK, "request {} should pass", i);
    }

    let response = app.clone().oneshot(request("10.0.0.1")).await.unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(
        response.headers().get("X-RateLimit-Remaining").unwrap(),
        "0"
    );
    assert!(response.headers().get("Retry-After").is_some());
}

#[tokio::test]
async fn denied_requests_still_consume_a_token() {
    let upstream = mock_upstream().await;
    let config = test_config(&upstream.uri(), 2, 60);
    let store = Arc::new(MemoryCounterStore::new());
    let app = skygate::build_app(&config, store.clone() as Arc<dyn CounterStore>).unwrap();

    for _ in 0..2 {
        let response = app.clone().oneshot(request("10.0.0.7")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
    let response = app.clone().oneshot(request("10.0.0.7")).await.unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);

    // The denied request was charged: the counter sits at 3, not 2
    assert_eq!(store.peek("skygate:ratelimit:10.0.0.7"), Some(3));

    // And the cumulative budget stays spent
    let response = app.clone().oneshot(request("10.0.0.7")).await.unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
}

#[tokio::test]
async fn window_expiry_resets_the_counter() {
    let upstream = mock_upstream().await;
    let config = test_config(&upstream.uri(), 2, 1);
    let app = skygate::build_app(&config, Arc::new(MemoryCounterStore::new())).unwrap();

    for _ in 0..2 {
        let response = app.clone().oneshot(request("10.0.0.2")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
    let response = app.clone().oneshot(request("10.0.0.2")).await.unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);

    tokio::time::sleep(Duration::from_millis(1100)).await;

    let response = app.clone().oneshot(request("10.0.0.2")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn concurrent_requests_never_exceed_max() {
    let upstream = mock_upstream().await;
    let config = test_config(&upstream.uri(), 5, 60);
    let app = skygate::build_app(&config, Arc::new(MemoryCounterStore::new())).unwrap();

    let responses = join_all(
        (0..20).map(|_| app.clone().oneshot(request("10.0.0.3"))),
    )
    .await;

    let allowed = responses
        .iter()
        .filter(|r| r.as_ref().unwrap().status() == StatusCode::OK)
        .count();
    let denied = responses
        .iter()
        .filter(|r| r.as_ref().unwrap().status() == StatusCode::TOO_MANY_REQUESTS)
        .count();

    assert_eq!(allowed, 5);
    assert_eq!(denied, 15);
}

#[tokio::test]
async fn distinct_clients_do_not_interfere() {
    let upstream = mock_upstream().await;
    let config = test_config(&upstream.uri(), 3, 60);
    let app = skygate::build_app(&config, Arc::new(MemoryCounterStore::new())).unwrap();

    for _ in 0..3 {
        let a = app.clone().oneshot(request("10.0.0.4")).await.unwrap();
        let b = app.clone().oneshot(request("10.0.0.5")).await.unwrap();
        assert_eq!(a.status(), StatusCode::OK);
        assert_eq!(b.status(), StatusCode::OK);
    }

    // Both clients spent their full budget independently
    let a = app.clone().oneshot(request("10.0.0.4")).await.unwrap();
    let b = app.clone().oneshot(request("10.0.0.5")).await.unwrap();
    assert_eq!(a.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(b.status(), StatusCode::TOO_MANY_REQUESTS);
}

#[tokio::test]
async fn per_route_scope_keeps_separate_buckets() {
    let upstream = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&upstream)
        .await;

    let yaml = format!(
        r#"
server: {{}}
routes:
  - path: "/auth-service/{{*path}}"
    upstream: "{0}"
  - path: "/booking-service/{{*path}}"
    upstream: "{0}"
rate_limit:
  max_requests: 2
  window_secs: 60
  scope: per_route
  trust_forwarded_for: true
"#,
        upstream.uri()
    );
    let config = GatewayConfig::from_yaml(&yaml).unwrap();
    assert_eq!(config.rate_limit.scope, KeyScope::PerRoute);
    let app = skygate::build_app(&config, Arc::new(MemoryCounterStore::new())).unwrap();

    let booking = |ip: &str| {
        Request::builder()
            .uri("/booking-service/bookings")
            .header("X-Forwarded-For", ip)
            .body(Body::empty())
            .unwrap()
    };
    let auth = |ip: &str| {
        Request::builder()
            .uri("/auth-service/users")
            .header("X-Forwarded-For", ip)
            .body(Body::empty())
            .unwrap()
    };

    for _ in 0..2 {
        let response = app.clone().oneshot(booking("10.0.0.6")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
    let response = app.clone().oneshot(booking("10.0.0.6")).await.unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);

    // The auth-service bucket for the same client is untouched
    let response = app.clone().oneshot(auth("10.0.0.6")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn spoofed_forwarded_for_cannot_mint_fresh_buckets() {
    let upstream = mock_upstream().await;
    let mut config = test_config(&upstream.uri(), 2, 60);
    config.rate_limit.trust_forwarded_for = false;
    let app = skygate::build_app(&config, Arc::new(MemoryCounterStore::new())).unwrap();

    // Rotating the header does nothing: all requests come from the same
    // peer, so they share one bucket
    for ip in ["10.0.0.20", "10.0.0.21"] {
        let response = app.clone().oneshot(request(ip)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
    let response = app.clone().oneshot(request("10.0.0.22")).await.unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
}

#[tokio::test]
async fn store_outage_fails_open_by_default() {
    let upstream = mock_upstream().await;
    let config = test_config(&upstream.uri(), 1, 60);
    assert_eq!(config.rate_limit.on_store_error, FailPolicy::Allow);
    let app = skygate::build_app(&config, Arc::new(UnavailableStore)).unwrap();

    // Far past the limit, but the store is down and policy is fail-open
    for _ in 0..5 {
        let response = app.clone().oneshot(request("10.0.0.8")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}

#[tokio::test]
async fn store_outage_fails_closed_when_configured() {
    let upstream = mock_upstream().await;
    let mut config = test_config(&upstream.uri(), 1, 60);
    config.rate_limit.on_store_error = FailPolicy::Deny;
    let app = skygate::build_app(&config, Arc::new(UnavailableStore)).unwrap();

    let response = app.clone().oneshot(request("10.0.0.9")).await.unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

    // Nothing was forwarded upstream
    assert!(upstream.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn disabled_limiter_never_charges() {
    let upstream = mock_upstream().await;
    let mut config = test_config(&upstream.uri(), 1, 60);
    config.rate_limit.enabled = false;
    let store = Arc::new(MemoryCounterStore::new());
    let app = skygate::build_app(&config, store.clone() as Arc<dyn CounterStore>).unwrap();

    for _ in 0..4 {
        let response = app.clone().oneshot(request("10.0.0.10")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
    assert_eq!(store.peek("skygate:ratelimit:10.0.0.10"), None);
}

#[tokio::test]
async fn health_endpoint_bypasses_the_limiter() {
    let upstream = mock_upstream().await;
    let config = test_config(&upstream.uri(), 1, 60);
    let store = Arc::new(MemoryCounterStore::new());
    let app = skygate::build_app(&config, store.clone() as Arc<dyn CounterStore>).unwrap();

    for _ in 0..3 {
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/health")
                    .header("X-Forwarded-For", "10.0.0.11")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
    assert_eq!(store.peek("skygate:ratelimit:10.0.0.11"), None);
}
