use crate::error::{GatewayError, Result};
use crate::router::Router;
use axum::{
    body::Body,
    extract::{Request, State},
    http::{HeaderMap, Method, Response},
    response::IntoResponse,
};
use bytes::Bytes;
use http_body_util::BodyExt;
use metrics::counter;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Proxy handler state
#[derive(Clone)]
pub struct ProxyState {
    pub router: Arc<Router>,
    pub client: reqwest::Client,
}

impl ProxyState {
    /// Create a new proxy state with a bounded upstream timeout.
    ///
    /// The shared client enforces the deadline on every forward, so one slow
    /// upstream cannot pin gateway workers indefinitely.
    pub fn new(router: Router, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| GatewayError::Internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            router: Arc::new(router),
            client,
        })
    }
}

/// Forward a request to its configured upstream and relay the response.
///
/// Requests are never retried against the upstream: a forward that fails
/// surfaces as 502/504 and retrying non-idempotent traffic is the upstream
/// service's own concern. Dropping this future (client disconnect) cancels
/// the in-flight upstream call; the rate limit token was already charged by
/// the middleware and is not refunded.
pub async fn proxy_handler(
    State(state): State<ProxyState>,
    req: Request<Body>,
) -> Result<impl IntoResponse> {
    let method = req.method().clone();
    let uri = req.uri().clone();
    let path = uri.path();

    counter!("skygate_requests_total").increment(1);

    info!(method = %method, path = %path, "Incoming request");

    let route = match state.router.match_route(path, &method) {
        Ok(route) => route,
        Err(e) => {
            debug!(path = %path, error = %e, "No route matched");
            return Err(e);
        }
    };

    let mut upstream_url = route.upstream_url(path);
    if let Some(query) = uri.query() {
        upstream_url.push('?');
        upstream_url.push_str(query);
    }

    debug!(upstream_url = %upstream_url, "Forwarding to upstream");

    let headers = req.headers().clone();
    let body_bytes = req
        .into_body()
        .collect()
        .await
        .map_err(|e| GatewayError::Proxy(format!("Failed to read request body: {}", e)))?
        .to_bytes();

    let response = send_request(&state.client, method.clone(), headers, body_bytes, &upstream_url).await;

    match &response {
        Ok(resp) => {
            info!(method = %method, path = %path, status = %resp.status(), "Request completed");
        }
        Err(e) => {
            counter!("skygate_upstream_errors_total").increment(1);
            warn!(method = %method, path = %path, error = %e, "Upstream request failed");
        }
    }

    response
}

/// Send the request to the upstream service and rebuild its response
async fn send_request(
    client: &reqwest::Client,
    method: Method,
    headers: HeaderMap,
    body_bytes: Bytes,
    upstream_url: &str,
) -> Result<Response<Body>> {
    let mut upstream_req = client
        .request(method, upstream_url)
        .body(body_bytes.to_vec());

    // Forward headers, excluding hop-by-hop ones
    for (name, value) in headers.iter() {
        if !is_hop_by_hop_header(name.as_str()) {
            upstream_req = upstream_req.header(name, value);
        }
    }

    let upstream_response = upstream_req.send().await.map_err(|e| {
        if e.is_timeout() {
            GatewayError::UpstreamTimeout(format!("Upstream request timed out: {}", e))
        } else if e.is_connect() {
            GatewayError::UpstreamUnavailable(format!("Failed to connect to upstream: {}", e))
        } else {
            GatewayError::Proxy(format!("Upstream request failed: {}", e))
        }
    })?;

    let status = upstream_response.status();
    let mut response_builder = Response::builder().status(status);

    for (name, value) in upstream_response.headers().iter() {
        if !is_hop_by_hop_header(name.as_str()) {
            response_builder = response_builder.header(name, value);
        }
    }

    let body_bytes = upstream_response.bytes().await.map_err(|e| {
        GatewayError::UpstreamUnavailable(format!("Failed to read upstream response: {}", e))
    })?;

    response_builder
        .body(Body::from(body_bytes))
        .map_err(|e| GatewayError::Internal(format!("Failed to build response: {}", e)))
}

/// Check if a header is a hop-by-hop header that should not be forwarded
fn is_hop_by_hop_header(name: &str) -> bool {
    matches!(
        name.to_lowercase().as_str(),
        "connection"
            | "keep-alive"
            | "proxy-authenticate"
            | "proxy-authorization"
            | "te"
            | "trailers"
            | "transfer-encoding"
            | "upgrade"
    )
}
