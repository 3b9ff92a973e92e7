use crate::error::{GatewayError, Result};
use axum::{body::Body, extract::State, http::Response, response::IntoResponse};
use metrics::describe_counter;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::Arc;
use tracing::info;

/// Metrics service exposing Prometheus counters
#[derive(Clone)]
pub struct MetricsService {
    handle: Arc<PrometheusHandle>,
}

impl MetricsService {
    /// Install the global recorder and register metric descriptions.
    /// Call once per process.
    pub fn new() -> Result<Self> {
        let handle = PrometheusBuilder::new().install_recorder().map_err(|e| {
            GatewayError::Internal(format!("Failed to install metrics recorder: {}", e))
        })?;

        Self::register_metrics();

        info!("Metrics service initialized");

        Ok(Self {
            handle: Arc::new(handle),
        })
    }

    fn register_metrics() {
        describe_counter!(
            "skygate_requests_total",
            "Total number of HTTP requests received"
        );
        describe_counter!(
            "skygate_rate_limited_total",
            "Total number of requests rejected with 429"
        );
        describe_counter!(
            "skygate_store_errors_total",
            "Total number of counter store failures (fail-open/fail-closed events)"
        );
        describe_counter!(
            "skygate_upstream_errors_total",
            "Total number of upstream forward failures"
        );
    }

    /// Render metrics in Prometheus exposition format
    pub fn render(&self) -> String {
        self.handle.render()
    }
}

/// `/metrics` endpoint handler
pub async fn metrics_handler(State(service): State<MetricsService>) -> impl IntoResponse {
    Response::builder()
        .header("Content-Type", "text/plain; version=0.0.4")
        .body(Body::from(service.render()))
        .unwrap_or_else(|_| Response::new(Body::empty()))
}
