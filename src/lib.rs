pub mod config;
pub mod error;
pub mod metrics;
pub mod proxy;
pub mod rate_limit;
pub mod router;
pub mod store;

use crate::config::GatewayConfig;
use crate::error::Result;
use crate::metrics::{metrics_handler, MetricsService};
use crate::proxy::{proxy_handler, ProxyState};
use crate::rate_limit::{rate_limit_middleware, RateLimiterState};
use crate::router::Router;
use crate::store::{ClusterCounterStore, CounterStore, MemoryCounterStore};
use axum::{middleware, routing::get, Json, Router as AxumRouter};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Build the per-request pipeline: rate limiter wrapped around the router
/// and proxy, in that fixed order, plus the gateway's own actuator routes.
///
/// Takes the counter store as a capability so callers (and tests) choose the
/// backend; [`init_gateway`] wires the one described by the configuration.
pub fn build_app(config: &GatewayConfig, store: Arc<dyn CounterStore>) -> Result<AxumRouter> {
    config.validate()?;

    let router = Router::new(&config.routes)?;
    let proxy_state = ProxyState::new(router, Duration::from_secs(config.server.timeout_secs))?;
    let limiter = RateLimiterState::new(store, config.rate_limit.clone());

    let app = AxumRouter::new()
        .route("/health", get(health))
        .route("/readiness", get(health))
        .fallback(proxy_handler)
        .with_state(proxy_state)
        .layer(middleware::from_fn_with_state(
            limiter,
            rate_limit_middleware,
        ));

    Ok(app)
}

/// Construct the counter store the configuration asks for: the cluster
/// client when seed nodes are given, the in-process store otherwise.
pub fn build_store(config: &GatewayConfig) -> Arc<dyn CounterStore> {
    let rl = &config.rate_limit;
    if rl.store_nodes.is_empty() {
        info!("No counter store nodes configured, using in-process store");
        Arc::new(MemoryCounterStore::new())
    } else {
        info!(nodes = rl.store_nodes.len(), "Using cluster counter store");
        Arc::new(ClusterCounterStore::new(
            rl.store_nodes.clone(),
            rl.max_redirects,
            Duration::from_millis(rl.store_timeout_ms),
        ))
    }
}

/// Initialize and run the gateway server
pub async fn init_gateway(config: GatewayConfig) -> Result<()> {
    info!("Starting API gateway");
    info!(
        "Server listening on {}:{}",
        config.server.host, config.server.port
    );

    let metrics_service = MetricsService::new()?;
    let store = build_store(&config);

    let app = build_app(&config, store)?
        .route("/metrics", get(metrics_handler).with_state(metrics_service))
        .layer(TraceLayer::new_for_http());

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(crate::error::GatewayError::Io)?;

    info!("Gateway ready to accept connections");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .map_err(|e| crate::error::GatewayError::Internal(format!("Server error: {}", e)))?;

    Ok(())
}

/// Actuator endpoint; bypasses the rate limiter and the router
async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "UP" }))
}

/// Initialize tracing/logging
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "skygate=debug,tower_http=debug".into()),
        )
        .with_target(false)
        .compact()
        .init();
}
