use crate::error::{GatewayError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Main gateway configuration
///
/// Loaded once at startup and held immutable for the process lifetime; every
/// component receives the slice of it that it needs, there is no ambient
/// global lookup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Server configuration
    pub server: ServerConfig,
    /// Route definitions
    pub routes: Vec<RouteConfig>,
    /// Rate limiting configuration
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Server host address
    #[serde(default = "default_host")]
    pub host: String,
    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,
    /// Upstream request timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

/// Route configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteConfig {
    /// Route path pattern (e.g., "/booking-service/{*path}")
    pub path: String,
    /// Upstream service base URL
    pub upstream: String,
    /// Allowed HTTP methods (if empty, all methods allowed)
    #[serde(default)]
    pub methods: Vec<String>,
    /// Whether to strip the matched prefix when forwarding
    #[serde(default)]
    pub strip_prefix: bool,
    /// Route description
    #[serde(default)]
    pub description: String,
}

/// What a rate limit key is scoped to
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum KeyScope {
    /// One bucket per client across all routes
    #[default]
    Global,
    /// Separate bucket per client per matched route
    PerRoute,
}

/// Behavior when the counter store is unreachable
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum FailPolicy {
    /// Fail open: let the request through (default)
    #[default]
    Allow,
    /// Fail closed: reject the request with 503
    Deny,
}

/// Rate limiting configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Enable the rate limiter
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Maximum number of requests allowed per window
    #[serde(default = "default_max_requests")]
    pub max_requests: u32,
    /// Window duration in seconds
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,
    /// Key scope: one bucket per client, or per client per route
    #[serde(default)]
    pub scope: KeyScope,
    /// Fail-open / fail-closed policy on store outage
    #[serde(default)]
    pub on_store_error: FailPolicy,
    /// Trust the `X-Forwarded-For` header for client identity.
    ///
    /// Enable only when the gateway sits behind a reverse proxy that
    /// overwrites the header; on a directly-exposed gateway a client could
    /// otherwise rotate spoofed values to mint fresh buckets. When off
    /// (the default), identity comes from the peer address.
    #[serde(default)]
    pub trust_forwarded_for: bool,
    /// Counter store seed node URLs (empty means in-memory store)
    #[serde(default)]
    pub store_nodes: Vec<String>,
    /// Maximum redirection hops to follow on shard ownership changes
    #[serde(default = "default_max_redirects")]
    pub max_redirects: u32,
    /// Per-operation store timeout in milliseconds
    #[serde(default = "default_store_timeout_ms")]
    pub store_timeout_ms: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            max_requests: default_max_requests(),
            window_secs: default_window_secs(),
            scope: KeyScope::default(),
            on_store_error: FailPolicy::default(),
            trust_forwarded_for: false,
            store_nodes: vec![],
            max_redirects: default_max_redirects(),
            store_timeout_ms: default_store_timeout_ms(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_timeout() -> u64 {
    30
}

fn default_max_requests() -> u32 {
    10
}

fn default_window_secs() -> u64 {
    60
}

fn default_max_redirects() -> u32 {
    3
}

fn default_store_timeout_ms() -> u64 {
    500
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            timeout_secs: default_timeout(),
        }
    }
}

impl GatewayConfig {
    /// Load configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| GatewayError::Config(format!("Failed to read config file: {}", e)))?;

        Self::from_yaml(&content)
    }

    /// Parse configuration from YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml)
            .map_err(|e| GatewayError::Config(format!("Failed to parse config: {}", e)))
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        for route in &self.routes {
            if route.path.is_empty() {
                return Err(GatewayError::InvalidRoute(
                    "Route path cannot be empty".to_string(),
                ));
            }

            if !route.upstream.starts_with("http://") && !route.upstream.starts_with("https://") {
                return Err(GatewayError::InvalidRoute(format!(
                    "Upstream URL must start with http:// or https:// for route: {}",
                    route.path
                )));
            }

            for method in &route.methods {
                let method_upper = method.to_uppercase();
                if !["GET", "POST", "PUT", "DELETE", "PATCH", "HEAD", "OPTIONS"]
                    .contains(&method_upper.as_str())
                {
                    return Err(GatewayError::InvalidRoute(format!(
                        "Invalid HTTP method '{}' for route: {}",
                        method, route.path
                    )));
                }
            }
        }

        if self.rate_limit.enabled {
            if self.rate_limit.max_requests == 0 {
                return Err(GatewayError::Config(
                    "Rate limit max_requests must be > 0".to_string(),
                ));
            }
            if self.rate_limit.window_secs == 0 {
                return Err(GatewayError::Config(
                    "Rate limit window_secs must be > 0".to_string(),
                ));
            }
            if self.rate_limit.max_redirects == 0 {
                return Err(GatewayError::Config(
                    "Rate limit max_redirects must be > 0".to_string(),
                ));
            }
        }

        Ok(())
    }
}
