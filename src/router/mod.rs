use crate::config::RouteConfig;
use crate::error::{GatewayError, Result};
use http::Method;
use matchit::Router as MatchitRouter;

/// A configured route, immutable after startup
#[derive(Debug, Clone)]
pub struct Route {
    /// Upstream service base URL
    pub upstream: String,
    /// Allowed HTTP methods (empty means all methods allowed)
    pub methods: Vec<Method>,
    /// Static prefix of the route pattern, used when stripping
    pub prefix: String,
    /// Whether to strip the prefix when forwarding
    pub strip_prefix: bool,
}

/// Gateway router mapping incoming path/method to an upstream service
#[derive(Debug, Clone)]
pub struct Router {
    matcher: MatchitRouter<Route>,
}

impl Router {
    /// Build the route table once from configuration
    pub fn new(routes: &[RouteConfig]) -> Result<Self> {
        let mut matcher = MatchitRouter::new();

        for route_config in routes {
            let methods = route_config
                .methods
                .iter()
                .map(|m| {
                    Method::from_bytes(m.to_uppercase().as_bytes())
                        .map_err(|_| GatewayError::InvalidMethod(m.clone()))
                })
                .collect::<Result<Vec<_>>>()?;

            let route = Route {
                upstream: route_config.upstream.trim_end_matches('/').to_string(),
                methods,
                prefix: static_prefix(&route_config.path),
                strip_prefix: route_config.strip_prefix,
            };

            matcher
                .insert(&route_config.path, route)
                .map_err(|e| GatewayError::InvalidRoute(format!("{}: {}", route_config.path, e)))?;
        }

        Ok(Self { matcher })
    }

    /// Match a request path and method to a route
    pub fn match_route(&self, path: &str, method: &Method) -> Result<&Route> {
        let matched = self
            .matcher
            .at(path)
            .map_err(|_| GatewayError::RouteNotFound(path.to_string()))?;

        let route = matched.value;

        if !route.methods.is_empty() && !route.methods.contains(method) {
            return Err(GatewayError::InvalidMethod(format!(
                "Method {} not allowed for path {}",
                method, path
            )));
        }

        Ok(route)
    }
}

impl Route {
    /// Build the upstream URL for a request path
    pub fn upstream_url(&self, original_path: &str) -> String {
        if self.strip_prefix {
            let remaining = original_path
                .strip_prefix(&self.prefix)
                .unwrap_or(original_path);
            if remaining.starts_with('/') || remaining.is_empty() {
                format!("{}{}", self.upstream, remaining)
            } else {
                format!("{}/{}", self.upstream, remaining)
            }
        } else {
            format!("{}{}", self.upstream, original_path)
        }
    }
}

/// Static portion of a matchit pattern, up to the first parameter or
/// wildcard segment. `/booking-service/{*path}` -> `/booking-service`.
fn static_prefix(pattern: &str) -> String {
    let end = pattern.find('{').unwrap_or(pattern.len());
    pattern[..end].trim_end_matches('/').to_string()
}
