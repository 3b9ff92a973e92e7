use crate::config::KeyScope;

/// Prefix for every counter key the gateway writes
const KEY_PREFIX: &str = "skygate:ratelimit";

/// Rate limit key for one client's bucket.
///
/// Derivation contract: the key is `skygate:ratelimit:{client}` for global
/// scope, or `skygate:ratelimit:{client}:{route}` for per-route scope, where
/// `client` is the client IP and `route` is the first path segment of the
/// request (the service prefix). The same client always maps to the same key
/// within a scope, and distinct clients never collide because the IP is
/// embedded verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RateLimitKey {
    /// Client identifier (source IP)
    pub client: String,
    /// Route bucket, present only under per-route scope
    pub route: Option<String>,
}

impl RateLimitKey {
    /// Derive the key for a request
    pub fn derive(scope: KeyScope, client: &str, path: &str) -> Self {
        let route = match scope {
            KeyScope::Global => None,
            KeyScope::PerRoute => Some(first_segment(path).to_string()),
        };

        Self {
            client: client.to_string(),
            route,
        }
    }

    /// Render the counter store key
    pub fn to_store_key(&self) -> String {
        match &self.route {
            Some(route) => format!("{}:{}:{}", KEY_PREFIX, self.client, route),
            None => format!("{}:{}", KEY_PREFIX, self.client),
        }
    }
}

/// First segment of a request path, without slashes.
/// `/booking-service/bookings/42` -> `booking-service`; `/` -> ``.
fn first_segment(path: &str) -> &str {
    path.trim_start_matches('/')
        .split('/')
        .next()
        .unwrap_or("")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_global_key_ignores_route() {
        let key = RateLimitKey::derive(KeyScope::Global, "10.0.0.1", "/booking-service/bookings");
        assert_eq!(key.to_store_key(), "skygate:ratelimit:10.0.0.1");
    }

    #[test]
    fn test_per_route_key_includes_service_prefix() {
        let key = RateLimitKey::derive(KeyScope::PerRoute, "10.0.0.1", "/booking-service/bookings/42");
        assert_eq!(key.to_store_key(), "skygate:ratelimit:10.0.0.1:booking-service");
    }

    #[test]
    fn test_same_client_same_key() {
        let a = RateLimitKey::derive(KeyScope::Global, "10.0.0.1", "/a");
        let b = RateLimitKey::derive(KeyScope::Global, "10.0.0.1", "/b");
        assert_eq!(a.to_store_key(), b.to_store_key());
    }

    #[test]
    fn test_distinct_clients_distinct_keys() {
        let a = RateLimitKey::derive(KeyScope::Global, "10.0.0.1", "/a");
        let b = RateLimitKey::derive(KeyScope::Global, "10.0.0.2", "/a");
        assert_ne!(a.to_store_key(), b.to_store_key());
    }

    #[test]
    fn test_per_route_separates_services() {
        let a = RateLimitKey::derive(KeyScope::PerRoute, "10.0.0.1", "/auth-service/login");
        let b = RateLimitKey::derive(KeyScope::PerRoute, "10.0.0.1", "/booking-service/bookings");
        assert_ne!(a.to_store_key(), b.to_store_key());
    }

    #[test]
    fn test_first_segment() {
        assert_eq!(first_segment("/booking-service/bookings"), "booking-service");
        assert_eq!(first_segment("/health"), "health");
        assert_eq!(first_segment("/"), "");
        assert_eq!(first_segment(""), "");
    }
}
