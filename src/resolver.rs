//! Pluggable endpoint resolution. The connection manager consults a
//! resolver once per connect attempt; a cluster-aware implementation may
//! poll a gossip endpoint and hand back the current master, but that
//! collaborator is external to this crate (see spec §6, `cluster.*`).

use async_trait::async_trait;

/// A resolved TCP endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self { host: host.into(), port }
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Strategy for yielding the next address the connection manager should
/// connect to.
#[async_trait]
pub trait EndpointResolver: Send + Sync {
    async fn next_endpoint(&self) -> Endpoint;

    /// Called after a connect attempt to `endpoint` fails.
    async fn mark_failed(&self, endpoint: &Endpoint);

    /// Called after a connect attempt to `endpoint` succeeds.
    async fn mark_reachable(&self, endpoint: &Endpoint);
}

/// The default resolver: always returns the fixed endpoint it was built
/// with. Failure/reachability notifications are no-ops.
#[derive(Debug, Clone)]
pub struct StaticEndpointResolver {
    endpoint: Endpoint,
}

impl StaticEndpointResolver {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self { endpoint: Endpoint::new(host, port) }
    }
}

#[async_trait]
impl EndpointResolver for StaticEndpointResolver {
    async fn next_endpoint(&self) -> Endpoint {
        self.endpoint.clone()
    }

    async fn mark_failed(&self, _endpoint: &Endpoint) {}

    async fn mark_reachable(&self, _endpoint: &Endpoint) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn static_resolver_always_returns_same_endpoint() {
        let resolver = StaticEndpointResolver::new("localhost", 1113);
        let first = resolver.next_endpoint().await;
        resolver.mark_failed(&first).await;
        let second = resolver.next_endpoint().await;
        assert_eq!(first, second);
        assert_eq!(second, Endpoint::new("localhost", 1113));
    }
}
