//! Concrete [`NodeHealthProbe`] backed by the node protocol's
//! `GET /system_stats` endpoint (§4.D health checks).

use crate::client::NodeClient;
use async_trait::async_trait;
use relay_dispatch::NodeHealthProbe;
use relay_protocol::node::Node;
use std::time::Duration;

/// Probes a node over HTTP with a bounded timeout, independent of any
/// in-flight job traffic to that node.
pub struct HttpHealthProbe {
    timeout: Duration,
}

impl HttpHealthProbe {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Default for HttpHealthProbe {
    fn default() -> Self {
        Self::new(Duration::from_secs(5))
    }
}

#[async_trait]
impl NodeHealthProbe for HttpHealthProbe {
    async fn probe(&self, node: &Node) -> bool {
        let client = NodeClient::new(node.base_url());
        matches!(
            tokio::time::timeout(self.timeout, client.is_healthy()).await,
            Ok(true)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_timeout_is_five_seconds() {
        let probe = HttpHealthProbe::default();
        assert_eq!(probe.timeout, Duration::from_secs(5));
    }
}
