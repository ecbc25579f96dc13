//! Peer-to-peer overlay: Kademlia-style discovery, bootstrap, and
//! gossip pub/sub over an injectable HTTP transport.

pub mod bootstrap;
pub mod discovery;
pub mod error;
pub mod gossip;
pub mod hashid;
pub mod http;
pub mod service;
pub mod transport;
pub mod types;

pub use bootstrap::{BootstrapManager, BootstrapSource, HardcodedSource, OnChainRegistry};
pub use discovery::{Discovery, DiscoveryEvent};
pub use error::{P2pError, Result};
pub use gossip::{GossipEngine, ReceivedMessage};
pub use service::{P2pService, P2pServiceConfig};
pub use transport::{HttpPeerTransport, PeerTransport};
pub use types::*;

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use dws_peer_store::{now_ms, PeerStore};
    use std::sync::Arc;
    use std::time::Duration;

    struct LoopbackTransport;

    #[async_trait]
    impl PeerTransport for LoopbackTransport {
        async fn ping(&self, _endpoint: &str, from: &str) -> Result<types::PingResponse> {
            Ok(types::PingResponse {
                pong: true,
                from: from.to_string(),
                timestamp: now_ms(),
                peer: "peer".into(),
            })
        }
        async fn fetch_info(&self, _endpoint: &str) -> Result<types::NodeInfo> {
            Err(P2pError::NotFound("no loopback peer".into()))
        }
        async fn fetch_peers(
            &self,
            _endpoint: &str,
            _limit: usize,
            _service: Option<&str>,
        ) -> Result<Vec<types::PeerSummary>> {
            Ok(vec![])
        }
        async fn dht_put(&self, _endpoint: &str, _record: &types::DhtRecord) -> Result<()> {
            Ok(())
        }
        async fn dht_get(&self, _endpoint: &str, _key: &str) -> Result<Option<types::DhtRecord>> {
            Ok(None)
        }
    }

    #[tokio::test]
    async fn service_starts_and_stops_cleanly() {
        let transport: Arc<dyn PeerTransport> = Arc::new(LoopbackTransport);
        let peer_store = Arc::new(PeerStore::new(None));
        let config = P2pServiceConfig {
            node_id: "node-a".into(),
            endpoint: "http://node-a".into(),
            services: vec!["worker".into()],
            region: "us-east".into(),
            agent_id: "0".into(),
            bootstrap_sources: vec![],
            bootstrap_refresh_interval: Duration::from_secs(300),
            max_bootstrap_peers: 20,
            gossip_heartbeat: Duration::from_millis(50),
            gossip_seen_ttl: Duration::from_secs(120),
        };
        let service = P2pService::new(config, transport, peer_store);
        service.start().await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        service.stop().await;
    }

    #[test]
    fn peer_id_derivation_is_stable() {
        let a = hashid::derive_peer_id("node-x");
        let b = hashid::derive_peer_id("node-x");
        assert_eq!(a, b);
    }
}
