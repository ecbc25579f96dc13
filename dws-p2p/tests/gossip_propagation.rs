//! Three-node gossip propagation: N1 publishes on topic "T" across mesh
//! links N1-N2, N2-N3; N3 only ever hears it relayed through N2, and a
//! duplicate delivery to N2 does not reach N3 twice.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use dws_p2p::{
    ControlFrame, ControlPayload, Discovery, DhtRecord, GossipEngine, GossipEnvelope, NodeInfo,
    P2pError, PeerSummary, PeerTransport, PingResponse, Result,
};
use dws_peer_store::{PeerInfo, PeerStore, U256};

/// Routes `send_gossip` calls between in-process engines by endpoint,
/// tagging each delivery with the sending node's own peer id.
struct RoutingTransport {
    self_peer_id: String,
    registry: Arc<RwLock<HashMap<String, Arc<GossipEngine>>>>,
}

#[async_trait]
impl PeerTransport for RoutingTransport {
    async fn ping(&self, _endpoint: &str, _from: &str) -> Result<PingResponse> {
        Err(P2pError::NotFound("n/a".into()))
    }
    async fn fetch_info(&self, _endpoint: &str) -> Result<NodeInfo> {
        Err(P2pError::NotFound("n/a".into()))
    }
    async fn fetch_peers(&self, _endpoint: &str, _limit: usize, _service: Option<&str>) -> Result<Vec<PeerSummary>> {
        Ok(vec![])
    }
    async fn dht_put(&self, _endpoint: &str, _record: &DhtRecord) -> Result<()> {
        Ok(())
    }
    async fn dht_get(&self, _endpoint: &str, _key: &str) -> Result<Option<DhtRecord>> {
        Ok(None)
    }
    async fn send_gossip(&self, endpoint: &str, envelope: &GossipEnvelope) -> Result<()> {
        let registry = self.registry.read().await;
        if let Some(target) = registry.get(endpoint) {
            target.handle_envelope(&self.self_peer_id, envelope.clone()).await;
        }
        Ok(())
    }
}

fn peer_info(peer_id: &str, endpoint: &str) -> PeerInfo {
    PeerInfo {
        peer_id: peer_id.to_string(),
        node_id: peer_id.to_string(),
        addresses: vec![endpoint.to_string()],
        services: HashSet::new(),
        region: "us-east".into(),
        agent_id: U256::ZERO,
        protocols: HashSet::new(),
        metadata: HashMap::new(),
    }
}

async fn build_node(
    peer_id: &str,
    endpoint: &str,
    registry: &Arc<RwLock<HashMap<String, Arc<GossipEngine>>>>,
) -> (Arc<GossipEngine>, Arc<PeerStore>) {
    let peer_store = Arc::new(PeerStore::new(None));
    let transport: Arc<dyn PeerTransport> =
        Arc::new(RoutingTransport { self_peer_id: peer_id.to_string(), registry: registry.clone() });
    let discovery = Arc::new(Discovery::new(peer_id.to_string(), endpoint.to_string(), peer_store.clone(), transport.clone()));
    let engine = Arc::new(GossipEngine::new(peer_id.to_string(), discovery, transport, peer_store.clone()));
    engine.join("T").await;
    registry.write().await.insert(endpoint.to_string(), engine.clone());
    (engine, peer_store)
}

async fn link(a: &Arc<GossipEngine>, a_id: &str, b: &Arc<GossipEngine>, b_id: &str) {
    let graft = |from: &str| GossipEnvelope::Control(ControlFrame { from: from.to_string(), payload: ControlPayload::Graft { topic: "T".into() } });
    a.handle_envelope(b_id, graft(b_id)).await;
    b.handle_envelope(a_id, graft(a_id)).await;
}

#[tokio::test]
async fn three_node_mesh_propagates_exactly_once() {
    let registry: Arc<RwLock<HashMap<String, Arc<GossipEngine>>>> = Arc::new(RwLock::new(HashMap::new()));

    let (n1, n1_store) = build_node("n1", "http://n1", &registry).await;
    let (n2, n2_store) = build_node("n2", "http://n2", &registry).await;
    let (n3, n3_store) = build_node("n3", "http://n3", &registry).await;

    // Peer catalogs need each neighbor's address for publish_targets'
    // endpoint lookup; mesh membership is established separately below.
    n1_store.add_peer(peer_info("n2", "http://n2")).await.unwrap();
    n2_store.add_peer(peer_info("n1", "http://n1")).await.unwrap();
    n2_store.add_peer(peer_info("n3", "http://n3")).await.unwrap();
    n3_store.add_peer(peer_info("n2", "http://n2")).await.unwrap();

    link(&n1, "n1", &n2, "n2").await;
    link(&n2, "n2", &n3, "n3").await;
    assert_eq!(n1.mesh_size("T").await, 1);
    assert_eq!(n2.mesh_size("T").await, 2);
    assert_eq!(n3.mesh_size("T").await, 1);

    let mut n2_rx = n2.subscribe_delivered();
    let mut n3_rx = n3.subscribe_delivered();

    let id = n1.publish("T", b"m".to_vec()).await.unwrap();

    let n2_delivery = n2_rx.recv().await.unwrap();
    assert_eq!(n2_delivery.data, b"m");
    let n3_delivery = n3_rx.recv().await.unwrap();
    assert_eq!(n3_delivery.data, b"m");

    // N2 only delivered once; a second n2_rx receive would block forever
    // on an empty channel, so a non-blocking try_recv proves it.
    assert!(n2_rx.try_recv().is_err());

    // Re-inject the same message id directly at N2 (as if N1 retried).
    let replay = GossipEnvelope::Message(dws_p2p::GossipMessage {
        id,
        topic: "T".into(),
        data: b"m".to_vec(),
        from: "n1".into(),
        timestamp_ms: dws_peer_store::now_ms(),
        seqno: 0,
        signature: None,
    });
    n2.handle_envelope("n1", replay).await;

    // Dropped as a duplicate: neither N2 nor N3 sees a second delivery.
    assert!(n2_rx.try_recv().is_err());
    assert!(n3_rx.try_recv().is_err());
}
