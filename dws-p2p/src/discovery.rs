//! Kademlia-style discovery: k-buckets, DHT put/get, connection lifecycle,
//! periodic refresh/ping sweeps.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use rand::RngCore;
use tokio::sync::{broadcast, watch, RwLock};
use tracing::debug;

use dws_peer_store::{now_ms, PeerInfo, PeerStore, ScoreUpdate};

use crate::error::{P2pError, Result};
use crate::hashid::{self, bucket_index, hash_key, xor_distance, NUM_BUCKETS};
use crate::transport::PeerTransport;
use crate::types::{ConnectionEntry, ConnectionState, DhtRecord, KBucket};

pub const MAX_CONNECTIONS: usize = 100;
pub const REFRESH_INTERVAL: Duration = Duration::from_secs(30);
pub const PING_INTERVAL: Duration = Duration::from_secs(15);
pub const STALE_AFTER_MS: u64 = 60_000;
pub const DHT_QUERY_CONCURRENCY: usize = 3;
pub const DHT_REPLICATION_FACTOR: usize = 20;
pub const MIN_DESIRED_CONNECTIONS: usize = 10;

#[derive(Debug, Clone)]
pub enum DiscoveryEvent {
    PeerConnect(String),
    PeerDisconnect(String),
}

/// Builds and maintains the overlay; exposes peer-lookup, DHT, and event
/// notifications.
pub struct Discovery {
    self_peer_id: String,
    self_node_id: String,
    self_endpoint: String,
    buckets: RwLock<Vec<KBucket>>,
    connections: RwLock<HashMap<String, ConnectionEntry>>,
    endpoints: RwLock<HashMap<String, String>>,
    dht: RwLock<HashMap<String, DhtRecord>>,
    peer_store: Arc<PeerStore>,
    transport: Arc<dyn PeerTransport>,
    events: broadcast::Sender<DiscoveryEvent>,
    shutdown_tx: RwLock<Option<watch::Sender<bool>>>,
}

impl Discovery {
    pub fn new(
        self_node_id: String,
        self_endpoint: String,
        peer_store: Arc<PeerStore>,
        transport: Arc<dyn PeerTransport>,
    ) -> Self {
        let self_peer_id = hashid::derive_peer_id(&self_node_id);
        let (events, _) = broadcast::channel(1024);
        Self {
            self_peer_id,
            self_node_id,
            self_endpoint,
            buckets: RwLock::new(vec![KBucket::default(); NUM_BUCKETS]),
            connections: RwLock::new(HashMap::new()),
            endpoints: RwLock::new(HashMap::new()),
            dht: RwLock::new(HashMap::new()),
            peer_store,
            transport,
            events,
            shutdown_tx: RwLock::new(None),
        }
    }

    pub fn self_peer_id(&self) -> &str {
        &self.self_peer_id
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DiscoveryEvent> {
        self.events.subscribe()
    }

    pub async fn start(self: &Arc<Self>) {
        let (tx, mut rx) = watch::channel(false);
        *self.shutdown_tx.write().await = Some(tx);

        let refresh_self = self.clone();
        let mut refresh_rx = rx.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(REFRESH_INTERVAL);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        refresh_self.refresh_peers().await;
                    }
                    _ = refresh_rx.changed() => {
                        if *refresh_rx.borrow() { break; }
                    }
                }
            }
        });

        let ping_self = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(PING_INTERVAL);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        ping_self.ping_all_peers().await;
                    }
                    _ = rx.changed() => {
                        if *rx.borrow() { break; }
                    }
                }
            }
        });
    }

    pub async fn stop(&self) {
        if let Some(tx) = self.shutdown_tx.write().await.take() {
            let _ = tx.send(true);
        }
    }

    fn distance_to_self(&self, peer_id: &str) -> [u8; 32] {
        xor_distance(&hash_key(&self.self_peer_id), &hash_key(peer_id))
    }

    async fn bucket_insert(&self, peer_id: &str) {
        let distance = self.distance_to_self(peer_id);
        if let Some(idx) = bucket_index(&distance) {
            self.buckets.write().await[idx].insert(peer_id.to_string());
        }
    }

    async fn bucket_remove(&self, peer_id: &str) {
        let distance = self.distance_to_self(peer_id);
        if let Some(idx) = bucket_index(&distance) {
            self.buckets.write().await[idx].remove(peer_id);
        }
    }

    /// Dial a peer: `Unknown -> Dialing -> Connected` on a successful
    /// ping, or `Disconnected` on failure.
    pub async fn dial(&self, peer_id: &str, endpoint: &str) -> Result<()> {
        self.endpoints
            .write()
            .await
            .insert(peer_id.to_string(), endpoint.to_string());
        self.connections.write().await.insert(
            peer_id.to_string(),
            ConnectionEntry {
                peer_id: peer_id.to_string(),
                state: ConnectionState::Dialing,
                latency_ms: None,
                last_activity_ms: now_ms(),
            },
        );

        if self.connections.read().await.len() >= MAX_CONNECTIONS {
            self.evict_lowest_scoring(10).await;
        }

        let start = now_ms();
        match self.transport.ping(endpoint, &self.self_node_id).await {
            Ok(_) => {
                let latency = (now_ms() - start) as f64;
                {
                    let mut conns = self.connections.write().await;
                    if let Some(entry) = conns.get_mut(peer_id) {
                        entry.state = ConnectionState::Connected;
                        entry.latency_ms = Some(latency);
                        entry.last_activity_ms = now_ms();
                    }
                }
                self.bucket_insert(peer_id).await;
                let _ = self.peer_store.record_connection(peer_id, true, None).await;
                let _ = self
                    .peer_store
                    .update_score(
                        peer_id,
                        ScoreUpdate {
                            latency_sample_ms: Some(latency),
                            ..Default::default()
                        },
                    )
                    .await;
                let _ = self.events.send(DiscoveryEvent::PeerConnect(peer_id.to_string()));

                if let Ok(info) = self.transport.fetch_info(endpoint).await {
                    let _ = self
                        .peer_store
                        .add_peer(PeerInfo {
                            peer_id: peer_id.to_string(),
                            node_id: info.node_id,
                            addresses: vec![info.endpoint],
                            services: info.services.into_iter().collect(),
                            region: info.region,
                            agent_id: dws_peer_store::U256::ZERO,
                            protocols: Default::default(),
                            metadata: Default::default(),
                        })
                        .await;
                }
                Ok(())
            }
            Err(e) => {
                self.disconnect(peer_id, "dial failed").await;
                Err(e)
            }
        }
    }

    async fn disconnect(&self, peer_id: &str, reason: &str) {
        self.connections.write().await.remove(peer_id);
        self.bucket_remove(peer_id).await;
        let _ = self
            .peer_store
            .record_disconnection(peer_id, 0, Some(reason.to_string()))
            .await;
        let _ = self.events.send(DiscoveryEvent::PeerDisconnect(peer_id.to_string()));
        debug!("disconnected {peer_id}: {reason}");
    }

    async fn evict_lowest_scoring(&self, count: usize) {
        let mut scored: Vec<(String, f64)> = Vec::new();
        for peer_id in self.connections.read().await.keys() {
            let overall = self
                .peer_store
                .get_score(peer_id)
                .await
                .map(|s| s.overall)
                .unwrap_or(0.0);
            scored.push((peer_id.clone(), overall));
        }
        scored.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));
        for (peer_id, _) in scored.into_iter().take(count) {
            self.disconnect(&peer_id, "connection limit eviction").await;
        }
    }

    /// `pingAllPeers`: refresh latency EMA and activity timestamp for
    /// every connected peer.
    pub async fn ping_all_peers(&self) {
        let targets: Vec<(String, String)> = {
            let conns = self.connections.read().await;
            let endpoints = self.endpoints.read().await;
            conns
                .iter()
                .filter(|(_, c)| c.state == ConnectionState::Connected)
                .filter_map(|(id, _)| endpoints.get(id).map(|ep| (id.clone(), ep.clone())))
                .collect()
        };
        for (peer_id, endpoint) in targets {
            let start = now_ms();
            match self.transport.ping(&endpoint, &self.self_node_id).await {
                Ok(_) => {
                    let latency = (now_ms() - start) as f64;
                    let mut conns = self.connections.write().await;
                    if let Some(entry) = conns.get_mut(&peer_id) {
                        entry.latency_ms = Some(latency);
                        entry.last_activity_ms = now_ms();
                    }
                    drop(conns);
                    let _ = self
                        .peer_store
                        .update_score(
                            &peer_id,
                            ScoreUpdate {
                                latency_sample_ms: Some(latency),
                                ..Default::default()
                            },
                        )
                        .await;
                }
                Err(_) => {
                    self.disconnect(&peer_id, "ping failed").await;
                }
            }
        }
    }

    /// `refreshPeers`: disconnect stale connections, and if under the
    /// minimum desired connection count, run a random-walk discovery.
    pub async fn refresh_peers(&self) {
        let now = now_ms();
        let stale: Vec<String> = {
            let conns = self.connections.read().await;
            conns
                .values()
                .filter(|c| {
                    c.state == ConnectionState::Connected
                        && now.saturating_sub(c.last_activity_ms) > STALE_AFTER_MS
                })
                .map(|c| c.peer_id.clone())
                .collect()
        };
        for peer_id in stale {
            {
                let mut conns = self.connections.write().await;
                if let Some(entry) = conns.get_mut(&peer_id) {
                    entry.state = ConnectionState::Stale;
                }
            }
            self.disconnect(&peer_id, "stale").await;
        }

        let active = self.connections.read().await.len();
        if active < MIN_DESIRED_CONNECTIONS {
            self.random_walk_discovery().await;
        }
    }

    async fn random_walk_discovery(&self) {
        let mut key_bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut key_bytes);
        let random_key = hex::encode(key_bytes);

        let closest = self.closest_known_peers(&random_key, 3).await;
        for peer_id in closest {
            let Some(endpoint) = self.endpoints.read().await.get(&peer_id).cloned() else {
                continue;
            };
            if let Ok(peers) = self.transport.fetch_peers(&endpoint, 10, None).await {
                for summary in peers {
                    if summary.peer_id == self.self_peer_id {
                        continue;
                    }
                    if !self.connections.read().await.contains_key(&summary.peer_id) {
                        let _ = self.dial(&summary.peer_id, &summary.endpoint).await;
                    }
                }
            }
        }
    }

    async fn closest_known_peers(&self, key: &str, count: usize) -> Vec<String> {
        let target = hash_key(key);
        let mut known: Vec<(String, [u8; 32])> = self
            .endpoints
            .read()
            .await
            .keys()
            .map(|id| (id.clone(), xor_distance(&target, &hash_key(id))))
            .collect();
        known.sort_by(|a, b| a.1.cmp(&b.1));
        known.into_iter().take(count).map(|(id, _)| id).collect()
    }

    /// `put`: store locally, then replicate to the closest live peers.
    pub async fn dht_put(&self, record: DhtRecord) -> Result<()> {
        self.dht.write().await.insert(record.key.clone(), record.clone());
        let closest = self.closest_known_peers(&record.key, DHT_REPLICATION_FACTOR).await;
        let endpoints = self.endpoints.read().await.clone();
        let mut handles = Vec::new();
        for peer_id in closest {
            if let Some(endpoint) = endpoints.get(&peer_id).cloned() {
                let transport = self.transport.clone();
                let record = record.clone();
                handles.push(tokio::spawn(async move {
                    let _ = transport.dht_put(&endpoint, &record).await;
                }));
            }
        }
        for h in handles {
            let _ = h.await;
        }
        Ok(())
    }

    /// `get`: local copy if present and unexpired, else query the
    /// closest peers with bounded concurrency.
    pub async fn dht_get(&self, key: &str) -> Result<Option<DhtRecord>> {
        if let Some(record) = self.dht.read().await.get(key).cloned() {
            if !record.is_expired(now_ms()) {
                return Ok(Some(record));
            }
        }
        let closest = self
            .closest_known_peers(key, DHT_QUERY_CONCURRENCY)
            .await;
        let endpoints = self.endpoints.read().await.clone();
        for peer_id in closest {
            let Some(endpoint) = endpoints.get(&peer_id) else {
                continue;
            };
            if let Ok(Some(record)) = self.transport.dht_get(endpoint, key).await {
                if !record.is_expired(now_ms()) {
                    self.dht.write().await.insert(key.to_string(), record.clone());
                    return Ok(Some(record));
                }
            }
        }
        Ok(None)
    }

    pub async fn local_dht_record(&self, key: &str) -> Option<DhtRecord> {
        self.dht.read().await.get(key).cloned()
    }

    pub async fn store_dht_record_locally(&self, record: DhtRecord) {
        self.dht.write().await.insert(record.key.clone(), record);
    }

    /// Self-announcement: publishes this node's own info into the DHT
    /// under a well-known key.
    pub async fn announce_node(&self, value: Vec<u8>, ttl_ms: u64) -> Result<()> {
        let record = DhtRecord {
            key: format!("node:{}", self.self_peer_id),
            value,
            publisher: self.self_peer_id.clone(),
            timestamp_ms: now_ms(),
            ttl_ms,
        };
        self.dht_put(record).await
    }

    /// Best peer advertising `service`, preferring `preferred_region`
    /// when given; ranks by `score - latency/10 + stake // 1e18`.
    pub async fn best_peer_for_service(
        &self,
        service: &str,
        preferred_region: Option<&str>,
    ) -> Option<dws_peer_store::Peer> {
        let candidates = self.peer_store.get_top_peers(usize::MAX, Some(service)).await;
        if candidates.is_empty() {
            return None;
        }
        let mut ranked: Vec<(dws_peer_store::Peer, f64)> = Vec::new();
        for peer in candidates {
            let score = self.peer_store.get_score(&peer.peer_id).await;
            let Some(score) = score else { continue };
            let mut rank = score.overall - (score.latency_ms / 10.0)
                + score.stake.div_u64(1_000_000_000_000_000_000) as f64;
            if let Some(region) = preferred_region {
                if !region.is_empty() && peer.region == region {
                    rank += 1000.0; // strong preference, never overrides nothing
                }
            }
            ranked.push((peer, rank));
        }
        ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        ranked.into_iter().next().map(|(p, _)| p)
    }

    pub async fn connection_count(&self) -> usize {
        self.connections.read().await.len()
    }

    pub async fn connection_state(&self, peer_id: &str) -> Option<ConnectionState> {
        self.connections.read().await.get(peer_id).map(|c| c.state)
    }

    pub fn node_id(&self) -> &str {
        &self.self_node_id
    }

    pub fn endpoint(&self) -> &str {
        &self.self_endpoint
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{NodeInfo, PeerSummary, PingResponse};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FakeTransport {
        ping_calls: AtomicUsize,
        fail_ping: bool,
    }

    #[async_trait]
    impl PeerTransport for FakeTransport {
        async fn ping(&self, _endpoint: &str, _from: &str) -> Result<PingResponse> {
            self.ping_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_ping {
                return Err(P2pError::Transport("boom".into()));
            }
            Ok(PingResponse {
                pong: true,
                from: "self".into(),
                timestamp: now_ms(),
                peer: "peer".into(),
            })
        }
        async fn fetch_info(&self, _endpoint: &str) -> Result<NodeInfo> {
            Ok(NodeInfo {
                peer_id: "peer-b".into(),
                node_id: "node-b".into(),
                services: vec!["worker".into()],
                region: "us-east".into(),
                agent_id: "0".into(),
                endpoint: "http://peer-b".into(),
                connections: 0,
                peers: 0,
            })
        }
        async fn fetch_peers(
            &self,
            _endpoint: &str,
            _limit: usize,
            _service: Option<&str>,
        ) -> Result<Vec<PeerSummary>> {
            Ok(vec![])
        }
        async fn dht_put(&self, _endpoint: &str, _record: &DhtRecord) -> Result<()> {
            Ok(())
        }
        async fn dht_get(&self, _endpoint: &str, _key: &str) -> Result<Option<DhtRecord>> {
            Ok(None)
        }
    }

    fn build(fail_ping: bool) -> Discovery {
        let peer_store = Arc::new(PeerStore::new(None));
        let transport = Arc::new(FakeTransport {
            ping_calls: AtomicUsize::new(0),
            fail_ping,
        });
        Discovery::new(
            "node-a".into(),
            "http://node-a".into(),
            peer_store,
            transport,
        )
    }

    #[tokio::test]
    async fn dial_success_transitions_to_connected() {
        let discovery = build(false);
        discovery.dial("peer-b", "http://peer-b").await.unwrap();
        assert_eq!(
            discovery.connection_state("peer-b").await,
            Some(ConnectionState::Connected)
        );
        assert_eq!(discovery.connection_count().await, 1);
    }

    #[tokio::test]
    async fn dial_failure_results_in_disconnect() {
        let discovery = build(true);
        assert!(discovery.dial("peer-b", "http://peer-b").await.is_err());
        assert_eq!(discovery.connection_state("peer-b").await, None);
    }

    #[tokio::test]
    async fn dht_put_then_get_returns_unexpired_record() {
        let discovery = build(false);
        let record = DhtRecord {
            key: "k1".into(),
            value: b"v1".to_vec(),
            publisher: "peer-a".into(),
            timestamp_ms: now_ms(),
            ttl_ms: 60_000,
        };
        discovery.dht_put(record.clone()).await.unwrap();
        let fetched = discovery.dht_get("k1").await.unwrap();
        assert_eq!(fetched.unwrap().value, record.value);
    }

    #[tokio::test]
    async fn expired_dht_record_is_not_returned_locally() {
        let discovery = build(false);
        let record = DhtRecord {
            key: "k2".into(),
            value: b"v2".to_vec(),
            publisher: "peer-a".into(),
            timestamp_ms: 0,
            ttl_ms: 1,
        };
        discovery.store_dht_record_locally(record).await;
        let fetched = discovery.dht_get("k2").await.unwrap();
        assert!(fetched.is_none());
    }
}
