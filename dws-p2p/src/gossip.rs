//! Mesh-based pub/sub: GRAFT/PRUNE/IHAVE/IWANT mesh maintenance, a
//! duplicate-suppressing seen-cache, and score-affecting delivery
//! bookkeeping.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::sync::{broadcast, watch, Mutex, RwLock};
use tracing::{debug, warn};

use dws_peer_store::{now_ms, PeerStore, ScoreUpdate};

use crate::discovery::Discovery;
use crate::error::Result;
use crate::hashid::keccak256;
use crate::transport::PeerTransport;
use crate::types::{ControlFrame, ControlPayload, GossipEnvelope, GossipMessage};

pub const CONTROL_TOPIC: &str = "__control__";
pub const D_LOW: usize = 4;
pub const D: usize = 6;
pub const D_HIGH: usize = 12;
pub const D_LAZY: usize = 6;
pub const GOSSIP_FACTOR: f64 = 0.25;
pub const DEFAULT_SEEN_TTL: Duration = Duration::from_secs(120);
pub const DEFAULT_HEARTBEAT: Duration = Duration::from_secs(1);
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 1024 * 1024;

/// Open question: how far a message's declared timestamp may
/// drift from local clock time before it is treated as invalid. Fixed
/// rather than dynamic, per the decision recorded in DESIGN.md.
pub const ID_TIME_TOLERANCE_MS: u64 = 30_000;

pub const RECENT_IDS_PER_TOPIC: usize = 50;

pub const SCORE_DUPLICATE_DELTA: f64 = -0.5;
pub const SCORE_INVALID_DELTA: f64 = -10.0;
pub const SCORE_DELIVERED_DELTA: f64 = 1.0;
pub const REPUTATION_MIN: f64 = -100.0;
pub const REPUTATION_MAX: f64 = 150.0;

#[derive(Debug, Clone)]
pub struct ReceivedMessage {
    pub topic: String,
    pub data: Vec<u8>,
    pub from: String,
}

struct SeenEntry {
    expires_at_ms: u64,
}

/// Owns mesh membership, fanout, and the seen-cache; drives heartbeat
/// maintenance and exposes publish/receive.
pub struct GossipEngine {
    self_peer_id: String,
    discovery: Arc<Discovery>,
    transport: Arc<dyn PeerTransport>,
    peer_store: Arc<PeerStore>,
    subscriptions: RwLock<HashSet<String>>,
    mesh: RwLock<HashMap<String, HashSet<String>>>,
    fanout: RwLock<HashMap<String, HashSet<String>>>,
    seen: Mutex<HashMap<String, SeenEntry>>,
    seen_order: Mutex<VecDeque<String>>,
    message_cache: Mutex<HashMap<String, GossipMessage>>,
    recent_by_topic: Mutex<HashMap<String, VecDeque<String>>>,
    seen_ttl: Duration,
    heartbeat: Duration,
    max_message_size: usize,
    message_counter: std::sync::atomic::AtomicU64,
    delivered: broadcast::Sender<ReceivedMessage>,
    shutdown_tx: RwLock<Option<watch::Sender<bool>>>,
}

impl GossipEngine {
    pub fn new(
        self_peer_id: String,
        discovery: Arc<Discovery>,
        transport: Arc<dyn PeerTransport>,
        peer_store: Arc<PeerStore>,
    ) -> Self {
        let (delivered, _) = broadcast::channel(1024);
        Self {
            self_peer_id,
            discovery,
            transport,
            peer_store,
            subscriptions: RwLock::new(HashSet::new()),
            mesh: RwLock::new(HashMap::new()),
            fanout: RwLock::new(HashMap::new()),
            seen: Mutex::new(HashMap::new()),
            seen_order: Mutex::new(VecDeque::new()),
            message_cache: Mutex::new(HashMap::new()),
            recent_by_topic: Mutex::new(HashMap::new()),
            seen_ttl: DEFAULT_SEEN_TTL,
            heartbeat: DEFAULT_HEARTBEAT,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            message_counter: std::sync::atomic::AtomicU64::new(0),
            delivered,
            shutdown_tx: RwLock::new(None),
        }
    }

    pub fn with_heartbeat(mut self, heartbeat: Duration) -> Self {
        self.heartbeat = heartbeat;
        self
    }

    pub fn with_seen_ttl(mut self, ttl: Duration) -> Self {
        self.seen_ttl = ttl;
        self
    }

    pub fn subscribe_delivered(&self) -> broadcast::Receiver<ReceivedMessage> {
        self.delivered.subscribe()
    }

    pub async fn start(self: &Arc<Self>) {
        let (tx, mut rx) = watch::channel(false);
        *self.shutdown_tx.write().await = Some(tx);
        let engine = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(engine.heartbeat);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        engine.heartbeat_tick().await;
                        engine.evict_expired_seen().await;
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

    pub async fn join(&self, topic: &str) {
        self.subscriptions.write().await.insert(topic.to_string());
        self.mesh.write().await.entry(topic.to_string()).or_default();
    }

    pub async fn leave(&self, topic: &str) {
        self.subscriptions.write().await.remove(topic);
        if let Some(peers) = self.mesh.write().await.remove(topic) {
            for peer_id in peers {
                self.send_control(&peer_id, ControlPayload::Prune { topic: topic.to_string() })
                    .await;
            }
        }
    }

    /// Allocates the next per-publisher sequence number.
    fn next_seqno(&self) -> u64 {
        self.message_counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst)
    }

    fn message_id(from: &str, seqno: u64, timestamp_ms: u64) -> String {
        let mut preimage = Vec::with_capacity(from.len() + 16);
        preimage.extend_from_slice(from.as_bytes());
        preimage.extend_from_slice(&seqno.to_be_bytes());
        preimage.extend_from_slice(&timestamp_ms.to_be_bytes());
        hex::encode(keccak256(&preimage))
    }

    /// Publishes `data` on `topic`: marks it seen, sends to mesh peers
    /// (or a fanout set if we are not subscribed), and returns the
    /// message id.
    pub async fn publish(&self, topic: &str, data: Vec<u8>) -> Result<String> {
        if data.len() > self.max_message_size {
            return Err(crate::error::P2pError::Validation(format!(
                "message exceeds max size of {} bytes",
                self.max_message_size
            )));
        }
        let seqno = self.next_seqno();
        let timestamp_ms = now_ms();
        let id = Self::message_id(&self.self_peer_id, seqno, timestamp_ms);
        self.mark_seen(&id).await;

        let message = GossipMessage {
            id: id.clone(),
            topic: topic.to_string(),
            data,
            from: self.self_peer_id.clone(),
            timestamp_ms,
            seqno,
            signature: None,
        };
        self.cache_message(message.clone()).await;
        let targets = self.publish_targets(topic).await;
        for peer_id in targets {
            self.send_message(&peer_id, &message).await;
        }
        Ok(id)
    }

    async fn publish_targets(&self, topic: &str) -> HashSet<String> {
        let subscribed = self.subscriptions.read().await.contains(topic);
        if subscribed {
            self.mesh.read().await.get(topic).cloned().unwrap_or_default()
        } else {
            self.fanout.read().await.get(topic).cloned().unwrap_or_default()
        }
    }

    async fn send_message(&self, peer_id: &str, message: &GossipMessage) {
        let Some(endpoint) = self.peer_endpoint(peer_id).await else {
            return;
        };
        let envelope = GossipEnvelope::Message(message.clone());
        if let Err(e) = self.transport.send_gossip(&endpoint, &envelope).await {
            warn!("gossip send to {peer_id} failed: {e}");
        }
    }

    async fn send_control(&self, peer_id: &str, payload: ControlPayload) {
        let Some(endpoint) = self.peer_endpoint(peer_id).await else {
            return;
        };
        let frame = ControlFrame {
            from: self.self_peer_id.clone(),
            payload,
        };
        let envelope = GossipEnvelope::Control(frame);
        if let Err(e) = self.transport.send_gossip(&endpoint, &envelope).await {
            warn!("gossip control send to {peer_id} failed: {e}");
        }
    }

    async fn peer_endpoint(&self, peer_id: &str) -> Option<String> {
        self.peer_store
            .get_peer(peer_id)
            .await
            .and_then(|p| p.addresses.first().cloned())
    }

    /// Handles an inbound envelope from `source_peer`: deduplicates data
    /// messages, forwards to the mesh, applies score deltas, and
    /// processes control frames.
    pub async fn handle_envelope(&self, source_peer: &str, envelope: GossipEnvelope) {
        match envelope {
            GossipEnvelope::Message(message) => self.handle_message(source_peer, message).await,
            GossipEnvelope::Control(frame) => self.handle_control(frame).await,
        }
    }

    async fn handle_message(&self, source_peer: &str, message: GossipMessage) {
        if message.data.len() > self.max_message_size {
            self.apply_score_delta(source_peer, SCORE_INVALID_DELTA).await;
            return;
        }
        let now = now_ms();
        if now.abs_diff(message.timestamp_ms) > ID_TIME_TOLERANCE_MS {
            self.apply_score_delta(source_peer, SCORE_INVALID_DELTA).await;
            return;
        }
        if self.is_seen(&message.id).await {
            self.apply_score_delta(source_peer, SCORE_DUPLICATE_DELTA).await;
            return;
        }
        self.mark_seen(&message.id).await;
        self.cache_message(message.clone()).await;
        self.apply_score_delta(source_peer, SCORE_DELIVERED_DELTA).await;

        let _ = self.delivered.send(ReceivedMessage {
            topic: message.topic.clone(),
            data: message.data.clone(),
            from: message.from.clone(),
        });

        let targets = self.publish_targets(&message.topic).await;
        for peer_id in targets {
            if peer_id != source_peer {
                self.send_message(&peer_id, &message).await;
            }
        }
    }

    async fn handle_control(&self, frame: ControlFrame) {
        match frame.payload {
            ControlPayload::Graft { topic } => {
                let mut mesh = self.mesh.write().await;
                let peers = mesh.entry(topic).or_default();
                if peers.len() < D_HIGH {
                    peers.insert(frame.from);
                }
            }
            ControlPayload::Prune { topic } => {
                if let Some(peers) = self.mesh.write().await.get_mut(&topic) {
                    peers.remove(&frame.from);
                }
            }
            ControlPayload::IHave { topic: _, message_ids } => {
                let mut wanted = Vec::new();
                for id in message_ids {
                    if !self.is_seen(&id).await {
                        wanted.push(id);
                    }
                }
                if !wanted.is_empty() {
                    self.send_control(&frame.from, ControlPayload::IWant { message_ids: wanted })
                        .await;
                }
            }
            ControlPayload::IWant { message_ids } => {
                let cache = self.message_cache.lock().await;
                let messages: Vec<GossipMessage> =
                    message_ids.iter().filter_map(|id| cache.get(id).cloned()).collect();
                drop(cache);
                for message in messages {
                    self.send_message(&frame.from, &message).await;
                }
            }
        }
    }

    async fn apply_score_delta(&self, peer_id: &str, delta: f64) {
        if let Some(mut score) = self.peer_store.get_score(peer_id).await {
            score.reputation = (score.reputation + delta).clamp(REPUTATION_MIN, REPUTATION_MAX);
            let _ = self
                .peer_store
                .update_score(
                    peer_id,
                    ScoreUpdate {
                        reputation_delta: Some(delta),
                        ..Default::default()
                    },
                )
                .await;
        }
    }

    async fn mark_seen(&self, id: &str) {
        let expires_at_ms = now_ms() + self.seen_ttl.as_millis() as u64;
        self.seen.lock().await.insert(id.to_string(), SeenEntry { expires_at_ms });
        self.seen_order.lock().await.push_back(id.to_string());
    }

    async fn is_seen(&self, id: &str) -> bool {
        self.seen.lock().await.contains_key(id)
    }

    /// Keeps a bounded per-topic window of recent message ids for lazy
    /// IHAVE gossip and caches the body for IWANT resend.
    async fn cache_message(&self, message: GossipMessage) {
        let mut recent_by_topic = self.recent_by_topic.lock().await;
        let recent = recent_by_topic.entry(message.topic.clone()).or_default();
        recent.push_back(message.id.clone());
        while recent.len() > RECENT_IDS_PER_TOPIC {
            recent.pop_front();
        }
        drop(recent_by_topic);
        self.message_cache.lock().await.insert(message.id.clone(), message);
    }

    async fn evict_expired_seen(&self) {
        let now = now_ms();
        let mut seen = self.seen.lock().await;
        let mut order = self.seen_order.lock().await;
        let mut cache = self.message_cache.lock().await;
        while let Some(front) = order.front() {
            match seen.get(front) {
                Some(entry) if entry.expires_at_ms <= now => {
                    seen.remove(front);
                    cache.remove(front);
                    order.pop_front();
                }
                Some(_) => break,
                None => {
                    cache.remove(front);
                    order.pop_front();
                }
            }
        }
    }

    /// Mesh-maintenance heartbeat: GRAFT new peers when below `D_LOW`,
    /// PRUNE when above `D_HIGH`, and lazily gossip `IHAVE` to
    /// `D_LAZY` non-mesh peers at `GOSSIP_FACTOR` probability per tick.
    pub async fn heartbeat_tick(&self) {
        let topics: Vec<String> = self.subscriptions.read().await.iter().cloned().collect();
        for topic in topics {
            let mesh_size = self.mesh.read().await.get(&topic).map(|p| p.len()).unwrap_or(0);
            if mesh_size < D_LOW {
                let candidates = self.peer_store.get_top_peers(D - mesh_size, None).await;
                for candidate in candidates {
                    if candidate.peer_id == self.self_peer_id {
                        continue;
                    }
                    let already = self
                        .mesh
                        .read()
                        .await
                        .get(&topic)
                        .map(|p| p.contains(&candidate.peer_id))
                        .unwrap_or(false);
                    if already {
                        continue;
                    }
                    self.mesh
                        .write()
                        .await
                        .entry(topic.clone())
                        .or_default()
                        .insert(candidate.peer_id.clone());
                    self.send_control(
                        &candidate.peer_id,
                        ControlPayload::Graft { topic: topic.clone() },
                    )
                    .await;
                }
            } else if mesh_size > D_HIGH {
                let excess = mesh_size - D;
                let to_prune: Vec<String> = self
                    .mesh
                    .read()
                    .await
                    .get(&topic)
                    .map(|p| p.iter().take(excess).cloned().collect())
                    .unwrap_or_default();
                for peer_id in to_prune {
                    self.mesh.write().await.get_mut(&topic).map(|p| p.remove(&peer_id));
                    self.send_control(&peer_id, ControlPayload::Prune { topic: topic.clone() })
                        .await;
                }
            }
            debug!("mesh[{topic}] size={mesh_size}");
            self.lazy_gossip_ihave(&topic).await;
        }
    }

    /// With probability [`GOSSIP_FACTOR`], advertises recent message ids
    /// for `topic` to up to [`D_LAZY`] peers outside the mesh.
    async fn lazy_gossip_ihave(&self, topic: &str) {
        if !rand::thread_rng().gen_bool(GOSSIP_FACTOR) {
            return;
        }
        let ids: Vec<String> = self
            .recent_by_topic
            .lock()
            .await
            .get(topic)
            .map(|recent| recent.iter().cloned().collect())
            .unwrap_or_default();
        if ids.is_empty() {
            return;
        }
        let mesh_peers = self.mesh.read().await.get(topic).cloned().unwrap_or_default();
        let lazy_targets: Vec<String> = self
            .peer_store
            .get_top_peers(D_LAZY + mesh_peers.len(), None)
            .await
            .into_iter()
            .map(|p| p.peer_id)
            .filter(|peer_id| peer_id != &self.self_peer_id && !mesh_peers.contains(peer_id))
            .take(D_LAZY)
            .collect();
        for peer_id in lazy_targets {
            self.send_control(&peer_id, ControlPayload::IHave { topic: topic.to_string(), message_ids: ids.clone() })
                .await;
        }
    }

    pub async fn mesh_size(&self, topic: &str) -> usize {
        self.mesh.read().await.get(topic).map(|p| p.len()).unwrap_or(0)
    }

    pub async fn is_subscribed(&self, topic: &str) -> bool {
        self.subscriptions.read().await.contains(topic)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::PeerTransport;
    use crate::types::{DhtRecord, NodeInfo, PeerSummary, PingResponse};
    use async_trait::async_trait;

    struct NoopTransport;

    #[async_trait]
    impl PeerTransport for NoopTransport {
        async fn ping(&self, _endpoint: &str, _from: &str) -> Result<PingResponse> {
            Ok(PingResponse { pong: true, from: "x".into(), timestamp: 0, peer: "x".into() })
        }
        async fn fetch_info(&self, _endpoint: &str) -> Result<NodeInfo> {
            Err(crate::error::P2pError::NotFound("n/a".into()))
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

    fn build_engine() -> GossipEngine {
        let transport: Arc<dyn PeerTransport> = Arc::new(NoopTransport);
        let peer_store = Arc::new(PeerStore::new(None));
        let discovery = Arc::new(Discovery::new(
            "self".into(),
            "http://self".into(),
            peer_store.clone(),
            transport.clone(),
        ));
        GossipEngine::new("self".into(), discovery, transport, peer_store)
    }

    #[tokio::test]
    async fn publish_marks_message_seen() {
        let engine = build_engine();
        let id = engine.publish("topic-a", b"hello".to_vec()).await.unwrap();
        assert!(engine.is_seen(&id).await);
    }

    #[tokio::test]
    async fn duplicate_delivery_is_deduplicated() {
        let engine = build_engine();
        let message = GossipMessage {
            id: "dup-1".into(),
            topic: "topic-a".into(),
            data: b"x".to_vec(),
            from: "peer-b".into(),
            timestamp_ms: now_ms(),
            seqno: 0,
            signature: None,
        };
        engine.handle_message("peer-b", message.clone()).await;
        let mut rx = engine.subscribe_delivered();
        engine.handle_message("peer-b", message).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn oversized_message_is_rejected() {
        let engine = build_engine();
        let result = engine.publish("topic-a", vec![0u8; DEFAULT_MAX_MESSAGE_SIZE + 1]).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn graft_control_adds_peer_to_mesh() {
        let engine = build_engine();
        engine.join("topic-a").await;
        engine
            .handle_control(ControlFrame {
                from: "peer-c".into(),
                payload: ControlPayload::Graft { topic: "topic-a".into() },
            })
            .await;
        assert_eq!(engine.mesh_size("topic-a").await, 1);
    }

    #[tokio::test]
    async fn prune_control_removes_peer_from_mesh() {
        let engine = build_engine();
        engine.join("topic-a").await;
        engine
            .handle_control(ControlFrame {
                from: "peer-c".into(),
                payload: ControlPayload::Graft { topic: "topic-a".into() },
            })
            .await;
        engine
            .handle_control(ControlFrame {
                from: "peer-c".into(),
                payload: ControlPayload::Prune { topic: "topic-a".into() },
            })
            .await;
        assert_eq!(engine.mesh_size("topic-a").await, 0);
    }

    #[tokio::test]
    async fn iwant_resends_cached_message_body() {
        let engine = build_engine();
        let id = engine.publish("topic-a", b"payload".to_vec()).await.unwrap();
        let cached = engine.message_cache.lock().await.get(&id).cloned();
        assert_eq!(cached.unwrap().data, b"payload".to_vec());
    }
}
