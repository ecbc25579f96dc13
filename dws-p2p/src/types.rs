//! Shared wire/data types for discovery, bootstrap, and gossip.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::hashid::BUCKET_SIZE;

/// A replicated DHT record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DhtRecord {
    pub key: String,
    pub value: Vec<u8>,
    pub publisher: String,
    pub timestamp_ms: u64,
    pub ttl_ms: u64,
}

impl DhtRecord {
    pub fn is_expired(&self, now_ms: u64) -> bool {
        now_ms > self.timestamp_ms + self.ttl_ms
    }
}

/// One Kademlia bucket: up to [`BUCKET_SIZE`] peer-ids, FIFO-evicted.
#[derive(Debug, Default, Clone)]
pub struct KBucket {
    pub peer_ids: VecDeque<String>,
}

impl KBucket {
    pub fn insert(&mut self, peer_id: String) {
        if self.peer_ids.contains(&peer_id) {
            return;
        }
        if self.peer_ids.len() >= BUCKET_SIZE {
            self.peer_ids.pop_front();
        }
        self.peer_ids.push_back(peer_id);
    }

    pub fn remove(&mut self, peer_id: &str) {
        self.peer_ids.retain(|p| p != peer_id);
    }
}

/// Connection lifecycle state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Unknown,
    Dialing,
    Connected,
    Stale,
    Disconnected,
}

#[derive(Debug, Clone)]
pub struct ConnectionEntry {
    pub peer_id: String,
    pub state: ConnectionState,
    pub latency_ms: Option<f64>,
    pub last_activity_ms: u64,
}

/// Summary returned by `GET /p2p/peers`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerSummary {
    pub peer_id: String,
    pub node_id: String,
    pub endpoint: String,
    pub services: Vec<String>,
    pub region: String,
    pub latency: f64,
    pub score: f64,
}

/// Response body for `GET /p2p/info`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeInfo {
    pub peer_id: String,
    pub node_id: String,
    pub services: Vec<String>,
    pub region: String,
    pub agent_id: String,
    pub endpoint: String,
    pub connections: usize,
    pub peers: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PingRequest {
    pub from: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PingResponse {
    pub pong: bool,
    pub from: String,
    pub timestamp: u64,
    pub peer: String,
}

/// A published pub/sub message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GossipMessage {
    pub id: String,
    pub topic: String,
    pub data: Vec<u8>,
    pub from: String,
    pub timestamp_ms: u64,
    pub seqno: u64,
    pub signature: Option<String>,
}

/// Mesh-maintenance control traffic, exchanged on the reserved
/// `__control__` topic.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlPayload {
    Graft { topic: String },
    Prune { topic: String },
    IHave { topic: String, message_ids: Vec<String> },
    IWant { message_ids: Vec<String> },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlFrame {
    pub from: String,
    pub payload: ControlPayload,
}

/// Envelope carried over `POST /p2p/gossip`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GossipEnvelope {
    Message(GossipMessage),
    Control(ControlFrame),
}
