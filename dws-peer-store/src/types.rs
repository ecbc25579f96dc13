//! Data model for the peer catalog: peers, scores, and the versioned
//! on-disk layout.

use std::collections::{HashMap, HashSet};
use std::fmt;

use serde::{Deserialize, Serialize};

/// Unsigned 256-bit integer, stored big-endian.
///
/// `agentId` and `stake` are spec'd as 256-bit unsigned integers and
/// serialized as decimal strings on disk/wire (see the persisted peer
/// layout). We do not need general arithmetic, only construction,
/// display, equality, and floor-division by a small divisor (used for
/// stake-weighted ranking).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct U256(pub [u8; 32]);

impl U256 {
    pub const ZERO: U256 = U256([0u8; 32]);

    pub fn from_u128(value: u128) -> Self {
        let mut bytes = [0u8; 32];
        bytes[16..].copy_from_slice(&value.to_be_bytes());
        U256(bytes)
    }

    /// Floor division by a `u64` divisor, returning the quotient as `u128`
    /// (the divisors used in this system — e.g. 1e18 — never produce a
    /// quotient that overflows u128 for realistic stakes).
    pub fn div_u64(&self, divisor: u64) -> u128 {
        if divisor == 0 {
            return 0;
        }
        let mut remainder: u128 = 0;
        let mut quotient_bytes = [0u8; 32];
        for (i, byte) in self.0.iter().enumerate() {
            let acc = (remainder << 8) | (*byte as u128);
            let q = acc / divisor as u128;
            remainder = acc % divisor as u128;
            // only the low 16 bytes of quotient can ever be non-zero for
            // the divisor ranges we use, but we keep the full buffer for
            // correctness.
            if i >= 16 {
                quotient_bytes[i] = (q & 0xff) as u8;
            } else if q != 0 {
                quotient_bytes[i] = (q & 0xff) as u8;
            }
        }
        // Reassemble the low 128 bits of the quotient.
        let mut low = [0u8; 16];
        low.copy_from_slice(&quotient_bytes[16..]);
        u128::from_be_bytes(low)
    }

    fn to_decimal_string(&self) -> String {
        // Simple base-10 long division over the byte array.
        let mut digits: Vec<u8> = Vec::new();
        let mut work = self.0;
        loop {
            let mut remainder: u32 = 0;
            let mut all_zero = true;
            for byte in work.iter_mut() {
                let acc = (remainder << 8) | (*byte as u32);
                *byte = (acc / 10) as u8;
                remainder = acc % 10;
                if *byte != 0 {
                    all_zero = false;
                }
            }
            digits.push(remainder as u8);
            if all_zero {
                break;
            }
        }
        digits
            .iter()
            .rev()
            .map(|d| (b'0' + d) as char)
            .collect::<String>()
    }

    fn from_decimal_str(s: &str) -> Result<Self, String> {
        let mut acc = U256::ZERO;
        if s.is_empty() {
            return Err("empty decimal string".to_string());
        }
        for c in s.chars() {
            let digit = c
                .to_digit(10)
                .ok_or_else(|| format!("invalid decimal digit: {c}"))?;
            acc = acc.mul10_add(digit as u8)?;
        }
        Ok(acc)
    }

    fn mul10_add(&self, add: u8) -> Result<Self, String> {
        let mut out = [0u8; 32];
        let mut carry: u32 = add as u32;
        for i in (0..32).rev() {
            let acc = (self.0[i] as u32) * 10 + carry;
            out[i] = (acc & 0xff) as u8;
            carry = acc >> 8;
        }
        if carry != 0 {
            return Err("u256 overflow".to_string());
        }
        Ok(U256(out))
    }
}

impl fmt::Display for U256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_decimal_string())
    }
}

impl Serialize for U256 {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_decimal_string())
    }
}

impl<'de> Deserialize<'de> for U256 {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        U256::from_decimal_str(&s).map_err(serde::de::Error::custom)
    }
}

/// Input to [`crate::PeerStore::add_peer`]: everything known about a peer
/// at the moment it is observed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerInfo {
    pub peer_id: String,
    pub node_id: String,
    pub addresses: Vec<String>,
    pub services: HashSet<String>,
    pub region: String,
    pub agent_id: U256,
    pub protocols: HashSet<String>,
    pub metadata: HashMap<String, String>,
}

/// A peer entry in the store, with lifecycle bookkeeping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Peer {
    pub peer_id: String,
    pub node_id: String,
    pub addresses: Vec<String>,
    pub services: HashSet<String>,
    pub region: String,
    pub agent_id: U256,
    pub protocols: HashSet<String>,
    pub metadata: HashMap<String, String>,
    pub last_seen_ms: u64,
    pub last_connect_ms: Option<u64>,
    pub connect_count: u64,
    pub disconnect_count: u64,
}

impl Peer {
    pub fn from_info(info: PeerInfo, now_ms: u64) -> Self {
        Self {
            peer_id: info.peer_id,
            node_id: info.node_id,
            addresses: info.addresses,
            services: info.services,
            region: info.region,
            agent_id: info.agent_id,
            protocols: info.protocols,
            metadata: info.metadata,
            last_seen_ms: now_ms,
            last_connect_ms: None,
            connect_count: 0,
            disconnect_count: 0,
        }
    }

    /// Merge freshly observed fields into this peer, bumping `last_seen_ms`.
    pub fn merge(&mut self, info: PeerInfo, now_ms: u64) {
        if !info.addresses.is_empty() {
            self.addresses = info.addresses;
        }
        self.services.extend(info.services);
        if !info.region.is_empty() {
            self.region = info.region;
        }
        self.protocols.extend(info.protocols);
        self.metadata.extend(info.metadata);
        self.last_seen_ms = self.last_seen_ms.max(now_ms);
    }

    pub fn uptime(&self) -> f64 {
        let total = self.connect_count + self.disconnect_count;
        if total == 0 {
            0.0
        } else {
            self.connect_count as f64 / total as f64
        }
    }
}

/// Weighted component score for a peer.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PeerScore {
    pub overall: f64,
    pub latency_ms: f64,
    pub uptime: f64,
    pub delivery_rate: f64,
    pub bandwidth_ema: f64,
    pub stake: U256,
    pub reputation: f64,
    /// Absolute ms timestamp; 0 means "no active penalty".
    pub penalty_expiry_ms: u64,
}

impl PeerScore {
    pub const LATENCY_WEIGHT: f64 = 0.20;
    pub const UPTIME_WEIGHT: f64 = 0.20;
    pub const DELIVERY_WEIGHT: f64 = 0.30;
    pub const STAKE_WEIGHT: f64 = 0.15;
    pub const REPUTATION_WEIGHT: f64 = 0.15;

    /// Score initialized on first observation of a peer: overall 50,
    /// latency 100ms, uptime 0, deliveryRate 1,
    /// reputation 50.
    pub fn initial() -> Self {
        Self {
            overall: 50.0,
            latency_ms: 100.0,
            uptime: 0.0,
            delivery_rate: 1.0,
            bandwidth_ema: 0.0,
            stake: U256::ZERO,
            reputation: 50.0,
            penalty_expiry_ms: 0,
        }
    }

    fn normalized_latency(&self) -> f64 {
        // 0ms -> 100, 1000ms or slower -> 0.
        (100.0 - (self.latency_ms / 10.0)).clamp(0.0, 100.0)
    }

    fn normalized_stake(&self) -> f64 {
        // One point per whole token (1e18 base units), capped at 100.
        (self.stake.div_u64(1_000_000_000_000_000_000) as f64).min(100.0)
    }

    /// Recompute `overall` from the weighted, normalized components.
    /// While an active penalty is in effect, `overall` is forced to -100
    /// regardless of the other components.
    pub fn recompute_overall(&mut self, now_ms: u64) {
        if self.penalty_expiry_ms > now_ms {
            self.overall = -100.0;
            return;
        }
        self.overall = Self::LATENCY_WEIGHT * self.normalized_latency()
            + Self::UPTIME_WEIGHT * (self.uptime * 100.0)
            + Self::DELIVERY_WEIGHT * (self.delivery_rate * 100.0)
            + Self::STAKE_WEIGHT * self.normalized_stake()
            + Self::REPUTATION_WEIGHT * self.reputation;
    }
}

/// Partial score update applied by `updateScore`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScoreUpdate {
    pub latency_sample_ms: Option<f64>,
    pub delivery_sample: Option<f64>,
    pub bandwidth_sample: Option<f64>,
    pub reputation_delta: Option<f64>,
    pub stake: Option<U256>,
}

/// One entry in the bounded connect/disconnect history ring.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionHistoryEntry {
    pub peer_id: String,
    pub kind: ConnectionEventKind,
    pub timestamp_ms: u64,
    pub duration_ms: Option<u64>,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionEventKind {
    Connect,
    Disconnect,
}

/// Versioned on-disk layout.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedLayout {
    pub version: u32,
    pub peers: HashMap<String, Peer>,
    pub scores: HashMap<String, PeerScore>,
    pub connection_history: Vec<ConnectionHistoryEntry>,
}

pub const PERSISTED_LAYOUT_VERSION: u32 = 1;

pub fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
