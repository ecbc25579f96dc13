//! The peer store itself: upsert, scoring, history, pruning, persistence.

use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::{watch, RwLock};
use tracing::{debug, info, warn};

use crate::error::{PeerStoreError, Result};
use crate::types::{
    now_ms, ConnectionEventKind, ConnectionHistoryEntry, Peer, PeerInfo, PeerScore,
    PersistedLayout, ScoreUpdate, PERSISTED_LAYOUT_VERSION,
};

/// Peers are pruned from the store once it grows past this size.
pub const MAX_PEERS: usize = 10_000;
/// Bounded ring size for connection history.
pub const MAX_HISTORY: usize = 1_000;
/// Default interval between dirty-flagged persistence snapshots.
pub const DEFAULT_SAVE_INTERVAL_SECS: u64 = 60;
/// Reputation decay cadence.
pub const DECAY_INTERVAL_SECS: u64 = 3_600;

const LATENCY_ALPHA: f64 = 0.2;
const DELIVERY_ALPHA: f64 = 0.1;
const BANDWIDTH_ALPHA: f64 = 0.2;
const PENALTY_REPUTATION_PENALTY: f64 = 10.0;
const DECAY_TOWARD: f64 = 50.0;
const DECAY_RATE: f64 = 0.01;

/// Durable, scored catalog of known peers.
///
/// Mutations go through fine-grained `RwLock`s per container (peers,
/// scores, history) so that no critical section spans network I/O.
pub struct PeerStore {
    peers: Arc<RwLock<HashMap<String, Peer>>>,
    scores: Arc<RwLock<HashMap<String, PeerScore>>>,
    history: Arc<RwLock<VecDeque<ConnectionHistoryEntry>>>,
    dirty: Arc<AtomicBool>,
    data_path: Option<PathBuf>,
    save_interval_secs: u64,
    shutdown_tx: RwLock<Option<watch::Sender<bool>>>,
}

impl PeerStore {
    pub fn new(data_path: Option<PathBuf>) -> Self {
        Self {
            peers: Arc::new(RwLock::new(HashMap::new())),
            scores: Arc::new(RwLock::new(HashMap::new())),
            history: Arc::new(RwLock::new(VecDeque::new())),
            dirty: Arc::new(AtomicBool::new(false)),
            data_path,
            save_interval_secs: DEFAULT_SAVE_INTERVAL_SECS,
            shutdown_tx: RwLock::new(None),
        }
    }

    pub fn with_save_interval_secs(mut self, secs: u64) -> Self {
        self.save_interval_secs = secs;
        self
    }

    /// Load persisted state from disk if a `data_path` was configured.
    /// Load failures are non-fatal: the store starts empty and logs a
    /// warning.
    pub async fn load(&self) -> Result<()> {
        let Some(path) = &self.data_path else {
            return Ok(());
        };
        if !path.exists() {
            return Ok(());
        }
        let bytes = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("failed to read peer store at {:?}: {e}; starting fresh", path);
                return Ok(());
            }
        };
        let layout: PersistedLayout = match serde_json::from_slice(&bytes) {
            Ok(layout) => layout,
            Err(e) => {
                warn!("failed to parse peer store at {:?}: {e}; starting fresh", path);
                return Ok(());
            }
        };
        if layout.version != PERSISTED_LAYOUT_VERSION {
            warn!(
                "peer store version mismatch (found {}, expected {}); starting fresh",
                layout.version, PERSISTED_LAYOUT_VERSION
            );
            return Ok(());
        }
        *self.peers.write().await = layout.peers;
        *self.scores.write().await = layout.scores;
        *self.history.write().await = layout.connection_history.into_iter().collect();
        info!("loaded peer store from {:?}", path);
        Ok(())
    }

    /// Start the background save timer. Call `stop` to quiesce it and
    /// force a final save.
    pub async fn start(self: &Arc<Self>) {
        if self.data_path.is_none() {
            return;
        }
        let (tx, mut rx) = watch::channel(false);
        let this = self.clone();
        tokio::spawn(async move {
            let mut ticker =
                tokio::time::interval(std::time::Duration::from_secs(this.save_interval_secs));
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = this.save_if_dirty().await {
                            warn!("peer store periodic save failed: {e}");
                        }
                    }
                    _ = rx.changed() => {
                        if *rx.borrow() {
                            break;
                        }
                    }
                }
            }
        });
        *self.shutdown_tx.write().await = Some(tx);
    }

    /// Stop the background timer and force a final save.
    pub async fn stop(&self) -> Result<()> {
        if let Some(tx) = self.shutdown_tx.write().await.take() {
            let _ = tx.send(true);
        }
        self.save().await
    }

    async fn save_if_dirty(&self) -> Result<()> {
        if self.dirty.swap(false, Ordering::SeqCst) {
            self.save().await?;
        }
        Ok(())
    }

    async fn save(&self) -> Result<()> {
        let Some(path) = &self.data_path else {
            return Ok(());
        };
        let mut history: Vec<ConnectionHistoryEntry> =
            self.history.read().await.iter().cloned().collect();
        if history.len() > MAX_HISTORY {
            let excess = history.len() - MAX_HISTORY;
            history.drain(0..excess);
        }
        let layout = PersistedLayout {
            version: PERSISTED_LAYOUT_VERSION,
            peers: self.peers.read().await.clone(),
            scores: self.scores.read().await.clone(),
            connection_history: history,
        };
        let bytes = serde_json::to_vec_pretty(&layout)
            .map_err(|e| PeerStoreError::Persistence(e.to_string()))?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| PeerStoreError::Persistence(e.to_string()))?;
        }
        tokio::fs::write(path, bytes)
            .await
            .map_err(|e| PeerStoreError::Persistence(e.to_string()))?;
        debug!("saved peer store to {:?}", path);
        Ok(())
    }

    fn mark_dirty(&self) {
        self.dirty.store(true, Ordering::SeqCst);
    }

    /// Upsert a peer. Triggers a prune if the store grows past
    /// [`MAX_PEERS`].
    pub async fn add_peer(&self, info: PeerInfo) -> Result<()> {
        let now = now_ms();
        let peer_id = info.peer_id.clone();
        {
            let mut peers = self.peers.write().await;
            match peers.get_mut(&peer_id) {
                Some(existing) => existing.merge(info, now),
                None => {
                    peers.insert(peer_id.clone(), Peer::from_info(info, now));
                }
            }
        }
        {
            let mut scores = self.scores.write().await;
            scores.entry(peer_id).or_insert_with(PeerScore::initial);
        }
        self.mark_dirty();
        self.prune_if_oversized().await;
        Ok(())
    }

    async fn prune_if_oversized(&self) {
        let len = self.peers.read().await.len();
        if len <= MAX_PEERS {
            return;
        }
        let target_removals = (len as f64 * 0.10).ceil() as usize;
        let mut ranked: Vec<(String, f64, u64)> = {
            let peers = self.peers.read().await;
            let scores = self.scores.read().await;
            peers
                .iter()
                .map(|(id, peer)| {
                    let overall = scores.get(id).map(|s| s.overall).unwrap_or(0.0);
                    (id.clone(), overall, peer.last_seen_ms)
                })
                .collect()
        };
        // Lowest overall first; tiebreak by older last_seen first.
        ranked.sort_by(|a, b| {
            a.1.partial_cmp(&b.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.2.cmp(&b.2))
        });
        let to_remove: Vec<String> = ranked
            .into_iter()
            .take(target_removals)
            .map(|(id, _, _)| id)
            .collect();
        if to_remove.is_empty() {
            return;
        }
        let mut peers = self.peers.write().await;
        let mut scores = self.scores.write().await;
        for id in &to_remove {
            peers.remove(id);
            scores.remove(id);
        }
        info!("pruned {} peers (store exceeded MAX_PEERS)", to_remove.len());
    }

    /// Apply an exponential-moving-average update to a peer's score and
    /// recompute `overall`.
    pub async fn update_score(&self, peer_id: &str, update: ScoreUpdate) -> Result<()> {
        let mut scores = self.scores.write().await;
        let score = scores
            .get_mut(peer_id)
            .ok_or_else(|| PeerStoreError::PeerNotFound(peer_id.to_string()))?;
        if let Some(sample) = update.latency_sample_ms {
            score.latency_ms = LATENCY_ALPHA * sample + (1.0 - LATENCY_ALPHA) * score.latency_ms;
        }
        if let Some(sample) = update.delivery_sample {
            score.delivery_rate =
                DELIVERY_ALPHA * sample + (1.0 - DELIVERY_ALPHA) * score.delivery_rate;
        }
        if let Some(sample) = update.bandwidth_sample {
            score.bandwidth_ema =
                BANDWIDTH_ALPHA * sample + (1.0 - BANDWIDTH_ALPHA) * score.bandwidth_ema;
        }
        if let Some(delta) = update.reputation_delta {
            score.reputation = (score.reputation + delta).clamp(0.0, 100.0);
        }
        if let Some(stake) = update.stake {
            score.stake = stake;
        }
        score.recompute_overall(now_ms());
        drop(scores);
        self.mark_dirty();
        Ok(())
    }

    /// Apply a penalty: sets `penaltyExpiry`, reduces reputation by 10,
    /// forces `overall` to -100 until the penalty expires.
    pub async fn apply_penalty(&self, peer_id: &str, duration_ms: u64, reason: &str) -> Result<()> {
        let now = now_ms();
        let mut scores = self.scores.write().await;
        let score = scores
            .get_mut(peer_id)
            .ok_or_else(|| PeerStoreError::PeerNotFound(peer_id.to_string()))?;
        score.penalty_expiry_ms = now + duration_ms;
        score.reputation = (score.reputation - PENALTY_REPUTATION_PENALTY).clamp(0.0, 100.0);
        score.recompute_overall(now);
        drop(scores);
        self.mark_dirty();
        warn!("applied penalty to {peer_id}: {reason} ({duration_ms}ms)");
        Ok(())
    }

    /// Record a successful or failed connection attempt.
    pub async fn record_connection(
        &self,
        peer_id: &str,
        success: bool,
        reason: Option<String>,
    ) -> Result<()> {
        let now = now_ms();
        if success {
            let mut peers = self.peers.write().await;
            let peer = peers
                .get_mut(peer_id)
                .ok_or_else(|| PeerStoreError::PeerNotFound(peer_id.to_string()))?;
            peer.connect_count += 1;
            peer.last_connect_ms = Some(now);
        } else {
            let mut peers = self.peers.write().await;
            let peer = peers
                .get_mut(peer_id)
                .ok_or_else(|| PeerStoreError::PeerNotFound(peer_id.to_string()))?;
            peer.disconnect_count += 1;
        }
        self.push_history(ConnectionHistoryEntry {
            peer_id: peer_id.to_string(),
            kind: ConnectionEventKind::Connect,
            timestamp_ms: now,
            duration_ms: None,
            reason,
        })
        .await;
        self.refresh_uptime(peer_id).await?;
        self.mark_dirty();
        Ok(())
    }

    /// Record a disconnection, with the connection's duration.
    pub async fn record_disconnection(
        &self,
        peer_id: &str,
        duration_ms: u64,
        reason: Option<String>,
    ) -> Result<()> {
        let now = now_ms();
        {
            let mut peers = self.peers.write().await;
            let peer = peers
                .get_mut(peer_id)
                .ok_or_else(|| PeerStoreError::PeerNotFound(peer_id.to_string()))?;
            peer.disconnect_count += 1;
        }
        self.push_history(ConnectionHistoryEntry {
            peer_id: peer_id.to_string(),
            kind: ConnectionEventKind::Disconnect,
            timestamp_ms: now,
            duration_ms: Some(duration_ms),
            reason,
        })
        .await;
        self.refresh_uptime(peer_id).await?;
        self.mark_dirty();
        Ok(())
    }

    async fn refresh_uptime(&self, peer_id: &str) -> Result<()> {
        let uptime = {
            let peers = self.peers.read().await;
            peers
                .get(peer_id)
                .ok_or_else(|| PeerStoreError::PeerNotFound(peer_id.to_string()))?
                .uptime()
        };
        let mut scores = self.scores.write().await;
        if let Some(score) = scores.get_mut(peer_id) {
            score.uptime = uptime;
            score.recompute_overall(now_ms());
        }
        Ok(())
    }

    async fn push_history(&self, entry: ConnectionHistoryEntry) {
        let mut history = self.history.write().await;
        history.push_back(entry);
        while history.len() > MAX_HISTORY {
            history.pop_front();
        }
    }

    /// Highest-scoring peers, optionally filtered by advertised service.
    pub async fn get_top_peers(&self, count: usize, service: Option<&str>) -> Vec<Peer> {
        let peers = self.peers.read().await;
        let scores = self.scores.read().await;
        let mut ranked: Vec<(&Peer, f64)> = peers
            .values()
            .filter(|p| service.map(|s| p.services.contains(s)).unwrap_or(true))
            .map(|p| (p, scores.get(&p.peer_id).map(|s| s.overall).unwrap_or(0.0)))
            .collect();
        ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        ranked.into_iter().take(count).map(|(p, _)| p.clone()).collect()
    }

    /// Remove peers whose `last_seen_ms` is older than `max_age_ms`.
    pub async fn prune_stale(&self, max_age_ms: u64) -> usize {
        let now = now_ms();
        let stale_ids: Vec<String> = {
            let peers = self.peers.read().await;
            peers
                .values()
                .filter(|p| now.saturating_sub(p.last_seen_ms) > max_age_ms)
                .map(|p| p.peer_id.clone())
                .collect()
        };
        if stale_ids.is_empty() {
            return 0;
        }
        let mut peers = self.peers.write().await;
        let mut scores = self.scores.write().await;
        for id in &stale_ids {
            peers.remove(id);
            scores.remove(id);
        }
        self.mark_dirty();
        stale_ids.len()
    }

    pub async fn get_peer(&self, peer_id: &str) -> Option<Peer> {
        self.peers.read().await.get(peer_id).cloned()
    }

    pub async fn get_score(&self, peer_id: &str) -> Option<PeerScore> {
        self.scores.read().await.get(peer_id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.peers.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Snapshot the full persisted layout (used by `exportPeers`).
    pub async fn export_peers(&self) -> PersistedLayout {
        PersistedLayout {
            version: PERSISTED_LAYOUT_VERSION,
            peers: self.peers.read().await.clone(),
            scores: self.scores.read().await.clone(),
            connection_history: self.history.read().await.iter().cloned().collect(),
        }
    }

    /// Replace the store's contents from a previously exported layout.
    pub async fn import_peers(&self, layout: PersistedLayout) -> Result<()> {
        if layout.version != PERSISTED_LAYOUT_VERSION {
            return Err(PeerStoreError::VersionMismatch {
                found: layout.version,
                expected: PERSISTED_LAYOUT_VERSION,
            });
        }
        *self.peers.write().await = layout.peers;
        *self.scores.write().await = layout.scores;
        *self.history.write().await = layout.connection_history.into_iter().collect();
        self.mark_dirty();
        Ok(())
    }

    /// Hourly reputation decay: drift 1% toward 50 for every known peer.
    pub async fn decay_reputations(&self) {
        let now = now_ms();
        let mut scores = self.scores.write().await;
        for score in scores.values_mut() {
            score.reputation += DECAY_RATE * (DECAY_TOWARD - score.reputation);
            score.recompute_overall(now);
        }
        drop(scores);
        self.mark_dirty();
    }

    /// Start the hourly decay loop on its own ticker, independent of I/O
    /// state: decay keeps running regardless of persistence failures.
    pub fn start_decay_loop(self: &Arc<Self>) {
        let this = self.clone();
        tokio::spawn(async move {
            let mut ticker =
                tokio::time::interval(std::time::Duration::from_secs(DECAY_INTERVAL_SECS));
            loop {
                ticker.tick().await;
                this.decay_reputations().await;
            }
        });
    }
}
