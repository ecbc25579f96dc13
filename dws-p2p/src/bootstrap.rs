//! Bootstrap peer discovery: hardcoded seeds, DNS-over-HTTPS, and an
//! on-chain registry source, each health-checked before being handed to
//! [`Discovery`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{watch, RwLock};
use tracing::{info, warn};

use crate::discovery::Discovery;
use crate::error::Result;
use crate::transport::PeerTransport;

pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(300);
pub const RETRY_INTERVAL: Duration = Duration::from_secs(10);
pub const DEFAULT_MAX_BOOTSTRAP_PEERS: usize = 20;

/// One source of candidate bootstrap endpoints.
#[async_trait]
pub trait BootstrapSource: Send + Sync {
    async fn fetch(&self) -> Result<Vec<String>>;
    fn name(&self) -> &str;
}

/// A static, operator-configured seed list.
pub struct HardcodedSource {
    endpoints: Vec<String>,
}

impl HardcodedSource {
    pub fn new(endpoints: Vec<String>) -> Self {
        Self { endpoints }
    }
}

#[async_trait]
impl BootstrapSource for HardcodedSource {
    async fn fetch(&self) -> Result<Vec<String>> {
        Ok(self.endpoints.clone())
    }

    fn name(&self) -> &str {
        "hardcoded"
    }
}

/// Resolves bootstrap endpoints from TXT records served over a
/// DNS-over-HTTPS resolver, one endpoint per record.
pub struct DohSource {
    client: reqwest::Client,
    resolver_url: String,
    domain: String,
}

impl DohSource {
    pub fn new(resolver_url: String, domain: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            resolver_url,
            domain,
        }
    }
}

#[async_trait]
impl BootstrapSource for DohSource {
    async fn fetch(&self) -> Result<Vec<String>> {
        let url = format!(
            "{}?name={}&type=TXT",
            self.resolver_url.trim_end_matches('/'),
            self.domain
        );
        let resp = self
            .client
            .get(&url)
            .header("accept", "application/dns-json")
            .timeout(Duration::from_secs(5))
            .send()
            .await
            .map_err(|e| crate::error::P2pError::Transport(e.to_string()))?;
        let body: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| crate::error::P2pError::Transport(e.to_string()))?;
        let answers = body
            .get("Answer")
            .and_then(|a| a.as_array())
            .cloned()
            .unwrap_or_default();
        let endpoints = answers
            .into_iter()
            .filter_map(|entry| entry.get("data").and_then(|d| d.as_str()).map(str::to_string))
            .map(|raw| raw.trim_matches('"').to_string())
            .collect();
        Ok(endpoints)
    }

    fn name(&self) -> &str {
        "doh"
    }
}

/// An on-chain or otherwise external registry of known-good bootstrap
/// nodes, consumed as a pluggable interface.
#[async_trait]
pub trait OnChainRegistry: Send + Sync {
    async fn fetch_bootstrap_nodes(&self) -> Result<Vec<String>>;
}

pub struct RegistrySource {
    registry: Arc<dyn OnChainRegistry>,
}

impl RegistrySource {
    pub fn new(registry: Arc<dyn OnChainRegistry>) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl BootstrapSource for RegistrySource {
    async fn fetch(&self) -> Result<Vec<String>> {
        self.registry.fetch_bootstrap_nodes().await
    }

    fn name(&self) -> &str {
        "registry"
    }
}

pub struct BootstrapManager {
    sources: Vec<Arc<dyn BootstrapSource>>,
    discovery: Arc<Discovery>,
    transport: Arc<dyn PeerTransport>,
    refresh_interval: Duration,
    max_bootstrap_peers: usize,
    shutdown_tx: RwLock<Option<watch::Sender<bool>>>,
}

impl BootstrapManager {
    pub fn new(
        sources: Vec<Arc<dyn BootstrapSource>>,
        discovery: Arc<Discovery>,
        transport: Arc<dyn PeerTransport>,
    ) -> Self {
        Self {
            sources,
            discovery,
            transport,
            refresh_interval: DEFAULT_REFRESH_INTERVAL,
            max_bootstrap_peers: DEFAULT_MAX_BOOTSTRAP_PEERS,
            shutdown_tx: RwLock::new(None),
        }
    }

    pub fn with_refresh_interval(mut self, interval: Duration) -> Self {
        self.refresh_interval = interval;
        self
    }

    pub fn with_max_bootstrap_peers(mut self, max: usize) -> Self {
        self.max_bootstrap_peers = max;
        self
    }

    pub async fn start(self: &Arc<Self>) {
        let (tx, mut rx) = watch::channel(false);
        *self.shutdown_tx.write().await = Some(tx);
        let manager = self.clone();
        tokio::spawn(async move {
            loop {
                let healthy = manager.run_once().await;
                let wait = if healthy == 0 {
                    RETRY_INTERVAL
                } else {
                    manager.refresh_interval
                };
                tokio::select! {
                    _ = tokio::time::sleep(wait) => {}
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

    /// Gathers candidates from every source, health-checks them, and
    /// dials the healthy ones up to `max_bootstrap_peers`. Returns the
    /// number of peers successfully dialed.
    pub async fn run_once(&self) -> usize {
        let mut candidates: Vec<String> = Vec::new();
        for source in &self.sources {
            match source.fetch().await {
                Ok(endpoints) => candidates.extend(endpoints),
                Err(e) => warn!("bootstrap source {} failed: {e}", source.name()),
            }
        }
        candidates.sort();
        candidates.dedup();
        candidates.truncate(self.max_bootstrap_peers);

        let mut dialed = 0;
        for endpoint in candidates {
            if self.transport.ping(&endpoint, self.discovery.node_id()).await.is_err() {
                continue;
            }
            match self.transport.fetch_info(&endpoint).await {
                Ok(info) => {
                    if self.discovery.dial(&info.peer_id, &endpoint).await.is_ok() {
                        dialed += 1;
                        info!("bootstrapped peer {}", info.peer_id);
                    }
                }
                Err(e) => warn!("bootstrap peer info fetch failed for {endpoint}: {e}"),
            }
        }
        dialed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{DhtRecord, NodeInfo, PeerSummary, PingResponse};
    use dws_peer_store::{now_ms, PeerStore};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct AlwaysHealthyTransport {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl PeerTransport for AlwaysHealthyTransport {
        async fn ping(&self, _endpoint: &str, _from: &str) -> Result<PingResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(PingResponse {
                pong: true,
                from: "self".into(),
                timestamp: now_ms(),
                peer: "peer".into(),
            })
        }
        async fn fetch_info(&self, endpoint: &str) -> Result<NodeInfo> {
            Ok(NodeInfo {
                peer_id: format!("Qm{}", endpoint.len()),
                node_id: "seed".into(),
                services: vec![],
                region: "us".into(),
                agent_id: "0".into(),
                endpoint: endpoint.to_string(),
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

    #[tokio::test]
    async fn run_once_dials_reachable_hardcoded_seeds() {
        let transport: Arc<dyn PeerTransport> = Arc::new(AlwaysHealthyTransport {
            calls: AtomicUsize::new(0),
        });
        let peer_store = Arc::new(PeerStore::new(None));
        let discovery = Arc::new(Discovery::new(
            "self-node".into(),
            "http://self".into(),
            peer_store,
            transport.clone(),
        ));
        let source: Arc<dyn BootstrapSource> =
            Arc::new(HardcodedSource::new(vec!["http://seed-1".into(), "http://seed-2".into()]));
        let manager = BootstrapManager::new(vec![source], discovery.clone(), transport);
        let dialed = manager.run_once().await;
        assert_eq!(dialed, 2);
        assert_eq!(discovery.connection_count().await, 2);
    }

    #[tokio::test]
    async fn run_once_with_no_sources_dials_nothing() {
        let transport: Arc<dyn PeerTransport> = Arc::new(AlwaysHealthyTransport {
            calls: AtomicUsize::new(0),
        });
        let peer_store = Arc::new(PeerStore::new(None));
        let discovery = Arc::new(Discovery::new(
            "self-node".into(),
            "http://self".into(),
            peer_store,
            transport.clone(),
        ));
        let manager = BootstrapManager::new(vec![], discovery, transport);
        assert_eq!(manager.run_once().await, 0);
    }
}
