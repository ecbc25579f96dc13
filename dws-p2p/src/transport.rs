//! Outbound P2P transport: the narrow interface Discovery, Bootstrap, and
//! Gossip use to reach other nodes over HTTP. Defined as a trait injected
//! at construction so tests can swap in a fake.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::{P2pError, Result};
use crate::types::{DhtRecord, GossipEnvelope, NodeInfo, PeerSummary, PingResponse};

pub const PING_TIMEOUT: Duration = Duration::from_secs(5);
pub const DHT_TIMEOUT: Duration = Duration::from_secs(5);

#[async_trait]
pub trait PeerTransport: Send + Sync {
    async fn ping(&self, endpoint: &str, from: &str) -> Result<PingResponse>;
    async fn fetch_info(&self, endpoint: &str) -> Result<NodeInfo>;
    async fn fetch_peers(
        &self,
        endpoint: &str,
        limit: usize,
        service: Option<&str>,
    ) -> Result<Vec<PeerSummary>>;
    async fn dht_put(&self, endpoint: &str, record: &DhtRecord) -> Result<()>;
    async fn dht_get(&self, endpoint: &str, key: &str) -> Result<Option<DhtRecord>>;

    /// Default no-op so existing implementors (and test fakes) compile
    /// without tracking gossip; [`HttpPeerTransport`] overrides it.
    async fn send_gossip(&self, _endpoint: &str, _envelope: &GossipEnvelope) -> Result<()> {
        Err(P2pError::Transport("gossip transport not implemented".into()))
    }
}

/// Production transport: plain HTTP against the P2P control-plane surface.
pub struct HttpPeerTransport {
    client: reqwest::Client,
}

impl HttpPeerTransport {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for HttpPeerTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PeerTransport for HttpPeerTransport {
    async fn ping(&self, endpoint: &str, from: &str) -> Result<PingResponse> {
        let url = format!("{endpoint}/p2p/ping");
        let resp = self
            .client
            .post(&url)
            .json(&crate::types::PingRequest {
                from: from.to_string(),
            })
            .timeout(PING_TIMEOUT)
            .send()
            .await
            .map_err(|e| P2pError::Transport(e.to_string()))?;
        resp.json::<PingResponse>()
            .await
            .map_err(|e| P2pError::Transport(e.to_string()))
    }

    async fn fetch_info(&self, endpoint: &str) -> Result<NodeInfo> {
        let url = format!("{endpoint}/p2p/info");
        let resp = self
            .client
            .get(&url)
            .timeout(PING_TIMEOUT)
            .send()
            .await
            .map_err(|e| P2pError::Transport(e.to_string()))?;
        resp.json::<NodeInfo>()
            .await
            .map_err(|e| P2pError::Transport(e.to_string()))
    }

    async fn fetch_peers(
        &self,
        endpoint: &str,
        limit: usize,
        service: Option<&str>,
    ) -> Result<Vec<PeerSummary>> {
        let mut url = format!("{endpoint}/p2p/peers?limit={limit}");
        if let Some(service) = service {
            url.push_str(&format!("&service={service}"));
        }
        let resp = self
            .client
            .get(&url)
            .timeout(PING_TIMEOUT)
            .send()
            .await
            .map_err(|e| P2pError::Transport(e.to_string()))?;
        resp.json::<Vec<PeerSummary>>()
            .await
            .map_err(|e| P2pError::Transport(e.to_string()))
    }

    async fn dht_put(&self, endpoint: &str, record: &DhtRecord) -> Result<()> {
        let url = format!("{endpoint}/p2p/dht/put");
        self.client
            .post(&url)
            .json(record)
            .timeout(DHT_TIMEOUT)
            .send()
            .await
            .map_err(|e| P2pError::Transport(e.to_string()))?;
        Ok(())
    }

    async fn dht_get(&self, endpoint: &str, key: &str) -> Result<Option<DhtRecord>> {
        let url = format!("{endpoint}/p2p/dht/get?key={key}");
        let resp = self
            .client
            .get(&url)
            .timeout(DHT_TIMEOUT)
            .send()
            .await
            .map_err(|e| P2pError::Transport(e.to_string()))?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let record = resp
            .json::<DhtRecord>()
            .await
            .map_err(|e| P2pError::Transport(e.to_string()))?;
        Ok(Some(record))
    }

    async fn send_gossip(&self, endpoint: &str, envelope: &GossipEnvelope) -> Result<()> {
        let url = format!("{endpoint}/p2p/gossip");
        self.client
            .post(&url)
            .json(envelope)
            .timeout(PING_TIMEOUT)
            .send()
            .await
            .map_err(|e| P2pError::Transport(e.to_string()))?;
        Ok(())
    }
}
