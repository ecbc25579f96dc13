//! Wires the peer store, discovery, bootstrap, and gossip subsystems
//! into a single start/stop-able P2P service.

use std::sync::Arc;
use std::time::Duration;

use dws_peer_store::PeerStore;

use crate::bootstrap::{BootstrapManager, BootstrapSource};
use crate::discovery::Discovery;
use crate::gossip::GossipEngine;
use crate::http::P2pState;
use crate::transport::PeerTransport;

pub struct P2pServiceConfig {
    pub node_id: String,
    pub endpoint: String,
    pub services: Vec<String>,
    pub region: String,
    pub agent_id: String,
    pub bootstrap_sources: Vec<Arc<dyn BootstrapSource>>,
    pub bootstrap_refresh_interval: Duration,
    pub max_bootstrap_peers: usize,
    pub gossip_heartbeat: Duration,
    pub gossip_seen_ttl: Duration,
}

/// Top-level P2P subsystem handle; owns the lifecycle of its
/// sub-components and produces the [`P2pState`] for the HTTP surface.
pub struct P2pService {
    pub peer_store: Arc<PeerStore>,
    pub discovery: Arc<Discovery>,
    pub bootstrap: Arc<BootstrapManager>,
    pub gossip: Arc<GossipEngine>,
    config: P2pServiceConfig,
}

impl P2pService {
    pub fn new(
        config: P2pServiceConfig,
        transport: Arc<dyn PeerTransport>,
        peer_store: Arc<PeerStore>,
    ) -> Self {
        let discovery = Arc::new(Discovery::new(
            config.node_id.clone(),
            config.endpoint.clone(),
            peer_store.clone(),
            transport.clone(),
        ));
        let bootstrap = Arc::new(
            BootstrapManager::new(config.bootstrap_sources.clone(), discovery.clone(), transport.clone())
                .with_refresh_interval(config.bootstrap_refresh_interval)
                .with_max_bootstrap_peers(config.max_bootstrap_peers),
        );
        let gossip = Arc::new(
            GossipEngine::new(
                discovery.self_peer_id().to_string(),
                discovery.clone(),
                transport,
                peer_store.clone(),
            )
            .with_heartbeat(config.gossip_heartbeat)
            .with_seen_ttl(config.gossip_seen_ttl),
        );

        Self {
            peer_store,
            discovery,
            bootstrap,
            gossip,
            config,
        }
    }

    pub async fn start(&self) {
        self.peer_store.start().await;
        self.peer_store.start_decay_loop();
        self.discovery.start().await;
        self.bootstrap.start().await;
        self.gossip.start().await;
    }

    pub async fn stop(&self) {
        self.gossip.stop().await;
        self.bootstrap.stop().await;
        self.discovery.stop().await;
        let _ = self.peer_store.stop().await;
    }

    pub fn http_state(&self) -> P2pState {
        P2pState {
            discovery: self.discovery.clone(),
            gossip: self.gossip.clone(),
            peer_store: self.peer_store.clone(),
            bootstrap: Some(self.bootstrap.clone()),
            node_id: self.config.node_id.clone(),
            services: self.config.services.clone(),
            region: self.config.region.clone(),
            agent_id: self.config.agent_id.clone(),
        }
    }
}
