//! Composition root: wires every subsystem into one node process,
//! grounded in `daa-orchestrator`'s `DaaOrchestrator` (config in,
//! subsystem handles out, `new`/`start`/`stop` lifecycle).

use std::path::PathBuf;
use std::sync::Arc;

use dws_autoscaler::{AutoscalerEngine, MetricCollector};
use dws_ingress::IngressRouter;
use dws_mesh::ServiceMesh;
use dws_p2p::{HttpPeerTransport, P2pService, P2pServiceConfig};
use dws_peer_store::PeerStore;
use dws_poc::PocVerifier;

use crate::adapters::{
    HttpHardwareRegistry, HttpMetricSource, HttpNodeCallback, HttpQuoteParser, HttpScaleCallback,
};
use crate::backend::NoopBackendDispatcher;
use crate::config::DwsConfig;
use crate::error::Result;

/// Every subsystem handle a running node owns. Subsystems that the
/// config disables are left absent rather than started idle.
pub struct App {
    pub config: DwsConfig,
    pub peer_store: Arc<PeerStore>,
    pub p2p: Arc<P2pService>,
    pub autoscaler: Option<Arc<AutoscalerEngine>>,
    pub mesh: Option<Arc<ServiceMesh>>,
    pub ingress: Option<Arc<IngressRouter>>,
    pub poc: Option<Arc<PocVerifier>>,
}

impl App {
    pub async fn new(config: DwsConfig) -> Result<Self> {
        config.validate()?;

        let data_path = config.peer_store.data_path.as_ref().map(PathBuf::from);
        let peer_store = Arc::new(
            PeerStore::new(data_path).with_save_interval_secs(config.peer_store.save_interval_secs),
        );
        peer_store.load().await?;

        let transport = Arc::new(HttpPeerTransport::new());
        let p2p_config = P2pServiceConfig {
            node_id: config.node.node_id.clone(),
            endpoint: config.node.endpoint.clone(),
            services: config.node.services.clone(),
            region: config.node.region.clone(),
            agent_id: config.node.agent_id.clone(),
            bootstrap_sources: Vec::new(),
            bootstrap_refresh_interval: config.bootstrap.refresh_interval,
            max_bootstrap_peers: config.bootstrap.max_bootstrap_peers,
            gossip_heartbeat: config.gossip.heartbeat,
            gossip_seen_ttl: config.gossip.seen_ttl,
        };
        let p2p = Arc::new(P2pService::new(p2p_config, transport, peer_store.clone()));

        let autoscaler = if config.autoscaler.enabled {
            let collector = Arc::new(MetricCollector::new());
            let metric_source = Arc::new(HttpMetricSource::new(config.autoscaler.metric_source_url.clone()));
            let scale_callback = Arc::new(HttpScaleCallback::new(config.autoscaler.scale_callback_url.clone()));
            let node_callback = Arc::new(HttpNodeCallback::new(config.autoscaler.node_callback_url.clone()));
            Some(Arc::new(
                AutoscalerEngine::new(collector, metric_source, scale_callback, node_callback)
                    .with_interval(config.autoscaler.evaluation_interval),
            ))
        } else {
            None
        };

        let mesh = if config.mesh.enabled {
            let mesh = Arc::new(ServiceMesh::new());
            if let (Some(cert), Some(key)) = (&config.mesh.ca_cert_pem, &config.mesh.ca_key_pem) {
                mesh.ca().adopt(cert.clone(), key.clone());
            }
            Some(mesh)
        } else {
            None
        };

        let ingress = if config.ingress.enabled {
            Some(Arc::new(IngressRouter::new(Arc::new(NoopBackendDispatcher), None)))
        } else {
            None
        };

        let poc = if config.poc.enabled {
            let salt = config.poc.hardware_id_salt.clone().unwrap_or_default();
            let quote_parser = Arc::new(HttpQuoteParser::new(config.poc.quote_parser_url.clone()));
            let registry = Arc::new(HttpHardwareRegistry::new(config.poc.registry_url.clone()));
            Some(Arc::new(
                PocVerifier::new(quote_parser, registry, salt).with_cache_ttl_ms(config.poc.cache_ttl.as_millis() as u64),
            ))
        } else {
            None
        };

        Ok(Self { config, peer_store, p2p, autoscaler, mesh, ingress, poc })
    }

    pub async fn start(&self) -> Result<()> {
        tracing::info!(node_id = %self.config.node.node_id, "starting dws node");
        self.p2p.start().await;
        if let Some(autoscaler) = &self.autoscaler {
            autoscaler.start().await;
        }
        Ok(())
    }

    pub async fn stop(&self) {
        tracing::info!("stopping dws node");
        if let Some(autoscaler) = &self.autoscaler {
            autoscaler.stop().await;
        }
        self.p2p.stop().await;
    }
}
