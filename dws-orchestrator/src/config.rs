//! Node configuration: TOML file plus the environment variables the
//! core consumes directly.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{DwsError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JejuNetwork {
    Localnet,
    Testnet,
    Mainnet,
}

impl Default for JejuNetwork {
    fn default() -> Self {
        JejuNetwork::Localnet
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DwsConfig {
    pub node: NodeConfig,
    pub network: NetworkConfig,
    pub peer_store: PeerStoreConfig,
    pub bootstrap: BootstrapConfig,
    pub gossip: GossipConfig,
    pub autoscaler: AutoscalerConfig,
    pub mesh: MeshConfig,
    pub ingress: IngressConfig,
    pub poc: PocConfig,
    pub logging: LoggingConfig,
    pub http: HttpConfig,
}

impl Default for DwsConfig {
    fn default() -> Self {
        Self {
            node: NodeConfig::default(),
            network: NetworkConfig::default(),
            peer_store: PeerStoreConfig::default(),
            bootstrap: BootstrapConfig::default(),
            gossip: GossipConfig::default(),
            autoscaler: AutoscalerConfig::default(),
            mesh: MeshConfig::default(),
            ingress: IngressConfig::default(),
            poc: PocConfig::default(),
            logging: LoggingConfig::default(),
            http: HttpConfig::default(),
        }
    }
}

/// Identity of this node within the overlay.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    pub node_id: String,
    pub endpoint: String,
    pub services: Vec<String>,
    pub region: String,
    pub agent_id: String,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            node_id: "dws-node".to_string(),
            endpoint: "http://127.0.0.1:7000".to_string(),
            services: vec!["worker".to_string()],
            region: "local".to_string(),
            agent_id: "0".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Which Jeju network this node participates in; governs whether
    /// `HARDWARE_ID_SALT` is mandatory at init.
    pub jeju_network: JejuNetwork,
    pub max_connections: usize,
    pub min_desired_connections: usize,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self { jeju_network: JejuNetwork::Localnet, max_connections: 100, min_desired_connections: 10 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerStoreConfig {
    pub data_path: Option<String>,
    pub save_interval_secs: u64,
}

impl Default for PeerStoreConfig {
    fn default() -> Self {
        Self { data_path: Some("./data/peer-store.json".to_string()), save_interval_secs: 60 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BootstrapConfig {
    pub peers: Vec<String>,
    pub doh_resolver: Option<String>,
    pub doh_hostname: Option<String>,
    pub max_bootstrap_peers: usize,
    #[serde(with = "duration_secs")]
    pub refresh_interval: Duration,
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            peers: Vec::new(),
            doh_resolver: None,
            doh_hostname: None,
            max_bootstrap_peers: 20,
            refresh_interval: Duration::from_secs(300),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GossipConfig {
    #[serde(with = "duration_millis")]
    pub heartbeat: Duration,
    #[serde(with = "duration_secs")]
    pub seen_ttl: Duration,
}

impl Default for GossipConfig {
    fn default() -> Self {
        Self { heartbeat: Duration::from_secs(1), seen_ttl: Duration::from_secs(120) }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutoscalerConfig {
    pub enabled: bool,
    #[serde(with = "duration_secs")]
    pub evaluation_interval: Duration,
    /// External platform endpoints implementing the scaling callback
    /// contract.
    pub metric_source_url: Option<String>,
    pub scale_callback_url: Option<String>,
    pub node_callback_url: Option<String>,
}

impl Default for AutoscalerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            evaluation_interval: Duration::from_secs(15),
            metric_source_url: None,
            scale_callback_url: None,
            node_callback_url: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeshConfig {
    pub enabled: bool,
    /// Populated from `DWS_MESH_CA_CERT` / `DWS_MESH_CA_KEY` when set;
    /// a self-signed CA is generated otherwise.
    #[serde(skip)]
    pub ca_cert_pem: Option<String>,
    #[serde(skip)]
    pub ca_key_pem: Option<String>,
}

impl Default for MeshConfig {
    fn default() -> Self {
        Self { enabled: true, ca_cert_pem: None, ca_key_pem: None }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngressConfig {
    pub enabled: bool,
}

impl Default for IngressConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PocConfig {
    pub enabled: bool,
    /// Populated from `HARDWARE_ID_SALT`; mandatory on mainnet.
    #[serde(skip)]
    pub hardware_id_salt: Option<String>,
    #[serde(with = "duration_millis")]
    pub cache_ttl: Duration,
    /// External quote-parser and hardware-registry endpoints.
    pub quote_parser_url: Option<String>,
    pub registry_url: Option<String>,
}

impl Default for PocConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            hardware_id_salt: None,
            cache_ttl: Duration::from_secs(300),
            quote_parser_url: None,
            registry_url: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".to_string(), json: false }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    pub bind_address: String,
    pub metrics_bind_address: Option<String>,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self { bind_address: "0.0.0.0:7000".to_string(), metrics_bind_address: Some("0.0.0.0:9000".to_string()) }
    }
}

impl DwsConfig {
    /// Loads a TOML config file (if present) and overlays the
    /// environment variables the core consumes directly.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) if path.exists() => {
                let content = std::fs::read_to_string(path)?;
                toml::from_str(&content).map_err(|e| DwsError::Config(e.to_string()))?
            }
            _ => DwsConfig::default(),
        };
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    fn apply_env(&mut self) {
        if let Ok(network) = std::env::var("JEJU_NETWORK") {
            self.network.jeju_network = match network.to_lowercase().as_str() {
                "mainnet" => JejuNetwork::Mainnet,
                "testnet" => JejuNetwork::Testnet,
                _ => JejuNetwork::Localnet,
            };
        }
        if let Ok(salt) = std::env::var("HARDWARE_ID_SALT") {
            self.poc.hardware_id_salt = Some(salt);
        }
        if let Ok(cert) = std::env::var("DWS_MESH_CA_CERT") {
            self.mesh.ca_cert_pem = Some(cert);
        }
        if let Ok(key) = std::env::var("DWS_MESH_CA_KEY") {
            self.mesh.ca_key_pem = Some(key);
        }
    }

    /// Fatal initialization check: mainnet requires a 32-byte hex
    /// `HARDWARE_ID_SALT`; never silently defaulted.
    pub fn validate(&self) -> Result<()> {
        if self.network.jeju_network == JejuNetwork::Mainnet {
            let salt = self
                .poc
                .hardware_id_salt
                .as_ref()
                .ok_or_else(|| DwsError::Initialization("HARDWARE_ID_SALT is required on mainnet".into()))?;
            let bytes = hex::decode(salt)
                .map_err(|_| DwsError::Initialization("HARDWARE_ID_SALT must be hex-encoded".into()))?;
            if bytes.len() != 32 {
                return Err(DwsError::Initialization("HARDWARE_ID_SALT must decode to 32 bytes".into()));
            }
        }
        if self.mesh.ca_cert_pem.is_some() != self.mesh.ca_key_pem.is_some() {
            return Err(DwsError::Config("DWS_MESH_CA_CERT and DWS_MESH_CA_KEY must be set together".into()));
        }
        Ok(())
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> std::result::Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(d)?))
    }
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> std::result::Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert!(DwsConfig::default().validate().is_ok());
    }

    #[test]
    fn mainnet_without_salt_is_rejected() {
        let mut config = DwsConfig::default();
        config.network.jeju_network = JejuNetwork::Mainnet;
        assert!(config.validate().is_err());
    }

    #[test]
    fn mainnet_with_valid_salt_is_accepted() {
        let mut config = DwsConfig::default();
        config.network.jeju_network = JejuNetwork::Mainnet;
        config.poc.hardware_id_salt = Some("00".repeat(32));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn mainnet_with_wrong_length_salt_is_rejected() {
        let mut config = DwsConfig::default();
        config.network.jeju_network = JejuNetwork::Mainnet;
        config.poc.hardware_id_salt = Some("00".repeat(16));
        assert!(config.validate().is_err());
    }

    #[test]
    fn round_trips_through_toml() {
        let config = DwsConfig::default();
        let text = toml::to_string(&config).unwrap();
        let parsed: DwsConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed.node.node_id, config.node.node_id);
    }
}
