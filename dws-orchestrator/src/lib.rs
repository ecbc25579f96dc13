//! Composition root for a DWS control-plane node: configuration,
//! subsystem wiring, and the merged HTTP surface.

pub mod adapters;
pub mod app;
pub mod backend;
pub mod config;
pub mod error;
pub mod http;
pub mod mesh_http;

pub use app::App;
pub use config::DwsConfig;
pub use error::{DwsError, Result};

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn app_builds_and_starts_with_defaults() {
        let config = DwsConfig::default();
        let app = App::new(config).await.expect("app should build with defaults");
        app.start().await.expect("app should start cleanly");
        tokio::time::sleep(Duration::from_millis(20)).await;
        app.stop().await;
    }

    #[tokio::test]
    async fn app_respects_disabled_subsystems() {
        let mut config = DwsConfig::default();
        config.autoscaler.enabled = false;
        config.mesh.enabled = false;
        config.ingress.enabled = false;
        config.poc.enabled = false;
        let app = App::new(config).await.expect("app should build with subsystems disabled");
        assert!(app.autoscaler.is_none());
        assert!(app.mesh.is_none());
        assert!(app.ingress.is_none());
        assert!(app.poc.is_none());
    }

    #[tokio::test]
    async fn app_rejects_mainnet_without_salt() {
        let mut config = DwsConfig::default();
        config.network.jeju_network = config::JejuNetwork::Mainnet;
        assert!(App::new(config).await.is_err());
    }
}
