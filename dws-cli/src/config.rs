//! CLI-local configuration: which node to talk to and how to render
//! output, distinct from the node's own [`dws_orchestrator::DwsConfig`].

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CliConfig {
    pub node_endpoint: String,
    pub timeout_seconds: u64,
}

impl Default for CliConfig {
    fn default() -> Self {
        Self { node_endpoint: "http://127.0.0.1:7000".to_string(), timeout_seconds: 10 }
    }
}

impl CliConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("failed to read config file: {}", path.as_ref().display()))?;
        toml::from_str(&content).with_context(|| format!("failed to parse config file: {}", path.as_ref().display()))
    }

    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self).context("failed to serialize cli config")?;
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create directory: {}", parent.display()))?;
        }
        std::fs::write(path.as_ref(), content)
            .with_context(|| format!("failed to write config file: {}", path.as_ref().display()))
    }

    pub fn validate(&self) -> Result<()> {
        if self.timeout_seconds == 0 {
            anyhow::bail!("timeout_seconds cannot be 0");
        }
        if self.node_endpoint.is_empty() {
            anyhow::bail!("node_endpoint cannot be empty");
        }
        Ok(())
    }
}

/// Handle the `config` subcommand. Lives here rather than in
/// `commands::config` so `config::handle_config` resolves to this
/// module even though `commands::*` is glob-imported into main.
pub async fn handle_config(action: crate::ConfigAction, config: &CliConfig, cli: &crate::Cli) -> Result<()> {
    match action {
        crate::ConfigAction::Show => {
            if cli.json {
                println!("{}", serde_json::to_string_pretty(config)?);
            } else {
                println!("DWS CLI Configuration:");
                println!("  Node endpoint:   {}", config.node_endpoint);
                println!("  Timeout (secs):  {}", config.timeout_seconds);
            }
        }
        crate::ConfigAction::Validate => match config.validate() {
            Ok(()) => {
                if cli.json {
                    println!("{}", serde_json::json!({ "status": "valid" }));
                } else {
                    println!("configuration is valid");
                }
            }
            Err(e) => {
                if cli.json {
                    println!("{}", serde_json::json!({ "status": "invalid", "error": e.to_string() }));
                } else {
                    eprintln!("configuration is invalid: {e}");
                }
                std::process::exit(1);
            }
        },
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(CliConfig::default().validate().is_ok());
    }

    #[test]
    fn round_trips_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cli.toml");
        let config = CliConfig::default();
        config.to_file(&path).unwrap();
        let loaded = CliConfig::from_file(&path).unwrap();
        assert_eq!(loaded.node_endpoint, config.node_endpoint);
    }
}
