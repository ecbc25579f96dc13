//! `dws mesh cert` — requests a leaf certificate from the node's mesh
//! CA over `/mesh/certificates`.

use anyhow::{Context, Result};
use serde_json::Value;
use std::time::Duration;

use crate::config::CliConfig;
use crate::{Cli, MeshAction};

pub async fn handle_mesh(action: MeshAction, config: &CliConfig, cli: &Cli) -> Result<()> {
    match action {
        MeshAction::Cert { name, namespace } => {
            let url = format!("{}/mesh/certificates", config.node_endpoint);
            let client = reqwest::Client::new();
            let body = serde_json::json!({
                "name": name,
                "namespace": namespace,
            });
            let bundle: Value = client
                .post(&url)
                .json(&body)
                .timeout(Duration::from_secs(config.timeout_seconds))
                .send()
                .await
                .with_context(|| format!("failed to reach node at {url}"))?
                .json()
                .await
                .context("failed to parse certificate response")?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&bundle)?);
            } else if let Some(cert_pem) = bundle.get("cert_pem").and_then(Value::as_str) {
                println!("{cert_pem}");
            } else {
                println!("{bundle}");
            }
        }
    }
    Ok(())
}
