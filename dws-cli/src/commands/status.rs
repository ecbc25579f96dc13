//! `dws status` — queries a running node's `/p2p/info` surface.

use anyhow::{Context, Result};
use colorful::Colorful;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::CliConfig;
use crate::Cli;

#[derive(Debug, Serialize, Deserialize)]
pub struct NodeStatus {
    pub peer_id: String,
    pub node_id: String,
    pub services: Vec<String>,
    pub region: String,
    pub agent_id: String,
    pub endpoint: String,
    pub connections: usize,
    pub peers: usize,
}

pub async fn handle_status(watch: bool, interval: u64, config: &CliConfig, cli: &Cli) -> Result<()> {
    if watch {
        loop {
            print!("\x1B[2J\x1B[1;1H");
            print_status(config, cli).await?;
            tokio::time::sleep(Duration::from_secs(interval)).await;
        }
    }
    print_status(config, cli).await
}

async fn print_status(config: &CliConfig, cli: &Cli) -> Result<()> {
    let status = fetch_status(config).await?;
    if cli.json {
        println!("{}", serde_json::to_string_pretty(&status)?);
    } else {
        println!("{}", "DWS Node Status".bold());
        println!("  Node ID:     {}", status.node_id);
        println!("  Peer ID:     {}", status.peer_id);
        println!("  Region:      {}", status.region);
        println!("  Services:    {}", status.services.join(", "));
        println!("  Endpoint:    {}", status.endpoint);
        println!("  Connections: {}", status.connections);
        println!("  Known peers: {}", status.peers);
    }
    Ok(())
}

async fn fetch_status(config: &CliConfig) -> Result<NodeStatus> {
    let url = format!("{}/p2p/info", config.node_endpoint);
    let client = reqwest::Client::new();
    client
        .get(&url)
        .timeout(Duration::from_secs(config.timeout_seconds))
        .send()
        .await
        .with_context(|| format!("failed to reach node at {url}"))?
        .json::<NodeStatus>()
        .await
        .context("failed to parse node status response")
}
