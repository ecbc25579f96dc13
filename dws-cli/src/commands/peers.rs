//! `dws peers list` / `dws peers show` — queries `/p2p/peers`.

use anyhow::{Context, Result};
use colorful::Colorful;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::CliConfig;
use crate::{Cli, PeersAction};

#[derive(Debug, Serialize, Deserialize)]
pub struct PeerRow {
    pub peer_id: String,
    pub node_id: String,
    pub endpoint: String,
    pub services: Vec<String>,
    pub region: String,
    pub latency: f64,
    pub score: f64,
}

pub async fn handle_peers(action: PeersAction, config: &CliConfig, cli: &Cli) -> Result<()> {
    match action {
        PeersAction::List { limit, service } => {
            let peers = fetch_peers(config, limit, service.as_deref()).await?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&peers)?);
            } else {
                println!("{}", "Known peers".bold());
                for peer in &peers {
                    println!(
                        "  {}  {}  score={:.1}  latency={:.0}ms  [{}]",
                        peer.peer_id,
                        peer.endpoint,
                        peer.score,
                        peer.latency,
                        peer.services.join(",")
                    );
                }
                if peers.is_empty() {
                    println!("  (none)");
                }
            }
        }
        PeersAction::Show { peer_id } => {
            let peers = fetch_peers(config, 10_000, None).await?;
            match peers.into_iter().find(|p| p.peer_id == peer_id) {
                Some(peer) if cli.json => println!("{}", serde_json::to_string_pretty(&peer)?),
                Some(peer) => {
                    println!("{}", "Peer".bold());
                    println!("  Peer ID:  {}", peer.peer_id);
                    println!("  Node ID:  {}", peer.node_id);
                    println!("  Endpoint: {}", peer.endpoint);
                    println!("  Region:   {}", peer.region);
                    println!("  Score:    {:.1}", peer.score);
                    println!("  Latency:  {:.0}ms", peer.latency);
                }
                None => {
                    eprintln!("no such peer: {peer_id}");
                    std::process::exit(1);
                }
            }
        }
    }
    Ok(())
}

async fn fetch_peers(config: &CliConfig, limit: usize, service: Option<&str>) -> Result<Vec<PeerRow>> {
    let mut url = format!("{}/p2p/peers?limit={limit}", config.node_endpoint);
    if let Some(service) = service {
        url.push_str(&format!("&service={service}"));
    }
    let client = reqwest::Client::new();
    client
        .get(&url)
        .timeout(Duration::from_secs(config.timeout_seconds))
        .send()
        .await
        .with_context(|| format!("failed to reach node at {url}"))?
        .json::<Vec<PeerRow>>()
        .await
        .context("failed to parse peers response")
}
