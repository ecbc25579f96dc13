//! `dws` — command-line interface for operating a DWS node.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;

mod commands;
mod config;
mod utils;

use commands::*;
use config::CliConfig;

#[derive(Parser)]
#[command(name = "dws")]
#[command(about = "Command-line interface for the DWS control-plane node")]
#[command(version)]
pub struct Cli {
    /// CLI configuration file path
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// JSON output format
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Clone)]
pub enum Commands {
    /// Start a DWS node in the foreground
    Start {
        /// Node configuration file path (DwsConfig, not the CLI config)
        #[arg(long)]
        node_config: Option<PathBuf>,
    },

    /// Show node status
    Status {
        /// Watch mode (continuous updates)
        #[arg(short, long)]
        watch: bool,

        /// Update interval in seconds for watch mode
        #[arg(long, default_value = "5")]
        interval: u64,
    },

    /// Peer store inspection
    Peers {
        #[command(subcommand)]
        action: PeersAction,
    },

    /// CLI configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Service mesh operations
    Mesh {
        #[command(subcommand)]
        action: MeshAction,
    },
}

#[derive(Subcommand, Clone)]
pub enum PeersAction {
    /// List known peers
    List {
        #[arg(short, long, default_value = "50")]
        limit: usize,
        #[arg(short, long)]
        service: Option<String>,
    },
    /// Show a single peer
    Show { peer_id: String },
}

#[derive(Subcommand, Clone)]
pub enum ConfigAction {
    /// Show current CLI configuration
    Show,
    /// Validate the CLI configuration
    Validate,
}

#[derive(Subcommand, Clone)]
pub enum MeshAction {
    /// Issue a mesh certificate for a service identity
    Cert {
        #[arg(short, long)]
        name: String,
        #[arg(short = 'N', long)]
        namespace: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli);
    let config = load_config(&cli).await?;

    match &cli.command {
        Commands::Start { node_config } => start::handle_start(node_config.clone(), &cli).await,
        Commands::Status { watch, interval } => status::handle_status(*watch, *interval, &config, &cli).await,
        Commands::Peers { action } => peers::handle_peers(action.clone(), &config, &cli).await,
        Commands::Config { action } => config::handle_config(action.clone(), &config, &cli).await,
        Commands::Mesh { action } => mesh::handle_mesh(action.clone(), &config, &cli).await,
    }
}

fn init_logging(cli: &Cli) {
    let level = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt().with_env_filter(format!("dws={level}")).with_target(false).init();
}

async fn load_config(cli: &Cli) -> Result<CliConfig> {
    let config_path = if let Some(path) = &cli.config { path.clone() } else { utils::get_default_config_path()? };

    if config_path.exists() {
        info!("loading configuration from {}", config_path.display());
        CliConfig::from_file(&config_path)
            .with_context(|| format!("failed to load config from {}", config_path.display()))
    } else {
        Ok(CliConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn verify_cli() {
        Cli::command().debug_assert();
    }
}
