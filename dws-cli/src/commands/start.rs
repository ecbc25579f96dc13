//! `dws start` — runs a node in the foreground of the CLI process
//! (the same composition root the `dws-node` binary uses).

use anyhow::{Context, Result};
use std::path::PathBuf;

use dws_orchestrator::{App, DwsConfig};

use crate::Cli;

pub async fn handle_start(config_path: Option<PathBuf>, cli: &Cli) -> Result<()> {
    let node_config = DwsConfig::load(config_path.as_deref()).context("failed to load node configuration")?;
    let app = App::new(node_config).await.context("failed to initialize node")?;
    app.start().await.context("failed to start node")?;

    let router = dws_orchestrator::http::router(&app);
    let bind_address = app.config.http.bind_address.clone();
    let listener = tokio::net::TcpListener::bind(&bind_address).await.context("failed to bind http listener")?;

    if !cli.json {
        println!("dws node listening on {bind_address}");
        println!("press ctrl-c to stop");
    }

    tokio::select! {
        result = axum::serve(listener, router) => {
            if let Err(e) = result {
                tracing::error!("http server error: {e}");
            }
        }
        _ = tokio::signal::ctrl_c() => {}
    }

    app.stop().await;
    Ok(())
}
