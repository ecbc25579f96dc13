//! `dws-node` binary: loads configuration, starts every enabled
//! subsystem, serves the merged HTTP surface, and shuts down cleanly
//! on SIGINT/SIGTERM.

use std::path::PathBuf;

use anyhow::{Context, Result};
use dws_orchestrator::{App, DwsConfig};

#[tokio::main]
async fn main() -> Result<()> {
    let config_path = std::env::var("DWS_CONFIG").ok().map(PathBuf::from);
    let config = DwsConfig::load(config_path.as_deref()).context("failed to load configuration")?;

    init_logging(&config.logging);

    let app = App::new(config).await.context("failed to initialize dws node")?;
    app.start().await.context("failed to start dws node")?;

    if let Some(bind) = app.config.http.metrics_bind_address.clone() {
        dws_orchestrator::http::install_metrics_recorder(&bind).context("failed to install metrics recorder")?;
    }

    let router = dws_orchestrator::http::router(&app);
    let bind_address = app.config.http.bind_address.clone();
    let listener = tokio::net::TcpListener::bind(&bind_address).await.context("failed to bind http listener")?;
    tracing::info!(%bind_address, "dws node listening");

    tokio::select! {
        result = axum::serve(listener, router) => {
            if let Err(e) = result {
                tracing::error!("http server error: {e}");
            }
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("received shutdown signal");
        }
    }

    app.stop().await;
    Ok(())
}

fn init_logging(config: &dws_orchestrator::config::LoggingConfig) {
    let filter = tracing_subscriber::EnvFilter::try_new(&config.level)
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let subscriber = tracing_subscriber::fmt().with_env_filter(filter);
    if config.json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}
