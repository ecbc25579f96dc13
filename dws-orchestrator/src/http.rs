//! Process-level HTTP surface: merges the P2P, mesh, and ingress
//! routers and adds `/healthz` and `/metrics`, grounded in
//! `daa-orchestrator/src/api.rs`'s config-driven axum server shape.

use axum::http::StatusCode;
use axum::routing::get;
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::app::App;

pub fn router(app: &App) -> Router {
    let mut router = Router::new().route("/healthz", get(healthz));

    router = router.merge(dws_p2p::http::router(app.p2p.http_state()));

    if let Some(mesh) = &app.mesh {
        router = router.merge(crate::mesh_http::router(mesh.clone()));
    }
    if let Some(ingress) = &app.ingress {
        router = router.merge(dws_ingress::http::router(ingress.clone()));
    }

    router.layer(CorsLayer::permissive()).layer(TraceLayer::new_for_http())
}

async fn healthz() -> StatusCode {
    StatusCode::OK
}

/// Installs the Prometheus exporter on a dedicated bind address.
pub fn install_metrics_recorder(bind_address: &str) -> crate::error::Result<()> {
    let addr: std::net::SocketAddr = bind_address
        .parse()
        .map_err(|e| crate::error::DwsError::Config(format!("invalid metrics bind address: {e}")))?;
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| crate::error::DwsError::Config(format!("failed to install metrics recorder: {e}")))?;
    Ok(())
}
