//! P2P control-plane HTTP surface: ping/info/peers/dht/gossip
//! endpoints exposed over axum, using a `Router::new().route(...)` +
//! background-task-spawn wiring style.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use dws_peer_store::{now_ms, PeerStore};

use crate::bootstrap::BootstrapManager;
use crate::discovery::Discovery;
use crate::gossip::GossipEngine;
use crate::types::{DhtRecord, GossipEnvelope, NodeInfo, PeerSummary, PingRequest, PingResponse};

#[derive(Clone)]
pub struct P2pState {
    pub discovery: Arc<Discovery>,
    pub gossip: Arc<GossipEngine>,
    pub peer_store: Arc<PeerStore>,
    pub bootstrap: Option<Arc<BootstrapManager>>,
    pub node_id: String,
    pub services: Vec<String>,
    pub region: String,
    pub agent_id: String,
}

pub fn router(state: P2pState) -> Router {
    Router::new()
        .route("/p2p/ping", post(ping))
        .route("/p2p/info", get(info))
        .route("/p2p/peers", get(peers))
        .route("/p2p/dht/get", get(dht_get))
        .route("/p2p/dht/put", post(dht_put))
        .route("/p2p/gossip", post(gossip))
        .route("/p2p/bootstrap", get(bootstrap))
        .route("/p2p/health", get(health))
        .route("/p2p/stats", get(stats))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(Arc::new(state))
}

async fn ping(
    State(state): State<Arc<P2pState>>,
    Json(req): Json<PingRequest>,
) -> impl IntoResponse {
    Json(PingResponse {
        pong: true,
        from: state.node_id.clone(),
        timestamp: now_ms(),
        peer: req.from,
    })
}

async fn info(State(state): State<Arc<P2pState>>) -> impl IntoResponse {
    Json(NodeInfo {
        peer_id: state.discovery.self_peer_id().to_string(),
        node_id: state.node_id.clone(),
        services: state.services.clone(),
        region: state.region.clone(),
        agent_id: state.agent_id.clone(),
        endpoint: state.discovery.endpoint().to_string(),
        connections: state.discovery.connection_count().await,
        peers: state.peer_store.len().await,
    })
}

#[derive(Deserialize)]
struct PeersQuery {
    #[serde(default = "default_peers_limit")]
    limit: usize,
    service: Option<String>,
}

fn default_peers_limit() -> usize {
    20
}

async fn peers(
    State(state): State<Arc<P2pState>>,
    Query(q): Query<PeersQuery>,
) -> impl IntoResponse {
    let peers = state
        .peer_store
        .get_top_peers(q.limit, q.service.as_deref())
        .await;
    let mut summaries = Vec::with_capacity(peers.len());
    for peer in peers {
        let score = state.peer_store.get_score(&peer.peer_id).await;
        summaries.push(PeerSummary {
            peer_id: peer.peer_id.clone(),
            node_id: peer.node_id.clone(),
            endpoint: peer.addresses.first().cloned().unwrap_or_default(),
            services: peer.services.iter().cloned().collect(),
            region: peer.region.clone(),
            latency: score.as_ref().map(|s| s.latency_ms).unwrap_or(0.0),
            score: score.map(|s| s.overall).unwrap_or(0.0),
        });
    }
    Json(summaries)
}

#[derive(Deserialize)]
struct DhtGetQuery {
    key: String,
}

async fn dht_get(
    State(state): State<Arc<P2pState>>,
    Query(q): Query<DhtGetQuery>,
) -> impl IntoResponse {
    match state.discovery.dht_get(&q.key).await {
        Ok(Some(record)) => Json(record).into_response(),
        Ok(None) => StatusCode::NOT_FOUND.into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

async fn dht_put(
    State(state): State<Arc<P2pState>>,
    Json(record): Json<DhtRecord>,
) -> impl IntoResponse {
    match state.discovery.dht_put(record).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

async fn gossip(
    State(state): State<Arc<P2pState>>,
    Json(envelope): Json<GossipEnvelope>,
) -> impl IntoResponse {
    let source = match &envelope {
        GossipEnvelope::Message(m) => m.from.clone(),
        GossipEnvelope::Control(c) => c.from.clone(),
    };
    state.gossip.handle_envelope(&source, envelope).await;
    StatusCode::NO_CONTENT
}

async fn bootstrap(State(state): State<Arc<P2pState>>) -> impl IntoResponse {
    let dialed = match &state.bootstrap {
        Some(manager) => manager.run_once().await,
        None => 0,
    };
    Json(serde_json::json!({ "dialed": dialed }))
}

async fn health() -> impl IntoResponse {
    StatusCode::OK
}

async fn stats(State(state): State<Arc<P2pState>>) -> impl IntoResponse {
    Json(serde_json::json!({
        "peers": state.peer_store.len().await,
        "connections": state.discovery.connection_count().await,
    }))
}
