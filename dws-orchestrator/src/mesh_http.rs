//! Service-mesh HTTP surface: registration, discovery, policy, and
//! certificate issuance. `dws-mesh` itself stays transport-agnostic
//! (like `dws-autoscaler`), so this composition root owns the routing,
//! grounded in `dws_p2p::http`'s axum state/route style.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use std::collections::HashMap;

use dws_mesh::{AccessPolicy, Selector, ServiceIdentity, ServiceMesh};

pub fn router(mesh: Arc<ServiceMesh>) -> Router {
    Router::new()
        .route("/mesh/services", post(register_service).get(list_services))
        .route("/mesh/services/:namespace/:name", get(discover_service))
        .route("/mesh/policies", post(add_policy))
        .route("/mesh/certificates", post(issue_certificate))
        .with_state(mesh)
}

/// `id` is always derived server-side from `name`/`namespace`
/// ([`dws_mesh::derive_service_id`]); a client cannot forge it.
#[derive(Deserialize)]
struct IdentityRequest {
    name: String,
    namespace: String,
    #[serde(default)]
    labels: HashMap<String, String>,
}

impl From<IdentityRequest> for ServiceIdentity {
    fn from(req: IdentityRequest) -> Self {
        let mut identity = ServiceIdentity::new(req.name, req.namespace);
        identity.labels = req.labels;
        identity
    }
}

async fn register_service(State(mesh): State<Arc<ServiceMesh>>, Json(req): Json<IdentityRequest>) -> impl IntoResponse {
    match mesh.register_service(req.into()).await {
        Ok(identity) => (StatusCode::CREATED, Json(identity)).into_response(),
        Err(e) => (StatusCode::CONFLICT, e.to_string()).into_response(),
    }
}

async fn list_services(State(mesh): State<Arc<ServiceMesh>>) -> impl IntoResponse {
    Json(mesh.list_services(&Selector::default()).await)
}

async fn discover_service(
    State(mesh): State<Arc<ServiceMesh>>,
    Path((namespace, name)): Path<(String, String)>,
) -> impl IntoResponse {
    match mesh.discover_service(&name, &namespace).await {
        Ok(identity) => Json(identity).into_response(),
        Err(_) => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn add_policy(State(mesh): State<Arc<ServiceMesh>>, Json(policy): Json<AccessPolicy>) -> impl IntoResponse {
    mesh.add_policy(policy).await;
    StatusCode::CREATED
}

async fn issue_certificate(State(mesh): State<Arc<ServiceMesh>>, Json(req): Json<IdentityRequest>) -> impl IntoResponse {
    let identity: ServiceIdentity = req.into();
    match mesh.generate_certificate(&identity) {
        Ok(bundle) => Json(bundle_json(&bundle)).into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

fn bundle_json(bundle: &dws_mesh::CertificateBundle) -> serde_json::Value {
    serde_json::json!({
        "cert_pem": bundle.cert_pem,
        "key_pem": bundle.key_pem,
        "issued_at_ms": bundle.issued_at_ms,
        "expires_at_ms": bundle.expires_at_ms,
    })
}
