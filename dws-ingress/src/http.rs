//! Ingress HTTP surface: a catch-all proxy entrypoint plus an admin API
//! for rule management, built on axum's `Router` + `with_state` wiring.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{OriginalUri, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{post, put};
use axum::{Json, Router};
use tower_http::trace::TraceLayer;

use crate::error::IngressError;
use crate::router::IngressRouter;
use crate::types::IngressRule;

pub fn router(ingress: Arc<IngressRouter>) -> Router {
    Router::new()
        .route("/ingress/rules", put(create_rule))
        .route("/ingress/rules/:id", post(delete_rule))
        .fallback(proxy)
        .layer(TraceLayer::new_for_http())
        .with_state(ingress)
}

async fn create_rule(
    State(ingress): State<Arc<IngressRouter>>,
    Json(rule): Json<IngressRule>,
) -> impl IntoResponse {
    match ingress.create_ingress(rule).await {
        Ok(()) => StatusCode::CREATED.into_response(),
        Err(IngressError::HostAlreadyBound(host)) => {
            (StatusCode::CONFLICT, format!("host already bound: {host}")).into_response()
        }
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

async fn delete_rule(
    State(ingress): State<Arc<IngressRouter>>,
    axum::extract::Path(id): axum::extract::Path<String>,
) -> impl IntoResponse {
    match ingress.delete_ingress(&id).await {
        Ok(()) => StatusCode::NO_CONTENT,
        Err(_) => StatusCode::NOT_FOUND,
    }
}

async fn proxy(
    State(ingress): State<Arc<IngressRouter>>,
    headers: HeaderMap,
    OriginalUri(uri): OriginalUri,
    body: axum::body::Bytes,
) -> impl IntoResponse {
    let host = headers
        .get(axum::http::header::HOST)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    let header_map: HashMap<String, String> = headers
        .iter()
        .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.as_str().to_lowercase(), v.to_string())))
        .collect();

    match ingress.route(&host, uri.path(), &header_map, body.to_vec()).await {
        Ok(resp) => {
            let mut builder = axum::http::Response::builder().status(resp.status);
            for (k, v) in &resp.headers {
                builder = builder.header(k, v);
            }
            builder.body(axum::body::Body::from(resp.body)).unwrap().into_response()
        }
        Err(IngressError::RuleNotFound { .. }) => StatusCode::NOT_FOUND.into_response(),
        Err(IngressError::RateLimited) => StatusCode::TOO_MANY_REQUESTS.into_response(),
        Err(IngressError::Unauthorized(challenge)) => {
            let parts: Vec<&str> = challenge.splitn(2, ": ").collect();
            let mut response = StatusCode::UNAUTHORIZED.into_response();
            if parts.len() == 2 {
                if let Ok(value) = axum::http::HeaderValue::from_str(parts[1]) {
                    response.headers_mut().insert(
                        axum::http::HeaderName::from_bytes(parts[0].as_bytes()).unwrap(),
                        value,
                    );
                }
            }
            response
        }
        Err(e) => (StatusCode::BAD_GATEWAY, e.to_string()).into_response(),
    }
}
