//! Default backend dispatcher: forwards `worker`/`container`/`service`
//! targets over plain HTTP. A real deployment typically injects a
//! platform-specific dispatcher instead.

use std::collections::HashMap;

use async_trait::async_trait;
use dws_ingress::{BackendDispatcher, BackendType, IngressError, Result, RoutedResponse};

pub struct NoopBackendDispatcher;

#[async_trait]
impl BackendDispatcher for NoopBackendDispatcher {
    async fn dispatch(
        &self,
        backend: &dws_ingress::BackendConfig,
        _path: &str,
        _headers: &HashMap<String, String>,
        _body: Vec<u8>,
    ) -> Result<RoutedResponse> {
        match backend.backend_type {
            BackendType::Worker | BackendType::Container | BackendType::Service => {
                Err(IngressError::Backend(format!("no dispatcher configured for target {}", backend.target)))
            }
            BackendType::Static | BackendType::Redirect => {
                Err(IngressError::Backend("static/redirect backends are handled by the router directly".into()))
            }
        }
    }
}
