//! Host/path rule table and the routed-request pipeline.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::auth::check_auth;
use crate::error::{IngressError, Result};
use crate::matcher::{find_matching_path, rewrite_path};
use crate::ratelimit::{RateLimitStore, RateLimiter};
use crate::types::{BackendConfig, BackendType, IngressRule};

/// Dispatches to worker/container/service-type backends; static and
/// redirect backends are handled directly by the router.
#[async_trait]
pub trait BackendDispatcher: Send + Sync {
    async fn dispatch(
        &self,
        backend: &BackendConfig,
        path: &str,
        headers: &HashMap<String, String>,
        body: Vec<u8>,
    ) -> Result<RoutedResponse>;
}

#[derive(Debug, Clone)]
pub struct RoutedResponse {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

impl RoutedResponse {
    pub fn redirect(location: &str) -> Self {
        let mut headers = HashMap::new();
        headers.insert("location".to_string(), location.to_string());
        Self {
            status: 302,
            headers,
            body: Vec::new(),
        }
    }
}

/// Owns the `host -> ruleId` and `ruleId -> IngressRule` tables and
/// executes the per-request pipeline: match, rate limit, auth, dispatch.
pub struct IngressRouter {
    host_to_rule: RwLock<HashMap<String, String>>,
    rules: RwLock<HashMap<String, IngressRule>>,
    rate_limiter: RateLimiter,
    dispatcher: Arc<dyn BackendDispatcher>,
}

impl IngressRouter {
    pub fn new(dispatcher: Arc<dyn BackendDispatcher>, distributed_store: Option<Arc<dyn RateLimitStore>>) -> Self {
        Self {
            host_to_rule: RwLock::new(HashMap::new()),
            rules: RwLock::new(HashMap::new()),
            rate_limiter: RateLimiter::new(distributed_store),
            dispatcher,
        }
    }

    pub async fn create_ingress(&self, rule: IngressRule) -> Result<()> {
        let mut hosts = self.host_to_rule.write().await;
        if hosts.contains_key(&rule.host) {
            return Err(IngressError::HostAlreadyBound(rule.host));
        }
        hosts.insert(rule.host.clone(), rule.id.clone());
        self.rules.write().await.insert(rule.id.clone(), rule);
        Ok(())
    }

    pub async fn delete_ingress(&self, rule_id: &str) -> Result<()> {
        let mut rules = self.rules.write().await;
        if let Some(rule) = rules.remove(rule_id) {
            self.host_to_rule.write().await.remove(&rule.host);
            Ok(())
        } else {
            Err(IngressError::RuleNotFound { host: String::new(), path: String::new() })
        }
    }

    /// A single consistent snapshot of the rule bound to `host`, read
    /// once at request start (in-flight requests never observe a
    /// partial rule-table mutation).
    async fn snapshot_rule(&self, host: &str) -> Option<IngressRule> {
        let rule_id = self.host_to_rule.read().await.get(host).cloned()?;
        self.rules.read().await.get(&rule_id).cloned()
    }

    pub async fn route(
        &self,
        host: &str,
        path: &str,
        headers: &HashMap<String, String>,
        body: Vec<u8>,
    ) -> Result<RoutedResponse> {
        let rule = self
            .snapshot_rule(host)
            .await
            .ok_or_else(|| IngressError::RuleNotFound { host: host.to_string(), path: path.to_string() })?;

        let path_rule = find_matching_path(&rule.paths, path)
            .ok_or_else(|| IngressError::RuleNotFound { host: host.to_string(), path: path.to_string() })?;

        if let Some(rate_limit) = &rule.rate_limit {
            let client_id = RateLimiter::client_id(headers);
            if !self.rate_limiter.allow(&client_id, rate_limit).await {
                return Err(IngressError::RateLimited);
            }
        }

        if let Some(auth) = &rule.auth {
            if let Err(challenge) = check_auth(auth.auth_type, headers) {
                return Err(IngressError::Unauthorized(format!(
                    "{}: {}",
                    challenge.header_name, challenge.header_value
                )));
            }
        }

        let forward_path = rewrite_path(path_rule, path);
        match path_rule.backend.backend_type {
            BackendType::Redirect => Ok(RoutedResponse::redirect(&path_rule.backend.target)),
            BackendType::Static => Ok(RoutedResponse {
                status: 200,
                headers: HashMap::new(),
                body: format!("static:{}", path_rule.backend.target).into_bytes(),
            }),
            BackendType::Worker | BackendType::Container | BackendType::Service => self
                .dispatcher
                .dispatch(&path_rule.backend, &forward_path, headers, body)
                .await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AuthConfig, AuthType, PathMatchMode, PathRule, RateLimitConfig};

    struct EchoDispatcher;
    #[async_trait]
    impl BackendDispatcher for EchoDispatcher {
        async fn dispatch(
            &self,
            backend: &BackendConfig,
            path: &str,
            _headers: &HashMap<String, String>,
            _body: Vec<u8>,
        ) -> Result<RoutedResponse> {
            Ok(RoutedResponse {
                status: 200,
                headers: HashMap::new(),
                body: format!("{}:{}", backend.target, path).into_bytes(),
            })
        }
    }

    fn basic_rule() -> IngressRule {
        IngressRule {
            id: "r1".into(),
            host: "api.dws.hq".into(),
            paths: vec![PathRule {
                path: "/v1".into(),
                mode: PathMatchMode::Prefix,
                backend: BackendConfig { backend_type: BackendType::Service, target: "svc-a".into() },
                rewrite: None,
            }],
            rate_limit: None,
            auth: None,
        }
    }

    #[tokio::test]
    async fn routes_to_matching_backend() {
        let router = IngressRouter::new(Arc::new(EchoDispatcher), None);
        router.create_ingress(basic_rule()).await.unwrap();
        let resp = router.route("api.dws.hq", "/v1/items", &HashMap::new(), vec![]).await.unwrap();
        assert_eq!(resp.body, b"svc-a:/v1/items");
    }

    #[tokio::test]
    async fn duplicate_host_binding_fails() {
        let router = IngressRouter::new(Arc::new(EchoDispatcher), None);
        router.create_ingress(basic_rule()).await.unwrap();
        assert!(router.create_ingress(basic_rule()).await.is_err());
    }

    #[tokio::test]
    async fn missing_host_returns_not_found() {
        let router = IngressRouter::new(Arc::new(EchoDispatcher), None);
        let result = router.route("unknown.dws.hq", "/v1", &HashMap::new(), vec![]).await;
        assert!(matches!(result, Err(IngressError::RuleNotFound { .. })));
    }

    #[tokio::test]
    async fn missing_auth_is_rejected() {
        let router = IngressRouter::new(Arc::new(EchoDispatcher), None);
        let mut rule = basic_rule();
        rule.auth = Some(AuthConfig { auth_type: AuthType::Bearer });
        router.create_ingress(rule).await.unwrap();
        let result = router.route("api.dws.hq", "/v1/items", &HashMap::new(), vec![]).await;
        assert!(matches!(result, Err(IngressError::Unauthorized(_))));
    }

    #[tokio::test]
    async fn rate_limit_blocks_after_threshold() {
        let router = IngressRouter::new(Arc::new(EchoDispatcher), None);
        let mut rule = basic_rule();
        rule.rate_limit = Some(RateLimitConfig { requests_per_second: 1.0 });
        router.create_ingress(rule).await.unwrap();
        let mut headers = HashMap::new();
        headers.insert("x-real-ip".to_string(), "9.9.9.9".to_string());
        for _ in 0..60 {
            router.route("api.dws.hq", "/v1/items", &headers, vec![]).await.unwrap();
        }
        let result = router.route("api.dws.hq", "/v1/items", &headers, vec![]).await;
        assert!(matches!(result, Err(IngressError::RateLimited)));
    }

    #[tokio::test]
    async fn redirect_backend_returns_302() {
        let router = IngressRouter::new(Arc::new(EchoDispatcher), None);
        let mut rule = basic_rule();
        rule.paths[0].backend = BackendConfig { backend_type: BackendType::Redirect, target: "https://dws.hq".into() };
        router.create_ingress(rule).await.unwrap();
        let resp = router.route("api.dws.hq", "/v1", &HashMap::new(), vec![]).await.unwrap();
        assert_eq!(resp.status, 302);
        assert_eq!(resp.headers.get("location").unwrap(), "https://dws.hq");
    }
}
