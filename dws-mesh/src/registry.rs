//! Service registry: identity registration, discovery, access-policy
//! storage, and certificate issuance wiring.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::info;

use crate::certs::{CertificateAuthority, CertificateBundle};
use crate::error::{MeshError, Result};
use crate::identity::{Selector, ServiceIdentity};
use crate::policy::{check_access, AccessPolicy, AccessRequest, Effect};

pub struct ServiceMesh {
    services: RwLock<HashMap<String, ServiceIdentity>>,
    policies: RwLock<Vec<AccessPolicy>>,
    ca: Arc<CertificateAuthority>,
}

impl Default for ServiceMesh {
    fn default() -> Self {
        Self::new()
    }
}

impl ServiceMesh {
    pub fn new() -> Self {
        Self {
            services: RwLock::new(HashMap::new()),
            policies: RwLock::new(Vec::new()),
            ca: Arc::new(CertificateAuthority::new()),
        }
    }

    pub fn ca(&self) -> Arc<CertificateAuthority> {
        self.ca.clone()
    }

    pub async fn register_service(&self, identity: ServiceIdentity) -> Result<ServiceIdentity> {
        let mut services = self.services.write().await;
        if services.contains_key(&identity.id) {
            return Err(MeshError::AlreadyRegistered(identity.id));
        }
        services.insert(identity.id.clone(), identity.clone());
        info!("registered service {} ({})", identity.name, identity.id);
        Ok(identity)
    }

    pub async fn discover_service(&self, name: &str, namespace: &str) -> Result<ServiceIdentity> {
        let id = crate::identity::derive_service_id(namespace, name);
        self.services
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or_else(|| MeshError::ServiceNotFound(format!("{namespace}/{name}")))
    }

    pub async fn list_services(&self, selector: &Selector) -> Vec<ServiceIdentity> {
        self.services
            .read()
            .await
            .values()
            .filter(|identity| selector.matches(identity))
            .cloned()
            .collect()
    }

    pub async fn add_policy(&self, policy: AccessPolicy) {
        self.policies.write().await.push(policy);
    }

    pub async fn check_access(
        &self,
        source: &ServiceIdentity,
        destination: &ServiceIdentity,
        request: &AccessRequest,
    ) -> Effect {
        let policies = self.policies.read().await;
        check_access(&policies, source, destination, request)
    }

    pub fn generate_certificate(&self, identity: &ServiceIdentity) -> Result<CertificateBundle> {
        self.ca.generate_certificate(identity)
    }

    pub fn verify_certificate(&self, pem: &str, expected: Option<&ServiceIdentity>) -> Result<String> {
        let ca_cert_pem = self.ca.ca_cert_pem()?;
        crate::certs::verify_certificate(pem, &ca_cert_pem, expected.map(|i| i.fqdn()).as_deref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn register_then_discover_round_trips() {
        let mesh = ServiceMesh::new();
        let identity = ServiceIdentity::new("worker", "default");
        mesh.register_service(identity.clone()).await.unwrap();
        let found = mesh.discover_service("worker", "default").await.unwrap();
        assert_eq!(found.id, identity.id);
    }

    #[tokio::test]
    async fn duplicate_registration_fails() {
        let mesh = ServiceMesh::new();
        let identity = ServiceIdentity::new("worker", "default");
        mesh.register_service(identity.clone()).await.unwrap();
        assert!(mesh.register_service(identity).await.is_err());
    }

    #[tokio::test]
    async fn certificate_round_trips_through_mesh() {
        let mesh = ServiceMesh::new();
        let identity = ServiceIdentity::new("worker", "default");
        let bundle = mesh.generate_certificate(&identity).unwrap();
        let cn = mesh.verify_certificate(&bundle.cert_pem, Some(&identity)).unwrap();
        assert_eq!(cn, identity.fqdn());
    }
}
