//! Workload identity and selectors.

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use sha3::{Digest, Keccak256};

pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Deterministic service id: `keccak256("namespace/name")` truncated to
/// 9 bytes, hex-encoded to 18 characters.
pub fn derive_service_id(namespace: &str, name: &str) -> String {
    let mut hasher = Keccak256::new();
    hasher.update(format!("{namespace}/{name}").as_bytes());
    let digest = hasher.finalize();
    hex::encode(&digest[0..9])
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceIdentity {
    pub id: String,
    pub name: String,
    pub namespace: String,
    pub labels: HashMap<String, String>,
}

impl ServiceIdentity {
    pub fn new(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        let name = name.into();
        let namespace = namespace.into();
        let id = derive_service_id(&namespace, &name);
        Self {
            id,
            name,
            namespace,
            labels: HashMap::new(),
        }
    }

    pub fn fqdn(&self) -> String {
        format!("{}.{}.mesh.dws", self.name, self.namespace)
    }
}

/// A label/name-based filter used by access policies and `listServices`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Selector {
    pub match_labels: HashMap<String, String>,
    pub match_names: Option<Vec<String>>,
}

impl Selector {
    pub fn matches(&self, identity: &ServiceIdentity) -> bool {
        if let Some(names) = &self.match_names {
            if !names.iter().any(|n| n == &identity.name) {
                return false;
            }
        }
        self.match_labels
            .iter()
            .all(|(k, v)| identity.labels.get(k) == Some(v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn service_id_is_deterministic_and_18_chars() {
        let a = derive_service_id("default", "worker");
        let b = derive_service_id("default", "worker");
        assert_eq!(a, b);
        assert_eq!(a.len(), 18);
    }

    #[test]
    fn different_namespace_changes_id() {
        let a = derive_service_id("default", "worker");
        let b = derive_service_id("staging", "worker");
        assert_ne!(a, b);
    }

    #[test]
    fn selector_matches_on_labels_and_names() {
        let mut identity = ServiceIdentity::new("worker", "default");
        identity.labels.insert("tier".to_string(), "compute".to_string());

        let selector = Selector {
            match_labels: [("tier".to_string(), "compute".to_string())].into(),
            match_names: Some(vec!["worker".to_string()]),
        };
        assert!(selector.matches(&identity));

        let mismatched = Selector {
            match_labels: [("tier".to_string(), "storage".to_string())].into(),
            match_names: None,
        };
        assert!(!mismatched.matches(&identity));
    }
}
