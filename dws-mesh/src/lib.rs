//! Workload identity, access policy, and mutual-TLS for DWS.

pub mod certs;
pub mod error;
pub mod identity;
pub mod policy;
pub mod registry;

pub use certs::{CertificateAuthority, CertificateBundle};
pub use error::{MeshError, Result};
pub use identity::{derive_service_id, Selector, ServiceIdentity};
pub use policy::{AccessPolicy, AccessRequest, Condition, ConditionMode, Effect};
pub use registry::ServiceMesh;
