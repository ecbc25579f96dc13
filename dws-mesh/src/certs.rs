//! Mutual-TLS certificate authority and issuance, built on `rcgen` for
//! leaf/CA generation and `x509-parser` for validation.

use std::collections::HashMap;
use std::sync::RwLock;

use rcgen::{
    BasicConstraints, Certificate, CertificateParams, DistinguishedName, DnType,
    ExtendedKeyUsagePurpose, IsCa, KeyPair, KeyUsagePurpose,
};
use ::time::{Duration as TimeDuration, OffsetDateTime};
use x509_parser::prelude::*;

use crate::error::{MeshError, Result};
use crate::identity::{now_ms, ServiceIdentity};

pub const CA_VALIDITY_DAYS: i64 = 365 * 10;
pub const LEAF_VALIDITY_DAYS: i64 = 365;
pub const CACHE_REUSE_WINDOW_MS: u64 = 24 * 3_600_000;

#[derive(Debug, Clone)]
pub struct CertificateBundle {
    pub cert_pem: String,
    pub key_pem: String,
    pub issued_at_ms: u64,
    pub expires_at_ms: u64,
}

struct CaState {
    cert_pem: String,
    key_pem: String,
}

/// Process-local CA plus a per-service certificate cache; initialized
/// lazily on first `generate_certificate` call, or adopted from
/// operator-supplied PEM via [`CertificateAuthority::adopt`].
pub struct CertificateAuthority {
    ca: RwLock<Option<CaState>>,
    cache: RwLock<HashMap<String, CertificateBundle>>,
}

impl Default for CertificateAuthority {
    fn default() -> Self {
        Self::new()
    }
}

impl CertificateAuthority {
    pub fn new() -> Self {
        Self {
            ca: RwLock::new(None),
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Adopts an operator-supplied CA instead of self-generating one.
    pub fn adopt(&self, cert_pem: String, key_pem: String) {
        *self.ca.write().unwrap() = Some(CaState { cert_pem, key_pem });
    }

    fn ensure_ca(&self) -> Result<(String, String)> {
        {
            let guard = self.ca.read().unwrap();
            if let Some(ca) = guard.as_ref() {
                return Ok((ca.cert_pem.clone(), ca.key_pem.clone()));
            }
        }
        let mut params = CertificateParams::default();
        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        params.key_usages = vec![KeyUsagePurpose::KeyCertSign, KeyUsagePurpose::DigitalSignature];
        let mut dn = DistinguishedName::new();
        dn.push(DnType::CommonName, "DWS Mesh CA");
        params.distinguished_name = dn;
        let now = OffsetDateTime::now_utc();
        params.not_before = now;
        params.not_after = now + TimeDuration::days(CA_VALIDITY_DAYS);

        let cert = Certificate::from_params(params)
            .map_err(|e| MeshError::Certificate(format!("CA generation failed: {e}")))?;
        let cert_pem = cert
            .serialize_pem()
            .map_err(|e| MeshError::Certificate(format!("CA serialization failed: {e}")))?;
        let key_pem = cert.serialize_private_key_pem();

        *self.ca.write().unwrap() = Some(CaState {
            cert_pem: cert_pem.clone(),
            key_pem: key_pem.clone(),
        });
        Ok((cert_pem, key_pem))
    }

    fn load_ca_certificate(cert_pem: &str, key_pem: &str) -> Result<Certificate> {
        let key_pair = KeyPair::from_pem(key_pem)
            .map_err(|e| MeshError::Certificate(format!("invalid CA key: {e}")))?;
        let params = CertificateParams::from_ca_cert_pem(cert_pem, key_pair)
            .map_err(|e| MeshError::Certificate(format!("invalid CA cert: {e}")))?;
        Certificate::from_params(params)
            .map_err(|e| MeshError::Certificate(format!("CA reconstruction failed: {e}")))
    }

    /// Returns a cached certificate with at least [`CACHE_REUSE_WINDOW_MS`]
    /// of remaining validity, or issues and caches a fresh one.
    pub fn generate_certificate(&self, identity: &ServiceIdentity) -> Result<CertificateBundle> {
        if let Some(cached) = self.cache.read().unwrap().get(&identity.id) {
            if cached.expires_at_ms.saturating_sub(now_ms()) >= CACHE_REUSE_WINDOW_MS {
                return Ok(cached.clone());
            }
        }

        let (ca_cert_pem, ca_key_pem) = self.ensure_ca()?;
        let ca_cert = Self::load_ca_certificate(&ca_cert_pem, &ca_key_pem)?;

        let fqdn = identity.fqdn();
        let short = format!("{}.{}", identity.name, identity.namespace);
        let mut params = CertificateParams::new(vec![fqdn.clone(), short, identity.name.clone()]);
        let mut dn = DistinguishedName::new();
        dn.push(DnType::CommonName, fqdn);
        params.distinguished_name = dn;
        params.is_ca = IsCa::ExplicitNoCa;
        params.key_usages = vec![KeyUsagePurpose::DigitalSignature, KeyUsagePurpose::KeyEncipherment];
        params.extended_key_usages =
            vec![ExtendedKeyUsagePurpose::ServerAuth, ExtendedKeyUsagePurpose::ClientAuth];
        let now = OffsetDateTime::now_utc();
        params.not_before = now;
        params.not_after = now + TimeDuration::days(LEAF_VALIDITY_DAYS);

        let leaf = Certificate::from_params(params)
            .map_err(|e| MeshError::Certificate(format!("leaf generation failed: {e}")))?;
        let cert_pem = leaf
            .serialize_pem_with_signer(&ca_cert)
            .map_err(|e| MeshError::Certificate(format!("leaf signing failed: {e}")))?;
        let key_pem = leaf.serialize_private_key_pem();

        let issued_at_ms = now_ms();
        let bundle = CertificateBundle {
            cert_pem,
            key_pem,
            issued_at_ms,
            expires_at_ms: issued_at_ms + (LEAF_VALIDITY_DAYS as u64) * 86_400_000,
        };
        self.cache.write().unwrap().insert(identity.id.clone(), bundle.clone());
        Ok(bundle)
    }

    pub fn ca_cert_pem(&self) -> Result<String> {
        Ok(self.ensure_ca()?.0)
    }
}

/// Parses and validates a leaf certificate: well-formed, unexpired,
/// CN matching `*.*.mesh.dws`, and signed by `ca_cert_pem`. Returns the
/// parsed common name.
pub fn verify_certificate(pem: &str, ca_cert_pem: &str, expected_cn: Option<&str>) -> Result<String> {
    let (_, ca_pem_block) = x509_parser::pem::parse_x509_pem(ca_cert_pem.as_bytes())
        .map_err(|e| MeshError::VerificationFailed(format!("invalid CA PEM: {e}")))?;
    let ca_cert = ca_pem_block
        .parse_x509()
        .map_err(|e| MeshError::VerificationFailed(format!("invalid CA certificate: {e}")))?;

    let (_, pem_block) = x509_parser::pem::parse_x509_pem(pem.as_bytes())
        .map_err(|e| MeshError::VerificationFailed(format!("invalid PEM: {e}")))?;
    let cert = pem_block
        .parse_x509()
        .map_err(|e| MeshError::VerificationFailed(format!("invalid certificate: {e}")))?;

    let now = ASN1Time::now();
    if !cert.validity().is_valid_at(now) {
        return Err(MeshError::VerificationFailed("certificate expired or not yet valid".into()));
    }

    let cn = cert
        .subject()
        .iter_common_name()
        .next()
        .and_then(|attr| attr.as_str().ok())
        .ok_or_else(|| MeshError::VerificationFailed("missing common name".into()))?
        .to_string();

    let parts: Vec<&str> = cn.split('.').collect();
    if parts.len() < 4 || !cn.ends_with(".mesh.dws") {
        return Err(MeshError::VerificationFailed(format!(
            "common name {cn} does not match *.*.mesh.dws"
        )));
    }

    if let Some(expected) = expected_cn {
        if expected != cn {
            return Err(MeshError::VerificationFailed(format!(
                "common name {cn} does not match expected {expected}"
            )));
        }
    }

    cert.verify_signature(Some(ca_cert.public_key()))
        .map_err(|_| MeshError::VerificationFailed("certificate not CA-signed".into()))?;

    Ok(cn)
}
