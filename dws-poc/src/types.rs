//! Attestation types and the consumed quote-parser/registry traits.

use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[derive(Debug, Clone)]
pub struct ParsedQuote {
    pub hardware_id: String,
    pub measurement: String,
}

#[derive(Debug, Clone)]
pub struct RegistryEntry {
    pub agent_id: String,
    pub revoked: bool,
    pub level: u8,
    pub cloud_provider: String,
    pub region: String,
}

/// Parses and verifies a raw attestation quote; implementations are
/// platform-specific (e.g. SGX/SEV quote formats) and consumed as an
/// injectable interface.
#[async_trait]
pub trait QuoteParser: Send + Sync {
    async fn parse(&self, quote: &str) -> Result<ParsedQuote>;
    async fn verify(&self, parsed: &ParsedQuote, expected_measurement: Option<&str>) -> Result<()>;
}

/// Looks up a hashed hardware id in the node registry (on-chain or
/// otherwise external).
#[async_trait]
pub trait HardwareRegistry: Send + Sync {
    async fn lookup(&self, hardware_id_hash: &str) -> Result<Option<RegistryEntry>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeKind {
    Failed,
    NotRegistered,
    Revoked,
    Success,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifyOutcome {
    pub kind: OutcomeKind,
    pub reputation_delta: f64,
    pub level: Option<u8>,
    pub hardware_id_hash: Option<String>,
    pub cloud_provider: Option<String>,
    pub region: Option<String>,
    pub score: Option<f64>,
    pub reason: Option<String>,
}

impl VerifyOutcome {
    pub fn failed(reason: impl Into<String>) -> Self {
        Self {
            kind: OutcomeKind::Failed,
            reputation_delta: -10.0,
            level: None,
            hardware_id_hash: None,
            cloud_provider: None,
            region: None,
            score: None,
            reason: Some(reason.into()),
        }
    }

    pub fn not_registered(hardware_id_hash: impl Into<String>) -> Self {
        Self {
            kind: OutcomeKind::NotRegistered,
            reputation_delta: 0.0,
            level: None,
            hardware_id_hash: Some(hardware_id_hash.into()),
            cloud_provider: None,
            region: None,
            score: None,
            reason: Some("Hardware not registered in cloud alliance".to_string()),
        }
    }

    pub fn revoked(hardware_id_hash: impl Into<String>) -> Self {
        Self {
            kind: OutcomeKind::Revoked,
            reputation_delta: -50.0,
            level: None,
            hardware_id_hash: Some(hardware_id_hash.into()),
            cloud_provider: None,
            region: None,
            score: None,
            reason: None,
        }
    }

    pub fn success(entry: &RegistryEntry, hardware_id_hash: impl Into<String>) -> Self {
        let reputation_delta = match entry.level {
            1 => 10.0,
            2 => 15.0,
            3 => 25.0,
            _ => 0.0,
        };
        Self {
            kind: OutcomeKind::Success,
            reputation_delta,
            level: Some(entry.level),
            hardware_id_hash: Some(hardware_id_hash.into()),
            cloud_provider: Some(entry.cloud_provider.clone()),
            region: Some(entry.region.clone()),
            score: Some(entry.level as f64),
            reason: None,
        }
    }

    pub fn is_cacheable(&self) -> bool {
        self.kind == OutcomeKind::Success
    }
}

#[derive(Debug, Clone)]
pub enum PocEvent {
    Verified { agent_id: String, level: u8 },
    Failed { agent_id: String, reason: String },
}
