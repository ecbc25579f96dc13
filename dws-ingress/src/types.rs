//! Ingress rule, path, rate-limit, auth, and backend types.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PathMatchMode {
    Exact,
    Prefix,
    Regex,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathRule {
    pub path: String,
    pub mode: PathMatchMode,
    pub backend: BackendConfig,
    pub rewrite: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthType {
    None,
    Basic,
    Bearer,
    Jwt,
    X402,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    pub auth_type: AuthType,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    pub requests_per_second: f64,
}

impl RateLimitConfig {
    pub fn max_per_window(&self) -> u64 {
        (self.requests_per_second * 60.0).round() as u64
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendType {
    Worker,
    Container,
    Service,
    Static,
    Redirect,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    pub backend_type: BackendType,
    pub target: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngressRule {
    pub id: String,
    pub host: String,
    pub paths: Vec<PathRule>,
    pub rate_limit: Option<RateLimitConfig>,
    pub auth: Option<AuthConfig>,
}

pub const RATE_LIMIT_WINDOW_MS: u64 = 60_000;
pub const RATE_LIMIT_EVICT_THRESHOLD: usize = 10_000;
