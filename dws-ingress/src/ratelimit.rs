//! Fixed-window rate limiting: a distributed store is authoritative
//! when reachable, with a size-bounded in-memory fallback.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use tracing::warn;

use crate::types::{now_ms, RateLimitConfig, RATE_LIMIT_EVICT_THRESHOLD, RATE_LIMIT_WINDOW_MS};

/// Distributed rate-limit backend (e.g. CQL-backed), consumed as a
/// narrow interface so the ingress never depends on a specific store.
#[async_trait]
pub trait RateLimitStore: Send + Sync {
    async fn increment(&self, client_id: &str, window_ms: u64) -> Result<u64, String>;
}

/// Lazily-evicted in-memory fallback, keyed by `clientId:floor(now/window)`.
#[derive(Default)]
pub struct InMemoryRateLimiter {
    counts: Mutex<HashMap<String, u64>>,
}

impl InMemoryRateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment(&self, client_id: &str, window_ms: u64) -> u64 {
        let bucket = now_ms() / window_ms;
        let key = format!("{client_id}:{bucket}");
        let mut counts = self.counts.lock().unwrap();
        if counts.len() > RATE_LIMIT_EVICT_THRESHOLD {
            let current_suffix = format!(":{bucket}");
            counts.retain(|k, _| k.ends_with(&current_suffix));
        }
        let entry = counts.entry(key).or_insert(0);
        *entry += 1;
        *entry
    }
}

pub struct RateLimiter {
    distributed: Option<std::sync::Arc<dyn RateLimitStore>>,
    fallback: InMemoryRateLimiter,
}

impl RateLimiter {
    pub fn new(distributed: Option<std::sync::Arc<dyn RateLimitStore>>) -> Self {
        Self {
            distributed,
            fallback: InMemoryRateLimiter::new(),
        }
    }

    /// Derives `clientId` from the standard proxy headers, preferring
    /// `x-real-ip`, then `cf-connecting-ip`, then the first hop of
    /// `x-forwarded-for`, falling back to `"unknown"`.
    pub fn client_id(headers: &HashMap<String, String>) -> String {
        if let Some(ip) = headers.get("x-real-ip") {
            return ip.clone();
        }
        if let Some(ip) = headers.get("cf-connecting-ip") {
            return ip.clone();
        }
        if let Some(forwarded) = headers.get("x-forwarded-for") {
            if let Some(first) = forwarded.split(',').next() {
                return first.trim().to_string();
            }
        }
        "unknown".to_string()
    }

    /// Returns `true` if the request is allowed under `config`.
    pub async fn allow(&self, client_id: &str, config: &RateLimitConfig) -> bool {
        let max = config.max_per_window();
        if let Some(store) = &self.distributed {
            match store.increment(client_id, RATE_LIMIT_WINDOW_MS).await {
                Ok(count) => return count <= max,
                Err(e) => warn!("rate-limit store unavailable, falling back to memory: {e}"),
            }
        }
        let count = self.fallback.increment(client_id, RATE_LIMIT_WINDOW_MS);
        count <= max
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn in_memory_fallback_enforces_limit() {
        let limiter = RateLimiter::new(None);
        let config = RateLimitConfig { requests_per_second: 1.0 };
        for _ in 0..60 {
            assert!(limiter.allow("client-a", &config).await);
        }
        assert!(!limiter.allow("client-a", &config).await);
    }

    #[tokio::test]
    async fn distinct_clients_have_independent_buckets() {
        let limiter = RateLimiter::new(None);
        let config = RateLimitConfig { requests_per_second: 1.0 / 60.0 };
        assert!(limiter.allow("client-a", &config).await);
        assert!(limiter.allow("client-b", &config).await);
    }

    #[test]
    fn client_id_prefers_x_real_ip() {
        let mut headers = HashMap::new();
        headers.insert("x-real-ip".to_string(), "1.2.3.4".to_string());
        headers.insert("x-forwarded-for".to_string(), "5.6.7.8".to_string());
        assert_eq!(RateLimiter::client_id(&headers), "1.2.3.4");
    }

    #[test]
    fn client_id_falls_back_to_unknown() {
        let headers = HashMap::new();
        assert_eq!(RateLimiter::client_id(&headers), "unknown");
    }

    struct FailingStore;
    #[async_trait]
    impl RateLimitStore for FailingStore {
        async fn increment(&self, _client_id: &str, _window_ms: u64) -> Result<u64, String> {
            Err("store unreachable".into())
        }
    }

    #[tokio::test]
    async fn distributed_store_failure_falls_back_to_memory() {
        let limiter = RateLimiter::new(Some(std::sync::Arc::new(FailingStore)));
        let config = RateLimitConfig { requests_per_second: 1.0 };
        assert!(limiter.allow("client-c", &config).await);
    }
}
