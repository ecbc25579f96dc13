//! Verification pipeline: cache, single-flight dedup, parse/verify/
//! registry lookup with backoff, and isolated event dispatch.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt, Shared};
use sha3::{Digest, Keccak256};
use tokio::sync::{Mutex, RwLock, Semaphore};
use tracing::warn;

use crate::types::{now_ms, HardwareRegistry, OutcomeKind, ParsedQuote, PocEvent, QuoteParser, VerifyOutcome};

pub const DEFAULT_CACHE_TTL_MS: u64 = 5 * 60_000;
pub const QUOTE_PREFIX_LEN: usize = 66;
pub const REGISTRY_LOOKUP_ATTEMPTS: u32 = 3;
pub const REGISTRY_BACKOFF_BASE: Duration = Duration::from_millis(100);
pub const REGISTRY_BACKOFF_FACTOR: u32 = 2;
pub const BATCH_CONCURRENCY: usize = 5;

pub trait EventHandler: Send + Sync {
    fn handle(&self, event: &PocEvent);
}

struct CacheEntry {
    outcome: VerifyOutcome,
    cached_at_ms: u64,
    ttl_ms: u64,
}

impl CacheEntry {
    fn is_expired(&self, now: u64) -> bool {
        now.saturating_sub(self.cached_at_ms) >= self.ttl_ms
    }
}

type SharedOutcome = Shared<BoxFuture<'static, VerifyOutcome>>;

pub struct PocVerifier {
    quote_parser: Arc<dyn QuoteParser>,
    registry: Arc<dyn HardwareRegistry>,
    hardware_salt: String,
    cache: RwLock<HashMap<String, CacheEntry>>,
    in_flight: Mutex<HashMap<String, SharedOutcome>>,
    handlers: RwLock<Vec<Arc<dyn EventHandler>>>,
    cache_ttl_ms: u64,
}

impl PocVerifier {
    pub fn new(quote_parser: Arc<dyn QuoteParser>, registry: Arc<dyn HardwareRegistry>, hardware_salt: String) -> Self {
        Self {
            quote_parser,
            registry,
            hardware_salt,
            cache: RwLock::new(HashMap::new()),
            in_flight: Mutex::new(HashMap::new()),
            handlers: RwLock::new(Vec::new()),
            cache_ttl_ms: DEFAULT_CACHE_TTL_MS,
        }
    }

    pub fn with_cache_ttl_ms(mut self, ttl_ms: u64) -> Self {
        self.cache_ttl_ms = ttl_ms;
        self
    }

    pub async fn on_event(&self, handler: Arc<dyn EventHandler>) {
        self.handlers.write().await.push(handler);
    }

    fn cache_key(agent_id: &str, quote: &str) -> String {
        let prefix_len = quote.len().min(QUOTE_PREFIX_LEN);
        format!("{agent_id}:{}", &quote[0..prefix_len])
    }

    async fn emit(&self, event: PocEvent) {
        let handlers = self.handlers.read().await.clone();
        for handler in handlers {
            let event = event.clone();
            let result = std::panic::catch_unwind(AssertUnwindSafe(|| handler.handle(&event)));
            if result.is_err() {
                warn!("poc event handler panicked, isolated");
            }
        }
    }

    pub async fn verify_node(
        self: &Arc<Self>,
        agent_id: &str,
        quote: &str,
        expected_measurement: Option<&str>,
    ) -> VerifyOutcome {
        let key = Self::cache_key(agent_id, quote);
        let now = now_ms();
        if let Some(entry) = self.cache.read().await.get(&key) {
            if !entry.is_expired(now) {
                return entry.outcome.clone();
            }
        }

        let shared = {
            let mut in_flight = self.in_flight.lock().await;
            if let Some(existing) = in_flight.get(&key) {
                existing.clone()
            } else {
                let verifier = self.clone();
                let agent_id = agent_id.to_string();
                let quote = quote.to_string();
                let expected_measurement = expected_measurement.map(str::to_string);
                let fut: BoxFuture<'static, VerifyOutcome> = Box::pin(async move {
                    verifier.run_pipeline(&agent_id, &quote, expected_measurement.as_deref()).await
                });
                let shared = fut.shared();
                in_flight.insert(key.clone(), shared.clone());
                shared
            }
        };

        let outcome = shared.await;
        self.in_flight.lock().await.remove(&key);

        if outcome.is_cacheable() {
            self.cache.write().await.insert(
                key,
                CacheEntry { outcome: outcome.clone(), cached_at_ms: now_ms(), ttl_ms: self.cache_ttl_ms },
            );
        }
        outcome
    }

    async fn run_pipeline(&self, agent_id: &str, quote: &str, expected_measurement: Option<&str>) -> VerifyOutcome {
        let parsed: ParsedQuote = match self.quote_parser.parse(quote).await {
            Ok(p) => p,
            Err(e) => {
                let outcome = VerifyOutcome::failed(e.to_string());
                self.emit(PocEvent::Failed { agent_id: agent_id.to_string(), reason: e.to_string() }).await;
                return outcome;
            }
        };

        if let Err(e) = self.quote_parser.verify(&parsed, expected_measurement).await {
            let outcome = VerifyOutcome::failed(e.to_string());
            self.emit(PocEvent::Failed { agent_id: agent_id.to_string(), reason: e.to_string() }).await;
            return outcome;
        }

        let hardware_id_hash = self.hash_hardware_id(&parsed.hardware_id);
        let entry = match self.lookup_with_backoff(&hardware_id_hash).await {
            Ok(entry) => entry,
            Err(e) => {
                let outcome = VerifyOutcome::failed(format!("registry error: {e}"));
                self.emit(PocEvent::Failed { agent_id: agent_id.to_string(), reason: outcome.reason.clone().unwrap() }).await;
                return outcome;
            }
        };

        let Some(entry) = entry else {
            return VerifyOutcome::not_registered(hardware_id_hash);
        };

        if entry.revoked {
            let outcome = VerifyOutcome::revoked(hardware_id_hash);
            self.emit(PocEvent::Failed { agent_id: agent_id.to_string(), reason: "revoked".to_string() }).await;
            return outcome;
        }

        let outcome = VerifyOutcome::success(&entry, hardware_id_hash);
        self.emit(PocEvent::Verified { agent_id: agent_id.to_string(), level: entry.level }).await;
        outcome
    }

    fn hash_hardware_id(&self, hardware_id: &str) -> String {
        let mut hasher = Keccak256::new();
        hasher.update(hardware_id.as_bytes());
        hasher.update(self.hardware_salt.as_bytes());
        hex::encode(hasher.finalize())
    }

    async fn lookup_with_backoff(&self, hardware_id_hash: &str) -> crate::error::Result<Option<crate::types::RegistryEntry>> {
        let mut attempt = 0;
        let mut delay = REGISTRY_BACKOFF_BASE;
        loop {
            match self.registry.lookup(hardware_id_hash).await {
                Ok(result) => return Ok(result),
                Err(e) => {
                    attempt += 1;
                    if attempt >= REGISTRY_LOOKUP_ATTEMPTS {
                        return Err(e);
                    }
                    tokio::time::sleep(delay).await;
                    delay *= REGISTRY_BACKOFF_FACTOR;
                }
            }
        }
    }

    /// Verifies a batch of `(agentId, quote, expectedMeasurement)`
    /// triples with at most [`BATCH_CONCURRENCY`] concurrent pipelines.
    pub async fn verify_nodes(
        self: &Arc<Self>,
        requests: Vec<(String, String, Option<String>)>,
    ) -> Vec<VerifyOutcome> {
        let semaphore = Arc::new(Semaphore::new(BATCH_CONCURRENCY));
        let mut handles = Vec::with_capacity(requests.len());
        for (agent_id, quote, expected) in requests {
            let verifier = self.clone();
            let permit = semaphore.clone();
            handles.push(tokio::spawn(async move {
                let _permit = permit.acquire_owned().await.unwrap();
                verifier.verify_node(&agent_id, &quote, expected.as_deref()).await
            }));
        }
        let mut results = Vec::with_capacity(handles.len());
        for handle in handles {
            results.push(handle.await.unwrap_or_else(|_| VerifyOutcome::failed("task panicked")));
        }
        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RegistryEntry;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FixedParser;
    #[async_trait]
    impl QuoteParser for FixedParser {
        async fn parse(&self, quote: &str) -> crate::error::Result<ParsedQuote> {
            if quote == "bad" {
                return Err(crate::error::PocError::QuoteParse("malformed".into()));
            }
            Ok(ParsedQuote { hardware_id: "hw-1".into(), measurement: "m1".into() })
        }
        async fn verify(&self, _parsed: &ParsedQuote, _expected: Option<&str>) -> crate::error::Result<()> {
            Ok(())
        }
    }

    struct CountingRegistry {
        calls: AtomicUsize,
        entry: Option<RegistryEntry>,
    }

    #[async_trait]
    impl HardwareRegistry for CountingRegistry {
        async fn lookup(&self, _hash: &str) -> crate::error::Result<Option<RegistryEntry>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.entry.clone())
        }
    }

    fn verifier_with(entry: Option<RegistryEntry>) -> Arc<PocVerifier> {
        Arc::new(PocVerifier::new(
            Arc::new(FixedParser),
            Arc::new(CountingRegistry { calls: AtomicUsize::new(0), entry }),
            "salt".into(),
        ))
    }

    #[tokio::test]
    async fn success_path_caches_and_emits() {
        let verifier = verifier_with(Some(RegistryEntry { agent_id: "a1".into(), revoked: false, level: 2, cloud_provider: "gcp".into(), region: "us-central1".into() }));
        let outcome = verifier.verify_node("a1", "quote-data", None).await;
        assert_eq!(outcome.kind, OutcomeKind::Success);
        assert_eq!(outcome.level, Some(2));
        assert_eq!(outcome.cloud_provider.as_deref(), Some("gcp"));
        assert_eq!(outcome.region.as_deref(), Some("us-central1"));
        assert_eq!(outcome.reputation_delta, 15.0);
        assert!(outcome.hardware_id_hash.is_some());

        let cached = verifier.verify_node("a1", "quote-data", None).await;
        assert_eq!(cached.kind, OutcomeKind::Success);
    }

    #[tokio::test]
    async fn not_registered_is_not_cached() {
        let verifier = verifier_with(None);
        let first = verifier.verify_node("a1", "quote-data", None).await;
        assert_eq!(first.kind, OutcomeKind::NotRegistered);
        assert_eq!(first.reason.as_deref(), Some("Hardware not registered in cloud alliance"));
        assert!(verifier.cache.read().await.is_empty());
    }

    #[tokio::test]
    async fn revoked_entry_returns_penalty() {
        let verifier = verifier_with(Some(RegistryEntry { agent_id: "a1".into(), revoked: true, level: 1, cloud_provider: "gcp".into(), region: "us-central1".into() }));
        let outcome = verifier.verify_node("a1", "quote-data", None).await;
        assert_eq!(outcome.kind, OutcomeKind::Revoked);
        assert_eq!(outcome.reputation_delta, -50.0);
    }

    #[tokio::test]
    async fn malformed_quote_fails_before_registry_lookup() {
        let verifier = verifier_with(Some(RegistryEntry { agent_id: "a1".into(), revoked: false, level: 1, cloud_provider: "gcp".into(), region: "us-central1".into() }));
        let outcome = verifier.verify_node("a1", "bad", None).await;
        assert_eq!(outcome.kind, OutcomeKind::Failed);
    }

    #[tokio::test]
    async fn concurrent_identical_requests_share_single_flight() {
        let verifier = verifier_with(Some(RegistryEntry { agent_id: "a1".into(), revoked: false, level: 1, cloud_provider: "gcp".into(), region: "us-central1".into() }));
        let v1 = verifier.clone();
        let v2 = verifier.clone();
        let (a, b) = tokio::join!(
            v1.verify_node("a1", "same-quote", None),
            v2.verify_node("a1", "same-quote", None)
        );
        assert_eq!(a.kind, OutcomeKind::Success);
        assert_eq!(b.kind, OutcomeKind::Success);
    }

    #[tokio::test]
    async fn batch_respects_concurrency_limit() {
        let verifier = verifier_with(Some(RegistryEntry { agent_id: "a1".into(), revoked: false, level: 1, cloud_provider: "gcp".into(), region: "us-central1".into() }));
        let requests: Vec<_> = (0..12)
            .map(|i| (format!("agent-{i}"), format!("quote-{i}"), None))
            .collect();
        let results = verifier.verify_nodes(requests).await;
        assert_eq!(results.len(), 12);
        assert!(results.iter().all(|r| r.kind == OutcomeKind::Success));
    }
}
