//! HTTP-backed implementations of the injectable interfaces the
//! autoscaler and PoC verifier consume from the external platform,
//! following `dws_p2p::transport`'s reqwest-with-deadline pattern. A
//! `None` endpoint falls back to a harmless no-op so a node can run
//! with those subsystems idle.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use dws_autoscaler::{AutoscalerError, MetricSource, NodeCallback, ScaleCallback, TargetType};
use dws_poc::{HardwareRegistry, ParsedQuote, PocError, QuoteParser, RegistryEntry};

const CALLBACK_TIMEOUT: Duration = Duration::from_secs(30);
const REGISTRY_TIMEOUT: Duration = Duration::from_secs(5);

pub struct HttpMetricSource {
    client: reqwest::Client,
    base_url: Option<String>,
}

impl HttpMetricSource {
    pub fn new(base_url: Option<String>) -> Self {
        Self { client: reqwest::Client::new(), base_url }
    }
}

#[async_trait]
impl MetricSource for HttpMetricSource {
    async fn sample(&self, target_id: &str, metric_type: &str) -> Option<f64> {
        let base = self.base_url.as_ref()?;
        let url = format!("{base}/metrics/{target_id}/{metric_type}");
        let resp = self.client.get(&url).timeout(CALLBACK_TIMEOUT).send().await.ok()?;
        resp.json::<MetricSampleResponse>().await.ok().map(|r| r.value)
    }
}

#[derive(Deserialize)]
struct MetricSampleResponse {
    value: f64,
}

pub struct HttpScaleCallback {
    client: reqwest::Client,
    base_url: Option<String>,
}

impl HttpScaleCallback {
    pub fn new(base_url: Option<String>) -> Self {
        Self { client: reqwest::Client::new(), base_url }
    }
}

#[derive(Serialize)]
struct ScaleRequest<'a> {
    target_id: &'a str,
    target_type: TargetType,
    desired_replicas: u32,
}

#[async_trait]
impl ScaleCallback for HttpScaleCallback {
    async fn scale(&self, target_id: &str, target_type: TargetType, desired: u32) -> dws_autoscaler::Result<()> {
        let Some(base) = &self.base_url else { return Ok(()) };
        let url = format!("{base}/scale");
        self.client
            .post(&url)
            .json(&ScaleRequest { target_id, target_type, desired_replicas: desired })
            .timeout(CALLBACK_TIMEOUT)
            .send()
            .await
            .map_err(|e| AutoscalerError::CallbackFailed(e.to_string()))?
            .error_for_status()
            .map_err(|e| AutoscalerError::CallbackFailed(e.to_string()))?;
        Ok(())
    }
}

pub struct HttpNodeCallback {
    client: reqwest::Client,
    base_url: Option<String>,
}

impl HttpNodeCallback {
    pub fn new(base_url: Option<String>) -> Self {
        Self { client: reqwest::Client::new(), base_url }
    }
}

#[derive(Serialize)]
struct NodeScaleRequest<'a> {
    pool_id: &'a str,
    desired_nodes: u32,
}

#[async_trait]
impl NodeCallback for HttpNodeCallback {
    async fn scale_pool(&self, pool_id: &str, desired: u32) -> dws_autoscaler::Result<()> {
        let Some(base) = &self.base_url else { return Ok(()) };
        let url = format!("{base}/node-pools/scale");
        self.client
            .post(&url)
            .json(&NodeScaleRequest { pool_id, desired_nodes: desired })
            .timeout(CALLBACK_TIMEOUT)
            .send()
            .await
            .map_err(|e| AutoscalerError::CallbackFailed(e.to_string()))?
            .error_for_status()
            .map_err(|e| AutoscalerError::CallbackFailed(e.to_string()))?;
        Ok(())
    }
}

pub struct HttpQuoteParser {
    client: reqwest::Client,
    base_url: Option<String>,
}

impl HttpQuoteParser {
    pub fn new(base_url: Option<String>) -> Self {
        Self { client: reqwest::Client::new(), base_url }
    }
}

#[derive(Deserialize)]
struct ParseQuoteResponse {
    success: bool,
    quote: Option<QuoteWire>,
    error: Option<String>,
}

#[derive(Deserialize, Serialize)]
struct QuoteWire {
    hardware_id: String,
    measurement: String,
}

#[derive(Serialize)]
struct VerifyQuoteRequest<'a> {
    quote: &'a QuoteWire,
    expected_measurement: Option<&'a str>,
}

#[derive(Deserialize)]
struct VerifyQuoteResponse {
    valid: bool,
    certificate_valid: bool,
    signature_valid: bool,
    measurement_match: bool,
    error: Option<String>,
}

#[async_trait]
impl QuoteParser for HttpQuoteParser {
    async fn parse(&self, quote: &str) -> dws_poc::Result<ParsedQuote> {
        let base = self.base_url.as_ref().ok_or_else(|| PocError::QuoteParse("no quote parser configured".into()))?;
        let url = format!("{base}/quote/parse");
        let resp = self
            .client
            .post(&url)
            .json(&serde_json::json!({ "hex": quote }))
            .timeout(REGISTRY_TIMEOUT)
            .send()
            .await
            .map_err(|e| PocError::QuoteParse(e.to_string()))?
            .json::<ParseQuoteResponse>()
            .await
            .map_err(|e| PocError::QuoteParse(e.to_string()))?;
        if !resp.success {
            return Err(PocError::QuoteParse(resp.error.unwrap_or_else(|| "unknown parse error".into())));
        }
        let wire = resp.quote.ok_or_else(|| PocError::QuoteParse("missing quote body".into()))?;
        Ok(ParsedQuote { hardware_id: wire.hardware_id, measurement: wire.measurement })
    }

    async fn verify(&self, parsed: &ParsedQuote, expected_measurement: Option<&str>) -> dws_poc::Result<()> {
        let base = self
            .base_url
            .as_ref()
            .ok_or_else(|| PocError::QuoteVerification("no quote parser configured".into()))?;
        let url = format!("{base}/quote/verify");
        let wire = QuoteWire { hardware_id: parsed.hardware_id.clone(), measurement: parsed.measurement.clone() };
        let resp = self
            .client
            .post(&url)
            .json(&VerifyQuoteRequest { quote: &wire, expected_measurement })
            .timeout(REGISTRY_TIMEOUT)
            .send()
            .await
            .map_err(|e| PocError::QuoteVerification(e.to_string()))?
            .json::<VerifyQuoteResponse>()
            .await
            .map_err(|e| PocError::QuoteVerification(e.to_string()))?;
        if !resp.valid || !resp.certificate_valid || !resp.signature_valid || !resp.measurement_match {
            return Err(PocError::QuoteVerification(
                resp.error.unwrap_or_else(|| "quote verification failed".into()),
            ));
        }
        Ok(())
    }
}

pub struct HttpHardwareRegistry {
    client: reqwest::Client,
    base_url: Option<String>,
}

impl HttpHardwareRegistry {
    pub fn new(base_url: Option<String>) -> Self {
        Self { client: reqwest::Client::new(), base_url }
    }
}

#[derive(Deserialize)]
struct RegistryEntryWire {
    level: u8,
    active: bool,
    cloud_provider: String,
    region: String,
}

#[async_trait]
impl HardwareRegistry for HttpHardwareRegistry {
    async fn lookup(&self, hardware_id_hash: &str) -> dws_poc::Result<Option<RegistryEntry>> {
        let Some(base) = &self.base_url else { return Ok(None) };
        let url = format!("{base}/registry/{hardware_id_hash}");
        let resp = self
            .client
            .get(&url)
            .timeout(REGISTRY_TIMEOUT)
            .send()
            .await
            .map_err(|e| PocError::Registry(e.to_string()))?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let wire = resp
            .error_for_status()
            .map_err(|e| PocError::Registry(e.to_string()))?
            .json::<RegistryEntryWire>()
            .await
            .map_err(|e| PocError::Registry(e.to_string()))?;
        Ok(Some(RegistryEntry {
            agent_id: hardware_id_hash.to_string(),
            revoked: !wire.active,
            level: wire.level,
            cloud_provider: wire.cloud_provider,
            region: wire.region,
        }))
    }
}
