//! Per-`(targetId, metricType)` ring buffer of up to 300 samples, with
//! windowed average and p99.

use std::collections::HashMap;
use std::collections::VecDeque;

use tokio::sync::RwLock;

use crate::types::{now_ms, MetricSample};

pub const MAX_SAMPLES: usize = 300;

#[derive(Default)]
pub struct MetricCollector {
    series: RwLock<HashMap<(String, String), VecDeque<MetricSample>>>,
}

impl MetricCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn record(&self, target_id: &str, metric_type: &str, value: f64) {
        let key = (target_id.to_string(), metric_type.to_string());
        let mut series = self.series.write().await;
        let ring = series.entry(key).or_default();
        if ring.len() >= MAX_SAMPLES {
            ring.pop_front();
        }
        ring.push_back(MetricSample {
            value,
            timestamp_ms: now_ms(),
        });
    }

    fn windowed(ring: &VecDeque<MetricSample>, window_seconds: u64, now: u64) -> Vec<f64> {
        let cutoff = now.saturating_sub(window_seconds * 1000);
        ring.iter()
            .filter(|s| s.timestamp_ms >= cutoff)
            .map(|s| s.value)
            .collect()
    }

    /// Average over the trailing `window_seconds`; `None` if no samples
    /// fall in the window.
    pub async fn get_average(
        &self,
        target_id: &str,
        metric_type: &str,
        window_seconds: u64,
    ) -> Option<f64> {
        let key = (target_id.to_string(), metric_type.to_string());
        let series = self.series.read().await;
        let ring = series.get(&key)?;
        let values = Self::windowed(ring, window_seconds, now_ms());
        if values.is_empty() {
            return None;
        }
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }

    pub async fn get_p99(
        &self,
        target_id: &str,
        metric_type: &str,
        window_seconds: u64,
    ) -> Option<f64> {
        let key = (target_id.to_string(), metric_type.to_string());
        let series = self.series.read().await;
        let ring = series.get(&key)?;
        let mut values = Self::windowed(ring, window_seconds, now_ms());
        if values.is_empty() {
            return None;
        }
        values.sort_by(|a, b| a.partial_cmp(b).unwrap());
        let idx = ((values.len() as f64) * 0.99).ceil() as usize;
        let idx = idx.saturating_sub(1).min(values.len() - 1);
        Some(values[idx])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn average_reflects_recorded_samples() {
        let collector = MetricCollector::new();
        collector.record("t1", "cpu", 10.0).await;
        collector.record("t1", "cpu", 20.0).await;
        collector.record("t1", "cpu", 30.0).await;
        let avg = collector.get_average("t1", "cpu", 60).await.unwrap();
        assert!((avg - 20.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn missing_series_has_no_average() {
        let collector = MetricCollector::new();
        assert!(collector.get_average("missing", "cpu", 60).await.is_none());
    }

    #[tokio::test]
    async fn ring_caps_at_max_samples() {
        let collector = MetricCollector::new();
        for i in 0..(MAX_SAMPLES + 10) {
            collector.record("t1", "cpu", i as f64).await;
        }
        let series = collector.series.read().await;
        let ring = series.get(&("t1".to_string(), "cpu".to_string())).unwrap();
        assert_eq!(ring.len(), MAX_SAMPLES);
    }

    #[tokio::test]
    async fn p99_of_uniform_samples_is_near_max() {
        let collector = MetricCollector::new();
        for i in 1..=100 {
            collector.record("t1", "lat", i as f64).await;
        }
        let p99 = collector.get_p99("t1", "lat", 60).await.unwrap();
        assert!(p99 >= 98.0);
    }
}
