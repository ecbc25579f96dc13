//! Evaluation loop: per-policy replica decisions and per-pool node
//! decisions, driven by an injectable metric source and
//! scale callbacks.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{watch, RwLock};
use tracing::{info, warn};

use crate::collector::MetricCollector;
use crate::error::{AutoscalerError, Result};
use crate::types::{
    now_ms, BehaviorKind, NodePool, NodePoolDecision, ScaleDirection, ScalingBehavior,
    ScalingDecision, ScalingPolicy, SelectPolicy, TargetType,
};

pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(15);
pub const METRIC_WINDOW_SECONDS: u64 = 60;
pub const MAX_HISTORY: usize = 100;
pub const NODE_SCALE_UP_THRESHOLD: f64 = 0.8;
pub const NODE_SCALE_DOWN_THRESHOLD: f64 = 0.5;
pub const NODE_SCALE_UP_TARGET_UTIL: f64 = 0.8;
pub const NODE_SCALE_DOWN_TARGET_UTIL: f64 = 0.7;

/// Supplies fresh raw samples for a `(targetId, metricType)` pair;
/// consumed by the engine immediately before each evaluation.
#[async_trait]
pub trait MetricSource: Send + Sync {
    async fn sample(&self, target_id: &str, metric_type: &str) -> Option<f64>;
}

#[async_trait]
pub trait ScaleCallback: Send + Sync {
    async fn scale(&self, target_id: &str, target_type: TargetType, desired: u32) -> Result<()>;
}

#[async_trait]
pub trait NodeCallback: Send + Sync {
    async fn scale_pool(&self, pool_id: &str, desired: u32) -> Result<()>;
}

pub struct AutoscalerEngine {
    policies: RwLock<HashMap<String, ScalingPolicy>>,
    pools: RwLock<HashMap<String, NodePool>>,
    collector: Arc<MetricCollector>,
    metric_source: Arc<dyn MetricSource>,
    scale_callback: Arc<dyn ScaleCallback>,
    node_callback: Arc<dyn NodeCallback>,
    history: RwLock<VecDeque<ScalingDecision>>,
    node_history: RwLock<VecDeque<NodePoolDecision>>,
    interval: Duration,
    shutdown_tx: RwLock<Option<watch::Sender<bool>>>,
}

impl AutoscalerEngine {
    pub fn new(
        collector: Arc<MetricCollector>,
        metric_source: Arc<dyn MetricSource>,
        scale_callback: Arc<dyn ScaleCallback>,
        node_callback: Arc<dyn NodeCallback>,
    ) -> Self {
        Self {
            policies: RwLock::new(HashMap::new()),
            pools: RwLock::new(HashMap::new()),
            collector,
            metric_source,
            scale_callback,
            node_callback,
            history: RwLock::new(VecDeque::new()),
            node_history: RwLock::new(VecDeque::new()),
            interval: DEFAULT_INTERVAL,
            shutdown_tx: RwLock::new(None),
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub async fn create_policy(&self, policy: ScalingPolicy) -> Result<()> {
        if policy.min_replicas > policy.max_replicas {
            return Err(AutoscalerError::Validation(
                "min_replicas must be <= max_replicas".into(),
            ));
        }
        self.policies.write().await.insert(policy.id.clone(), policy);
        Ok(())
    }

    pub async fn update_policy(&self, policy: ScalingPolicy) -> Result<()> {
        let mut policies = self.policies.write().await;
        if !policies.contains_key(&policy.id) {
            return Err(AutoscalerError::PolicyNotFound(policy.id));
        }
        policies.insert(policy.id.clone(), policy);
        Ok(())
    }

    pub async fn delete_policy(&self, policy_id: &str) -> Result<()> {
        self.policies
            .write()
            .await
            .remove(policy_id)
            .map(|_| ())
            .ok_or_else(|| AutoscalerError::PolicyNotFound(policy_id.to_string()))
    }

    pub async fn get_policy(&self, policy_id: &str) -> Option<ScalingPolicy> {
        self.policies.read().await.get(policy_id).cloned()
    }

    pub async fn create_pool(&self, pool: NodePool) {
        self.pools.write().await.insert(pool.id.clone(), pool);
    }

    pub async fn history(&self) -> Vec<ScalingDecision> {
        self.history.read().await.iter().cloned().collect()
    }

    pub async fn start(self: &Arc<Self>) {
        let (tx, mut rx) = watch::channel(false);
        *self.shutdown_tx.write().await = Some(tx);
        let engine = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(engine.interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        engine.evaluate_all().await;
                        engine.evaluate_pools().await;
                    }
                    _ = rx.changed() => {
                        if *rx.borrow() { break; }
                    }
                }
            }
        });
    }

    pub async fn stop(&self) {
        if let Some(tx) = self.shutdown_tx.write().await.take() {
            let _ = tx.send(true);
        }
    }

    /// Runs one evaluation pass over every enabled policy, serialized
    /// per policy id (no two decisions for the same policy overlap —
    /// the whole sweep runs on a single task).
    pub async fn evaluate_all(&self) {
        let policy_ids: Vec<String> = self.policies.read().await.keys().cloned().collect();
        for policy_id in policy_ids {
            if let Err(e) = self.evaluate_policy(&policy_id).await {
                warn!("evaluating policy {policy_id} failed: {e}");
            }
        }
    }

    pub async fn evaluate_policy(&self, policy_id: &str) -> Result<()> {
        let policy = self
            .policies
            .read()
            .await
            .get(policy_id)
            .cloned()
            .ok_or_else(|| AutoscalerError::PolicyNotFound(policy_id.to_string()))?;

        if !policy.enabled {
            return Ok(());
        }

        let now = now_ms();
        if let Some(last) = policy.last_scale_time_ms {
            if now.saturating_sub(last) < policy.cooldown_seconds * 1000 {
                return Ok(());
            }
        }

        for metric in &policy.metrics {
            if let Some(sample) = self.metric_source.sample(&policy.target_id, &metric.metric_type).await {
                self.collector.record(&policy.target_id, &metric.metric_type, sample).await;
            }
        }

        let mut weighted_sum = 0.0;
        let mut weight_total = 0.0;
        for metric in &policy.metrics {
            let Some(current) = self
                .collector
                .get_average(&policy.target_id, &metric.metric_type, METRIC_WINDOW_SECONDS)
                .await
            else {
                continue;
            };
            if metric.target <= 0.0 {
                continue;
            }
            weighted_sum += (current / metric.target) * metric.weight;
            weight_total += metric.weight;
        }

        if weight_total == 0.0 {
            return Ok(());
        }

        let ratio = weighted_sum / weight_total;
        let raw_desired = ((policy.current_replicas as f64) * ratio).ceil() as i64;
        let effective_min = if policy.scale_to_zero { 0 } else { policy.min_replicas };
        let clamped = raw_desired.clamp(effective_min as i64, policy.max_replicas as i64) as u32;

        let (desired, direction) = if clamped > policy.current_replicas {
            let limited = apply_behavior(&policy.scale_up_behavior, policy.current_replicas, clamped, true);
            (limited, ScaleDirection::Up)
        } else if clamped < policy.current_replicas {
            let limited = apply_behavior(&policy.scale_down_behavior, policy.current_replicas, clamped, false);
            (limited, ScaleDirection::Down)
        } else {
            (policy.current_replicas, ScaleDirection::None)
        };

        if direction == ScaleDirection::None || desired == policy.current_replicas {
            return Ok(());
        }

        match self.scale_callback.scale(&policy.target_id, policy.target_type, desired).await {
            Ok(()) => {
                let decision = ScalingDecision {
                    policy_id: policy.id.clone(),
                    timestamp_ms: now,
                    previous_replicas: policy.current_replicas,
                    desired_replicas: desired,
                    direction,
                    reason: format!("ratio={ratio:.3}"),
                };
                {
                    let mut policies = self.policies.write().await;
                    if let Some(p) = policies.get_mut(&policy.id) {
                        p.current_replicas = desired;
                        p.last_scale_time_ms = Some(now);
                    }
                }
                let mut history = self.history.write().await;
                if history.len() >= MAX_HISTORY {
                    history.pop_front();
                }
                history.push_back(decision);
                info!("policy {} scaled {} -> {}", policy.id, policy.current_replicas, desired);
                Ok(())
            }
            Err(e) => {
                warn!("scale callback failed for {}: {e}", policy.id);
                Err(AutoscalerError::CallbackFailed(e.to_string()))
            }
        }
    }

    /// Node-pool scaling: aggregates required capacity across every
    /// policy bound to a pool and scales the pool accordingly.
    pub async fn evaluate_pools(&self) {
        let pool_ids: Vec<String> = self.pools.read().await.keys().cloned().collect();
        for pool_id in pool_ids {
            if let Err(e) = self.evaluate_pool(&pool_id).await {
                warn!("evaluating pool {pool_id} failed: {e}");
            }
        }
    }

    async fn evaluate_pool(&self, pool_id: &str) -> Result<()> {
        let pool = self
            .pools
            .read()
            .await
            .get(pool_id)
            .cloned()
            .ok_or_else(|| AutoscalerError::PoolNotFound(pool_id.to_string()))?;

        let bound: Vec<ScalingPolicy> = self
            .policies
            .read()
            .await
            .values()
            .filter(|p| p.pool_id.as_deref() == Some(pool_id))
            .filter(|p| matches!(p.target_type, TargetType::Worker | TargetType::Container))
            .cloned()
            .collect();

        let total_cpu: f64 = bound
            .iter()
            .map(|p| p.current_replicas as f64 * p.per_replica_cpu)
            .sum();
        let total_memory: f64 = bound
            .iter()
            .map(|p| p.current_replicas as f64 * p.per_replica_memory)
            .sum();

        let cpu_util = if pool.capacity_cpu > 0.0 { total_cpu / pool.capacity_cpu } else { 0.0 };
        let mem_util = if pool.capacity_memory > 0.0 { total_memory / pool.capacity_memory } else { 0.0 };

        let desired = if cpu_util > NODE_SCALE_UP_THRESHOLD || mem_util > NODE_SCALE_UP_THRESHOLD {
            let cpu_target = (total_cpu / (pool.capacity_cpu * NODE_SCALE_UP_TARGET_UTIL)).ceil() as u32;
            let mem_target = (total_memory / (pool.capacity_memory * NODE_SCALE_UP_TARGET_UTIL)).ceil() as u32;
            cpu_target.max(mem_target).max(pool.current_nodes)
        } else if cpu_util < NODE_SCALE_DOWN_THRESHOLD && mem_util < NODE_SCALE_DOWN_THRESHOLD {
            let cpu_target = (total_cpu / (pool.capacity_cpu * NODE_SCALE_DOWN_TARGET_UTIL)).ceil() as u32;
            let mem_target = (total_memory / (pool.capacity_memory * NODE_SCALE_DOWN_TARGET_UTIL)).ceil() as u32;
            cpu_target.max(mem_target).max(pool.min_nodes)
        } else {
            pool.current_nodes
        };

        let desired = desired.clamp(pool.min_nodes, pool.max_nodes);
        if desired == pool.current_nodes {
            return Ok(());
        }

        self.node_callback
            .scale_pool(pool_id, desired)
            .await
            .map_err(|e| AutoscalerError::CallbackFailed(e.to_string()))?;

        let savings = if desired < pool.current_nodes {
            (pool.current_nodes - desired) as f64 * estimate_monthly_node_cost()
        } else {
            0.0
        };

        {
            let mut pools = self.pools.write().await;
            if let Some(p) = pools.get_mut(pool_id) {
                p.current_nodes = desired;
            }
        }
        let decision = NodePoolDecision {
            pool_id: pool_id.to_string(),
            timestamp_ms: now_ms(),
            previous_nodes: pool.current_nodes,
            desired_nodes: desired,
            estimated_monthly_savings: savings,
        };
        let mut history = self.node_history.write().await;
        if history.len() >= MAX_HISTORY {
            history.pop_front();
        }
        history.push_back(decision);
        Ok(())
    }
}

/// Placeholder unit cost for savings estimation; operators override via
/// pool metadata in a full cost model (not modeled here).
fn estimate_monthly_node_cost() -> f64 {
    150.0
}

/// Limits `raw_desired` per the behavior's selected policy
/// (`pods`/`percent` combined by `max`/`min`); `disabled` pins the
/// current replica count.
pub fn apply_behavior(behavior: &ScalingBehavior, current: u32, raw_desired: u32, increasing: bool) -> u32 {
    if behavior.disabled {
        return current;
    }
    if behavior.policies.is_empty() {
        return raw_desired;
    }
    let steps: Vec<u32> = behavior
        .policies
        .iter()
        .map(|entry| match entry.kind {
            BehaviorKind::Pods => entry.value.max(0.0) as u32,
            BehaviorKind::Percent => (((current as f64) * entry.value / 100.0).ceil() as u32).max(1),
        })
        .collect();
    let limit = match behavior.select_policy {
        SelectPolicy::Max => steps.into_iter().max().unwrap_or(0),
        SelectPolicy::Min => steps.into_iter().min().unwrap_or(0),
    };
    if increasing {
        raw_desired.min(current.saturating_add(limit))
    } else {
        raw_desired.max(current.saturating_sub(limit))
    }
}
