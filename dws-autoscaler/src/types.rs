//! Policy, behavior, and decision types for the autoscaler.

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
pub enum TargetType {
    Worker,
    Container,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScalingMetric {
    pub metric_type: String,
    pub target: f64,
    pub weight: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BehaviorKind {
    Pods,
    Percent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectPolicy {
    Max,
    Min,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BehaviorPolicyEntry {
    pub kind: BehaviorKind,
    pub value: f64,
    pub period_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScalingBehavior {
    pub policies: Vec<BehaviorPolicyEntry>,
    pub select_policy: SelectPolicy,
    pub disabled: bool,
}

impl ScalingBehavior {
    pub fn unconstrained() -> Self {
        Self {
            policies: Vec::new(),
            select_policy: SelectPolicy::Max,
            disabled: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScaleDirection {
    None,
    Up,
    Down,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScalingPolicy {
    pub id: String,
    pub target_id: String,
    pub target_type: TargetType,
    pub enabled: bool,
    pub min_replicas: u32,
    pub max_replicas: u32,
    pub current_replicas: u32,
    /// If set, the effective floor for scaling is 0 instead of `min_replicas`.
    pub scale_to_zero: bool,
    pub cooldown_seconds: u64,
    pub metrics: Vec<ScalingMetric>,
    pub scale_up_behavior: ScalingBehavior,
    pub scale_down_behavior: ScalingBehavior,
    pub last_scale_time_ms: Option<u64>,
    pub pool_id: Option<String>,
    pub per_replica_cpu: f64,
    pub per_replica_memory: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScalingDecision {
    pub policy_id: String,
    pub timestamp_ms: u64,
    pub previous_replicas: u32,
    pub desired_replicas: u32,
    pub direction: ScaleDirection,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodePool {
    pub id: String,
    pub capacity_cpu: f64,
    pub capacity_memory: f64,
    pub min_nodes: u32,
    pub max_nodes: u32,
    pub current_nodes: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodePoolDecision {
    pub pool_id: String,
    pub timestamp_ms: u64,
    pub previous_nodes: u32,
    pub desired_nodes: u32,
    pub estimated_monthly_savings: f64,
}

#[derive(Debug, Clone, Copy)]
pub struct MetricSample {
    pub value: f64,
    pub timestamp_ms: u64,
}
