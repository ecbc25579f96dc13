//! Replica and node-pool autoscaling engine.

pub mod collector;
pub mod engine;
pub mod error;
pub mod types;

pub use collector::MetricCollector;
pub use engine::{AutoscalerEngine, MetricSource, NodeCallback, ScaleCallback};
pub use error::{AutoscalerError, Result};
pub use types::*;
