//! Host health: threshold evaluation with hysteresis plus the background
//! sampler that feeds it.

mod evaluator;
mod monitor;

pub use evaluator::{Evaluation, HealthMetric, HealthStatus, ThresholdEvaluator, Transition};
pub use monitor::HealthMonitor;
