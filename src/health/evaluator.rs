//! Three-band threshold evaluation with asymmetric hysteresis.
//!
//! Worsening transitions apply on the first qualifying sample. Recovery
//! requires `recovery_samples` consecutive samples in the same better band,
//! so an isolated dip below a threshold never clears an alert.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{HealthConfig, ThresholdPair};

/// Metric state band. Declaration order is severity order, so `max` picks
/// the worse of two states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Ok,
    Warning,
    Critical,
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            HealthStatus::Ok => "ok",
            HealthStatus::Warning => "warning",
            HealthStatus::Critical => "critical",
        };
        f.write_str(s)
    }
}

/// Point-in-time view of one tracked metric.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthMetric {
    pub name: String,
    pub value: f64,
    /// Absent for metrics with no configured thresholds.
    pub warning_threshold: Option<f64>,
    pub critical_threshold: Option<f64>,
    pub state: HealthStatus,
    /// Consecutive samples that classified into the same band as the most
    /// recent one.
    pub consecutive_breach_count: u32,
    pub last_transition_at: Option<DateTime<Utc>>,
    pub sampled_at: DateTime<Utc>,
}

/// An accepted state change. Alerting keys on these, never on raw samples.
#[derive(Debug, Clone, Serialize)]
pub struct Transition {
    pub metric: String,
    pub from: HealthStatus,
    pub to: HealthStatus,
    pub at: DateTime<Utc>,
}

/// Outcome of feeding one sample through the evaluator.
#[derive(Debug, Clone)]
pub struct Evaluation {
    pub metric: HealthMetric,
    pub transition: Option<Transition>,
}

#[derive(Debug)]
struct MetricState {
    value: f64,
    state: HealthStatus,
    /// Band of the most recent sample and how many consecutive samples
    /// landed in it. Recovery is accepted once the band is better than
    /// `state` and the streak reaches `recovery_samples`.
    streak_band: HealthStatus,
    streak_len: u32,
    last_transition_at: Option<DateTime<Utc>>,
    sampled_at: DateTime<Utc>,
}

/// Stateful hysteresis evaluator for a set of named metrics.
#[derive(Debug)]
pub struct ThresholdEvaluator {
    thresholds: HashMap<String, ThresholdPair>,
    recovery_samples: u32,
    metrics: HashMap<String, MetricState>,
}

impl ThresholdEvaluator {
    pub fn new(thresholds: HashMap<String, ThresholdPair>, recovery_samples: u32) -> Self {
        Self {
            thresholds,
            // A zero would make recovery impossible; validation rejects it
            // upstream, this is the last line of defense.
            recovery_samples: recovery_samples.max(1),
            metrics: HashMap::new(),
        }
    }

    /// Build an evaluator tracking the built-in metric classes.
    pub fn from_config(config: &HealthConfig) -> Self {
        let mut thresholds = HashMap::new();
        thresholds.insert("cpu".to_string(), config.thresholds.cpu);
        thresholds.insert("memory".to_string(), config.thresholds.memory);
        thresholds.insert("disk".to_string(), config.thresholds.disk);
        thresholds.insert("temperature".to_string(), config.thresholds.temperature);
        Self::new(thresholds, config.recovery_samples)
    }

    /// Feed one sample. Returns the metric's updated view and the accepted
    /// transition, if this sample caused one.
    pub fn evaluate(&mut self, name: &str, value: f64) -> Evaluation {
        let now = Utc::now();
        let pair = self.thresholds.get(name).copied();
        // Metrics without thresholds are informational only.
        let band = pair.map(|p| classify(value, p)).unwrap_or(HealthStatus::Ok);

        let mut transition = None;
        match self.metrics.entry(name.to_string()) {
            Entry::Vacant(slot) => {
                // First sample adopts its band immediately; starting outside
                // OK is itself a transition worth alerting on.
                if band != HealthStatus::Ok {
                    transition = Some(Transition {
                        metric: name.to_string(),
                        from: HealthStatus::Ok,
                        to: band,
                        at: now,
                    });
                }
                slot.insert(MetricState {
                    value,
                    state: band,
                    streak_band: band,
                    streak_len: 1,
                    last_transition_at: transition.as_ref().map(|t| t.at),
                    sampled_at: now,
                });
            }
            Entry::Occupied(mut slot) => {
                let tracked = slot.get_mut();
                if band == tracked.streak_band {
                    tracked.streak_len = tracked.streak_len.saturating_add(1);
                } else {
                    tracked.streak_band = band;
                    tracked.streak_len = 1;
                }
                tracked.value = value;
                tracked.sampled_at = now;

                let worsened = band > tracked.state;
                let recovered =
                    band < tracked.state && tracked.streak_len >= self.recovery_samples;
                if worsened || recovered {
                    transition = Some(Transition {
                        metric: name.to_string(),
                        from: tracked.state,
                        to: band,
                        at: now,
                    });
                    tracked.state = band;
                    tracked.last_transition_at = Some(now);
                }
            }
        }

        Evaluation {
            metric: self.view(name, pair),
            transition,
        }
    }

    /// Worst stored state across all metrics; OK when nothing has been
    /// evaluated yet.
    pub fn overall(&self) -> HealthStatus {
        self.metrics
            .values()
            .map(|m| m.state)
            .max()
            .unwrap_or(HealthStatus::Ok)
    }

    /// All tracked metrics, ordered by name.
    pub fn snapshot(&self) -> Vec<HealthMetric> {
        let mut names: Vec<&String> = self.metrics.keys().collect();
        names.sort();
        names
            .into_iter()
            .map(|name| self.view(name, self.thresholds.get(name).copied()))
            .collect()
    }

    fn view(&self, name: &str, pair: Option<ThresholdPair>) -> HealthMetric {
        match self.metrics.get(name) {
            Some(tracked) => HealthMetric {
                name: name.to_string(),
                value: tracked.value,
                warning_threshold: pair.map(|p| p.warning),
                critical_threshold: pair.map(|p| p.critical),
                state: tracked.state,
                consecutive_breach_count: tracked.streak_len,
                last_transition_at: tracked.last_transition_at,
                sampled_at: tracked.sampled_at,
            },
            None => HealthMetric {
                name: name.to_string(),
                value: 0.0,
                warning_threshold: pair.map(|p| p.warning),
                critical_threshold: pair.map(|p| p.critical),
                state: HealthStatus::Ok,
                consecutive_breach_count: 0,
                last_transition_at: None,
                sampled_at: Utc::now(),
            },
        }
    }
}

fn classify(value: f64, pair: ThresholdPair) -> HealthStatus {
    if value >= pair.critical {
        HealthStatus::Critical
    } else if value >= pair.warning {
        HealthStatus::Warning
    } else {
        HealthStatus::Ok
    }
}
