//! Background host metric sampler.
//!
//! Polls the host provider on a fixed interval, runs the configured metric
//! values through the threshold evaluator, and logs accepted transitions.
//! The request path reads the evaluator snapshot and never triggers a poll.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::health::{HealthMetric, HealthStatus, ThresholdEvaluator};
use crate::providers::Provider;
use crate::types::HealthConfig;

/// Host snapshot keys sampled each poll, paired with the threshold class
/// they evaluate under.
const SAMPLED_METRICS: [(&str, &str); 4] = [
    ("cpu", "cpu_percent"),
    ("memory", "memory_percent"),
    ("disk", "disk_percent"),
    ("temperature", "temperature_c"),
];

pub struct HealthMonitor {
    evaluator: Arc<RwLock<ThresholdEvaluator>>,
    provider: Arc<dyn Provider>,
    check_interval: Duration,
    stop_tx: Mutex<Option<oneshot::Sender<()>>>,
}

impl HealthMonitor {
    pub fn new(config: &HealthConfig, provider: Arc<dyn Provider>) -> Self {
        Self {
            evaluator: Arc::new(RwLock::new(ThresholdEvaluator::from_config(config))),
            provider,
            check_interval: config.check_interval,
            stop_tx: Mutex::new(None),
        }
    }

    /// Spawn the sampling loop. The first sample runs immediately.
    pub fn start(&self) -> JoinHandle<()> {
        let (stop_tx, mut stop_rx) = oneshot::channel();
        *lock(&self.stop_tx) = Some(stop_tx);

        let evaluator = self.evaluator.clone();
        let provider = self.provider.clone();
        let period = self.check_interval;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        sample(&evaluator, provider.as_ref()).await;
                    }
                    _ = &mut stop_rx => {
                        tracing::info!("health_monitor_stopped");
                        break;
                    }
                }
            }
        })
    }

    /// Signal the sampling loop to exit.
    pub fn stop(&self) {
        if let Some(stop_tx) = lock(&self.stop_tx).take() {
            let _ = stop_tx.send(());
        }
    }

    /// Run a single sample cycle outside the loop.
    pub async fn sample_once(&self) {
        sample(&self.evaluator, self.provider.as_ref()).await;
    }

    /// Current view of every tracked metric, ordered by name.
    pub fn snapshot(&self) -> Vec<HealthMetric> {
        read_evaluator(&self.evaluator).snapshot()
    }

    /// Worst state across all tracked metrics.
    pub fn overall(&self) -> HealthStatus {
        read_evaluator(&self.evaluator).overall()
    }
}

impl fmt::Debug for HealthMonitor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HealthMonitor")
            .field("check_interval", &self.check_interval)
            .finish_non_exhaustive()
    }
}

async fn sample(evaluator: &RwLock<ThresholdEvaluator>, provider: &dyn Provider) {
    let snapshot = match provider.fetch().await {
        Ok(snapshot) => snapshot,
        Err(err) => {
            tracing::warn!("health_sample_failed: {}", err);
            return;
        }
    };

    for (metric, key) in SAMPLED_METRICS {
        let value = match snapshot.get(key).and_then(Value::as_f64) {
            Some(value) => value,
            None => {
                tracing::warn!("health_metric_missing: key={}", key);
                continue;
            }
        };
        let evaluation = write_evaluator(evaluator).evaluate(metric, value);
        if let Some(t) = evaluation.transition {
            if t.to > t.from {
                tracing::warn!(
                    "health_transition: metric={} from={} to={} value={:.1}",
                    t.metric,
                    t.from,
                    t.to,
                    value
                );
            } else {
                tracing::info!(
                    "health_transition: metric={} from={} to={} value={:.1}",
                    t.metric,
                    t.from,
                    t.to,
                    value
                );
            }
        }
    }
}

fn lock<'a>(
    stop_tx: &'a Mutex<Option<oneshot::Sender<()>>>,
) -> MutexGuard<'a, Option<oneshot::Sender<()>>> {
    stop_tx.lock().unwrap_or_else(PoisonError::into_inner)
}

fn read_evaluator(
    evaluator: &RwLock<ThresholdEvaluator>,
) -> std::sync::RwLockReadGuard<'_, ThresholdEvaluator> {
    evaluator.read().unwrap_or_else(PoisonError::into_inner)
}

fn write_evaluator(
    evaluator: &RwLock<ThresholdEvaluator>,
) -> std::sync::RwLockWriteGuard<'_, ThresholdEvaluator> {
    evaluator.write().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::MockProvider;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::time::{sleep, timeout};

    fn fast_config() -> HealthConfig {
        HealthConfig {
            check_interval: Duration::from_millis(10),
            ..HealthConfig::default()
        }
    }

    fn full_snapshot(cpu: f64) -> Value {
        json!({
            "cpu_percent": cpu,
            "memory_percent": 40.0,
            "disk_percent": 50.0,
            "temperature_c": 45.0,
        })
    }

    #[tokio::test]
    async fn test_sample_tracks_and_classifies_metrics() {
        let mut provider = MockProvider::new();
        provider
            .expect_fetch()
            .returning(|| Ok(full_snapshot(97.0)));

        let monitor = HealthMonitor::new(&fast_config(), Arc::new(provider));
        monitor.sample_once().await;

        let snapshot = monitor.snapshot();
        assert_eq!(snapshot.len(), 4);
        let cpu = snapshot.iter().find(|m| m.name == "cpu").unwrap();
        assert_eq!(cpu.state, HealthStatus::Critical);
        assert_eq!(monitor.overall(), HealthStatus::Critical);
    }

    #[tokio::test]
    async fn test_recovery_follows_hysteresis_across_samples() {
        let calls = Arc::new(AtomicUsize::new(0));
        let seq = calls.clone();
        let mut provider = MockProvider::new();
        provider.expect_fetch().returning(move || {
            let i = seq.fetch_add(1, Ordering::SeqCst);
            let cpu = [97.0, 50.0, 50.0][i.min(2)];
            Ok(full_snapshot(cpu))
        });

        let monitor = HealthMonitor::new(&fast_config(), Arc::new(provider));
        monitor.sample_once().await;
        assert_eq!(monitor.overall(), HealthStatus::Critical);
        monitor.sample_once().await;
        // One good sample is not enough to clear the alert.
        assert_eq!(monitor.overall(), HealthStatus::Critical);
        monitor.sample_once().await;
        assert_eq!(monitor.overall(), HealthStatus::Ok);
    }

    #[tokio::test]
    async fn test_missing_metric_key_is_skipped() {
        let mut provider = MockProvider::new();
        provider.expect_fetch().returning(|| {
            Ok(json!({"cpu_percent": 10.0, "memory_percent": 20.0, "disk_percent": 30.0}))
        });

        let monitor = HealthMonitor::new(&fast_config(), Arc::new(provider));
        monitor.sample_once().await;

        let snapshot = monitor.snapshot();
        assert_eq!(snapshot.len(), 3);
        assert!(snapshot.iter().all(|m| m.name != "temperature"));
    }

    #[tokio::test]
    async fn test_provider_failure_keeps_last_known_state() {
        let calls = Arc::new(AtomicUsize::new(0));
        let seq = calls.clone();
        let mut provider = MockProvider::new();
        provider.expect_fetch().returning(move || {
            if seq.fetch_add(1, Ordering::SeqCst) == 0 {
                Ok(full_snapshot(97.0))
            } else {
                Err(crate::types::Error::upstream("proc unreadable"))
            }
        });

        let monitor = HealthMonitor::new(&fast_config(), Arc::new(provider));
        monitor.sample_once().await;
        monitor.sample_once().await;

        // The failed sample neither crashed nor reset the tracked state.
        assert_eq!(monitor.overall(), HealthStatus::Critical);
    }

    #[tokio::test]
    async fn test_monitor_start_stop() {
        let calls = Arc::new(AtomicUsize::new(0));
        let seq = calls.clone();
        let mut provider = MockProvider::new();
        provider.expect_fetch().returning(move || {
            seq.fetch_add(1, Ordering::SeqCst);
            Ok(full_snapshot(10.0))
        });

        let monitor = HealthMonitor::new(&fast_config(), Arc::new(provider));
        let handle = monitor.start();
        sleep(Duration::from_millis(50)).await;
        monitor.stop();

        timeout(Duration::from_secs(1), handle)
            .await
            .expect("monitor did not stop in time")
            .expect("monitor task panicked");
        assert!(calls.load(Ordering::SeqCst) >= 1);
    }
}
