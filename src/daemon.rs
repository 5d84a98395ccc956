//! Daemon composition root.
//!
//! Owns every subsystem and the order they come up in: providers, cache,
//! health monitor, log analyzer, maintenance scheduler, then the tool
//! dispatcher on top. The HTTP layer only ever talks to this struct.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::cache::CacheManager;
use crate::health::HealthMonitor;
use crate::logs::LogAnalyzer;
use crate::maintenance::{register_builtin_tasks, MaintenanceScheduler};
use crate::providers::ProviderSet;
use crate::tools::{register_builtin_tools, ToolDispatcher};
use crate::types::{Config, Result};

pub struct Daemon {
    config: Config,
    cache: Arc<CacheManager>,
    monitor: Arc<HealthMonitor>,
    analyzer: Arc<LogAnalyzer>,
    scheduler: Arc<MaintenanceScheduler>,
    dispatcher: Arc<ToolDispatcher>,
    started_at: Instant,
    services: Mutex<Vec<JoinHandle<()>>>,
}

impl Daemon {
    /// Build the full subsystem graph from configuration. Nothing runs
    /// until [`Daemon::start`]; construction only wires and registers.
    pub fn new(config: Config) -> Result<Self> {
        let providers = ProviderSet::from_config(&config.providers);
        let cache = Arc::new(CacheManager::new(config.cache.clone()));
        let monitor = Arc::new(HealthMonitor::new(&config.health, providers.host.clone()));
        let analyzer = Arc::new(LogAnalyzer::new(&config.log_analysis));

        let scheduler = Arc::new(MaintenanceScheduler::new(&config.maintenance));
        register_builtin_tasks(&scheduler, &config.maintenance, cache.clone())?;

        // Tools come last: maintenance_run validates against the task list.
        let dispatcher = Arc::new(ToolDispatcher::new(&config, cache.clone()));
        register_builtin_tools(
            &dispatcher,
            &providers,
            monitor.clone(),
            analyzer.clone(),
            scheduler.clone(),
        )?;

        Ok(Self {
            config,
            cache,
            monitor,
            analyzer,
            scheduler,
            dispatcher,
            started_at: Instant::now(),
            services: Mutex::new(Vec::new()),
        })
    }

    /// Spawn the background services: health sampling, log tailing, and the
    /// maintenance tick loop.
    pub fn start(&self) {
        let mut services = lock_services(&self.services);
        services.push(self.monitor.start());
        services.push(self.analyzer.start());
        services.push(self.scheduler.start());
        info!(
            tools = self.dispatcher.len(),
            listen_addr = %self.config.server.listen_addr,
            "daemon_started"
        );
    }

    /// Stop every service and wait for the loops to wind down. The
    /// scheduler applies its own shutdown grace to in-flight runs.
    pub async fn shutdown(&self) {
        info!("daemon_stopping");
        self.monitor.stop();
        self.analyzer.stop();
        self.scheduler.stop();

        let services: Vec<JoinHandle<()>> = lock_services(&self.services).drain(..).collect();
        for service in services {
            if let Err(err) = service.await {
                if !err.is_cancelled() {
                    warn!(error = %err, "daemon_service_join_failed");
                }
            }
        }
        info!("daemon_stopped");
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn cache(&self) -> &CacheManager {
        &self.cache
    }

    pub fn monitor(&self) -> &HealthMonitor {
        &self.monitor
    }

    pub fn analyzer(&self) -> &LogAnalyzer {
        &self.analyzer
    }

    pub fn scheduler(&self) -> &MaintenanceScheduler {
        &self.scheduler
    }

    pub fn dispatcher(&self) -> &ToolDispatcher {
        &self.dispatcher
    }

    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }
}

impl fmt::Debug for Daemon {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Daemon")
            .field("tools", &self.dispatcher.len())
            .field("uptime", &self.uptime())
            .finish_non_exhaustive()
    }
}

fn lock_services(
    services: &Mutex<Vec<JoinHandle<()>>>,
) -> MutexGuard<'_, Vec<JoinHandle<()>>> {
    services.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};
    use tokio::time::{sleep, timeout};

    fn fast_config() -> Config {
        let mut config = Config::default();
        config.health.check_interval = Duration::from_millis(10);
        config.log_analysis.poll_interval = Duration::from_millis(10);
        config.log_analysis.watch_paths = Vec::new();
        config.maintenance.tick_interval = Duration::from_millis(10);
        config
    }

    #[tokio::test]
    async fn test_construction_wires_every_subsystem() {
        let daemon = Daemon::new(Config::default()).unwrap();
        assert_eq!(daemon.dispatcher().len(), 12);

        let status = daemon
            .dispatcher()
            .invoke("maintenance_status", Value::Null)
            .await
            .unwrap();
        assert_eq!(status["tasks"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_start_and_shutdown_complete() {
        let daemon = Daemon::new(fast_config()).unwrap();
        daemon.start();
        sleep(Duration::from_millis(30)).await;

        // Force one full sample so the assertion does not race the loop.
        daemon.monitor().sample_once().await;
        let health = daemon
            .dispatcher()
            .invoke("system_health", json!({}))
            .await
            .unwrap();
        assert!(!health["metrics"].as_array().unwrap().is_empty());

        timeout(Duration::from_secs(5), daemon.shutdown())
            .await
            .unwrap();
    }
}
