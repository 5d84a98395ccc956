//! Host telemetry provider backed by sysinfo.

use std::cmp::Ordering;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use sysinfo::{Components, Disks, System};

use crate::providers::{with_timeout, Provider};
use crate::types::{Error, Result};

/// Local host snapshots and process listings.
///
/// The `System` handle persists across calls so CPU usage deltas have a
/// previous measurement to diff against; the very first sample after start
/// can read 0%.
pub struct HostProvider {
    timeout: Duration,
    system: Arc<Mutex<System>>,
}

impl HostProvider {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            system: Arc::new(Mutex::new(System::new_all())),
        }
    }
}

impl fmt::Debug for HostProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostProvider")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Provider for HostProvider {
    async fn fetch(&self) -> Result<Value> {
        let system = self.system.clone();
        with_timeout(self.timeout, "host snapshot", async move {
            tokio::task::spawn_blocking(move || snapshot(&system))
                .await
                .map_err(|e| Error::upstream(format!("host telemetry task failed: {}", e)))
        })
        .await
    }

    async fn act(&self, params: &Value) -> Result<Value> {
        let action = params.get("action").and_then(Value::as_str).unwrap_or("");
        match action {
            "processes" => {
                let sort_by = params
                    .get("sort_by")
                    .and_then(Value::as_str)
                    .unwrap_or("cpu")
                    .to_string();
                let limit = params.get("limit").and_then(Value::as_u64).unwrap_or(20) as usize;
                let system = self.system.clone();
                with_timeout(self.timeout, "host process listing", async move {
                    tokio::task::spawn_blocking(move || top_processes(&system, &sort_by, limit))
                        .await
                        .map_err(|e| {
                            Error::upstream(format!("host telemetry task failed: {}", e))
                        })
                })
                .await
            }
            other => Err(Error::invalid_argument(
                "action",
                format!("unknown host action {:?}", other),
            )),
        }
    }
}

fn snapshot(system: &Mutex<System>) -> Value {
    let mut sys = lock(system);
    sys.refresh_all();

    let cpu_percent = f64::from(sys.global_cpu_info().cpu_usage());
    let cpu_count = sys.cpus().len();
    let memory_total = sys.total_memory();
    let memory_used = sys.used_memory();
    let memory_percent = if memory_total > 0 {
        memory_used as f64 / memory_total as f64 * 100.0
    } else {
        0.0
    };
    drop(sys);

    let disks = Disks::new_with_refreshed_list();
    let mut disk_entries = Vec::new();
    let mut disk_percent: f64 = 0.0;
    for disk in disks.iter() {
        let total = disk.total_space();
        if total == 0 {
            continue;
        }
        let available = disk.available_space();
        let used_percent = (total.saturating_sub(available)) as f64 / total as f64 * 100.0;
        disk_percent = disk_percent.max(used_percent);
        disk_entries.push(json!({
            "mount": disk.mount_point().display().to_string(),
            "filesystem": disk.file_system().to_string_lossy(),
            "total_bytes": total,
            "available_bytes": available,
            "used_percent": used_percent,
        }));
    }

    let components = Components::new_with_refreshed_list();
    let mut temperatures = Vec::new();
    let mut hottest: Option<f64> = None;
    for component in components.iter() {
        let celsius = f64::from(component.temperature());
        if celsius.is_finite() {
            hottest = Some(hottest.map_or(celsius, |h| h.max(celsius)));
            temperatures.push(json!({
                "label": component.label(),
                "celsius": celsius,
            }));
        }
    }

    let load = System::load_average();

    json!({
        "hostname": System::host_name(),
        "os": System::long_os_version(),
        "kernel": System::kernel_version(),
        "uptime_seconds": System::uptime(),
        "cpu_percent": cpu_percent,
        "cpu_count": cpu_count,
        "load_average": {"one": load.one, "five": load.five, "fifteen": load.fifteen},
        "memory_percent": memory_percent,
        "memory_used_bytes": memory_used,
        "memory_total_bytes": memory_total,
        "disk_percent": disk_percent,
        "disks": disk_entries,
        "temperature_c": hottest,
        "temperatures": temperatures,
    })
}

fn top_processes(system: &Mutex<System>, sort_by: &str, limit: usize) -> Value {
    let mut sys = lock(system);
    sys.refresh_processes();
    let memory_total = sys.total_memory();

    let mut entries: Vec<(String, u32, f32, u64)> = sys
        .processes()
        .iter()
        .map(|(pid, process)| {
            (
                process.name().to_string(),
                pid.as_u32(),
                process.cpu_usage(),
                process.memory(),
            )
        })
        .collect();
    drop(sys);

    match sort_by {
        "memory" => entries.sort_by(|a, b| b.3.cmp(&a.3)),
        "name" => entries.sort_by(|a, b| a.0.to_lowercase().cmp(&b.0.to_lowercase())),
        // cpu (the default)
        _ => entries.sort_by(|a, b| b.2.partial_cmp(&a.2).unwrap_or(Ordering::Equal)),
    }
    entries.truncate(limit);

    let processes: Vec<Value> = entries
        .into_iter()
        .map(|(name, pid, cpu, memory)| {
            let memory_percent = if memory_total > 0 {
                memory as f64 / memory_total as f64 * 100.0
            } else {
                0.0
            };
            json!({
                "pid": pid,
                "name": name,
                "cpu_percent": f64::from(cpu),
                "memory_bytes": memory,
                "memory_percent": memory_percent,
            })
        })
        .collect();

    json!({
        "count": processes.len(),
        "sorted_by": sort_by,
        "processes": processes,
    })
}

fn lock(system: &Mutex<System>) -> MutexGuard<'_, System> {
    system.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fetch_reports_core_metrics() {
        let provider = HostProvider::new(Duration::from_secs(10));
        let snapshot = provider.fetch().await.unwrap();

        for key in ["cpu_percent", "memory_percent", "disk_percent"] {
            let value = snapshot.get(key).and_then(Value::as_f64);
            assert!(value.is_some(), "missing {}", key);
            assert!(value.unwrap() >= 0.0, "{} negative", key);
        }
        assert!(snapshot.get("uptime_seconds").and_then(Value::as_u64).is_some());
        assert!(snapshot.get("memory_total_bytes").and_then(Value::as_u64).unwrap() > 0);
    }

    #[tokio::test]
    async fn test_process_listing_sorts_and_limits() {
        let provider = HostProvider::new(Duration::from_secs(10));
        let result = provider
            .act(&json!({"action": "processes", "sort_by": "memory", "limit": 5}))
            .await
            .unwrap();

        let processes = result.get("processes").and_then(Value::as_array).unwrap();
        assert!(processes.len() <= 5);
        let sizes: Vec<u64> = processes
            .iter()
            .filter_map(|p| p.get("memory_bytes").and_then(Value::as_u64))
            .collect();
        assert!(sizes.windows(2).all(|w| w[0] >= w[1]), "not sorted by memory");
    }

    #[tokio::test]
    async fn test_unknown_action_is_invalid_argument() {
        let provider = HostProvider::new(Duration::from_secs(10));
        let err = provider.act(&json!({"action": "reboot"})).await.unwrap_err();
        assert_eq!(err.kind(), "invalid_argument");
    }
}
