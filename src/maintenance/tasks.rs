//! Built-in maintenance tasks.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use futures::FutureExt;
use serde_json::{json, Value};
use tracing::{debug, warn};

use super::scheduler::MaintenanceScheduler;
use crate::cache::CacheManager;
use crate::types::{MaintenanceConfig, Result};

/// Wire the standard tasks onto a scheduler. Both run on the configured
/// cleanup interval.
pub fn register_builtin_tasks(
    scheduler: &MaintenanceScheduler,
    config: &MaintenanceConfig,
    cache: Arc<CacheManager>,
) -> Result<()> {
    let paths = config.cleanup_paths.clone();
    let max_age = Duration::from_secs(config.max_log_age_days.saturating_mul(86_400));
    scheduler.register("log_prune", config.cleanup_interval, move || {
        prune_logs(paths.clone(), max_age).boxed()
    })?;

    let max_bytes = config.max_cache_size_mb.saturating_mul(1024 * 1024);
    scheduler.register("cache_trim", config.cleanup_interval, move || {
        trim_cache(cache.clone(), max_bytes).boxed()
    })?;
    Ok(())
}

/// Delete log files older than `max_age` from the given directories.
///
/// A file qualifies when its name contains `.log`, which covers both live
/// files and rotated suffixes like `.log.1` and `.log.2.gz`. Directories
/// that do not exist yet are skipped silently; other filesystem failures
/// are counted and the sweep moves on.
pub async fn prune_logs(paths: Vec<PathBuf>, max_age: Duration) -> Result<Value> {
    let mut files_removed = 0u64;
    let mut bytes_freed = 0u64;
    let mut errors = 0u64;
    let now = SystemTime::now();

    for dir in &paths {
        let mut entries = match tokio::fs::read_dir(dir).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %dir.display(), "cleanup_path_missing");
                continue;
            }
            Err(err) => {
                warn!(path = %dir.display(), error = %err, "cleanup_path_unreadable");
                errors += 1;
                continue;
            }
        };
        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(err) => {
                    warn!(path = %dir.display(), error = %err, "cleanup_path_unreadable");
                    errors += 1;
                    break;
                }
            };
            if !entry.file_name().to_string_lossy().contains(".log") {
                continue;
            }
            let metadata = match entry.metadata().await {
                Ok(metadata) => metadata,
                Err(_) => {
                    errors += 1;
                    continue;
                }
            };
            if !metadata.is_file() {
                continue;
            }
            let Ok(modified) = metadata.modified() else {
                errors += 1;
                continue;
            };
            if now.duration_since(modified).unwrap_or_default() <= max_age {
                continue;
            }
            match tokio::fs::remove_file(entry.path()).await {
                Ok(()) => {
                    debug!(path = %entry.path().display(), "pruned_log_file");
                    files_removed += 1;
                    bytes_freed += metadata.len();
                }
                Err(err) => {
                    warn!(path = %entry.path().display(), error = %err, "log_prune_failed");
                    errors += 1;
                }
            }
        }
    }

    Ok(json!({
        "files_removed": files_removed,
        "bytes_freed": bytes_freed,
        "errors": errors,
    }))
}

/// Drop expired cache entries, then evict by recency down to `max_bytes`.
pub async fn trim_cache(cache: Arc<CacheManager>, max_bytes: u64) -> Result<Value> {
    let expired_removed = cache.purge_expired();
    let evicted = cache.shrink_to(max_bytes);
    debug!(expired_removed, evicted, "cache_trimmed");
    Ok(json!({
        "expired_removed": expired_removed,
        "evicted": evicted,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    use crate::types::CacheConfig;

    fn write_aged(path: &Path, contents: &str, age: Duration) {
        std::fs::write(path, contents).unwrap();
        let file = std::fs::File::options().write(true).open(path).unwrap();
        file.set_modified(SystemTime::now() - age).unwrap();
    }

    #[tokio::test]
    async fn test_prune_removes_only_old_log_files() {
        let dir = tempfile::tempdir().unwrap();
        let old = Duration::from_secs(40 * 86_400);
        write_aged(&dir.path().join("sys.log"), &"x".repeat(100), old);
        write_aged(&dir.path().join("sys.log.1"), &"y".repeat(50), old);
        write_aged(&dir.path().join("notes.txt"), "keep", old);
        std::fs::write(dir.path().join("fresh.log"), "keep").unwrap();

        let report = prune_logs(
            vec![
                dir.path().to_path_buf(),
                dir.path().join("not-created-yet"),
            ],
            Duration::from_secs(30 * 86_400),
        )
        .await
        .unwrap();

        assert_eq!(report["files_removed"], 2);
        assert_eq!(report["bytes_freed"], 150);
        assert_eq!(report["errors"], 0);
        assert!(!dir.path().join("sys.log").exists());
        assert!(!dir.path().join("sys.log.1").exists());
        assert!(dir.path().join("notes.txt").exists());
        assert!(dir.path().join("fresh.log").exists());
    }

    #[tokio::test]
    async fn test_trim_cache_purges_expired_then_shrinks() {
        let cache = Arc::new(CacheManager::new(CacheConfig::default()));
        for key in ["a", "b"] {
            cache
                .get_or_compute(key, Duration::from_millis(10), || async {
                    Ok(json!("short-lived"))
                })
                .await
                .unwrap();
        }
        cache
            .get_or_compute("keeper", Duration::from_secs(60), || async {
                Ok(json!("long-lived"))
            })
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;

        let report = trim_cache(cache.clone(), 0).await.unwrap();
        assert_eq!(report["expired_removed"], 2);
        assert_eq!(report["evicted"], 1);
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_builtin_tasks_register_and_run() {
        let config = MaintenanceConfig::default();
        let scheduler = MaintenanceScheduler::new(&config);
        let cache = Arc::new(CacheManager::new(CacheConfig::default()));
        register_builtin_tasks(&scheduler, &config, cache).unwrap();

        let names: Vec<String> = scheduler
            .status()
            .into_iter()
            .map(|status| status.name)
            .collect();
        assert_eq!(names, vec!["cache_trim", "log_prune"]);

        let report = scheduler.run_now("cache_trim").await.unwrap();
        assert_eq!(report["expired_removed"], 0);
    }
}
