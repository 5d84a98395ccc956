//! Configuration structures.
//!
//! Configuration is loaded in three layers: built-in defaults, an optional
//! JSON config file, then `STEWARD_*` environment variables. Later layers
//! win. The resulting snapshot is immutable for the life of the process.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::types::{Error, Result};

/// Global daemon configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Server configuration.
    #[serde(default)]
    pub server: ServerConfig,

    /// Observability configuration.
    #[serde(default)]
    pub observability: ObservabilityConfig,

    /// Result cache configuration.
    #[serde(default)]
    pub cache: CacheConfig,

    /// Health monitoring configuration.
    #[serde(default)]
    pub health: HealthConfig,

    /// Log analysis configuration.
    #[serde(default)]
    pub log_analysis: LogAnalysisConfig,

    /// Maintenance scheduler configuration.
    #[serde(default)]
    pub maintenance: MaintenanceConfig,

    /// External provider configuration.
    #[serde(default)]
    pub providers: ProvidersConfig,

    /// Per-tool overrides, keyed by tool name.
    #[serde(default)]
    pub tools: HashMap<String, ToolConfig>,
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Management API bind address (TCP).
    pub listen_addr: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8080".to_string(),
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Tracing log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable JSON log formatting.
    pub json_logs: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logs: false,
        }
    }
}

/// Result cache configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Disable to bypass caching entirely (every call computes).
    pub enabled: bool,

    /// Default time-to-live for cached tool results.
    #[serde(with = "humantime_serde")]
    pub ttl: Duration,

    /// Capacity budget in bytes of estimated serialized size.
    pub max_size: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl: Duration::from_secs(300),
            max_size: 8 * 1024 * 1024,
        }
    }
}

/// Health monitoring configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthConfig {
    /// Interval between host metric polls.
    #[serde(with = "humantime_serde")]
    pub check_interval: Duration,

    /// Consecutive in-band samples required before a recovery transition
    /// is accepted (hysteresis; worsening is always immediate).
    pub recovery_samples: u32,

    /// Warning/critical thresholds per metric class.
    #[serde(default)]
    pub thresholds: HealthThresholds,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_secs(60),
            recovery_samples: 2,
            thresholds: HealthThresholds::default(),
        }
    }
}

/// Warning/critical thresholds for the built-in metric classes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthThresholds {
    /// CPU utilization, percent.
    pub cpu: ThresholdPair,

    /// Memory utilization, percent.
    pub memory: ThresholdPair,

    /// Worst-disk utilization, percent.
    pub disk: ThresholdPair,

    /// Hottest component temperature, degrees Celsius.
    pub temperature: ThresholdPair,
}

impl Default for HealthThresholds {
    fn default() -> Self {
        Self {
            cpu: ThresholdPair::new(80.0, 95.0),
            memory: ThresholdPair::new(85.0, 95.0),
            disk: ThresholdPair::new(90.0, 98.0),
            temperature: ThresholdPair::new(70.0, 85.0),
        }
    }
}

/// A warning/critical threshold pair. `warning` must be below `critical`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ThresholdPair {
    pub warning: f64,
    pub critical: f64,
}

impl ThresholdPair {
    pub fn new(warning: f64, critical: f64) -> Self {
        Self { warning, critical }
    }
}

/// Log analysis configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogAnalysisConfig {
    /// Files to tail for error patterns.
    pub watch_paths: Vec<PathBuf>,

    /// Ordered case-insensitive substring patterns; first match wins and
    /// becomes the event severity. Lines matching none are dropped.
    pub error_patterns: Vec<String>,

    /// Retained events per source (FIFO eviction).
    pub max_lines: usize,

    /// Interval between tail polls.
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,

    /// Identical messages within this window of their last occurrence are
    /// coalesced into one event with a repeat count.
    #[serde(with = "humantime_serde")]
    pub dedup_window: Duration,
}

impl Default for LogAnalysisConfig {
    fn default() -> Self {
        Self {
            watch_paths: vec![
                PathBuf::from("/var/log/syslog"),
                PathBuf::from("/var/log/messages"),
            ],
            error_patterns: vec![
                "error".to_string(),
                "failed".to_string(),
                "critical".to_string(),
                "emergency".to_string(),
                "alert".to_string(),
            ],
            max_lines: 1000,
            poll_interval: Duration::from_secs(1),
            dedup_window: Duration::from_secs(300),
        }
    }
}

/// Maintenance scheduler configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MaintenanceConfig {
    /// Interval between runs of the built-in cleanup tasks.
    #[serde(with = "humantime_serde")]
    pub cleanup_interval: Duration,

    /// Rotated/old log files beyond this age are pruned.
    pub max_log_age_days: u64,

    /// Budget the cache_trim task shrinks the result cache to.
    pub max_cache_size_mb: u64,

    /// Directories the log_prune task sweeps. Empty disables pruning.
    pub cleanup_paths: Vec<PathBuf>,

    /// Scheduler due-ness poll interval.
    #[serde(with = "humantime_serde")]
    pub tick_interval: Duration,

    /// How long shutdown waits for in-flight tasks before detaching them.
    #[serde(with = "humantime_serde")]
    pub shutdown_grace: Duration,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            cleanup_interval: Duration::from_secs(3600),
            max_log_age_days: 30,
            max_cache_size_mb: 64,
            cleanup_paths: Vec::new(),
            tick_interval: Duration::from_secs(1),
            shutdown_grace: Duration::from_secs(10),
        }
    }
}

/// External provider configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvidersConfig {
    /// Per-call timeout for every provider fetch/act.
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,

    /// Docker Engine API settings.
    #[serde(default)]
    pub docker: DockerConfig,

    /// Plex Media Server settings.
    #[serde(default)]
    pub plex: PlexConfig,
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            docker: DockerConfig::default(),
            plex: PlexConfig::default(),
        }
    }
}

/// Docker Engine API settings.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DockerConfig {
    /// Engine API base URL (e.g. "http://localhost:2375"). Unset means
    /// docker tools report an upstream error instead of failing startup.
    pub endpoint: Option<String>,
}

/// Plex Media Server settings.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PlexConfig {
    /// Server base URL (e.g. "http://localhost:32400").
    pub url: Option<String>,

    /// X-Plex-Token value.
    pub token: Option<String>,
}

/// Per-tool overrides.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolConfig {
    /// Disabled tools stay listed but reject invocation.
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Overrides the global `cache.ttl` for this tool.
    #[serde(default, with = "humantime_serde")]
    pub cache_ttl: Option<Duration>,
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            cache_ttl: None,
        }
    }
}

fn default_enabled() -> bool {
    true
}

// ============================================================================
// Loading
// ============================================================================

impl Config {
    /// Load configuration: defaults, then the optional JSON file, then
    /// `STEWARD_*` environment overrides, then validation.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(p) => {
                let raw = std::fs::read_to_string(p).map_err(|e| {
                    Error::config(format!("cannot read config file {}: {}", p.display(), e))
                })?;
                serde_json::from_str(&raw).map_err(|e| {
                    Error::config(format!("cannot parse config file {}: {}", p.display(), e))
                })?
            }
            None => Self::default(),
        };
        config.apply_env_overrides_from(std::env::vars())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `STEWARD_*` overrides from an arbitrary key/value iterator.
    /// Split out from [`Config::load`] so tests never mutate process
    /// environment.
    pub fn apply_env_overrides_from<I>(&mut self, vars: I) -> Result<()>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (key, value) in vars {
            match key.as_str() {
                "STEWARD_LISTEN_ADDR" => self.server.listen_addr = value,
                "STEWARD_LOG_LEVEL" => self.observability.log_level = value,
                "STEWARD_CACHE_ENABLED" => {
                    self.cache.enabled = parse_env_bool(&key, &value)?;
                }
                "STEWARD_CACHE_TTL" => {
                    self.cache.ttl = Duration::from_secs(parse_env_u64(&key, &value)?);
                }
                "STEWARD_CACHE_MAX_SIZE" => {
                    self.cache.max_size = parse_env_u64(&key, &value)?;
                }
                "STEWARD_HEALTH_CHECK_INTERVAL" => {
                    self.health.check_interval =
                        Duration::from_secs(parse_env_u64(&key, &value)?);
                }
                "STEWARD_CLEANUP_INTERVAL" => {
                    self.maintenance.cleanup_interval =
                        Duration::from_secs(parse_env_u64(&key, &value)?);
                }
                "STEWARD_MAX_LOG_AGE_DAYS" => {
                    self.maintenance.max_log_age_days = parse_env_u64(&key, &value)?;
                }
                "STEWARD_WATCH_PATHS" => {
                    self.log_analysis.watch_paths = value
                        .split(',')
                        .map(str::trim)
                        .filter(|s| !s.is_empty())
                        .map(PathBuf::from)
                        .collect();
                }
                "STEWARD_DOCKER_ENDPOINT" => {
                    self.providers.docker.endpoint = Some(value);
                }
                "STEWARD_PLEX_URL" => self.providers.plex.url = Some(value),
                "STEWARD_PLEX_TOKEN" => self.providers.plex.token = Some(value),
                "STEWARD_DISABLED_TOOLS" => {
                    for name in value.split(',').map(str::trim).filter(|s| !s.is_empty()) {
                        self.tools.entry(name.to_string()).or_default().enabled = false;
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Reject configurations that cannot run.
    pub fn validate(&self) -> Result<()> {
        if self.server.listen_addr.parse::<std::net::SocketAddr>().is_err() {
            return Err(Error::config(format!(
                "invalid listen_addr: {}",
                self.server.listen_addr
            )));
        }
        if self.log_analysis.max_lines == 0 {
            return Err(Error::config("log_analysis.max_lines must be positive"));
        }
        if self.health.recovery_samples == 0 {
            return Err(Error::config("health.recovery_samples must be at least 1"));
        }
        for (name, interval) in [
            ("health.check_interval", self.health.check_interval),
            ("log_analysis.poll_interval", self.log_analysis.poll_interval),
            ("maintenance.cleanup_interval", self.maintenance.cleanup_interval),
            ("maintenance.tick_interval", self.maintenance.tick_interval),
        ] {
            if interval.is_zero() {
                return Err(Error::config(format!("{} must be non-zero", name)));
            }
        }
        let pairs = [
            ("cpu", self.health.thresholds.cpu),
            ("memory", self.health.thresholds.memory),
            ("disk", self.health.thresholds.disk),
            ("temperature", self.health.thresholds.temperature),
        ];
        for (name, pair) in pairs {
            if pair.warning >= pair.critical {
                return Err(Error::config(format!(
                    "threshold {}: warning {} must be below critical {}",
                    name, pair.warning, pair.critical
                )));
            }
        }
        Ok(())
    }

    /// Effective settings for a tool, falling back to defaults when the
    /// config file carries no entry.
    pub fn tool(&self, name: &str) -> ToolConfig {
        self.tools.get(name).cloned().unwrap_or_default()
    }
}

fn parse_env_bool(key: &str, value: &str) -> Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "1" => Ok(true),
        "false" | "0" => Ok(false),
        _ => Err(Error::config(format!("{} must be a boolean, got {:?}", key, value))),
    }
}

fn parse_env_u64(key: &str, value: &str) -> Result<u64> {
    value
        .parse::<u64>()
        .map_err(|_| Error::config(format!("{} must be an integer, got {:?}", key, value)))
}
