//! The built-in tool set.
//!
//! Thin handlers that translate validated tool arguments into calls on the
//! providers, health monitor, log analyzer, and maintenance scheduler. All
//! shaping of upstream data lives in the providers; handlers only pick
//! arguments and wrap results.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use crate::health::HealthMonitor;
use crate::logs::LogAnalyzer;
use crate::maintenance::MaintenanceScheduler;
use crate::providers::{Provider, ProviderSet};
use crate::tools::dispatcher::{ToolDescriptor, ToolDispatcher, ToolHandler};
use crate::tools::params::{ParamDef, ParamType};
use crate::types::Result;

/// Register the standard tools. The scheduler must already have its tasks
/// registered: `maintenance_run` validates the task name against them.
pub fn register_builtin_tools(
    dispatcher: &ToolDispatcher,
    providers: &ProviderSet,
    monitor: Arc<HealthMonitor>,
    analyzer: Arc<LogAnalyzer>,
    scheduler: Arc<MaintenanceScheduler>,
) -> Result<()> {
    dispatcher.register(
        descriptor(
            "system_overview",
            "Host CPU, memory, disk, temperature, and OS snapshot",
            Vec::new(),
            true,
        ),
        Arc::new(HostTool {
            provider: providers.host.clone(),
            kind: HostToolKind::Overview,
        }),
    )?;

    dispatcher.register(
        descriptor(
            "system_health",
            "Current health state per metric with hysteresis applied",
            Vec::new(),
            false,
        ),
        Arc::new(HealthTool {
            monitor: monitor.clone(),
        }),
    )?;

    dispatcher.register(
        descriptor(
            "system_processes",
            "Top processes by CPU, memory, or name",
            vec![
                ParamDef::with_default(
                    "sort_by",
                    ParamType::Enum(vec![
                        "cpu".to_string(),
                        "memory".to_string(),
                        "name".to_string(),
                    ]),
                    "Sort order",
                    json!("cpu"),
                ),
                ParamDef::with_default("limit", ParamType::Int, "Maximum processes", json!(20)),
            ],
            false,
        ),
        Arc::new(HostTool {
            provider: providers.host.clone(),
            kind: HostToolKind::Processes,
        }),
    )?;

    dispatcher.register(
        descriptor(
            "docker_containers",
            "List Docker containers with state and status",
            Vec::new(),
            true,
        ),
        Arc::new(DockerTool {
            provider: providers.docker.clone(),
            kind: DockerToolKind::Containers,
        }),
    )?;

    dispatcher.register(
        descriptor(
            "docker_container_action",
            "Start, stop, restart, pause, unpause, or remove a container",
            vec![
                ParamDef::required("id", ParamType::String, "Container id or name"),
                ParamDef::required(
                    "action",
                    ParamType::Enum(vec![
                        "start".to_string(),
                        "stop".to_string(),
                        "restart".to_string(),
                        "pause".to_string(),
                        "unpause".to_string(),
                        "remove".to_string(),
                    ]),
                    "Action to perform",
                ),
            ],
            false,
        ),
        Arc::new(DockerTool {
            provider: providers.docker.clone(),
            kind: DockerToolKind::Action,
        }),
    )?;

    dispatcher.register(
        descriptor(
            "plex_status",
            "Plex server identity and active session count",
            Vec::new(),
            true,
        ),
        Arc::new(PlexTool {
            provider: providers.plex.clone(),
            kind: PlexToolKind::Status,
        }),
    )?;

    dispatcher.register(
        descriptor(
            "plex_sessions",
            "Active Plex playback sessions",
            Vec::new(),
            false,
        ),
        Arc::new(PlexTool {
            provider: providers.plex.clone(),
            kind: PlexToolKind::Sessions,
        }),
    )?;

    dispatcher.register(
        descriptor(
            "logs_recent",
            "Most recent classified log events",
            vec![
                ParamDef::optional("source", ParamType::String, "Restrict to one watched file"),
                ParamDef::with_default("limit", ParamType::Int, "Maximum events", json!(100)),
            ],
            false,
        ),
        Arc::new(LogsTool {
            analyzer: analyzer.clone(),
            kind: LogsToolKind::Recent,
        }),
    )?;

    dispatcher.register(
        descriptor(
            "logs_summary",
            "Aggregated error counts over a recency window",
            vec![ParamDef::with_default(
                "window_seconds",
                ParamType::Int,
                "Recency window in seconds",
                json!(3600),
            )],
            false,
        ),
        Arc::new(LogsTool {
            analyzer: analyzer.clone(),
            kind: LogsToolKind::Summary,
        }),
    )?;

    dispatcher.register(
        descriptor(
            "logs_search",
            "Regex search across retained log events",
            vec![
                ParamDef::required("query", ParamType::String, "Regular expression"),
                ParamDef::with_default(
                    "case_sensitive",
                    ParamType::Bool,
                    "Match case exactly",
                    json!(false),
                ),
                ParamDef::with_default(
                    "max_results",
                    ParamType::Int,
                    "Maximum matches",
                    json!(100),
                ),
            ],
            false,
        ),
        Arc::new(LogsTool {
            analyzer,
            kind: LogsToolKind::Search,
        }),
    )?;

    dispatcher.register(
        descriptor(
            "maintenance_status",
            "Registered maintenance tasks and their last results",
            Vec::new(),
            false,
        ),
        Arc::new(MaintenanceTool {
            scheduler: scheduler.clone(),
            kind: MaintenanceToolKind::Status,
        }),
    )?;

    let task_names: Vec<String> = scheduler
        .status()
        .into_iter()
        .map(|status| status.name)
        .collect();
    dispatcher.register(
        descriptor(
            "maintenance_run",
            "Run a maintenance task immediately",
            vec![ParamDef::required(
                "task",
                ParamType::Enum(task_names),
                "Task to run",
            )],
            false,
        ),
        Arc::new(MaintenanceTool {
            scheduler,
            kind: MaintenanceToolKind::Run,
        }),
    )?;

    Ok(())
}

fn descriptor(
    name: &str,
    description: &str,
    params: Vec<ParamDef>,
    cacheable: bool,
) -> ToolDescriptor {
    ToolDescriptor {
        name: name.to_string(),
        description: description.to_string(),
        params,
        cacheable,
        cache_ttl: None,
        enabled: true,
    }
}

enum HostToolKind {
    Overview,
    Processes,
}

struct HostTool {
    provider: Arc<dyn Provider>,
    kind: HostToolKind,
}

#[async_trait]
impl ToolHandler for HostTool {
    async fn invoke(&self, args: &Map<String, Value>) -> Result<Value> {
        match self.kind {
            HostToolKind::Overview => self.provider.fetch().await,
            HostToolKind::Processes => {
                self.provider.act(&action_params("processes", args)).await
            }
        }
    }
}

enum DockerToolKind {
    Containers,
    Action,
}

struct DockerTool {
    provider: Arc<dyn Provider>,
    kind: DockerToolKind,
}

#[async_trait]
impl ToolHandler for DockerTool {
    async fn invoke(&self, args: &Map<String, Value>) -> Result<Value> {
        match self.kind {
            DockerToolKind::Containers => self.provider.fetch().await,
            // The `action` argument already names the container action.
            DockerToolKind::Action => self.provider.act(&Value::Object(args.clone())).await,
        }
    }
}

enum PlexToolKind {
    Status,
    Sessions,
}

struct PlexTool {
    provider: Arc<dyn Provider>,
    kind: PlexToolKind,
}

#[async_trait]
impl ToolHandler for PlexTool {
    async fn invoke(&self, _args: &Map<String, Value>) -> Result<Value> {
        match self.kind {
            PlexToolKind::Status => self.provider.fetch().await,
            PlexToolKind::Sessions => self.provider.act(&json!({"action": "sessions"})).await,
        }
    }
}

struct HealthTool {
    monitor: Arc<HealthMonitor>,
}

#[async_trait]
impl ToolHandler for HealthTool {
    async fn invoke(&self, _args: &Map<String, Value>) -> Result<Value> {
        Ok(json!({
            "status": self.monitor.overall(),
            "metrics": self.monitor.snapshot(),
        }))
    }
}

enum LogsToolKind {
    Recent,
    Summary,
    Search,
}

struct LogsTool {
    analyzer: Arc<LogAnalyzer>,
    kind: LogsToolKind,
}

#[async_trait]
impl ToolHandler for LogsTool {
    async fn invoke(&self, args: &Map<String, Value>) -> Result<Value> {
        match self.kind {
            LogsToolKind::Recent => {
                let source = args.get("source").and_then(Value::as_str);
                let limit = args.get("limit").and_then(Value::as_u64).unwrap_or(100) as usize;
                let events = self.analyzer.snapshot(source, limit);
                Ok(json!({"count": events.len(), "events": events}))
            }
            LogsToolKind::Summary => {
                let window = args
                    .get("window_seconds")
                    .and_then(Value::as_u64)
                    .unwrap_or(3600);
                let summary = self.analyzer.error_summary(Duration::from_secs(window));
                Ok(serde_json::to_value(summary)?)
            }
            LogsToolKind::Search => {
                let query = args.get("query").and_then(Value::as_str).unwrap_or_default();
                let case_sensitive = args
                    .get("case_sensitive")
                    .and_then(Value::as_bool)
                    .unwrap_or(false);
                let max_results = args
                    .get("max_results")
                    .and_then(Value::as_u64)
                    .unwrap_or(100) as usize;
                let matches = self.analyzer.search(query, case_sensitive, max_results)?;
                Ok(json!({"count": matches.len(), "matches": matches}))
            }
        }
    }
}

enum MaintenanceToolKind {
    Status,
    Run,
}

struct MaintenanceTool {
    scheduler: Arc<MaintenanceScheduler>,
    kind: MaintenanceToolKind,
}

#[async_trait]
impl ToolHandler for MaintenanceTool {
    async fn invoke(&self, args: &Map<String, Value>) -> Result<Value> {
        match self.kind {
            MaintenanceToolKind::Status => Ok(json!({"tasks": self.scheduler.status()})),
            MaintenanceToolKind::Run => {
                let task = args.get("task").and_then(Value::as_str).unwrap_or_default();
                let report = self.scheduler.run_now(task).await?;
                Ok(json!({"task": task, "report": report}))
            }
        }
    }
}

fn action_params(action: &str, args: &Map<String, Value>) -> Value {
    let mut params = Map::new();
    params.insert("action".to_string(), json!(action));
    for (key, value) in args {
        params.insert(key.clone(), value.clone());
    }
    Value::Object(params)
}
