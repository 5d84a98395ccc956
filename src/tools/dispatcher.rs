//! Tool registry and invocation path.
//!
//! Every invocation goes through the same gate: name lookup, enabled check,
//! argument validation, default fill, then the handler — routed through the
//! result cache when the tool is cacheable. Per-tool configuration can
//! disable a tool or override its cache TTL without touching code.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::cache::CacheManager;
use crate::tools::params::{fill_defaults, validate_args, value_type_name, ParamDef, ParamType};
use crate::types::{Config, Error, Result, ToolConfig};

/// A tool implementation. Arguments have already been validated against the
/// tool's parameter declarations and defaults are filled in.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn invoke(&self, args: &Map<String, Value>) -> Result<Value>;
}

/// Metadata describing one registered tool.
#[derive(Debug, Clone, Serialize)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub params: Vec<ParamDef>,
    /// Route results through the TTL cache.
    pub cacheable: bool,
    /// Overrides the global cache TTL for this tool.
    #[serde(skip_serializing_if = "Option::is_none", with = "humantime_serde")]
    pub cache_ttl: Option<Duration>,
    pub enabled: bool,
}

impl ToolDescriptor {
    /// One-line rendering: `name(arg: type, opt?: type): description`.
    pub fn signature(&self) -> String {
        let params: Vec<String> = self
            .params
            .iter()
            .map(|def| {
                let marker = if def.is_required() { "" } else { "?" };
                // The marker already says "optional"; render the inner type.
                let type_name = match &def.param_type {
                    ParamType::Optional(inner) => inner.display_name(),
                    other => other.display_name(),
                };
                format!("{}{}: {}", def.name, marker, type_name)
            })
            .collect();
        format!("{}({}): {}", self.name, params.join(", "), self.description)
    }
}

struct RegisteredTool {
    descriptor: ToolDescriptor,
    handler: Arc<dyn ToolHandler>,
}

pub struct ToolDispatcher {
    tools: RwLock<HashMap<String, RegisteredTool>>,
    cache: Arc<CacheManager>,
    default_ttl: Duration,
    overrides: HashMap<String, ToolConfig>,
}

impl ToolDispatcher {
    pub fn new(config: &Config, cache: Arc<CacheManager>) -> Self {
        Self {
            tools: RwLock::new(HashMap::new()),
            cache,
            default_ttl: config.cache.ttl,
            overrides: config.tools.clone(),
        }
    }

    /// Register a tool. Per-tool configuration is applied here: an override
    /// can disable the tool or replace its cache TTL.
    pub fn register(
        &self,
        mut descriptor: ToolDescriptor,
        handler: Arc<dyn ToolHandler>,
    ) -> Result<()> {
        if descriptor.name.is_empty() {
            return Err(Error::config("tool name cannot be empty"));
        }
        if let Some(overrides) = self.overrides.get(&descriptor.name) {
            descriptor.enabled = overrides.enabled;
            if overrides.cache_ttl.is_some() {
                descriptor.cache_ttl = overrides.cache_ttl;
            }
        }

        let mut tools = write_tools(&self.tools);
        if tools.contains_key(&descriptor.name) {
            return Err(Error::config(format!(
                "duplicate tool '{}'",
                descriptor.name
            )));
        }
        if !descriptor.enabled {
            debug!(tool = %descriptor.name, "tool_disabled_by_config");
        }
        tools.insert(
            descriptor.name.clone(),
            RegisteredTool {
                descriptor,
                handler,
            },
        );
        Ok(())
    }

    /// Dispatch one invocation. `args` must be a JSON object or null.
    pub async fn invoke(&self, name: &str, args: Value) -> Result<Value> {
        let (descriptor, handler) = self.lookup(name)?;
        if !descriptor.enabled {
            return Err(Error::tool_disabled(name));
        }

        let mut args_map = match args {
            Value::Null => Map::new(),
            Value::Object(map) => map,
            other => {
                return Err(Error::invalid_argument(
                    "args",
                    format!("expected object, got {}", value_type_name(&other)),
                ))
            }
        };
        validate_args(&descriptor.params, &args_map)?;
        fill_defaults(&descriptor.params, &mut args_map);

        let invocation = Uuid::new_v4();
        let started = Instant::now();
        debug!(tool = %name, invocation = %invocation, "tool_invoke_started");

        let result = if descriptor.cacheable {
            let ttl = descriptor.cache_ttl.unwrap_or(self.default_ttl);
            let key = cache_key(name, &args_map);
            self.cache
                .get_or_compute(&key, ttl, move || async move {
                    handler.invoke(&args_map).await
                })
                .await
        } else {
            handler.invoke(&args_map).await
        };

        match &result {
            Ok(_) => info!(
                tool = %name,
                invocation = %invocation,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "tool_invoke_completed"
            ),
            Err(err) => warn!(
                tool = %name,
                invocation = %invocation,
                error = %err,
                "tool_invoke_failed"
            ),
        }
        result
    }

    /// All registered tools, ordered by name. Disabled tools are listed
    /// with `enabled: false`.
    pub fn list(&self) -> Vec<ToolDescriptor> {
        let tools = read_tools(&self.tools);
        let mut list: Vec<ToolDescriptor> =
            tools.values().map(|tool| tool.descriptor.clone()).collect();
        list.sort_by(|a, b| a.name.cmp(&b.name));
        list
    }

    pub fn len(&self) -> usize {
        read_tools(&self.tools).len()
    }

    pub fn is_empty(&self) -> bool {
        read_tools(&self.tools).is_empty()
    }

    fn lookup(&self, name: &str) -> Result<(ToolDescriptor, Arc<dyn ToolHandler>)> {
        let tools = read_tools(&self.tools);
        let tool = tools
            .get(name)
            .ok_or_else(|| Error::tool_not_found(name))?;
        Ok((tool.descriptor.clone(), tool.handler.clone()))
    }
}

impl fmt::Debug for ToolDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolDispatcher")
            .field("tools", &self.len())
            .field("default_ttl", &self.default_ttl)
            .finish_non_exhaustive()
    }
}

/// Cache key for one invocation: tool name plus the arguments serialized
/// with top-level keys sorted, so argument order never splits the cache.
fn cache_key(name: &str, args: &Map<String, Value>) -> String {
    let ordered: std::collections::BTreeMap<&String, &Value> = args.iter().collect();
    format!(
        "{name}:{}",
        serde_json::to_string(&ordered).unwrap_or_default()
    )
}

fn read_tools(
    tools: &RwLock<HashMap<String, RegisteredTool>>,
) -> RwLockReadGuard<'_, HashMap<String, RegisteredTool>> {
    tools.read().unwrap_or_else(PoisonError::into_inner)
}

fn write_tools(
    tools: &RwLock<HashMap<String, RegisteredTool>>,
) -> RwLockWriteGuard<'_, HashMap<String, RegisteredTool>> {
    tools.write().unwrap_or_else(PoisonError::into_inner)
}
