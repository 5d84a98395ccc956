//! Docker Engine API provider.
//!
//! Talks to the Engine HTTP API (`/containers/...`). The endpoint is
//! optional configuration; when unset every call reports an upstream error
//! so docker tools degrade without failing startup.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::providers::{with_timeout, Provider};
use crate::types::{Error, Result};

pub struct DockerProvider {
    endpoint: Option<String>,
    timeout: Duration,
    client: reqwest::Client,
}

impl DockerProvider {
    pub fn new(endpoint: Option<String>, timeout: Duration) -> Self {
        Self {
            endpoint: endpoint.map(|e| e.trim_end_matches('/').to_string()),
            timeout,
            client: reqwest::Client::new(),
        }
    }

    fn endpoint(&self) -> Result<&str> {
        self.endpoint
            .as_deref()
            .ok_or_else(|| Error::upstream("docker endpoint not configured"))
    }
}

impl fmt::Debug for DockerProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DockerProvider")
            .field("endpoint", &self.endpoint)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Provider for DockerProvider {
    async fn fetch(&self) -> Result<Value> {
        let url = format!("{}/containers/json?all=true", self.endpoint()?);
        let client = self.client.clone();
        with_timeout(self.timeout, "docker container listing", async move {
            let raw = engine_get(&client, &url).await?;
            Ok(summarize_containers(&raw))
        })
        .await
    }

    async fn act(&self, params: &Value) -> Result<Value> {
        let endpoint = self.endpoint()?.to_string();
        let action = params
            .get("action")
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string();
        let id = params
            .get("id")
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string();
        if id.is_empty() {
            return Err(Error::invalid_argument("id", "container id is required"));
        }
        let force = params.get("force").and_then(Value::as_bool).unwrap_or(false);

        let request = match action.as_str() {
            "start" | "stop" | "restart" | "pause" | "unpause" => self
                .client
                .post(format!("{}/containers/{}/{}", endpoint, id, action)),
            "remove" => self
                .client
                .delete(format!("{}/containers/{}?force={}", endpoint, id, force)),
            other => {
                return Err(Error::invalid_argument(
                    "action",
                    format!("unknown docker action {:?}", other),
                ));
            }
        };

        with_timeout(self.timeout, "docker container action", async move {
            let response = request
                .send()
                .await
                .map_err(|e| Error::upstream(format!("docker api unreachable: {}", e)))?;
            let status = response.status();
            // 304 means the container was already in the requested state.
            if status.is_success() || status.as_u16() == 304 {
                Ok(json!({
                    "id": id,
                    "action": action,
                    "completed": true,
                    "already_in_state": status.as_u16() == 304,
                }))
            } else {
                let detail = response
                    .json::<Value>()
                    .await
                    .ok()
                    .and_then(|body| {
                        body.get("message").and_then(Value::as_str).map(String::from)
                    })
                    .unwrap_or_else(|| format!("status {}", status));
                Err(Error::upstream(format!(
                    "docker {} {} failed: {}",
                    action, id, detail
                )))
            }
        })
        .await
    }
}

async fn engine_get(client: &reqwest::Client, url: &str) -> Result<Value> {
    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| Error::upstream(format!("docker api unreachable: {}", e)))?;
    if !response.status().is_success() {
        return Err(Error::upstream(format!(
            "docker api returned {}",
            response.status()
        )));
    }
    response
        .json()
        .await
        .map_err(|e| Error::upstream(format!("docker api sent invalid json: {}", e)))
}

fn summarize_containers(raw: &Value) -> Value {
    let containers: Vec<Value> = raw
        .as_array()
        .map(|list| list.iter().map(container_summary).collect())
        .unwrap_or_default();
    json!({
        "count": containers.len(),
        "containers": containers,
    })
}

fn container_summary(item: &Value) -> Value {
    let id = item.get("Id").and_then(Value::as_str).unwrap_or("");
    let short_id: String = id.chars().take(12).collect();
    let name = item
        .get("Names")
        .and_then(Value::as_array)
        .and_then(|names| names.first())
        .and_then(Value::as_str)
        .map(|n| n.trim_start_matches('/'))
        .unwrap_or("");
    json!({
        "id": short_id,
        "name": name,
        "image": item.get("Image").and_then(Value::as_str).unwrap_or(""),
        "state": item.get("State").and_then(Value::as_str).unwrap_or(""),
        "status": item.get("Status").and_then(Value::as_str).unwrap_or(""),
    })
}
