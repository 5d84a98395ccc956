//! Plex Media Server provider.
//!
//! Uses the Plex HTTP API with `X-Plex-Token` auth and JSON responses.
//! URL and token are optional configuration; unset means plex tools report
//! an upstream error.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::providers::{with_timeout, Provider};
use crate::types::{Error, Result};

pub struct PlexProvider {
    url: Option<String>,
    token: Option<String>,
    timeout: Duration,
    client: reqwest::Client,
}

impl PlexProvider {
    pub fn new(url: Option<String>, token: Option<String>, timeout: Duration) -> Self {
        Self {
            url: url.map(|u| u.trim_end_matches('/').to_string()),
            token,
            timeout,
            client: reqwest::Client::new(),
        }
    }

    fn credentials(&self) -> Result<(&str, &str)> {
        let url = self
            .url
            .as_deref()
            .ok_or_else(|| Error::upstream("plex url not configured"))?;
        let token = self
            .token
            .as_deref()
            .ok_or_else(|| Error::upstream("plex token not configured"))?;
        Ok((url, token))
    }
}

impl fmt::Debug for PlexProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlexProvider")
            .field("url", &self.url)
            .field("has_token", &self.token.is_some())
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Provider for PlexProvider {
    async fn fetch(&self) -> Result<Value> {
        let (url, token) = self.credentials()?;
        let identity_url = format!("{}/", url);
        let sessions_url = format!("{}/status/sessions", url);
        let client = self.client.clone();
        let token = token.to_string();

        with_timeout(self.timeout, "plex status", async move {
            let identity = plex_get(&client, &identity_url, &token).await?;
            let sessions = plex_get(&client, &sessions_url, &token).await?;

            let server = identity.pointer("/MediaContainer").cloned().unwrap_or(Value::Null);
            let active = sessions
                .pointer("/MediaContainer/size")
                .and_then(Value::as_u64)
                .unwrap_or(0);
            Ok(json!({
                "name": server.get("friendlyName").and_then(Value::as_str).unwrap_or(""),
                "version": server.get("version").and_then(Value::as_str).unwrap_or(""),
                "platform": server.get("platform").and_then(Value::as_str).unwrap_or(""),
                "active_sessions": active,
            }))
        })
        .await
    }

    async fn act(&self, params: &Value) -> Result<Value> {
        let action = params.get("action").and_then(Value::as_str).unwrap_or("");
        if action != "sessions" {
            return Err(Error::invalid_argument(
                "action",
                format!("unknown plex action {:?}", action),
            ));
        }

        let (url, token) = self.credentials()?;
        let sessions_url = format!("{}/status/sessions", url);
        let client = self.client.clone();
        let token = token.to_string();

        with_timeout(self.timeout, "plex sessions", async move {
            let raw = plex_get(&client, &sessions_url, &token).await?;
            let sessions: Vec<Value> = raw
                .pointer("/MediaContainer/Metadata")
                .and_then(Value::as_array)
                .map(|list| list.iter().map(session_summary).collect())
                .unwrap_or_default();
            Ok(json!({
                "count": sessions.len(),
                "sessions": sessions,
            }))
        })
        .await
    }
}

async fn plex_get(client: &reqwest::Client, url: &str, token: &str) -> Result<Value> {
    let response = client
        .get(url)
        .header("Accept", "application/json")
        .header("X-Plex-Token", token)
        .send()
        .await
        .map_err(|e| Error::upstream(format!("plex api unreachable: {}", e)))?;
    if !response.status().is_success() {
        return Err(Error::upstream(format!(
            "plex api returned {}",
            response.status()
        )));
    }
    response
        .json()
        .await
        .map_err(|e| Error::upstream(format!("plex api sent invalid json: {}", e)))
}

fn session_summary(session: &Value) -> Value {
    let media_type = session.get("type").and_then(Value::as_str).unwrap_or("");
    let title = session.get("title").and_then(Value::as_str).unwrap_or("");
    // Episodes read better as "Show - Episode".
    let display_title = match session.get("grandparentTitle").and_then(Value::as_str) {
        Some(show) if media_type == "episode" => format!("{} - {}", show, title),
        _ => title.to_string(),
    };
    let progress_percent = match (
        session.get("viewOffset").and_then(Value::as_f64),
        session.get("duration").and_then(Value::as_f64),
    ) {
        (Some(offset), Some(duration)) if duration > 0.0 => {
            Some(offset / duration * 100.0)
        }
        _ => None,
    };
    json!({
        "user": session.pointer("/User/title").and_then(Value::as_str).unwrap_or(""),
        "title": display_title,
        "media_type": media_type,
        "state": session.pointer("/Player/state").and_then(Value::as_str).unwrap_or(""),
        "player": session.pointer("/Player/product").and_then(Value::as_str).unwrap_or(""),
        "progress_percent": progress_percent,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{HeaderMap, StatusCode};
    use axum::response::IntoResponse;
    use axum::routing::get;
    use axum::{Json, Router};

    fn authorized(headers: &HeaderMap) -> bool {
        headers
            .get("X-Plex-Token")
            .and_then(|v| v.to_str().ok())
            .map(|t| t == "sekrit")
            .unwrap_or(false)
    }

    async fn start_plex_stub() -> String {
        let app = Router::new()
            .route(
                "/",
                get(|headers: HeaderMap| async move {
                    if !authorized(&headers) {
                        return StatusCode::UNAUTHORIZED.into_response();
                    }
                    Json(json!({"MediaContainer": {
                        "friendlyName": "den",
                        "version": "1.40.0.7998",
                        "platform": "Linux"
                    }}))
                    .into_response()
                }),
            )
            .route(
                "/status/sessions",
                get(|headers: HeaderMap| async move {
                    if !authorized(&headers) {
                        return StatusCode::UNAUTHORIZED.into_response();
                    }
                    Json(json!({"MediaContainer": {
                        "size": 1,
                        "Metadata": [{
                            "type": "episode",
                            "title": "Ozymandias",
                            "grandparentTitle": "Breaking Bad",
                            "viewOffset": 1200000,
                            "duration": 2800000,
                            "User": {"title": "nils"},
                            "Player": {"state": "playing", "product": "Plex Web"}
                        }]
                    }}))
                    .into_response()
                }),
            );

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    #[tokio::test]
    async fn test_unconfigured_url_is_upstream_error() {
        let provider = PlexProvider::new(None, None, Duration::from_secs(5));
        let err = provider.fetch().await.unwrap_err();
        assert_eq!(err.kind(), "upstream_error");
        assert!(err.to_string().contains("plex url"));
    }

    #[tokio::test]
    async fn test_fetch_reports_server_and_session_count() {
        let url = start_plex_stub().await;
        let provider =
            PlexProvider::new(Some(url), Some("sekrit".to_string()), Duration::from_secs(5));

        let status = provider.fetch().await.unwrap();
        assert_eq!(status["name"], "den");
        assert_eq!(status["version"], "1.40.0.7998");
        assert_eq!(status["active_sessions"], 1);
    }

    #[tokio::test]
    async fn test_sessions_action_maps_playback() {
        let url = start_plex_stub().await;
        let provider =
            PlexProvider::new(Some(url), Some("sekrit".to_string()), Duration::from_secs(5));

        let result = provider.act(&json!({"action": "sessions"})).await.unwrap();
        assert_eq!(result["count"], 1);
        let session = &result["sessions"][0];
        assert_eq!(session["user"], "nils");
        assert_eq!(session["title"], "Breaking Bad - Ozymandias");
        assert_eq!(session["state"], "playing");
        let progress = session["progress_percent"].as_f64().unwrap();
        assert!((progress - 42.857).abs() < 0.01);
    }

    #[tokio::test]
    async fn test_bad_token_is_upstream_error() {
        let url = start_plex_stub().await;
        let provider =
            PlexProvider::new(Some(url), Some("wrong".to_string()), Duration::from_secs(5));

        let err = provider.fetch().await.unwrap_err();
        assert_eq!(err.kind(), "upstream_error");
        assert!(err.to_string().contains("401"));
    }
}
