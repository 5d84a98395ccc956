//! Pluggable data/action providers.
//!
//! Everything host/Docker/Plex-specific lives behind [`Provider`]: the core
//! only ever sees `fetch()` snapshots and `act(params)` results as JSON.
//! Providers own their timeout; exceeding it surfaces as an upstream error,
//! never as an indefinitely blocked dispatcher.

mod docker;
mod host;
mod plex;

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::types::{Error, ProvidersConfig, Result};

pub use docker::DockerProvider;
pub use host::HostProvider;
pub use plex::PlexProvider;

/// A data/action source the core can query without knowing its internals.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Provider: Send + Sync {
    /// Snapshot of the provider's current state.
    async fn fetch(&self) -> Result<Value>;

    /// Perform a named action. `params` carries an `action` field plus
    /// action-specific arguments, already validated by the tool layer.
    async fn act(&self, params: &Value) -> Result<Value> {
        let _ = params;
        Err(Error::upstream("provider supports no actions"))
    }
}

/// The default providers wired at startup.
#[derive(Clone)]
pub struct ProviderSet {
    pub host: Arc<dyn Provider>,
    pub docker: Arc<dyn Provider>,
    pub plex: Arc<dyn Provider>,
}

impl ProviderSet {
    pub fn from_config(config: &ProvidersConfig) -> Self {
        Self {
            host: Arc::new(HostProvider::new(config.timeout)),
            docker: Arc::new(DockerProvider::new(
                config.docker.endpoint.clone(),
                config.timeout,
            )),
            plex: Arc::new(PlexProvider::new(
                config.plex.url.clone(),
                config.plex.token.clone(),
                config.timeout,
            )),
        }
    }
}

impl fmt::Debug for ProviderSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderSet").finish_non_exhaustive()
    }
}

/// Bound a provider call; elapsing maps to an upstream error naming the call.
pub(crate) async fn with_timeout<F>(limit: Duration, what: &str, fut: F) -> Result<Value>
where
    F: Future<Output = Result<Value>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(Error::upstream(format!(
            "{} timed out after {:?}",
            what, limit
        ))),
    }
}
