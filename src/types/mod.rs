//! Core types for the steward daemon.
//!
//! This module provides foundational types used throughout the system:
//! - **Errors**: Application error types with thiserror derives
//! - **Config**: Layered configuration (defaults, file, environment)

mod config;
mod errors;

pub use config::{
    CacheConfig, Config, DockerConfig, HealthConfig, HealthThresholds, LogAnalysisConfig,
    MaintenanceConfig, ObservabilityConfig, PlexConfig, ProvidersConfig, ServerConfig,
    ThresholdPair, ToolConfig,
};
pub use errors::{Error, Result};
