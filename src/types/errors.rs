//! Application error types.
//!
//! All errors use `thiserror` for automatic Error trait derivation and provide
//! clear error messages with context.

use thiserror::Error;

/// Application result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error enum for the steward daemon.
#[derive(Error, Debug)]
pub enum Error {
    /// Invalid or missing configuration (fatal at startup).
    #[error("config error: {0}")]
    Config(String),

    /// Tool name not present in the registry (maps to HTTP 404).
    #[error("tool not found: {0}")]
    ToolNotFound(String),

    /// Tool is registered but disabled by configuration (maps to HTTP 403).
    #[error("tool disabled: {0}")]
    ToolDisabled(String),

    /// Tool arguments failed validation (maps to HTTP 400).
    #[error("invalid argument '{field}': {message}")]
    InvalidArgument { field: String, message: String },

    /// Provider unreachable, timed out, or returned a failure (maps to HTTP 502).
    #[error("upstream error: {0}")]
    Upstream(String),

    /// A single-flight compute failed; delivered to every waiter (maps to HTTP 502).
    #[error("cache compute failed: {0}")]
    CacheCompute(String),

    /// Maintenance task failure (recorded per task, scheduler keeps running).
    #[error("task error: {0}")]
    Task(String),

    /// Serialization/deserialization errors.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O errors.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Stable snake_case identifier used in the wire envelope.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Config(_) => "config_error",
            Error::ToolNotFound(_) => "tool_not_found",
            Error::ToolDisabled(_) => "tool_disabled",
            Error::InvalidArgument { .. } => "invalid_argument",
            Error::Upstream(_) => "upstream_error",
            Error::CacheCompute(_) => "cache_compute_error",
            Error::Task(_) => "task_error",
            Error::Serialization(_) => "serialization_error",
            Error::Io(_) => "io_error",
        }
    }

    /// HTTP status code for the reporting surface.
    pub fn http_status(&self) -> u16 {
        match self {
            Error::ToolNotFound(_) => 404,
            Error::ToolDisabled(_) => 403,
            Error::InvalidArgument { .. } => 400,
            Error::Upstream(_) | Error::CacheCompute(_) => 502,
            Error::Config(_) | Error::Task(_) | Error::Serialization(_) | Error::Io(_) => 500,
        }
    }
}

// Convenience constructors
impl Error {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn tool_not_found(name: impl Into<String>) -> Self {
        Self::ToolNotFound(name.into())
    }

    pub fn tool_disabled(name: impl Into<String>) -> Self {
        Self::ToolDisabled(name.into())
    }

    pub fn invalid_argument(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn upstream(msg: impl Into<String>) -> Self {
        Self::Upstream(msg.into())
    }

    pub fn cache_compute(msg: impl Into<String>) -> Self {
        Self::CacheCompute(msg.into())
    }

    pub fn task(msg: impl Into<String>) -> Self {
        Self::Task(msg.into())
    }
}
