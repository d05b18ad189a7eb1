use std::time::Duration;

use thiserror::Error;

use super::keys::Namespace;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("redis operation failed: {0}")]
    Redis(#[from] redis::RedisError),
    #[error("cache backend `{backend}` failed: {message}")]
    Backend {
        backend: &'static str,
        message: String,
    },
    #[error("cache `{op}` timed out after {after:?}")]
    Timeout { op: &'static str, after: Duration },
    #[error("cache payload could not be encoded or decoded: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("invalid key pattern `{pattern}`: {message}")]
    Pattern { pattern: String, message: String },
    #[error("unknown cache namespace `{0}`")]
    UnknownNamespace(String),
    #[error("namespace `{0}` requires a user scope")]
    ScopeRequired(Namespace),
    #[error("invalid cache configuration: {0}")]
    Config(String),
}

impl CacheError {
    pub fn backend(backend: &'static str, message: impl Into<String>) -> Self {
        Self::Backend {
            backend,
            message: message.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Short label used in logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            CacheError::Redis(_) => "redis",
            CacheError::Backend { .. } => "backend",
            CacheError::Timeout { .. } => "timeout",
            CacheError::Serialization(_) => "serialization",
            CacheError::Pattern { .. } => "pattern",
            CacheError::UnknownNamespace(_) => "namespace",
            CacheError::ScopeRequired(_) => "scope",
            CacheError::Config(_) => "config",
        }
    }
}
