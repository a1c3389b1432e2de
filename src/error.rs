//! Error types for the tiered cache
//!
//! Provides unified error handling using thiserror.

use std::sync::Arc;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Boxed cause of a failed load, shared between every waiter of that load.
pub type LoadCause = Arc<dyn std::error::Error + Send + Sync + 'static>;

// == Cache Error Enum ==
/// Unified error type for the tiered cache.
///
/// Cloneable so that a single settled load can be handed to every
/// concurrent waiter for the same key.
#[derive(Error, Debug, Clone)]
pub enum CacheError {
    /// Item does not fit in any tier, even after eviction
    #[error("Storage full: item '{key}' of {size_bytes} bytes fits no tier")]
    StorageFull { key: String, size_bytes: usize },

    /// Value could not be size-estimated or serialized
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Loader exceeded the configured bound
    #[error("Load of '{key}' timed out after {timeout_ms}ms")]
    LoadTimeout { key: String, timeout_ms: u64 },

    /// Loader failed; the underlying cause is preserved
    #[error("Loader failed for '{key}': {source}")]
    Loader {
        key: String,
        #[source]
        source: LoadCause,
    },

    /// Persistent backend I/O failure
    #[error("Backend error: {0}")]
    Backend(String),

    /// Invalid request data
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Configuration rejected by validation
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl CacheError {
    /// Wraps a loader failure, keeping its cause chain.
    pub fn loader(key: impl Into<String>, err: anyhow::Error) -> Self {
        let boxed: Box<dyn std::error::Error + Send + Sync + 'static> = err.into();
        CacheError::Loader {
            key: key.into(),
            source: Arc::from(boxed),
        }
    }

    /// Returns true for the two load-failure variants.
    pub fn is_load_failure(&self) -> bool {
        matches!(self, CacheError::Loader { .. } | CacheError::LoadTimeout { .. })
    }
}

impl From<std::io::Error> for CacheError {
    fn from(err: std::io::Error) -> Self {
        CacheError::Backend(err.to_string())
    }
}

impl From<serde_json::Error> for CacheError {
    fn from(err: serde_json::Error) -> Self {
        CacheError::Serialization(err.to_string())
    }
}

// == IntoResponse Implementation ==
impl IntoResponse for CacheError {
    fn into_response(self) -> Response {
        let status = match &self {
            CacheError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            CacheError::StorageFull { .. } => StatusCode::INSUFFICIENT_STORAGE,
            CacheError::LoadTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            CacheError::Loader { .. } => StatusCode::BAD_GATEWAY,
            CacheError::Serialization(_)
            | CacheError::Backend(_)
            | CacheError::InvalidConfig(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = Json(json!({
            "error": self.to_string()
        }));

        (status, body).into_response()
    }
}

// == Result Type Alias ==
/// Convenience Result type for the tiered cache.
pub type Result<T> = std::result::Result<T, CacheError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_loader_error_preserves_cause() {
        let err = CacheError::loader("course_42", anyhow::anyhow!("upstream 503"));
        assert!(err.to_string().contains("course_42"));
        assert_eq!(err.source().unwrap().to_string(), "upstream 503");
        assert!(err.is_load_failure());
    }

    #[test]
    fn test_clone_shares_cause() {
        let err = CacheError::loader("k", anyhow::anyhow!("boom"));
        let copy = err.clone();
        assert_eq!(err.to_string(), copy.to_string());
    }

    #[test]
    fn test_status_mapping() {
        let resp = CacheError::InvalidRequest("bad".into()).into_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let resp = CacheError::LoadTimeout {
            key: "k".into(),
            timeout_ms: 10,
        }
        .into_response();
        assert_eq!(resp.status(), StatusCode::GATEWAY_TIMEOUT);
    }
}
