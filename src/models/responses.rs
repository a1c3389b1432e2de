//! Response DTOs for the cache server API
//!
//! Defines the structure of outgoing HTTP response bodies.

use serde::Serialize;

use crate::cache::{CacheStats, Payload, Tier};
use crate::coordinator::LoadSource;
use crate::prediction::Prediction;

/// Response body for GET /cache/:key
#[derive(Debug, Clone, Serialize)]
pub struct GetResponse {
    pub key: String,
    pub hit: bool,
    /// The stored value, absent on a miss
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<Payload>,
    /// Tier serving the key after the lookup
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tier: Option<Tier>,
}

impl GetResponse {
    pub fn hit(key: impl Into<String>, value: Payload, tier: Option<Tier>) -> Self {
        Self {
            key: key.into(),
            hit: true,
            value: Some(value),
            tier,
        }
    }

    pub fn miss(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            hit: false,
            value: None,
            tier: None,
        }
    }
}

/// Response body for PUT /cache
#[derive(Debug, Clone, Serialize)]
pub struct PutResponse {
    pub message: String,
    pub key: String,
    /// Tier the value landed in
    pub tier: Tier,
}

impl PutResponse {
    pub fn new(key: impl Into<String>, tier: Tier) -> Self {
        let key = key.into();
        Self {
            message: format!("Key '{}' stored in {} tier", key, tier),
            key,
            tier,
        }
    }
}

/// Response body for DELETE /cache/:key
#[derive(Debug, Clone, Serialize)]
pub struct DeleteResponse {
    pub message: String,
    pub key: String,
    /// False when the key was not resident
    pub deleted: bool,
}

impl DeleteResponse {
    pub fn new(key: impl Into<String>, deleted: bool) -> Self {
        let key = key.into();
        let message = if deleted {
            format!("Key '{}' invalidated", key)
        } else {
            format!("Key '{}' was not cached", key)
        };
        Self {
            message,
            key,
            deleted,
        }
    }
}

/// Response body for GET /load/:key
#[derive(Debug, Clone, Serialize)]
pub struct LoadResponse {
    pub key: String,
    pub value: Payload,
    pub source: LoadSource,
}

/// Response body for POST /access
#[derive(Debug, Clone, Serialize)]
pub struct AccessResponse {
    pub subject_id: String,
    pub key: String,
    /// Recording time in Unix milliseconds
    pub timestamp: u64,
}

/// Response body for GET /predict/:subject
#[derive(Debug, Clone, Serialize)]
pub struct PredictResponse {
    pub subject_id: String,
    pub predictions: Vec<Prediction>,
}

/// Response body for POST /prefetch
#[derive(Debug, Clone, Serialize)]
pub struct PrefetchResponse {
    /// Keys scheduled for background loading
    pub accepted: Vec<String>,
    pub paused: bool,
}

/// Scheduler state, returned by the pause/resume/visibility endpoints
#[derive(Debug, Clone, Copy, Serialize)]
pub struct PrefetchStateResponse {
    pub paused: bool,
    pub queued: usize,
    pub active: usize,
}

/// Response body for GET /stats
#[derive(Debug, Clone, Serialize)]
pub struct StatsResponse {
    #[serde(flatten)]
    pub stats: CacheStats,
    pub total_entries: usize,
    /// Loads currently running
    pub in_flight: usize,
    /// Subjects with recorded access patterns
    pub tracked_subjects: usize,
}

impl StatsResponse {
    pub fn new(stats: CacheStats, in_flight: usize, tracked_subjects: usize) -> Self {
        Self {
            total_entries: stats.total_entries(),
            stats,
            in_flight,
            tracked_subjects,
        }
    }
}

/// Response body for DELETE /cache
#[derive(Debug, Clone, Serialize)]
pub struct ClearResponse {
    pub message: String,
}

impl ClearResponse {
    pub fn cleared() -> Self {
        Self {
            message: "All tiers, statistics and access patterns cleared".to_string(),
        }
    }
}

/// Response body for the health endpoint (GET /health)
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Health status (e.g., "healthy")
    pub status: String,
    /// Current timestamp in ISO 8601 format
    pub timestamp: String,
}

impl HealthResponse {
    /// Creates a new HealthResponse with current timestamp
    pub fn healthy() -> Self {
        Self {
            status: "healthy".to_string(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}
