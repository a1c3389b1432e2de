//! Request DTOs for the cache server API
//!
//! Defines the structure of incoming HTTP request bodies and query strings.

use std::time::Duration;

use serde::Deserialize;

use crate::cache::{Metadata, Payload, PutOptions, MAX_KEY_LENGTH};
use crate::prediction::{Context, CURRENT_KEY, GROUP_ID};
use crate::prefetch::PrefetchOptions;

fn validate_key(key: &str) -> Option<String> {
    if key.is_empty() {
        return Some("Key cannot be empty".to_string());
    }
    if key.len() > MAX_KEY_LENGTH {
        return Some(format!(
            "Key exceeds maximum length of {} characters",
            MAX_KEY_LENGTH
        ));
    }
    None
}

/// Request body for PUT /cache
///
/// A JSON string value is stored as text, any other JSON value as a JSON
/// document.
#[derive(Debug, Clone, Deserialize)]
pub struct PutRequest {
    pub key: String,
    pub value: serde_json::Value,
    /// Optional TTL in seconds
    #[serde(default)]
    pub ttl: Option<u64>,
    #[serde(default)]
    pub metadata: Metadata,
    /// Explicit accounted size in bytes
    #[serde(default)]
    pub size_bytes: Option<usize>,
}

impl PutRequest {
    /// Returns an error message if validation fails, None if valid.
    pub fn validate(&self) -> Option<String> {
        if let Some(msg) = validate_key(&self.key) {
            return Some(msg);
        }
        if self.ttl == Some(0) {
            return Some("TTL must be positive".to_string());
        }
        None
    }

    pub fn into_parts(self) -> (String, Payload, PutOptions) {
        let value = match self.value {
            serde_json::Value::String(text) => Payload::Text(text),
            other => Payload::Json(other),
        };
        let opts = PutOptions {
            ttl: self.ttl.map(Duration::from_secs),
            metadata: self.metadata,
            size_bytes: self.size_bytes,
        };
        (self.key, value, opts)
    }
}

/// Request body for POST /access
#[derive(Debug, Clone, Deserialize)]
pub struct AccessRequest {
    pub subject_id: String,
    pub key: String,
    #[serde(default)]
    pub context: Context,
}

impl AccessRequest {
    pub fn validate(&self) -> Option<String> {
        if self.subject_id.is_empty() {
            return Some("Subject id cannot be empty".to_string());
        }
        validate_key(&self.key)
    }
}

/// Request body for POST /prefetch
#[derive(Debug, Clone, Deserialize)]
pub struct PrefetchRequest {
    pub subject_id: String,
    #[serde(default)]
    pub context: Context,
    #[serde(default)]
    pub threshold: Option<f64>,
    #[serde(default)]
    pub max_concurrent: Option<usize>,
}

impl PrefetchRequest {
    pub fn validate(&self) -> Option<String> {
        if self.subject_id.is_empty() {
            return Some("Subject id cannot be empty".to_string());
        }
        if let Some(threshold) = self.threshold {
            if !(0.0..=1.0).contains(&threshold) {
                return Some("Threshold must be within [0, 1]".to_string());
            }
        }
        if self.max_concurrent == Some(0) {
            return Some("max_concurrent must be positive".to_string());
        }
        None
    }

    pub fn options(&self) -> PrefetchOptions {
        PrefetchOptions {
            threshold: self.threshold,
            max_concurrent: self.max_concurrent,
        }
    }
}

/// Request body for POST /events/focus
#[derive(Debug, Clone, Deserialize)]
pub struct FocusRequest {
    pub subject_id: String,
    #[serde(default)]
    pub context: Context,
}

/// Request body for POST /events/visibility
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct VisibilityRequest {
    pub visible: bool,
}

/// Query string shared by GET /load/:key and GET /predict/:subject
///
/// `group` and `current` become the `groupId` / `currentKey` context hints.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ContextQuery {
    /// Records the access for this subject before loading
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub group: Option<String>,
    #[serde(default)]
    pub current: Option<String>,
}

impl ContextQuery {
    pub fn context(&self) -> Context {
        let mut context = Context::new();
        if let Some(group) = &self.group {
            context.insert(GROUP_ID.to_string(), group.clone());
        }
        if let Some(current) = &self.current {
            context.insert(CURRENT_KEY.to_string(), current.clone());
        }
        context
    }
}
