//! Cache Entry Module
//!
//! Defines the stored payload, the storage tiers, and individual cache entries.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Opaque metadata attached to an entry.
pub type Metadata = HashMap<String, String>;

// == Payload ==
/// The opaque value held by a cache entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum Payload {
    /// Raw bytes (rendered thumbnails, converted documents)
    Bytes(Vec<u8>),
    /// UTF-8 text
    Text(String),
    /// Structured JSON document
    Json(serde_json::Value),
}

impl From<String> for Payload {
    fn from(value: String) -> Self {
        Payload::Text(value)
    }
}

impl From<&str> for Payload {
    fn from(value: &str) -> Self {
        Payload::Text(value.to_string())
    }
}

impl From<Vec<u8>> for Payload {
    fn from(value: Vec<u8>) -> Self {
        Payload::Bytes(value)
    }
}

impl From<serde_json::Value> for Payload {
    fn from(value: serde_json::Value) -> Self {
        Payload::Json(value)
    }
}

// == Tier ==
/// Storage layer, ordered fastest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Fast,
    Mid,
    Cold,
}

impl Tier {
    /// All tiers in lookup order.
    pub const ALL: [Tier; 3] = [Tier::Fast, Tier::Mid, Tier::Cold];

    /// Position of the tier in lookup order.
    pub fn index(self) -> usize {
        match self {
            Tier::Fast => 0,
            Tier::Mid => 1,
            Tier::Cold => 2,
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Tier::Fast => "fast",
            Tier::Mid => "mid",
            Tier::Cold => "cold",
        };
        f.write_str(name)
    }
}

// == Cache Entry ==
/// A single cached artifact together with its bookkeeping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Cache key, unique across all tiers
    pub key: String,
    /// The stored value
    pub value: Payload,
    /// Exact byte size used for capacity accounting
    pub size_bytes: usize,
    /// Creation timestamp (Unix milliseconds)
    pub created_at: u64,
    /// Expiration timestamp (Unix milliseconds), always after `created_at`
    pub expires_at: u64,
    /// Last successful read (Unix milliseconds)
    pub last_access_at: u64,
    /// Number of successful reads
    pub access_count: u64,
    /// Tier the entry currently lives in
    pub tier: Tier,
    /// Caller-supplied metadata
    #[serde(default)]
    pub metadata: Metadata,
}

impl CacheEntry {
    // == Constructor ==
    /// Creates a new entry stamped at `now_ms` that lives for `ttl_ms`.
    ///
    /// A zero TTL is bumped to one millisecond so `expires_at > created_at`
    /// always holds.
    pub fn new(
        key: String,
        value: Payload,
        size_bytes: usize,
        now_ms: u64,
        ttl_ms: u64,
        metadata: Metadata,
    ) -> Self {
        Self {
            key,
            value,
            size_bytes,
            created_at: now_ms,
            expires_at: now_ms.saturating_add(ttl_ms.max(1)),
            last_access_at: now_ms,
            access_count: 0,
            tier: Tier::Fast,
            metadata,
        }
    }

    // == Is Expired ==
    /// An entry is expired once `now >= expires_at`.
    pub fn is_expired_at(&self, now_ms: u64) -> bool {
        now_ms >= self.expires_at
    }

    /// Remaining lifetime in milliseconds (0 once expired).
    pub fn ttl_remaining_ms(&self, now_ms: u64) -> u64 {
        self.expires_at.saturating_sub(now_ms)
    }

    /// Records a successful read.
    pub fn touch(&mut self, now_ms: u64) {
        self.last_access_at = now_ms;
        self.access_count += 1;
    }
}
