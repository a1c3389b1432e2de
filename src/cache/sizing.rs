//! Payload sizing
//!
//! Capacity accounting needs an exact byte count for every stored payload.

use crate::error::{CacheError, Result};

use super::entry::Payload;

/// Computes the byte size a payload is accounted at.
pub trait SizeEstimator: Send + Sync + std::fmt::Debug {
    fn size_of(&self, payload: &Payload) -> Result<usize>;
}

/// Sizes payloads by their serialized length.
///
/// Bytes count as-is, text by its UTF-8 length, JSON by the length of its
/// compact `serde_json` encoding.
#[derive(Debug, Default, Clone, Copy)]
pub struct SerializedSize;

impl SizeEstimator for SerializedSize {
    fn size_of(&self, payload: &Payload) -> Result<usize> {
        match payload {
            Payload::Bytes(bytes) => Ok(bytes.len()),
            Payload::Text(text) => Ok(text.len()),
            Payload::Json(value) => serde_json::to_vec(value)
                .map(|encoded| encoded.len())
                .map_err(|e| CacheError::Serialization(e.to_string())),
        }
    }
}
