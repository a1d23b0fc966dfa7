//! Stored vector records and their metadata.
//!
//! A [`VectorRecord`] pairs a full-precision embedding with arbitrary
//! key-value metadata. Metadata is never consulted during graph traversal;
//! the query engine applies post-filters over it after candidate retrieval.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A typed metadata value attached to a stored vector.
///
/// Uses the default externally-tagged serde representation for bincode
/// compatibility.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MetadataValue {
    /// Boolean value (`true` / `false`).
    Boolean(bool),
    /// 64-bit signed integer.
    Integer(i64),
    /// 64-bit floating-point number.
    Float(f64),
    /// UTF-8 string.
    String(String),
}

/// A stored vector with its metadata.
///
/// The full-precision vector is the source of truth for exact re-ranking;
/// quantized codes are derived from it and regenerated on retrain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorRecord {
    /// Full-precision embedding, `dimension` floats.
    pub vector: Vec<f32>,
    /// Arbitrary key-value metadata for post-filtering.
    pub metadata: HashMap<String, MetadataValue>,
}

impl VectorRecord {
    /// Creates a record with no metadata.
    pub fn new(vector: Vec<f32>) -> Self {
        Self {
            vector,
            metadata: HashMap::new(),
        }
    }

    /// Creates a record with metadata.
    pub fn with_metadata(vector: Vec<f32>, metadata: HashMap<String, MetadataValue>) -> Self {
        Self { vector, metadata }
    }
}
