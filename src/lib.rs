//! # quiver
//!
//! Embeddable approximate nearest-neighbor vector search engine: a
//! multi-layer navigable small-world proximity graph over scalar- or
//! product-quantized vectors, with exact re-ranking, tombstoned deletes
//! with background compaction, and WAL + snapshot persistence over an
//! abstract durable blob store.
//!
//! Embedding generation, sharding/replication, and client protocols are
//! external concerns: this crate consumes opaque `f32` vectors of a fixed
//! dimension and exposes an in-process index handle.
//!
//! ```
//! use quiver::{DistanceMetric, IndexConfig, SearchParams, VectorIndex};
//!
//! # fn main() -> quiver::Result<()> {
//! let index = VectorIndex::in_memory(IndexConfig::new(4, DistanceMetric::Euclidean))?;
//! index.insert(1, vec![0.0, 0.0, 0.0, 0.0])?;
//! index.insert(2, vec![1.0, 0.0, 0.0, 0.0])?;
//!
//! let hits = index.search(&[0.0, 0.0, 0.0, 0.0], 2, &SearchParams::default())?;
//! assert_eq!(hits[0].id, 1);
//! # Ok(())
//! # }
//! ```

/// Global tuning constants and persistence defaults.
pub mod config;
/// Distance metrics and exact f32 kernels.
pub mod distance;
/// Crate-wide error type.
pub mod error;
/// Multi-layer proximity graph: topology, insertion, search, compaction.
pub mod graph;
/// The index handle: admin surface and engine wiring.
pub mod index;
/// WAL and snapshot persistence.
pub mod persist;
/// Scalar and product quantization with trained codebooks.
pub mod quantization;
/// Query engine: search parameters, re-ranking, post-filtering.
pub mod query;
/// Stored vector records and metadata.
pub mod record;
/// Vector store over the abstract durable blob store.
pub mod store;

/// Opaque caller-assigned vector identifier.
pub type VectorId = u64;

pub use distance::DistanceMetric;
pub use error::{Error, Result};
pub use graph::{CancelToken, GraphConfig};
pub use index::{IndexConfig, IndexStats, VectorIndex};
pub use quantization::QuantizerConfig;
pub use query::{Neighbor, SearchParams, SearchResult};
pub use record::{MetadataValue, VectorRecord};
pub use store::{BlobStore, FileBlobStore, MemoryBlobStore};
