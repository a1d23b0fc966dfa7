//! Global configuration constants for quiver.
//!
//! Tuning parameters, validation limits, and persistence defaults live here.
//! Per-index settings (dimension, metric, quantizer) are chosen at index
//! creation time and recorded in the snapshot header.

/// Default number of bidirectional links per graph node on layers >= 1.
///
/// Higher values improve recall but increase memory and build time.
/// Typical range: 8–64.
pub const GRAPH_DEFAULT_M: usize = 16;

/// Default candidate list size during graph construction.
///
/// Higher values produce a better-connected graph at the cost of build time.
pub const GRAPH_DEFAULT_EF_CONSTRUCTION: usize = 200;

/// Default candidate list size during search.
///
/// Clamped to at least `k` per query. Higher values improve recall at the
/// cost of latency.
pub const GRAPH_DEFAULT_EF_SEARCH: usize = 50;

/// Maximum number of layers in the proximity graph.
///
/// The geometric level draw is truncated here. With M=16 the probability of
/// drawing layer 16 is below 1e-19, so the cap never binds in practice.
pub const GRAPH_MAX_LAYERS: usize = 16;

/// Default RNG seed for level assignment and k-means initialization.
///
/// Construction is deterministic for a fixed seed and insertion order.
pub const DEFAULT_RNG_SEED: u64 = 0x7177_7672;

/// Maximum allowed vector dimension.
pub const MAX_DIMENSION: usize = 4096;

/// Maximum number of results (`k`) per search request.
pub const MAX_K: usize = 10_000;

/// Number of k-means refinement iterations during PQ training.
pub const PQ_KMEANS_ITERATIONS: usize = 25;

/// Minimum training sample size, expressed as a multiple of the centroid
/// count per subspace. Training with fewer points is statistically unstable
/// and fails with `InsufficientSamples` rather than degrading silently.
pub const PQ_MIN_TRAIN_POINTS_PER_CENTROID: usize = 4;

/// Fraction of tombstoned nodes above which `stats()` recommends compaction.
pub const COMPACTION_THRESHOLD: f32 = 0.2;

/// Attempts for a blob-store read/write before the error is surfaced.
pub const BLOB_RETRY_ATTEMPTS: u32 = 3;

/// Base delay between blob-store retries; doubles per attempt.
pub const BLOB_RETRY_BASE_DELAY_MS: u64 = 10;

/// File name of the write-ahead log inside the index data directory.
pub const WAL_FILE_NAME: &str = "wal.bin";

/// Blob key under which the index snapshot is stored.
pub const SNAPSHOT_KEY: &str = "index/snapshot";

/// Blob key prefix for persisted vector records.
pub const VECTOR_KEY_PREFIX: &str = "vec/";
