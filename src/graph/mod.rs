//! Multi-layer navigable small-world proximity graph.
//!
//! The graph owns topology only: neighbor lists per layer, layer
//! assignments, liveness flags, and the entry point. All distances flow in
//! through the [`DistanceOracle`] trait, which the engine implements over
//! either quantized codes (search) or full-precision vectors (construction
//! and re-ranking). This keeps the graph free of vector data and lets the
//! same traversal serve both paths.
//!
//! Node lifecycle: `absent → active → tombstoned → purged`. Tombstoning is
//! an O(1) flag flip that leaves edges intact for traversal stability;
//! purging happens only in [`compact`](compact::compact), which also repairs
//! inbound edges.

/// Compaction: physically removes tombstoned nodes and repairs edges.
pub mod compact;
/// Graph topology, configuration, and the level draw.
pub mod graph;
/// Insertion with greedy descent and diversity-based neighbor selection.
pub mod insert;
/// Beam search traversal.
pub mod search;
/// Generation-stamped visited set.
pub mod visited;

pub use graph::{GraphConfig, ProximityGraph};
pub use visited::VisitedSet;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Distance source for graph traversal.
///
/// `to_query` measures from the current query (or the vector being
/// inserted) to a stored node; `between` measures between two stored nodes,
/// as needed by diversity pruning and edge repair. Implementations must be
/// consistent: both sides lower-is-better under the same metric.
pub trait DistanceOracle {
    /// Distance from the query to a stored node.
    fn to_query(&self, node: u32) -> f32;

    /// Distance between two stored nodes.
    fn between(&self, a: u32, b: u32) -> f32;
}

/// Cooperative cancellation handle for long searches.
///
/// Cloned tokens share state. The beam search checks the token each time
/// the frontier is extended; cancellation aborts the query without touching
/// the graph (queries never mutate it).
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Takes effect at the next checkpoint.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }
}
