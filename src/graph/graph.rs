//! Proximity graph topology and configuration.
//!
//! [`GraphConfig`] defines tuning parameters (M, ef_construction, ef_search).
//! [`ProximityGraph`] owns topology only — per-layer neighbor lists, layer
//! assignments, liveness flags, and the entry point — in a Struct-of-Arrays
//! layout indexed by dense internal node ids. Distances are supplied by the
//! caller through [`DistanceOracle`](super::DistanceOracle), so the graph
//! never needs to see a vector.

use crate::config;
use rand::rngs::StdRng;
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Configuration parameters for the proximity graph.
///
/// Controls the trade-off between build speed, search speed, recall, and
/// memory usage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphConfig {
    /// Number of bidirectional links per node on layers >= 1.
    pub m: usize,
    /// Maximum links per node at layer 0 (typically `2 * m`).
    pub m_max0: usize,
    /// Candidate list size during construction.
    pub ef_construction: usize,
    /// Default candidate list size during search (clamped to >= k per query).
    pub ef_search: usize,
    /// Maximum number of layers.
    pub max_layers: usize,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            m: config::GRAPH_DEFAULT_M,
            m_max0: config::GRAPH_DEFAULT_M * 2,
            ef_construction: config::GRAPH_DEFAULT_EF_CONSTRUCTION,
            ef_search: config::GRAPH_DEFAULT_EF_SEARCH,
            max_layers: config::GRAPH_MAX_LAYERS,
        }
    }
}

impl GraphConfig {
    /// Degree bound for a layer: `2M` at layer 0, `M` above.
    #[inline]
    pub fn max_degree(&self, layer: usize) -> usize {
        if layer == 0 {
            self.m_max0
        } else {
            self.m
        }
    }
}

/// Multi-layer navigable small-world graph topology, SoA layout.
///
/// Layer 0 contains every node; each higher layer is a sparser subset
/// chosen by a geometric level draw at insertion time. A tombstoned node
/// keeps its edges and stays a traversal waypoint until compaction
/// physically removes it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProximityGraph {
    pub config: GraphConfig,
    /// `neighbors[node][layer]` — ids ordered by distance, bounded by
    /// `config.max_degree(layer)`.
    pub neighbors: Vec<Vec<Vec<u32>>>,
    /// Top layer assigned to each node.
    pub layers: Vec<u8>,
    /// Liveness flags; `true` = tombstoned.
    pub deleted: Vec<bool>,
    /// Designated search entry, the node with the highest layer.
    pub entry_point: Option<u32>,
    /// Highest populated layer.
    pub max_layer: usize,
}

impl ProximityGraph {
    /// Creates an empty graph.
    pub fn new(config: GraphConfig) -> Self {
        Self {
            config,
            neighbors: Vec::new(),
            layers: Vec::new(),
            deleted: Vec::new(),
            entry_point: None,
            max_layer: 0,
        }
    }

    /// Total nodes, tombstoned included.
    pub fn node_count(&self) -> usize {
        self.neighbors.len()
    }

    /// Number of tombstoned nodes awaiting compaction.
    pub fn tombstone_count(&self) -> usize {
        self.deleted.iter().filter(|&&d| d).count()
    }

    /// Number of live (searchable) nodes.
    pub fn live_count(&self) -> usize {
        self.node_count() - self.tombstone_count()
    }

    /// Whether the graph has no live nodes.
    pub fn is_empty(&self) -> bool {
        self.live_count() == 0
    }

    /// Draw a random top layer from the geometric distribution with
    /// parameter `1/ln(M)`, truncated at `max_layers`. The generator is
    /// passed explicitly so construction is reproducible.
    pub fn random_level(&self, rng: &mut StdRng) -> usize {
        let ml = 1.0 / (self.config.m as f64).ln();
        let u: f64 = rng.gen_range(f64::MIN_POSITIVE..1.0);
        let level = (-u.ln() * ml).floor() as usize;
        level.min(self.config.max_layers - 1)
    }

    #[inline]
    pub fn is_deleted(&self, node: u32) -> bool {
        self.deleted[node as usize]
    }

    /// Tombstone a node: O(1), edges untouched. Returns `false` if the
    /// node was already tombstoned.
    pub fn mark_deleted(&mut self, node: u32) -> bool {
        let slot = &mut self.deleted[node as usize];
        if *slot {
            false
        } else {
            *slot = true;
            true
        }
    }

    /// Neighbor list of a node at a layer; empty when the node does not
    /// reach that layer.
    #[inline]
    pub fn neighbors_at(&self, node: u32, layer: usize) -> &[u32] {
        self.neighbors[node as usize]
            .get(layer)
            .map_or(&[], |v| v.as_slice())
    }

    /// Mean out-degree at layer 0 over all nodes.
    pub fn avg_degree(&self) -> f32 {
        if self.neighbors.is_empty() {
            return 0.0;
        }
        let total: usize = self
            .neighbors
            .iter()
            .map(|n| n.first().map_or(0, Vec::len))
            .sum();
        total as f32 / self.neighbors.len() as f32
    }

    /// Count of live nodes per top layer, `histogram[l]` = nodes whose top
    /// layer is `l`.
    pub fn layer_histogram(&self) -> Vec<usize> {
        let mut histogram = vec![0usize; self.max_layer + 1];
        for (node, &layer) in self.layers.iter().enumerate() {
            if !self.deleted[node] {
                histogram[layer as usize] += 1;
            }
        }
        histogram
    }

    /// Validate structural invariants after deserialization or repair.
    ///
    /// Checks parallel-array lengths, entry-point and neighbor bounds, and
    /// degree limits. A failure here means the persisted topology cannot be
    /// trusted and the index must be rebuilt.
    pub fn validate(&self) -> Result<(), String> {
        let nc = self.node_count();

        if self.layers.len() != nc {
            return Err(format!("layers length {} != node count {nc}", self.layers.len()));
        }
        if self.deleted.len() != nc {
            return Err(format!(
                "deleted length {} != node count {nc}",
                self.deleted.len()
            ));
        }

        match self.entry_point {
            None => {
                if nc != 0 && self.deleted.iter().any(|&d| !d) {
                    return Err("missing entry point with live nodes present".into());
                }
            }
            Some(ep) => {
                if ep as usize >= nc {
                    return Err(format!("entry point {ep} out of bounds ({nc} nodes)"));
                }
            }
        }

        for (node, node_neighbors) in self.neighbors.iter().enumerate() {
            let top = self.layers[node] as usize;
            if node_neighbors.len() > top + 1 {
                return Err(format!(
                    "node {node} has {} layer lists but top layer {top}",
                    node_neighbors.len()
                ));
            }
            if top > self.max_layer {
                return Err(format!(
                    "node {node} on layer {top} above max layer {}",
                    self.max_layer
                ));
            }
            for (layer, list) in node_neighbors.iter().enumerate() {
                // One slot of slack: lists may transiently hold max_degree
                // entries before pruning re-runs.
                if list.len() > self.config.max_degree(layer) + 1 {
                    return Err(format!(
                        "node {node} layer {layer} degree {} exceeds bound {}",
                        list.len(),
                        self.config.max_degree(layer)
                    ));
                }
                for &nb in list {
                    if nb as usize >= nc {
                        return Err(format!(
                            "dangling neighbor {nb} at node {node} layer {layer} ({nc} nodes)"
                        ));
                    }
                    if nb as usize == node {
                        return Err(format!("self-edge at node {node} layer {layer}"));
                    }
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    #[test]
    fn test_random_level_distribution() {
        let graph = ProximityGraph::new(GraphConfig::default());
        let mut rng = StdRng::seed_from_u64(9);
        let mut at_zero = 0usize;
        const DRAWS: usize = 10_000;
        for _ in 0..DRAWS {
            let l = graph.random_level(&mut rng);
            assert!(l < config::GRAPH_MAX_LAYERS);
            if l == 0 {
                at_zero += 1;
            }
        }
        // With M=16, P(level=0) = 1 - 1/16 ≈ 0.9375.
        let frac = at_zero as f64 / DRAWS as f64;
        assert!(
            (frac - 0.9375).abs() < 0.02,
            "unexpected layer-0 fraction {frac}"
        );
    }

    #[test]
    fn test_random_level_reproducible() {
        let graph = ProximityGraph::new(GraphConfig::default());
        let draw = |seed| {
            let mut rng = StdRng::seed_from_u64(seed);
            (0..64).map(|_| graph.random_level(&mut rng)).collect::<Vec<_>>()
        };
        assert_eq!(draw(123), draw(123));
    }

    #[test]
    fn test_validate_rejects_dangling_neighbor() {
        let mut graph = ProximityGraph::new(GraphConfig::default());
        graph.neighbors.push(vec![vec![5]]); // node 0 points at missing node 5
        graph.layers.push(0);
        graph.deleted.push(false);
        graph.entry_point = Some(0);
        assert!(graph.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_missing_entry_point() {
        let mut graph = ProximityGraph::new(GraphConfig::default());
        graph.neighbors.push(vec![vec![]]);
        graph.layers.push(0);
        graph.deleted.push(false);
        assert!(graph.validate().is_err());
    }

    #[test]
    fn test_tombstone_counts() {
        let mut graph = ProximityGraph::new(GraphConfig::default());
        for _ in 0..3 {
            graph.neighbors.push(vec![Vec::new()]);
            graph.layers.push(0);
            graph.deleted.push(false);
        }
        graph.entry_point = Some(0);
        assert!(graph.mark_deleted(1));
        assert!(!graph.mark_deleted(1));
        assert_eq!(graph.tombstone_count(), 1);
        assert_eq!(graph.live_count(), 2);
    }
}
