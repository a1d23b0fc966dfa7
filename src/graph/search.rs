//! Beam search traversal.
//!
//! A single-layer beam ([`search_layer`]) maintains a bounded dual-heap
//! frontier: a min-heap of candidates to expand and a max-heap of the best
//! `ef` results found so far. Expansion stops when the nearest unexpanded
//! candidate is farther than the worst retained result — no closer node can
//! still be discovered through it. Multi-layer search ([`search`]) descends
//! greedily with `ef = 1` above layer 0, then runs the full beam at layer 0.
//!
//! Tombstoned nodes are expanded (they remain useful waypoints) but never
//! returned. The traversal is iterative with bounded memory, and checks the
//! cancellation token once per frontier extension.

use crate::error::{Error, Result};
use crate::graph::{CancelToken, DistanceOracle, ProximityGraph, VisitedSet};
use ordered_float::OrderedFloat;
use std::collections::BinaryHeap;

/// A frontier entry: max-heap on negated distance = min-heap on distance.
#[derive(Debug, PartialEq, Eq)]
struct Candidate {
    neg_distance: OrderedFloat<f32>,
    node: u32,
}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.neg_distance
            .cmp(&other.neg_distance)
            // Deterministic pop order on distance ties: lower id first.
            .then_with(|| other.node.cmp(&self.node))
    }
}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// A retained result: max-heap on distance, so the worst is on top.
#[derive(Debug, PartialEq, Eq)]
struct ResultEntry {
    distance: OrderedFloat<f32>,
    node: u32,
}

impl Ord for ResultEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.distance
            .cmp(&other.distance)
            .then_with(|| self.node.cmp(&other.node))
    }
}

impl PartialOrd for ResultEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// Search a single layer, returning up to `ef` live nodes closest to the
/// query, sorted ascending by distance.
///
/// `visited` must cover the graph's node count; it is reset here at entry.
pub fn search_layer<O: DistanceOracle>(
    graph: &ProximityGraph,
    oracle: &O,
    entry_points: &[u32],
    ef: usize,
    layer: usize,
    visited: &mut VisitedSet,
    cancel: Option<&CancelToken>,
) -> Result<Vec<(f32, u32)>> {
    visited.reset();
    let mut candidates: BinaryHeap<Candidate> = BinaryHeap::with_capacity(ef * 2);
    let mut results: BinaryHeap<ResultEntry> = BinaryHeap::with_capacity(ef + 1);
    // Cached worst retained distance; avoids heap peeks in the hot loop.
    let mut worst_dist = f32::MAX;

    for &ep in entry_points {
        if visited.insert(ep) {
            let dist = oracle.to_query(ep);
            candidates.push(Candidate {
                neg_distance: OrderedFloat(-dist),
                node: ep,
            });
            if !graph.is_deleted(ep) {
                results.push(ResultEntry {
                    distance: OrderedFloat(dist),
                    node: ep,
                });
                if results.len() >= ef {
                    worst_dist = results.peek().map_or(f32::MAX, |r| r.distance.0);
                }
            }
        }
    }

    while let Some(candidate) = candidates.pop() {
        // Cooperative checkpoint, once per frontier extension.
        if let Some(token) = cancel {
            if token.is_cancelled() {
                return Err(Error::Cancelled);
            }
        }

        let c_dist = -candidate.neg_distance.0;
        // Stopping criterion: nothing reachable through the remaining
        // frontier can beat the worst retained result.
        if results.len() >= ef && c_dist > worst_dist {
            break;
        }

        for &neighbor in graph.neighbors_at(candidate.node, layer) {
            if !visited.insert(neighbor) {
                continue;
            }
            let dist = oracle.to_query(neighbor);
            if results.len() < ef || dist < worst_dist {
                candidates.push(Candidate {
                    neg_distance: OrderedFloat(-dist),
                    node: neighbor,
                });
                if !graph.is_deleted(neighbor) {
                    results.push(ResultEntry {
                        distance: OrderedFloat(dist),
                        node: neighbor,
                    });
                    if results.len() > ef {
                        results.pop();
                    }
                    worst_dist = results.peek().map_or(f32::MAX, |r| r.distance.0);
                }
            }
        }
    }

    Ok(results
        .into_sorted_vec()
        .into_iter()
        .map(|r| (r.distance.0, r.node))
        .collect())
}

/// Greedy descent from the entry point down to `target_layer + 1`,
/// returning the best waypoint found. Uses `ef = 1` per layer.
pub fn descend<O: DistanceOracle>(
    graph: &ProximityGraph,
    oracle: &O,
    mut current: u32,
    from_layer: usize,
    target_layer: usize,
    visited: &mut VisitedSet,
    cancel: Option<&CancelToken>,
) -> Result<u32> {
    let mut layer = from_layer;
    while layer > target_layer {
        let found = search_layer(
            graph,
            oracle,
            std::slice::from_ref(&current),
            1,
            layer,
            visited,
            cancel,
        )?;
        if let Some(&(_, nearest)) = found.first() {
            current = nearest;
        }
        layer -= 1;
    }
    Ok(current)
}

/// Full multi-layer search: descend to layer 0, then beam with width `ef`.
/// Returns up to `ef` live candidates sorted ascending by approximate
/// distance. An empty graph yields an empty result, not an error.
pub fn search<O: DistanceOracle>(
    graph: &ProximityGraph,
    oracle: &O,
    ef: usize,
    visited: &mut VisitedSet,
    cancel: Option<&CancelToken>,
) -> Result<Vec<(f32, u32)>> {
    let entry = match graph.entry_point {
        Some(ep) => ep,
        None => return Ok(Vec::new()),
    };
    if entry as usize >= graph.node_count() {
        return Err(Error::InternalInconsistency(format!(
            "entry point {entry} out of bounds ({} nodes)",
            graph.node_count()
        )));
    }

    visited.grow(graph.node_count());
    let waypoint = descend(graph, oracle, entry, graph.max_layer, 0, visited, cancel)?;
    search_layer(
        graph,
        oracle,
        std::slice::from_ref(&waypoint),
        ef,
        0,
        visited,
        cancel,
    )
}
