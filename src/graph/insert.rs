//! Graph insertion.
//!
//! New nodes are linked in three phases: a greedy descent from the entry
//! point to the node's drawn level, a per-layer beam search collecting
//! `ef_construction` candidates, and symmetric edge installation with
//! diversity-based pruning of any neighbor list pushed over its degree
//! bound.
//!
//! Insertion is not commutative — order affects the final topology — but
//! recall is statistically stable thanks to the randomized level draw and
//! the diversity heuristic. For a fixed seed and insertion order the
//! topology is fully reproducible.

use crate::error::Result;
use crate::graph::search::search_layer;
use crate::graph::{DistanceOracle, ProximityGraph, VisitedSet};
use ordered_float::OrderedFloat;
use rand::rngs::StdRng;

/// Insert a new node into the graph. The oracle's `to_query` must measure
/// from the vector being inserted. Returns the assigned internal id.
pub fn insert<O: DistanceOracle>(
    graph: &mut ProximityGraph,
    oracle: &O,
    rng: &mut StdRng,
    visited: &mut VisitedSet,
) -> Result<u32> {
    let level = graph.random_level(rng);
    let internal_id = graph.node_count() as u32;
    visited.grow(graph.node_count() + 1);

    // First node: no edges to build.
    let entry = match graph.entry_point {
        Some(ep) => ep,
        None => {
            graph.neighbors.push(vec![Vec::new(); level + 1]);
            graph.layers.push(level as u8);
            graph.deleted.push(false);
            graph.entry_point = Some(internal_id);
            graph.max_layer = level;
            return Ok(internal_id);
        }
    };

    // Phase 1: greedy descent through layers above the node's level.
    let mut current = entry;
    if graph.max_layer > level {
        current = super::search::descend(
            graph,
            oracle,
            entry,
            graph.max_layer,
            level,
            visited,
            None,
        )?;
    }

    // Phase 2: beam search per layer, selecting diverse neighbors.
    let top = level.min(graph.max_layer);
    let mut node_neighbors: Vec<Vec<u32>> = vec![Vec::new(); level + 1];
    let mut layer_eps: Vec<u32> = vec![current];
    for layer in (0..=top).rev() {
        let candidates = search_layer(
            graph,
            oracle,
            &layer_eps,
            graph.config.ef_construction,
            layer,
            visited,
            None,
        )?;

        let selected = select_neighbors(&candidates, graph.config.max_degree(layer), |a, b| {
            oracle.between(a, b)
        });
        node_neighbors[layer] = selected.iter().map(|&(_, id)| id).collect();

        layer_eps.clear();
        layer_eps.extend(candidates.iter().map(|&(_, id)| id));
        if layer_eps.is_empty() {
            layer_eps.push(entry);
        }
    }

    // The node is pushed with all its outgoing edges in place; symmetric
    // back-edges follow before the caller publishes the graph to readers.
    graph.neighbors.push(node_neighbors);
    graph.layers.push(level as u8);
    graph.deleted.push(false);

    // Phase 3: symmetric linking and re-pruning of over-capacity lists.
    for layer in 0..=top {
        let m_max = graph.config.max_degree(layer);
        let my_neighbors = graph.neighbors[internal_id as usize][layer].clone();
        for &neighbor in &my_neighbors {
            let nid = neighbor as usize;
            while graph.neighbors[nid].len() <= layer {
                graph.neighbors[nid].push(Vec::new());
            }
            graph.neighbors[nid][layer].push(internal_id);

            if graph.neighbors[nid][layer].len() > m_max {
                let over: Vec<(f32, u32)> = graph.neighbors[nid][layer]
                    .iter()
                    .map(|&cid| (oracle_between(oracle, neighbor, cid, internal_id), cid))
                    .collect();
                let pruned = select_neighbors(&over, m_max, |a, b| {
                    oracle_between(oracle, a, b, internal_id)
                });
                graph.neighbors[nid][layer] = pruned.iter().map(|&(_, id)| id).collect();
            }
        }
    }

    if level > graph.max_layer {
        graph.max_layer = level;
        graph.entry_point = Some(internal_id);
    } else if graph.neighbors[internal_id as usize]
        .iter()
        .all(Vec::is_empty)
    {
        // No live candidates anywhere (every reachable node is
        // tombstoned): take over as entry so the node stays reachable.
        graph.entry_point = Some(internal_id);
    }

    Ok(internal_id)
}

/// Distance between two nodes where either may be the node currently being
/// inserted, which the oracle only knows as "the query".
#[inline]
fn oracle_between<O: DistanceOracle>(oracle: &O, a: u32, b: u32, inserting: u32) -> f32 {
    if a == inserting {
        oracle.to_query(b)
    } else if b == inserting {
        oracle.to_query(a)
    } else {
        oracle.between(a, b)
    }
}

/// Diversity-based neighbor selection.
///
/// Candidates are considered in ascending `(distance, id)` order — the id
/// component is the deterministic tie-break, so topology is reproducible.
/// A candidate is kept only if it is at least as close to the base as to
/// every already-selected neighbor; this relative-neighborhood pruning
/// avoids redundant clusters and preserves the long-range edges
/// logarithmic search depends on. Leftover slots are filled with the
/// closest rejected candidates.
pub(crate) fn select_neighbors(
    candidates: &[(f32, u32)],
    m: usize,
    pairwise: impl Fn(u32, u32) -> f32,
) -> Vec<(f32, u32)> {
    let mut sorted = candidates.to_vec();
    sorted.sort_unstable_by_key(|&(d, id)| (OrderedFloat(d), id));
    sorted.dedup_by_key(|&mut (_, id)| id);

    let mut selected: Vec<(f32, u32)> = Vec::with_capacity(m);
    for &(dist_to_base, cid) in &sorted {
        if selected.len() >= m {
            break;
        }
        let is_diverse = selected
            .iter()
            .all(|&(_, sid)| dist_to_base <= pairwise(cid, sid));
        if is_diverse {
            selected.push((dist_to_base, cid));
        }
    }

    if selected.len() < m {
        for &(dist, cid) in &sorted {
            if selected.len() >= m {
                break;
            }
            if !selected.iter().any(|&(_, id)| id == cid) {
                selected.push((dist, cid));
            }
        }
    }

    selected
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::GraphConfig;
    use rand::SeedableRng;

    /// Oracle over 2-d points with an explicit query point.
    struct PlaneOracle {
        points: Vec<[f32; 2]>,
        query: [f32; 2],
    }

    impl PlaneOracle {
        fn d(a: [f32; 2], b: [f32; 2]) -> f32 {
            let dx = a[0] - b[0];
            let dy = a[1] - b[1];
            dx * dx + dy * dy
        }
    }

    impl DistanceOracle for PlaneOracle {
        fn to_query(&self, node: u32) -> f32 {
            Self::d(self.points[node as usize], self.query)
        }
        fn between(&self, a: u32, b: u32) -> f32 {
            Self::d(self.points[a as usize], self.points[b as usize])
        }
    }

    fn build(points: &[[f32; 2]], seed: u64) -> ProximityGraph {
        let mut graph = ProximityGraph::new(GraphConfig {
            m: 4,
            m_max0: 8,
            ef_construction: 16,
            ..GraphConfig::default()
        });
        let mut rng = StdRng::seed_from_u64(seed);
        let mut visited = VisitedSet::default();
        let mut stored = Vec::new();
        for &p in points {
            stored.push(p);
            let oracle = PlaneOracle {
                points: stored.clone(),
                query: p,
            };
            insert(&mut graph, &oracle, &mut rng, &mut visited).unwrap();
        }
        graph
    }

    fn grid_points(n: usize) -> Vec<[f32; 2]> {
        (0..n)
            .map(|i| [(i % 8) as f32, (i / 8) as f32])
            .collect()
    }

    #[test]
    fn test_insert_respects_degree_bounds_and_validates() {
        let graph = build(&grid_points(64), 1);
        assert_eq!(graph.node_count(), 64);
        graph.validate().expect("structurally valid graph");
        for node in 0..64u32 {
            for layer in 0..graph.neighbors[node as usize].len() {
                assert!(
                    graph.neighbors_at(node, layer).len() <= graph.config.max_degree(layer),
                    "degree bound violated at node {node} layer {layer}"
                );
            }
        }
    }

    #[test]
    fn test_construction_is_reproducible_for_fixed_seed() {
        let a = build(&grid_points(32), 42);
        let b = build(&grid_points(32), 42);
        assert_eq!(a.neighbors, b.neighbors);
        assert_eq!(a.layers, b.layers);
        assert_eq!(a.entry_point, b.entry_point);
    }

    #[test]
    fn test_layer_zero_stays_connected() {
        let graph = build(&grid_points(48), 7);
        let entry = graph.entry_point.unwrap();
        // BFS over layer 0, treating edges as undirected (links are
        // installed symmetrically; pruning may drop one direction).
        let mut adjacency = vec![Vec::new(); graph.node_count()];
        for node in 0..graph.node_count() as u32 {
            for &nb in graph.neighbors_at(node, 0) {
                adjacency[node as usize].push(nb);
                adjacency[nb as usize].push(node);
            }
        }
        let mut seen = vec![false; graph.node_count()];
        let mut queue = vec![entry];
        seen[entry as usize] = true;
        while let Some(node) = queue.pop() {
            for &nb in &adjacency[node as usize] {
                if !seen[nb as usize] {
                    seen[nb as usize] = true;
                    queue.push(nb);
                }
            }
        }
        assert!(seen.iter().all(|&s| s), "layer 0 must be connected");
    }

    #[test]
    fn test_select_neighbors_prefers_diverse_set() {
        // Base at origin; two near-duplicates and one farther, spread-out
        // point. With m=2 the heuristic must skip the duplicate.
        let points = vec![[1.0, 0.0], [1.1, 0.0], [0.0, 3.0]];
        let dist = |a: u32, b: u32| {
            let pa = points[a as usize];
            let pb = points[b as usize];
            let dx = pa[0] - pb[0];
            let dy = pa[1] - pb[1];
            dx * dx + dy * dy
        };
        let candidates: Vec<(f32, u32)> = (0..3)
            .map(|i| {
                let p = points[i as usize];
                (p[0] * p[0] + p[1] * p[1], i)
            })
            .collect();
        let selected = select_neighbors(&candidates, 2, dist);
        let ids: Vec<u32> = selected.iter().map(|&(_, id)| id).collect();
        assert_eq!(ids, vec![0, 2], "near-duplicate 1 should be pruned");
    }

    #[test]
    fn test_select_neighbors_tie_break_is_lower_id() {
        // Two candidates at identical distance from the base and far from
        // each other: both are diverse, and the lower id must come first.
        let candidates = vec![(1.0, 9u32), (1.0, 3u32)];
        let selected = select_neighbors(&candidates, 1, |_, _| 10.0);
        assert_eq!(selected[0].1, 3);
    }
}
