//! Graph compaction: the `tombstoned → purged` transition.
//!
//! Tombstoned nodes are physically removed, surviving nodes are re-indexed
//! densely, and every edge that pointed at a purged node is repaired:
//! re-linked to the best surviving neighbor of the purged node, or dropped
//! when none qualifies. The entry point is re-elected from the highest
//! surviving layer.

use crate::graph::ProximityGraph;
use ordered_float::OrderedFloat;

/// Result of a compaction pass.
#[derive(Debug)]
pub struct CompactionOutcome {
    /// Number of nodes physically removed.
    pub purged: usize,
    /// `remap[old_id] = Some(new_id)` for survivors, `None` for purged.
    pub remap: Vec<Option<u32>>,
}

/// Purge all tombstoned nodes. `dist` measures between two nodes by their
/// **old** internal ids; it is consulted only for edge repair.
pub fn compact(graph: &mut ProximityGraph, dist: impl Fn(u32, u32) -> f32) -> CompactionOutcome {
    let old_count = graph.node_count();
    let purged_count = graph.tombstone_count();

    let mut remap: Vec<Option<u32>> = Vec::with_capacity(old_count);
    let mut next = 0u32;
    for old in 0..old_count {
        if graph.deleted[old] {
            remap.push(None);
        } else {
            remap.push(Some(next));
            next += 1;
        }
    }

    if purged_count == 0 {
        return CompactionOutcome {
            purged: 0,
            remap,
        };
    }

    let mut new_neighbors: Vec<Vec<Vec<u32>>> = Vec::with_capacity(next as usize);
    let mut new_layers: Vec<u8> = Vec::with_capacity(next as usize);

    for old in 0..old_count {
        if graph.deleted[old] {
            continue;
        }
        let node = old as u32;
        let mut repaired_layers: Vec<Vec<u32>> = Vec::with_capacity(graph.neighbors[old].len());

        for (layer, list) in graph.neighbors[old].iter().enumerate() {
            let bound = graph.config.max_degree(layer);
            let mut repaired: Vec<u32> = Vec::with_capacity(list.len());

            for &nb in list {
                let target = if graph.deleted[nb as usize] {
                    // Re-link through the purged node: its closest surviving
                    // neighbor on this layer, by distance to `node` with
                    // lower id breaking ties.
                    graph
                        .neighbors_at(nb, layer)
                        .iter()
                        .copied()
                        .filter(|&c| c != node && !graph.deleted[c as usize])
                        .min_by_key(|&c| (OrderedFloat(dist(node, c)), c))
                } else {
                    Some(nb)
                };
                if let Some(t) = target {
                    if !repaired.contains(&t) {
                        repaired.push(t);
                    }
                }
            }

            repaired.truncate(bound);
            repaired_layers.push(
                repaired
                    .into_iter()
                    .map(|t| remap[t as usize].expect("repair targets are survivors"))
                    .collect(),
            );
        }

        new_neighbors.push(repaired_layers);
        new_layers.push(graph.layers[old]);
    }

    // Re-elect the entry point: highest surviving layer, lowest id on ties.
    let mut entry: Option<u32> = None;
    let mut max_layer = 0usize;
    for (new_id, &layer) in new_layers.iter().enumerate() {
        let layer = layer as usize;
        if entry.is_none() || layer > max_layer {
            entry = Some(new_id as u32);
            max_layer = layer;
        }
    }

    graph.neighbors = new_neighbors;
    graph.layers = new_layers;
    graph.deleted = vec![false; next as usize];
    graph.entry_point = entry;
    graph.max_layer = max_layer;

    tracing::info!(
        "compaction purged {purged_count} of {old_count} nodes, {next} remain"
    );

    CompactionOutcome {
        purged: purged_count,
        remap,
    }
}
