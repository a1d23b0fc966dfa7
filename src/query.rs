//! Query engine: search orchestration over the proximity graph.
//!
//! A search validates the query vector, clamps `ef` to at least `k`,
//! traverses the graph with approximate (quantized) distances when a
//! codebook is installed, re-ranks the surviving candidates with exact
//! distances from the vector store, applies the optional metadata
//! post-filter, and truncates to `k`. Exact re-ranking bounds the recall
//! loss introduced by approximate distances during traversal.

use crate::config;
use crate::error::{Error, Result};
use crate::graph::{self, CancelToken, VisitedSet};
use crate::index::{ExactOracle, IndexData, QuantizedOracle};
use crate::record::MetadataValue;
use crate::VectorId;
use ordered_float::OrderedFloat;
use std::cell::RefCell;
use std::collections::HashMap;

thread_local! {
    /// Per-thread visited-set pool: searches run under the index read lock,
    /// so traversal scratch state cannot live in the shared index.
    static SEARCH_VISITED: RefCell<VisitedSet> = RefCell::new(VisitedSet::default());
}

/// Metadata predicate applied after candidate retrieval.
///
/// Post-filtering (rather than pushing the predicate into traversal) is
/// deliberate: predicate selectivity is unknown to the index, so callers
/// with selective filters should raise `ef` instead.
pub type PostFilter<'a> = &'a dyn Fn(&HashMap<String, MetadataValue>) -> bool;

/// Tunable parameters for a single search request.
#[derive(Default)]
pub struct SearchParams<'a> {
    /// Beam width at layer 0. Defaults to the graph's `ef_search`;
    /// always clamped to at least `k`.
    pub ef: Option<usize>,
    /// Optional metadata post-filter.
    pub post_filter: Option<PostFilter<'a>>,
    /// Optional cooperative cancellation token.
    pub cancel: Option<CancelToken>,
}

/// One search hit: a vector id and its exact distance to the query.
///
/// Distances are ascending-is-better for every metric (dot product is
/// negated), so results sort ascending regardless of metric.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    pub id: VectorId,
    pub distance: f32,
}

/// An ordered sequence of hits, ascending by distance, length <= `k`.
pub type SearchResult = Vec<Neighbor>;

/// Run a search against a consistent view of the index.
pub(crate) fn execute_search(
    data: &IndexData,
    query: &[f32],
    k: usize,
    params: &SearchParams<'_>,
) -> Result<SearchResult> {
    if query.len() != data.config.dimension {
        return Err(Error::DimensionMismatch {
            expected: data.config.dimension,
            actual: query.len(),
        });
    }
    if k == 0 {
        return Ok(Vec::new());
    }
    let k = k.min(config::MAX_K);
    let ef = params.ef.unwrap_or(data.graph.config.ef_search).max(k);
    let cancel = params.cancel.as_ref();

    let candidates = SEARCH_VISITED.with(|cell| {
        let mut visited = cell.borrow_mut();
        visited.grow(data.graph.node_count());
        match &data.codebook {
            Some(codebook) => {
                let oracle = QuantizedOracle::new(data, codebook.as_ref(), query);
                graph::search::search(&data.graph, &oracle, ef, &mut *visited, cancel)
            }
            None => {
                let oracle = ExactOracle::new(data, query);
                graph::search::search(&data.graph, &oracle, ef, &mut *visited, cancel)
            }
        }
    })?;

    // Exact re-rank from the vector store, then post-filter and truncate.
    let mut hits: Vec<Neighbor> = Vec::with_capacity(candidates.len());
    for (_, node) in candidates {
        let id = data.internal_to_id[node as usize];
        let record = data
            .store
            .get(id)
            .ok_or_else(|| Error::InternalInconsistency(format!("node {node} has no record")))?;
        if let Some(filter) = params.post_filter {
            if !filter(&record.metadata) {
                continue;
            }
        }
        hits.push(Neighbor {
            id,
            distance: data.config.metric.distance(query, &record.vector),
        });
    }

    hits.sort_unstable_by_key(|n| (OrderedFloat(n.distance), n.id));
    hits.truncate(k);
    Ok(hits)
}
