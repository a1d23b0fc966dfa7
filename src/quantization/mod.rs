//! Vector quantization: trained compression of stored vectors.
//!
//! Two schemes are supported. Scalar quantization stores one byte per
//! dimension against trained per-dimension ranges. Product quantization
//! stores one byte per subspace against trained centroid sets, with an
//! optional learned rotation. Either way the query keeps full f32 precision
//! and distances are estimated asymmetrically against the compressed codes;
//! the query engine re-ranks survivors with exact distances.
//!
//! Training is a pure function of its sample: a candidate codebook can be
//! trained while the previous generation keeps serving queries, then
//! installed with a single swap.

/// Product quantization: subspace centroids and ADC lookup tables.
pub mod pq;
/// Learned orthonormal rotation applied before PQ subspace splitting.
pub mod rotation;
/// Scalar quantization with trained per-dimension ranges.
pub mod scalar;

pub use pq::{PqCodebook, PqDistanceTable};
pub use rotation::RotationMatrix;
pub use scalar::ScalarCodebook;

use crate::distance::DistanceMetric;
use crate::error::{Error, Result};
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};

/// Quantizer selection for an index, fixed at creation time.
///
/// The scheme (and therefore the code width) is invariant once a codebook
/// has been trained; retraining replaces centroids/ranges, never the shape.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum QuantizerConfig {
    /// No compression: graph traversal uses exact distances.
    None,
    /// One byte per dimension against per-dimension trained ranges.
    Scalar,
    /// `subspaces` bytes per vector against per-subspace centroid sets.
    Product {
        subspaces: usize,
        bits: u8,
        rotate: bool,
    },
}

impl QuantizerConfig {
    /// Train a codebook for this configuration over a sample.
    pub fn train(&self, sample: &[Vec<f32>], dim: usize, rng: &mut StdRng) -> Result<CodebookKind> {
        match *self {
            QuantizerConfig::None => Err(Error::InvalidConfig(
                "index was created without a quantizer; nothing to train".into(),
            )),
            QuantizerConfig::Scalar => ScalarCodebook::train(sample, dim).map(CodebookKind::Scalar),
            QuantizerConfig::Product {
                subspaces,
                bits,
                rotate,
            } => PqCodebook::train(sample, dim, subspaces, bits, rotate, rng)
                .map(CodebookKind::Product),
        }
    }
}

/// Trained quantizer parameters, one of the two schemes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum CodebookKind {
    Scalar(ScalarCodebook),
    Product(PqCodebook),
}

/// An immutable trained codebook plus its generation number.
///
/// The generation increments on every retrain; persisted codes are only
/// valid against the generation that produced them, which snapshot loading
/// verifies.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Codebook {
    pub generation: u64,
    pub kind: CodebookKind,
}

impl Codebook {
    /// Bytes per encoded vector under this codebook.
    pub fn code_len(&self) -> usize {
        match &self.kind {
            CodebookKind::Scalar(cb) => cb.dim(),
            CodebookKind::Product(cb) => cb.num_subspaces,
        }
    }

    /// Encode a full-precision vector. Deterministic for a fixed codebook.
    pub fn encode(&self, vector: &[f32]) -> Vec<u8> {
        match &self.kind {
            CodebookKind::Scalar(cb) => cb.encode(vector),
            CodebookKind::Product(cb) => cb.encode(vector),
        }
    }

    /// Reconstruct an approximate vector. Diagnostics only.
    pub fn decode(&self, codes: &[u8]) -> Vec<f32> {
        match &self.kind {
            CodebookKind::Scalar(cb) => cb.decode(codes),
            CodebookKind::Product(cb) => cb.decode(codes),
        }
    }

    /// Build a per-query scorer for asymmetric code distances.
    ///
    /// For PQ this precomputes the ADC lookup table once; for scalar it
    /// precomputes the query norm. The scorer borrows the query and must
    /// not outlive it.
    pub fn scorer<'a>(&'a self, metric: DistanceMetric, query: &'a [f32]) -> CodeScorer<'a> {
        match &self.kind {
            CodebookKind::Scalar(cb) => CodeScorer::Scalar {
                codebook: cb,
                metric,
                query,
                query_norm_sq: query.iter().map(|x| x * x).sum(),
            },
            CodebookKind::Product(cb) => {
                CodeScorer::Product(cb.build_distance_table(query, metric))
            }
        }
    }
}

/// Per-query asymmetric distance evaluator over stored codes.
pub enum CodeScorer<'a> {
    Scalar {
        codebook: &'a ScalarCodebook,
        metric: DistanceMetric,
        query: &'a [f32],
        query_norm_sq: f32,
    },
    Product(PqDistanceTable),
}

impl CodeScorer<'_> {
    /// Approximate distance from the query to a stored code.
    #[inline]
    pub fn score(&self, codes: &[u8]) -> f32 {
        match self {
            CodeScorer::Scalar {
                codebook,
                metric,
                query,
                query_norm_sq,
            } => codebook.distance_asym(*metric, query, codes, *query_norm_sq),
            CodeScorer::Product(table) => table.distance(codes),
        }
    }
}
