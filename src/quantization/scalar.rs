//! Scalar quantization: f32 → u8 with a trained per-dimension codebook.
//!
//! Training scans a representative sample and records, for every dimension,
//! the observed min and the step `(max - min) / 255`. Encoding maps each
//! component to \[0, 255\] against its own dimension's range; values outside
//! the trained range clamp to the boundary codes.
//!
//! Asymmetric distance functions keep the query at full f32 precision and
//! reconstruct stored components on the fly, using chunked loops with f64
//! accumulation at chunk boundaries.

use crate::distance::DistanceMetric;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// Trained per-dimension scalar quantization parameters.
///
/// `steps[d]` is zero when dimension `d` was constant over the training
/// sample; such dimensions encode to 0 and decode to `mins[d]`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScalarCodebook {
    pub mins: Vec<f32>,
    pub steps: Vec<f32>,
}

impl ScalarCodebook {
    /// Train per-dimension ranges over a sample of full-precision vectors.
    ///
    /// All sample vectors must have length `dim`; the engine validates this
    /// before calling. Fails with `InsufficientSamples` on an empty sample.
    pub fn train(sample: &[Vec<f32>], dim: usize) -> Result<Self> {
        if sample.is_empty() {
            return Err(Error::InsufficientSamples {
                required: 1,
                actual: 0,
            });
        }

        let mut mins = vec![f32::MAX; dim];
        let mut maxs = vec![f32::MIN; dim];
        for v in sample {
            debug_assert_eq!(v.len(), dim);
            for d in 0..dim {
                if v[d] < mins[d] {
                    mins[d] = v[d];
                }
                if v[d] > maxs[d] {
                    maxs[d] = v[d];
                }
            }
        }

        let steps = mins
            .iter()
            .zip(&maxs)
            .map(|(&lo, &hi)| {
                let range = hi - lo;
                if range < f32::EPSILON {
                    0.0
                } else {
                    range / 255.0
                }
            })
            .collect();

        Ok(Self { mins, steps })
    }

    /// Dimensionality this codebook was trained for.
    pub fn dim(&self) -> usize {
        self.mins.len()
    }

    /// Encode a vector to one byte per dimension. Deterministic for a fixed
    /// codebook; out-of-range components clamp.
    pub fn encode(&self, vector: &[f32]) -> Vec<u8> {
        debug_assert_eq!(vector.len(), self.dim());
        vector
            .iter()
            .enumerate()
            .map(|(d, &v)| {
                let step = self.steps[d];
                if step == 0.0 {
                    0
                } else {
                    ((v - self.mins[d]) / step).round().clamp(0.0, 255.0) as u8
                }
            })
            .collect()
    }

    /// Reconstruct an approximate vector. Lossy; diagnostics only.
    pub fn decode(&self, codes: &[u8]) -> Vec<f32> {
        debug_assert_eq!(codes.len(), self.dim());
        codes
            .iter()
            .enumerate()
            .map(|(d, &c)| self.mins[d] + c as f32 * self.steps[d])
            .collect()
    }

    /// Asymmetric distance from an f32 query to a stored code under `metric`.
    ///
    /// `query_norm_sq` is the precomputed sum of squares of the query,
    /// consulted only by the cosine path.
    pub fn distance_asym(
        &self,
        metric: DistanceMetric,
        query: &[f32],
        codes: &[u8],
        query_norm_sq: f32,
    ) -> f32 {
        match metric {
            DistanceMetric::Euclidean => euclidean_sq_asym(query, codes, self),
            DistanceMetric::Cosine => {
                1.0 - cosine_similarity_asym(query, codes, self, query_norm_sq)
            }
            DistanceMetric::DotProduct => -dot_product_asym(query, codes, self),
        }
    }
}

/// SIMD-friendly chunk size: 8 × f32 = one 256-bit register.
const CHUNK: usize = 8;

/// Asymmetric squared Euclidean distance: f32 query vs per-dimension u8 code.
pub fn euclidean_sq_asym(query: &[f32], codes: &[u8], cb: &ScalarCodebook) -> f32 {
    debug_assert_eq!(query.len(), codes.len());
    let len = query.len();
    let mut sum = 0.0f64;

    let full_chunks = len / CHUNK;
    for c in 0..full_chunks {
        let base = c * CHUNK;
        let mut acc = 0.0f32;
        for j in 0..CHUNK {
            let d = base + j;
            let s = cb.mins[d] + codes[d] as f32 * cb.steps[d];
            let diff = query[d] - s;
            acc += diff * diff;
        }
        sum += acc as f64;
    }

    for d in (full_chunks * CHUNK)..len {
        let s = (cb.mins[d] + codes[d] as f32 * cb.steps[d]) as f64;
        let diff = query[d] as f64 - s;
        sum += diff * diff;
    }

    sum as f32
}

/// Asymmetric dot product: f32 query vs per-dimension u8 code.
pub fn dot_product_asym(query: &[f32], codes: &[u8], cb: &ScalarCodebook) -> f32 {
    debug_assert_eq!(query.len(), codes.len());
    let len = query.len();
    let mut sum = 0.0f64;

    let full_chunks = len / CHUNK;
    for c in 0..full_chunks {
        let base = c * CHUNK;
        let mut acc = 0.0f32;
        for j in 0..CHUNK {
            let d = base + j;
            let s = cb.mins[d] + codes[d] as f32 * cb.steps[d];
            acc += query[d] * s;
        }
        sum += acc as f64;
    }

    for d in (full_chunks * CHUNK)..len {
        let s = (cb.mins[d] + codes[d] as f32 * cb.steps[d]) as f64;
        sum += query[d] as f64 * s;
    }

    sum as f32
}

/// Asymmetric cosine similarity with precomputed query norm squared.
pub fn cosine_similarity_asym(
    query: &[f32],
    codes: &[u8],
    cb: &ScalarCodebook,
    query_norm_sq: f32,
) -> f32 {
    debug_assert_eq!(query.len(), codes.len());
    if query_norm_sq < 1e-10 {
        return 0.0;
    }

    let len = query.len();
    let mut dot = 0.0f64;
    let mut norm_s = 0.0f64;

    let full_chunks = len / CHUNK;
    for c in 0..full_chunks {
        let base = c * CHUNK;
        let mut cd = 0.0f32;
        let mut cns = 0.0f32;
        for j in 0..CHUNK {
            let d = base + j;
            let s = cb.mins[d] + codes[d] as f32 * cb.steps[d];
            cd += query[d] * s;
            cns += s * s;
        }
        dot += cd as f64;
        norm_s += cns as f64;
    }

    for d in (full_chunks * CHUNK)..len {
        let s = (cb.mins[d] + codes[d] as f32 * cb.steps[d]) as f64;
        dot += query[d] as f64 * s;
        norm_s += s * s;
    }

    let denom = (query_norm_sq as f64).sqrt() * norm_s.sqrt();
    if denom < 1e-10 {
        return 0.0;
    }
    (dot / denom) as f32
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_8d() -> Vec<Vec<f32>> {
        vec![
            vec![-1.0, -0.5, 0.0, 0.5, 1.0, -1.0, 0.0, 1.0],
            vec![1.0, 0.5, -0.5, -1.0, 0.0, 1.0, -1.0, 0.0],
            vec![0.0, 1.0, 1.0, 0.0, -1.0, 0.5, 0.5, -1.0],
        ]
    }

    #[test]
    fn test_train_records_per_dimension_ranges() {
        let cb = ScalarCodebook::train(&sample_8d(), 8).unwrap();
        assert_eq!(cb.dim(), 8);
        assert_eq!(cb.mins[0], -1.0);
        // dim 0 spans [-1, 1], so step = 2/255
        assert!((cb.steps[0] - 2.0 / 255.0).abs() < 1e-6);
    }

    #[test]
    fn test_train_empty_sample_fails() {
        let err = ScalarCodebook::train(&[], 8).unwrap_err();
        assert!(matches!(err, Error::InsufficientSamples { .. }));
    }

    #[test]
    fn test_encode_decode_roundtrip_error_bound() {
        let cb = ScalarCodebook::train(&sample_8d(), 8).unwrap();
        let v = vec![0.3, -0.2, 0.7, 0.1, -0.9, 0.0, 0.25, -0.5];
        let decoded = cb.decode(&cb.encode(&v));
        for (orig, dec) in v.iter().zip(&decoded) {
            // max per-dimension error is step/2 ≈ 0.004 for a [-1,1] range
            assert!((orig - dec).abs() < 0.01, "orig={orig} dec={dec}");
        }
    }

    #[test]
    fn test_constant_dimension_encodes_to_zero() {
        let sample = vec![vec![5.0, 1.0], vec![5.0, 2.0]];
        let cb = ScalarCodebook::train(&sample, 2).unwrap();
        assert_eq!(cb.steps[0], 0.0);
        let codes = cb.encode(&[5.0, 1.5]);
        assert_eq!(codes[0], 0);
        assert_eq!(cb.decode(&codes)[0], 5.0);
    }

    #[test]
    fn test_out_of_range_clamps() {
        let cb = ScalarCodebook::train(&sample_8d(), 8).unwrap();
        let mut v = vec![0.0; 8];
        v[0] = 100.0;
        v[1] = -100.0;
        let codes = cb.encode(&v);
        assert_eq!(codes[0], 255);
        assert_eq!(codes[1], 0);
    }

    #[test]
    fn test_asym_euclidean_matches_exact_on_decoded() {
        let cb = ScalarCodebook::train(&sample_8d(), 8).unwrap();
        let stored = vec![0.3, -0.2, 0.7, 0.1, -0.9, 0.0, 0.25, -0.5];
        let query = vec![0.1, 0.4, -0.6, 0.9, 0.2, -0.3, 0.5, 0.0];
        let codes = cb.encode(&stored);
        let asym = euclidean_sq_asym(&query, &codes, &cb);
        let exact = crate::distance::euclidean_sq(&query, &cb.decode(&codes));
        assert!((asym - exact).abs() < 1e-4, "asym={asym} exact={exact}");
    }

    #[test]
    fn test_asym_cosine_self_similarity() {
        let cb = ScalarCodebook::train(&sample_8d(), 8).unwrap();
        let v = vec![0.5, -0.5, 0.25, 0.75, -0.25, 0.0, 1.0, -1.0];
        let codes = cb.encode(&v);
        let norm_sq: f32 = v.iter().map(|x| x * x).sum();
        let sim = cosine_similarity_asym(&v, &codes, &cb, norm_sq);
        assert!(sim > 0.99, "self-similarity should be ~1.0, got {sim}");
    }
}
