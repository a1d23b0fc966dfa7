//! Product quantization (PQ) for fast approximate distance computation.
//!
//! Splits vectors into `m` contiguous subspaces and learns `2^bits`
//! centroids per subspace via k-means. Each vector is encoded as `m` bytes
//! (one centroid index per subspace). Query-time distance uses a precomputed
//! lookup table: `m` table lookups + `m` additions instead of `D`
//! multiply-adds, without ever decompressing the stored vector.
//!
//! An optional learned rotation is applied to the input space before
//! splitting (see [`rotation`](super::rotation)); the rotation is part of
//! the trained codebook and is applied to queries before table construction.

use crate::config;
use crate::distance::DistanceMetric;
use crate::error::{Error, Result};
use crate::quantization::rotation::RotationMatrix;
use rand::rngs::StdRng;
use rand::Rng;
use serde::{Deserialize, Serialize};

/// PQ codebook: `m` subspaces × `k` centroids × `sub_dim` floats, plus the
/// optional input rotation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PqCodebook {
    pub num_subspaces: usize,
    pub num_centroids: usize,
    pub sub_dim: usize,
    /// Flat centroid arena: `centroids[m * k * sub_dim + c * sub_dim ..]`.
    pub centroids: Vec<f32>,
    /// Learned rotation applied before subspace splitting, if trained with one.
    pub rotation: Option<RotationMatrix>,
}

/// Precomputed partial-distance table for a single query: `[m][k]`.
pub struct PqDistanceTable {
    pub table: Vec<f32>,
    pub num_subspaces: usize,
    pub num_centroids: usize,
}

impl PqCodebook {
    /// Train a PQ codebook over a sample of full-precision vectors.
    ///
    /// `subspaces` must divide `dim`; `bits` must lie in 4..=8 so a code
    /// fits one byte per subspace. Fails with `InsufficientSamples` when the
    /// sample is smaller than the configured multiple of the centroid count
    /// (k-means is statistically unstable below that).
    pub fn train(
        sample: &[Vec<f32>],
        dim: usize,
        subspaces: usize,
        bits: u8,
        rotate: bool,
        rng: &mut StdRng,
    ) -> Result<Self> {
        if subspaces == 0 || dim % subspaces != 0 {
            return Err(Error::InvalidConfig(format!(
                "subspace count {subspaces} must divide dimension {dim}"
            )));
        }
        if !(4..=8).contains(&bits) {
            return Err(Error::InvalidConfig(format!(
                "PQ bits must be in 4..=8, got {bits}"
            )));
        }
        let k = 1usize << bits;
        let required = config::PQ_MIN_TRAIN_POINTS_PER_CENTROID * k;
        if sample.len() < required {
            return Err(Error::InsufficientSamples {
                required,
                actual: sample.len(),
            });
        }

        let rotation = rotate.then(|| RotationMatrix::random_orthonormal(dim, rng));

        // Flatten the (possibly rotated) sample into a contiguous arena.
        let n = sample.len();
        let mut arena = vec![0.0f32; n * dim];
        for (i, v) in sample.iter().enumerate() {
            debug_assert_eq!(v.len(), dim);
            match &rotation {
                Some(rot) => arena[i * dim..(i + 1) * dim].copy_from_slice(&rot.apply(v)),
                None => arena[i * dim..(i + 1) * dim].copy_from_slice(v),
            }
        }

        let sub_dim = dim / subspaces;
        let mut centroids = vec![0.0f32; subspaces * k * sub_dim];
        let mut sub_vectors = vec![0.0f32; n * sub_dim];

        for sub in 0..subspaces {
            for i in 0..n {
                let src = i * dim + sub * sub_dim;
                sub_vectors[i * sub_dim..(i + 1) * sub_dim]
                    .copy_from_slice(&arena[src..src + sub_dim]);
            }
            let sub_centroids = kmeans(&sub_vectors, sub_dim, k, rng);
            let out = sub * k * sub_dim;
            centroids[out..out + k * sub_dim].copy_from_slice(&sub_centroids);
        }

        Ok(Self {
            num_subspaces: subspaces,
            num_centroids: k,
            sub_dim,
            centroids,
            rotation,
        })
    }

    /// Dimensionality this codebook was trained for.
    pub fn dim(&self) -> usize {
        self.num_subspaces * self.sub_dim
    }

    /// Encode a vector into `m` centroid indices. Deterministic for a fixed
    /// codebook.
    pub fn encode(&self, vector: &[f32]) -> Vec<u8> {
        debug_assert_eq!(vector.len(), self.dim());
        let rotated;
        let v: &[f32] = match &self.rotation {
            Some(rot) => {
                rotated = rot.apply(vector);
                &rotated
            }
            None => vector,
        };

        let mut codes = Vec::with_capacity(self.num_subspaces);
        for sub in 0..self.num_subspaces {
            let sub_vec = &v[sub * self.sub_dim..(sub + 1) * self.sub_dim];
            codes.push(self.nearest_centroid(sub, sub_vec));
        }
        codes
    }

    /// Reconstruct an approximate vector by concatenating centroids and
    /// undoing the rotation. Diagnostics only, never on the query hot path.
    pub fn decode(&self, codes: &[u8]) -> Vec<f32> {
        debug_assert_eq!(codes.len(), self.num_subspaces);
        let mut out = vec![0.0f32; self.dim()];
        for (sub, &code) in codes.iter().enumerate() {
            let c = self.centroid(sub, code as usize);
            out[sub * self.sub_dim..(sub + 1) * self.sub_dim].copy_from_slice(c);
        }
        match &self.rotation {
            Some(rot) => rot.apply_inverse(&out),
            None => out,
        }
    }

    /// Build the per-query partial-distance lookup table.
    ///
    /// The result is a monotonic approximation of the true distance: good
    /// enough to order the beam, with ties and residual error resolved by
    /// exact re-ranking downstream.
    pub fn build_distance_table(&self, query: &[f32], metric: DistanceMetric) -> PqDistanceTable {
        debug_assert_eq!(query.len(), self.dim());
        let rotated;
        let q: &[f32] = match &self.rotation {
            Some(rot) => {
                rotated = rot.apply(query);
                &rotated
            }
            None => query,
        };

        let k = self.num_centroids;
        let mut table = vec![0.0f32; self.num_subspaces * k];

        for sub in 0..self.num_subspaces {
            let q_sub = &q[sub * self.sub_dim..(sub + 1) * self.sub_dim];
            for ci in 0..k {
                let centroid = self.centroid(sub, ci);
                table[sub * k + ci] = match metric {
                    DistanceMetric::Euclidean => {
                        let mut sum = 0.0f32;
                        for d in 0..self.sub_dim {
                            let diff = q_sub[d] - centroid[d];
                            sum += diff * diff;
                        }
                        sum
                    }
                    // Cosine uses dot product as a proxy; exact re-ranking
                    // fixes the final order.
                    DistanceMetric::DotProduct | DistanceMetric::Cosine => {
                        let mut sum = 0.0f32;
                        for d in 0..self.sub_dim {
                            sum += q_sub[d] * centroid[d];
                        }
                        -sum
                    }
                };
            }
        }

        PqDistanceTable {
            table,
            num_subspaces: self.num_subspaces,
            num_centroids: k,
        }
    }

    #[inline]
    fn centroid(&self, subspace: usize, index: usize) -> &[f32] {
        let start = subspace * self.num_centroids * self.sub_dim + index * self.sub_dim;
        &self.centroids[start..start + self.sub_dim]
    }

    /// Nearest centroid in a subspace by squared Euclidean distance.
    /// On equal distance the lower index wins.
    #[inline]
    fn nearest_centroid(&self, subspace: usize, sub_vec: &[f32]) -> u8 {
        let mut best_idx = 0u8;
        let mut best_dist = f32::MAX;
        for ci in 0..self.num_centroids {
            let d = sq_dist(sub_vec, self.centroid(subspace, ci));
            if d < best_dist {
                best_dist = d;
                best_idx = ci as u8;
            }
        }
        best_idx
    }
}

impl PqDistanceTable {
    /// Approximate distance for a PQ-encoded vector: `m` lookups + adds.
    #[inline]
    pub fn distance(&self, codes: &[u8]) -> f32 {
        debug_assert_eq!(codes.len(), self.num_subspaces);
        let k = self.num_centroids;
        let mut dist = 0.0f32;
        for (sub, &code) in codes.iter().enumerate() {
            dist += self.table[sub * k + code as usize];
        }
        dist
    }
}

/// K-means with k-means++ initialization over a flat sub-vector arena.
/// Returns `k × sub_dim` centroids. Empty clusters keep their previous
/// position.
fn kmeans(data: &[f32], sub_dim: usize, k: usize, rng: &mut StdRng) -> Vec<f32> {
    let n = data.len() / sub_dim;
    if n <= k {
        // Fewer points than centroids: each point seeds its own centroid,
        // the rest stay at the origin. Callers gate on sample size, so this
        // only happens in tests with tiny k.
        let mut centroids = vec![0.0f32; k * sub_dim];
        centroids[..n * sub_dim].copy_from_slice(&data[..n * sub_dim]);
        return centroids;
    }

    let mut centroids = vec![0.0f32; k * sub_dim];

    // K-means++: first centroid uniform, the rest weighted by distance².
    let first = rng.gen_range(0..n);
    centroids[..sub_dim].copy_from_slice(&data[first * sub_dim..(first + 1) * sub_dim]);

    let mut min_dists = vec![f32::MAX; n];
    for ci in 1..k {
        let last = &centroids[(ci - 1) * sub_dim..ci * sub_dim];
        let mut total = 0.0f64;
        for i in 0..n {
            let d = sq_dist(&data[i * sub_dim..(i + 1) * sub_dim], last);
            if d < min_dists[i] {
                min_dists[i] = d;
            }
            total += min_dists[i] as f64;
        }

        if total < 1e-30 {
            // All points coincide with existing centroids.
            let idx = rng.gen_range(0..n);
            centroids[ci * sub_dim..(ci + 1) * sub_dim]
                .copy_from_slice(&data[idx * sub_dim..(idx + 1) * sub_dim]);
            continue;
        }
        let threshold = rng.gen::<f64>() * total;
        let mut cumulative = 0.0f64;
        let mut chosen = n - 1;
        for (i, &d) in min_dists.iter().enumerate() {
            cumulative += d as f64;
            if cumulative >= threshold {
                chosen = i;
                break;
            }
        }
        centroids[ci * sub_dim..(ci + 1) * sub_dim]
            .copy_from_slice(&data[chosen * sub_dim..(chosen + 1) * sub_dim]);
    }

    // Lloyd iterations.
    let mut assignments = vec![0u8; n];
    let mut counts = vec![0u32; k];
    let mut sums = vec![0.0f32; k * sub_dim];

    for _ in 0..config::PQ_KMEANS_ITERATIONS {
        for i in 0..n {
            let point = &data[i * sub_dim..(i + 1) * sub_dim];
            let mut best = 0u8;
            let mut best_dist = f32::MAX;
            for ci in 0..k {
                let d = sq_dist(point, &centroids[ci * sub_dim..(ci + 1) * sub_dim]);
                if d < best_dist {
                    best_dist = d;
                    best = ci as u8;
                }
            }
            assignments[i] = best;
        }

        counts.fill(0);
        sums.fill(0.0);
        for i in 0..n {
            let ci = assignments[i] as usize;
            counts[ci] += 1;
            let point = &data[i * sub_dim..(i + 1) * sub_dim];
            let s = &mut sums[ci * sub_dim..(ci + 1) * sub_dim];
            for d in 0..sub_dim {
                s[d] += point[d];
            }
        }
        for ci in 0..k {
            if counts[ci] > 0 {
                let inv = 1.0 / counts[ci] as f32;
                for d in 0..sub_dim {
                    centroids[ci * sub_dim + d] = sums[ci * sub_dim + d] * inv;
                }
            }
        }
    }

    centroids
}

/// Squared Euclidean distance between two sub-vectors.
#[inline]
fn sq_dist(a: &[f32], b: &[f32]) -> f32 {
    let mut sum = 0.0f32;
    for i in 0..a.len() {
        let d = a[i] - b[i];
        sum += d * d;
    }
    sum
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    /// 2 * PQ_MIN_TRAIN_POINTS_PER_CENTROID * 16 points on a grid in [-1,1]^8.
    fn training_sample(n: usize, dim: usize, seed: u64) -> Vec<Vec<f32>> {
        let mut rng = StdRng::seed_from_u64(seed);
        (0..n)
            .map(|_| (0..dim).map(|_| rng.gen_range(-1.0..1.0)).collect())
            .collect()
    }

    #[test]
    fn test_train_rejects_small_sample() {
        let sample = training_sample(10, 8, 1);
        let mut rng = StdRng::seed_from_u64(1);
        let err = PqCodebook::train(&sample, 8, 4, 4, false, &mut rng).unwrap_err();
        assert!(matches!(err, Error::InsufficientSamples { .. }));
    }

    #[test]
    fn test_train_rejects_bad_subspaces() {
        let sample = training_sample(200, 8, 2);
        let mut rng = StdRng::seed_from_u64(2);
        let err = PqCodebook::train(&sample, 8, 3, 4, false, &mut rng).unwrap_err();
        assert!(matches!(err, Error::InvalidConfig(_)));
    }

    #[test]
    fn test_encode_width_and_determinism() {
        let sample = training_sample(200, 8, 3);
        let mut rng = StdRng::seed_from_u64(3);
        let cb = PqCodebook::train(&sample, 8, 4, 4, false, &mut rng).unwrap();
        assert_eq!(cb.num_centroids, 16);
        let v = vec![0.1, -0.2, 0.3, -0.4, 0.5, -0.6, 0.7, -0.8];
        let c1 = cb.encode(&v);
        assert_eq!(c1.len(), 4);
        assert_eq!(c1, cb.encode(&v));
    }

    #[test]
    fn test_decode_reconstruction_reasonable() {
        let sample = training_sample(2048, 8, 4);
        let mut rng = StdRng::seed_from_u64(4);
        let cb = PqCodebook::train(&sample, 8, 4, 8, false, &mut rng).unwrap();
        // Held-out vector from the same distribution.
        let v = vec![0.25, -0.5, 0.75, 0.0, -0.25, 0.5, -0.75, 0.1];
        let dec = cb.decode(&cb.encode(&v));
        let err = crate::distance::euclidean_sq(&v, &dec).sqrt();
        // 256 centroids over 2 dims per subspace in [-1,1] keeps error small.
        assert!(err < 0.5, "reconstruction error too large: {err}");
    }

    #[test]
    fn test_adc_table_matches_decoded_distance() {
        let sample = training_sample(512, 8, 5);
        let mut rng = StdRng::seed_from_u64(5);
        let cb = PqCodebook::train(&sample, 8, 4, 6, false, &mut rng).unwrap();
        let stored = vec![0.2, -0.1, 0.4, -0.3, 0.6, -0.5, 0.8, -0.7];
        let query = vec![-0.3, 0.2, -0.1, 0.4, -0.5, 0.6, -0.7, 0.8];
        let codes = cb.encode(&stored);

        let table = cb.build_distance_table(&query, DistanceMetric::Euclidean);
        let adc = table.distance(&codes);
        let exact = crate::distance::euclidean_sq(&query, &cb.decode(&codes));
        assert!((adc - exact).abs() < 1e-3, "adc={adc} exact={exact}");
    }

    #[test]
    fn test_rotation_roundtrip_through_codebook() {
        let sample = training_sample(512, 8, 6);
        let mut rng = StdRng::seed_from_u64(6);
        let cb = PqCodebook::train(&sample, 8, 4, 8, true, &mut rng).unwrap();
        assert!(cb.rotation.is_some());
        let v = vec![0.1, 0.2, 0.3, -0.1, -0.2, -0.3, 0.0, 0.4];
        let dec = cb.decode(&cb.encode(&v));
        let err = crate::distance::euclidean_sq(&v, &dec).sqrt();
        assert!(err < 0.5, "rotated reconstruction error too large: {err}");
    }

    #[test]
    fn test_adc_orders_separated_clusters() {
        // Two well-separated clusters; ADC distances must rank the near
        // cluster's members ahead of the far cluster's.
        let mut sample = training_sample(256, 8, 7);
        for v in sample.iter_mut().take(128) {
            for x in v.iter_mut() {
                *x += 10.0;
            }
        }
        let mut rng = StdRng::seed_from_u64(7);
        let cb = PqCodebook::train(&sample, 8, 4, 5, false, &mut rng).unwrap();

        let near = vec![0.0; 8];
        let far = vec![10.0; 8];
        let query = vec![0.1; 8];
        let table = cb.build_distance_table(&query, DistanceMetric::Euclidean);
        let d_near = table.distance(&cb.encode(&near));
        let d_far = table.distance(&cb.encode(&far));
        assert!(d_near < d_far, "near={d_near} far={d_far}");
    }
}
