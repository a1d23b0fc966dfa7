//! Learned rotation for product quantization.
//!
//! Axis-aligned subspace splits waste code capacity when variance
//! concentrates in a few dimensions. Rotating the input space by a random
//! orthonormal matrix spreads variance across subspaces before splitting,
//! which lowers quantization error for anisotropic data. The matrix is
//! drawn from a seeded generator during training and stored in the
//! codebook, so encoding stays deterministic across runs.

use rand::rngs::StdRng;
use rand::Rng;
use serde::{Deserialize, Serialize};

/// A dense orthonormal rotation matrix, row-major `dim × dim`.
///
/// Orthonormality makes the inverse equal to the transpose, so decode
/// applies `transpose · v` with no stored inverse.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RotationMatrix {
    dim: usize,
    /// Row-major entries: `data[r * dim + c]`.
    data: Vec<f32>,
}

impl RotationMatrix {
    /// Sample a random orthonormal matrix: Gaussian entries followed by
    /// Gram–Schmidt orthonormalization of the rows.
    pub fn random_orthonormal(dim: usize, rng: &mut StdRng) -> Self {
        let mut data = vec![0.0f32; dim * dim];
        for v in data.iter_mut() {
            *v = gaussian(rng);
        }

        // Gram–Schmidt over rows. A degenerate (near-zero) residual row is
        // vanishingly unlikely with Gaussian draws; replace it with a basis
        // vector and continue.
        for r in 0..dim {
            for prev in 0..r {
                let mut dot = 0.0f64;
                for c in 0..dim {
                    dot += (data[r * dim + c] * data[prev * dim + c]) as f64;
                }
                for c in 0..dim {
                    data[r * dim + c] -= (dot as f32) * data[prev * dim + c];
                }
            }
            let norm: f64 = (0..dim)
                .map(|c| (data[r * dim + c] as f64).powi(2))
                .sum::<f64>()
                .sqrt();
            if norm < 1e-10 {
                for c in 0..dim {
                    data[r * dim + c] = if c == r { 1.0 } else { 0.0 };
                }
            } else {
                let inv = (1.0 / norm) as f32;
                for c in 0..dim {
                    data[r * dim + c] *= inv;
                }
            }
        }

        Self { dim, data }
    }

    /// Matrix dimension.
    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Apply the rotation: `R · v`.
    pub fn apply(&self, v: &[f32]) -> Vec<f32> {
        debug_assert_eq!(v.len(), self.dim);
        let mut out = vec![0.0f32; self.dim];
        for (r, o) in out.iter_mut().enumerate() {
            let row = &self.data[r * self.dim..(r + 1) * self.dim];
            let mut acc = 0.0f64;
            for c in 0..self.dim {
                acc += (row[c] * v[c]) as f64;
            }
            *o = acc as f32;
        }
        out
    }

    /// Apply the inverse rotation: `Rᵀ · v`.
    pub fn apply_inverse(&self, v: &[f32]) -> Vec<f32> {
        debug_assert_eq!(v.len(), self.dim);
        let mut out = vec![0.0f64; self.dim];
        for r in 0..self.dim {
            let row = &self.data[r * self.dim..(r + 1) * self.dim];
            for c in 0..self.dim {
                out[c] += (row[c] * v[r]) as f64;
            }
        }
        out.into_iter().map(|x| x as f32).collect()
    }
}

/// One standard-normal draw via Box–Muller.
fn gaussian(rng: &mut StdRng) -> f32 {
    let u1: f64 = rng.gen_range(f64::MIN_POSITIVE..1.0);
    let u2: f64 = rng.gen();
    ((-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos()) as f32
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    #[test]
    fn test_rows_are_orthonormal() {
        let mut rng = StdRng::seed_from_u64(7);
        let rot = RotationMatrix::random_orthonormal(16, &mut rng);
        for r1 in 0..16 {
            for r2 in 0..16 {
                let mut dot = 0.0f64;
                for c in 0..16 {
                    dot += (rot.data[r1 * 16 + c] * rot.data[r2 * 16 + c]) as f64;
                }
                let expected = if r1 == r2 { 1.0 } else { 0.0 };
                assert!(
                    (dot - expected).abs() < 1e-4,
                    "rows {r1},{r2}: dot={dot}, expected {expected}"
                );
            }
        }
    }

    #[test]
    fn test_rotation_preserves_norm() {
        let mut rng = StdRng::seed_from_u64(11);
        let rot = RotationMatrix::random_orthonormal(8, &mut rng);
        let v = vec![1.0, -2.0, 3.0, 0.5, -0.25, 4.0, 0.0, 1.5];
        let rotated = rot.apply(&v);
        let n1: f32 = v.iter().map(|x| x * x).sum();
        let n2: f32 = rotated.iter().map(|x| x * x).sum();
        assert!((n1 - n2).abs() < 1e-3, "norms differ: {n1} vs {n2}");
    }

    #[test]
    fn test_inverse_undoes_rotation() {
        let mut rng = StdRng::seed_from_u64(13);
        let rot = RotationMatrix::random_orthonormal(8, &mut rng);
        let v = vec![0.1, 0.2, -0.3, 0.4, -0.5, 0.6, -0.7, 0.8];
        let back = rot.apply_inverse(&rot.apply(&v));
        for (a, b) in v.iter().zip(&back) {
            assert!((a - b).abs() < 1e-4, "roundtrip mismatch: {a} vs {b}");
        }
    }

    #[test]
    fn test_same_seed_same_matrix() {
        let r1 = RotationMatrix::random_orthonormal(4, &mut StdRng::seed_from_u64(42));
        let r2 = RotationMatrix::random_orthonormal(4, &mut StdRng::seed_from_u64(42));
        assert_eq!(r1.data, r2.data);
    }
}
