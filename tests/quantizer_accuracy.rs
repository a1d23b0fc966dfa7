//! Held-out accuracy bounds for trained codebooks.

use quiver::quantization::{PqCodebook, ScalarCodebook};
use quiver::DistanceMetric;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn uniform_sample(n: usize, dim: usize, seed: u64) -> Vec<Vec<f32>> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..n)
        .map(|_| (0..dim).map(|_| rng.gen_range(-1.0..1.0)).collect())
        .collect()
}

fn l2(a: &[f32], b: &[f32]) -> f32 {
    quiver::distance::euclidean_sq(a, b).sqrt()
}

#[test]
fn scalar_roundtrip_within_tolerance_on_held_out_set() {
    let train = uniform_sample(1_000, 8, 42);
    let held_out = uniform_sample(400, 8, 43);
    let cb = ScalarCodebook::train(&train, 8).unwrap();

    let within = held_out
        .iter()
        .filter(|v| l2(v, &cb.decode(&cb.encode(v))) <= 0.1)
        .count();
    let frac = within as f64 / held_out.len() as f64;
    assert!(
        frac >= 0.95,
        "only {frac:.3} of held-out vectors reconstruct within 0.1 L2"
    );
}

#[test]
fn scalar_quantization_error_shrinks_with_narrow_ranges() {
    // A tight data range gives a small step and proportionally small error.
    let mut rng = StdRng::seed_from_u64(44);
    let train: Vec<Vec<f32>> = (0..500)
        .map(|_| (0..8).map(|_| rng.gen_range(-0.01..0.01)).collect())
        .collect();
    let cb = ScalarCodebook::train(&train, 8).unwrap();
    let v: Vec<f32> = (0..8).map(|_| rng.gen_range(-0.01..0.01)).collect();
    assert!(l2(&v, &cb.decode(&cb.encode(&v))) < 0.001);
}

#[test]
fn pq_roundtrip_error_bounded_on_held_out_set() {
    let train = uniform_sample(2_000, 16, 45);
    let held_out = uniform_sample(200, 16, 46);
    let mut rng = StdRng::seed_from_u64(45);
    let cb = PqCodebook::train(&train, 16, 8, 8, false, &mut rng).unwrap();

    // 256 centroids per 2-dim subspace of uniform data keeps per-subspace
    // error small; allow a loose bound and check the bulk of the mass.
    let within = held_out
        .iter()
        .filter(|v| l2(v, &cb.decode(&cb.encode(v))) <= 0.5)
        .count();
    let frac = within as f64 / held_out.len() as f64;
    assert!(frac >= 0.95, "PQ reconstruction too lossy: {frac:.3} within bound");
}

#[test]
fn pq_rotation_does_not_degrade_reconstruction() {
    // Anisotropic data: variance concentrated in the first dimensions.
    let mut rng = StdRng::seed_from_u64(47);
    let make = |rng: &mut StdRng| -> Vec<f32> {
        (0..16)
            .map(|d| {
                let scale = if d < 4 { 1.0 } else { 0.05 };
                rng.gen_range(-1.0f32..1.0) * scale
            })
            .collect()
    };
    let train: Vec<Vec<f32>> = (0..2_000).map(|_| make(&mut rng)).collect();
    let held_out: Vec<Vec<f32>> = (0..100).map(|_| make(&mut rng)).collect();

    let mut rng_plain = StdRng::seed_from_u64(48);
    let plain = PqCodebook::train(&train, 16, 8, 8, false, &mut rng_plain).unwrap();
    let mut rng_rot = StdRng::seed_from_u64(48);
    let rotated = PqCodebook::train(&train, 16, 8, 8, true, &mut rng_rot).unwrap();

    let mean_err = |cb: &PqCodebook| -> f64 {
        held_out
            .iter()
            .map(|v| l2(v, &cb.decode(&cb.encode(v))) as f64)
            .sum::<f64>()
            / held_out.len() as f64
    };
    let err_plain = mean_err(&plain);
    let err_rotated = mean_err(&rotated);
    assert!(err_plain < 1.0 && err_rotated < 1.0);
    // The rotated codebook spreads variance across subspaces; it must stay
    // in the same accuracy class as the axis-aligned split.
    assert!(
        err_rotated <= err_plain * 2.0,
        "rotation degraded reconstruction: {err_rotated:.4} vs {err_plain:.4}"
    );
}

#[test]
fn adc_distance_tracks_exact_distance() {
    let train = uniform_sample(1_500, 8, 49);
    let mut rng = StdRng::seed_from_u64(49);
    let cb = PqCodebook::train(&train, 8, 4, 8, false, &mut rng).unwrap();

    let query: Vec<f32> = uniform_sample(1, 8, 50).remove(0);
    let table = cb.build_distance_table(&query, DistanceMetric::Euclidean);

    // ADC must approximate the exact distance to the decoded vector well
    // enough that large gaps in true distance are never inverted.
    let near: Vec<f32> = query.iter().map(|x| (x * 0.9).clamp(-1.0, 1.0)).collect();
    let far: Vec<f32> = query.iter().map(|x| (-x).clamp(-1.0, 1.0)).collect();
    let d_near = table.distance(&cb.encode(&near));
    let d_far = table.distance(&cb.encode(&far));
    assert!(
        d_near < d_far,
        "ADC inverted a large distance gap: near={d_near} far={d_far}"
    );
}
