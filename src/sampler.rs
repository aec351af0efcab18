use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use tracing::debug;

/// Spacing between candidate sample positions.
pub const SAMPLE_STRIDE: f64 = 300.0;
/// Length of each extracted segment.
pub const SAMPLE_DURATION: f64 = 60.0;

/// All positions where a full segment fits inside the media.
pub fn candidates(duration_sec: f64) -> Vec<f64> {
    let mut positions = Vec::new();
    let mut t = 0.0;
    while t + SAMPLE_DURATION <= duration_sec {
        positions.push(t);
        t += SAMPLE_STRIDE;
    }
    positions
}

/// Choose up to `n` sample start times without replacement, sorted ascending.
/// Deterministic for a given seed.
pub fn pick(duration_sec: f64, n: usize, seed: u64) -> Vec<f64> {
    let positions = candidates(duration_sec);
    if positions.len() <= n {
        debug!(
            "only {} candidate positions available for {} requested samples",
            positions.len(),
            n
        );
        return positions;
    }

    let mut rng = StdRng::seed_from_u64(seed);
    let mut picked: Vec<f64> = positions.choose_multiple(&mut rng, n).copied().collect();
    picked.sort_by(|a, b| a.total_cmp(b));
    picked
}
