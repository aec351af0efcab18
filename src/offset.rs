use tracing::{debug, info};

use crate::align::AlignmentMatch;
use crate::error::SyncError;

/// Standard deviation at or below which a single constant shift is used.
pub const UNIFORM_STD_LIMIT: f64 = 1.5;
/// MAD multiplier for the outlier gate.
pub const OUTLIER_MAD_SCALE: f64 = 2.5;
/// Minimum absolute deviation treated as an outlier, in seconds.
pub const OUTLIER_FLOOR_SECS: f64 = 1.5;
/// Rejection is abandoned when it would drop more than this share.
pub const MAX_REJECT_FRACTION: f64 = 0.4;
/// Below this many points the outlier gate is bypassed entirely.
pub const MIN_POINTS_FOR_REJECTION: usize = 4;

/// One empirical measurement: at `time`, subtitles are off by `delta`
/// seconds (positive: subtitles must be delayed). Weight is the alignment
/// similarity, always positive.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OffsetPoint {
    pub time: f64,
    pub delta: f64,
    pub weight: f64,
}

/// The continuous correction function Δ(t).
#[derive(Debug, Clone)]
pub enum OffsetModel {
    /// A single constant shift.
    Uniform(f64),
    /// Piecewise linear between measured points, flat beyond the ends.
    /// Points are sorted by time.
    Interpolated(Vec<OffsetPoint>),
}

impl OffsetModel {
    pub fn delta_at(&self, t: f64) -> f64 {
        match self {
            Self::Uniform(delta) => *delta,
            Self::Interpolated(points) => interpolate(points, t),
        }
    }

    pub fn mode_name(&self) -> &'static str {
        match self {
            Self::Uniform(_) => "uniform",
            Self::Interpolated(_) => "interpolated",
        }
    }
}

fn interpolate(points: &[OffsetPoint], t: f64) -> f64 {
    match points {
        [] => 0.0,
        [only] => only.delta,
        [first, ..] if t <= first.time => first.delta,
        [.., last] if t >= last.time => last.delta,
        _ => {
            for pair in points.windows(2) {
                let (a, b) = (pair[0], pair[1]);
                if t >= a.time && t <= b.time {
                    if b.time == a.time {
                        return a.delta;
                    }
                    let ratio = (t - a.time) / (b.time - a.time);
                    return a.delta + ratio * (b.delta - a.delta);
                }
            }
            0.0
        }
    }
}

/// Estimator result: the model plus the statistics that chose it.
#[derive(Debug, Clone)]
pub struct Estimate {
    pub model: OffsetModel,
    /// Points that survived outlier rejection, sorted by time.
    pub points: Vec<OffsetPoint>,
    pub mean_delta: f64,
    pub std_dev: f64,
    pub rejected: usize,
}

/// Measurements from accepted matches: delta is the distance from the
/// sample position to the start of the matched minute.
pub fn points_from_matches(matches: &[AlignmentMatch]) -> Vec<OffsetPoint> {
    matches
        .iter()
        .map(|m| OffsetPoint {
            time: m.sample_time,
            delta: f64::from(m.minute) * 60.0 - m.sample_time,
            weight: m.similarity,
        })
        .collect()
}

fn median(sorted: &[f64]) -> f64 {
    let n = sorted.len();
    if n == 0 {
        return 0.0;
    }
    if n % 2 == 1 {
        sorted[n / 2]
    } else {
        (sorted[n / 2 - 1] + sorted[n / 2]) / 2.0
    }
}

/// MAD-based rejection. Small sets pass through untouched, and the gate
/// backs off entirely when it would discard too many points.
pub fn reject_outliers(points: &[OffsetPoint]) -> Vec<OffsetPoint> {
    if points.len() < MIN_POINTS_FOR_REJECTION {
        return points.to_vec();
    }

    let mut deltas: Vec<f64> = points.iter().map(|p| p.delta).collect();
    deltas.sort_by(|a, b| a.total_cmp(b));
    let center = median(&deltas);

    let mut deviations: Vec<f64> = deltas.iter().map(|d| (d - center).abs()).collect();
    deviations.sort_by(|a, b| a.total_cmp(b));
    let mad = median(&deviations);

    let limit = (OUTLIER_MAD_SCALE * mad).max(OUTLIER_FLOOR_SECS);
    let kept: Vec<OffsetPoint> = points
        .iter()
        .filter(|p| (p.delta - center).abs() <= limit)
        .copied()
        .collect();

    let rejected = points.len() - kept.len();
    if rejected as f64 > points.len() as f64 * MAX_REJECT_FRACTION {
        debug!(
            "outlier gate would drop {rejected}/{} points, keeping all",
            points.len()
        );
        return points.to_vec();
    }
    if rejected > 0 {
        info!(
            "rejected {rejected} outlier point(s) beyond {limit:.1}s of the {center:.1}s median"
        );
    }
    kept
}

/// Build Δ(t) from measurements. Output is identical for any permutation
/// of the input.
pub fn estimate(points: &[OffsetPoint]) -> Result<Estimate, SyncError> {
    if points.is_empty() {
        return Err(SyncError::InsufficientMatches);
    }

    let mut sorted = points.to_vec();
    sorted.sort_by(|a, b| a.time.total_cmp(&b.time));
    let kept = reject_outliers(&sorted);
    let rejected = sorted.len() - kept.len();
    if kept.is_empty() {
        return Err(SyncError::InsufficientMatches);
    }

    let weight_sum: f64 = kept.iter().map(|p| p.weight).sum();
    if weight_sum <= 0.0 {
        return Err(SyncError::Internal(
            "offset points must carry positive weight".into(),
        ));
    }
    let mean = kept.iter().map(|p| p.weight * p.delta).sum::<f64>() / weight_sum;
    let variance = kept
        .iter()
        .map(|p| p.weight * (p.delta - mean).powi(2))
        .sum::<f64>()
        / weight_sum;
    let std_dev = variance.sqrt();

    let model = if std_dev <= UNIFORM_STD_LIMIT || kept.len() < 2 {
        OffsetModel::Uniform(mean)
    } else {
        OffsetModel::Interpolated(kept.clone())
    };
    info!(
        "offset estimate: {} mode, mean {:+.2}s, spread {:.2}s over {} point(s)",
        model.mode_name(),
        mean,
        std_dev,
        kept.len()
    );

    Ok(Estimate {
        model,
        points: kept,
        mean_delta: mean,
        std_dev,
        rejected,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::seq::SliceRandom;
    use rand::SeedableRng;

    fn point(time: f64, delta: f64, weight: f64) -> OffsetPoint {
        OffsetPoint { time, delta, weight }
    }

    #[test]
    fn single_bad_measurement_is_rejected() {
        let points = vec![
            point(300.0, 30.0, 0.95),
            point(900.0, 30.0, 0.92),
            point(1500.0, 30.0, 0.90),
            point(2100.0, 6.8, 0.61),
        ];
        let est = estimate(&points).unwrap();
        assert_eq!(est.rejected, 1);
        assert_eq!(est.points.len(), 3);
        assert!(matches!(est.model, OffsetModel::Uniform(_)));
        assert!((est.mean_delta - 30.0).abs() < 0.2);
        assert!((est.model.delta_at(0.0) - 30.0).abs() < 0.2);
    }

    #[test]
    fn small_sets_bypass_the_outlier_gate() {
        let points = vec![
            point(300.0, 30.0, 0.9),
            point(900.0, 30.0, 0.9),
            point(1500.0, 6.8, 0.6),
        ];
        let est = estimate(&points).unwrap();
        assert_eq!(est.rejected, 0);
        assert_eq!(est.points.len(), 3);
    }

    #[test]
    fn gate_backs_off_when_too_aggressive() {
        // A tight majority cluster with a three-point tail: filtering would
        // drop more than 40% of the set, so the gate keeps everything.
        let points = vec![
            point(300.0, 10.0, 0.9),
            point(900.0, 10.0, 0.9),
            point(1500.0, 10.0, 0.9),
            point(2100.0, 10.0, 0.9),
            point(2700.0, 50.0, 0.9),
            point(3300.0, 60.0, 0.9),
            point(3900.0, 70.0, 0.9),
        ];
        let kept = reject_outliers(&points);
        assert_eq!(kept.len(), 7);
    }

    #[test]
    fn tight_cluster_selects_uniform_mode() {
        let points = vec![
            point(300.0, 5.2, 0.9),
            point(900.0, 5.0, 0.8),
            point(1500.0, 4.9, 0.95),
        ];
        let est = estimate(&points).unwrap();
        assert!(matches!(est.model, OffsetModel::Uniform(_)));
        let d = est.model.delta_at(1200.0);
        assert!((d - 5.0).abs() < 0.2);
        // Uniform mode is constant everywhere.
        assert_eq!(est.model.delta_at(0.0), est.model.delta_at(1e6));
    }

    #[test]
    fn spread_measurements_select_interpolated_mode() {
        let points = vec![
            point(300.0, 60.0, 0.9),
            point(1800.0, -60.0, 0.9),
            point(3300.0, 30.0, 0.9),
        ];
        let est = estimate(&points).unwrap();
        assert!(matches!(est.model, OffsetModel::Interpolated(_)));

        // Exact at the measured points.
        assert_eq!(est.model.delta_at(300.0), 60.0);
        assert_eq!(est.model.delta_at(1800.0), -60.0);
        assert_eq!(est.model.delta_at(3300.0), 30.0);
        // Linear in between.
        assert!((est.model.delta_at(675.0) - 30.0).abs() < 1e-9);
        assert!((est.model.delta_at(2550.0) - -15.0).abs() < 1e-9);
        // Flat beyond the ends.
        assert_eq!(est.model.delta_at(0.0), 60.0);
        assert_eq!(est.model.delta_at(9000.0), 30.0);
    }

    #[test]
    fn interpolation_is_continuous_at_knots() {
        let points = vec![
            point(300.0, 10.0, 0.9),
            point(900.0, -20.0, 0.9),
            point(1500.0, 40.0, 0.9),
        ];
        let est = estimate(&points).unwrap();
        for knot in [300.0, 900.0, 1500.0] {
            let before = est.model.delta_at(knot - 1e-6);
            let at = est.model.delta_at(knot);
            let after = est.model.delta_at(knot + 1e-6);
            assert!((before - at).abs() < 1e-3);
            assert!((after - at).abs() < 1e-3);
        }
    }

    #[test]
    fn estimate_is_permutation_invariant() {
        let points = vec![
            point(300.0, 60.0, 0.9),
            point(900.0, 12.0, 0.7),
            point(1800.0, -60.0, 0.85),
            point(3300.0, 30.0, 0.95),
            point(4500.0, 31.0, 0.8),
        ];
        let reference = estimate(&points).unwrap();

        let mut rng = StdRng::seed_from_u64(9);
        for _ in 0..10 {
            let mut shuffled = points.clone();
            shuffled.shuffle(&mut rng);
            let est = estimate(&shuffled).unwrap();
            assert_eq!(est.points, reference.points);
            for t in [0.0, 450.0, 900.0, 2000.0, 3300.0, 6000.0] {
                assert_eq!(est.model.delta_at(t), reference.model.delta_at(t));
            }
        }
    }

    #[test]
    fn identity_measurements_give_zero_function() {
        let points = vec![
            point(300.0, 0.0, 0.9),
            point(900.0, 0.0, 0.9),
            point(1500.0, 0.0, 0.9),
        ];
        let est = estimate(&points).unwrap();
        assert!(matches!(est.model, OffsetModel::Uniform(d) if d == 0.0));
    }

    #[test]
    fn constant_measurements_recover_the_constant() {
        let points: Vec<OffsetPoint> =
            (1..=6).map(|i| point(i as f64 * 300.0, 42.0, 0.9)).collect();
        let est = estimate(&points).unwrap();
        for t in [0.0, 123.0, 1000.0, 5000.0] {
            assert!((est.model.delta_at(t) - 42.0).abs() < 1e-9);
        }
    }

    #[test]
    fn single_point_is_uniform() {
        let est = estimate(&[point(600.0, -3.0, 0.8)]).unwrap();
        assert!(matches!(est.model, OffsetModel::Uniform(d) if (d - -3.0).abs() < 1e-9));
    }

    #[test]
    fn no_points_is_an_error() {
        assert!(matches!(
            estimate(&[]),
            Err(SyncError::InsufficientMatches)
        ));
    }

    #[test]
    fn points_from_matches_use_minute_distance() {
        use crate::align::AlignmentMatch;
        let matches = vec![AlignmentMatch {
            sample_index: 0,
            sample_time: 300.0,
            minute: 6,
            similarity: 0.8,
            subtitle_text: String::new(),
            transcript: String::new(),
        }];
        let points = points_from_matches(&matches);
        assert_eq!(points.len(), 1);
        assert_eq!(points[0].delta, 60.0);
        assert_eq!(points[0].weight, 0.8);
    }
}
