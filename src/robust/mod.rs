//! Robust point estimation from noisy candidates.
//!
//! Both the depth-refined localizer and the multi-view triangulator reduce a
//! set of candidate 3D positions to one estimate while ignoring outliers.
//! [`consensus`] implements that search once, parameterised by the distance
//! metric used to decide inliers and by the refit applied to the winning set;
//! [`robust_point`] is the centroid-of-points special case.

use log::debug;
use nalgebra::{Point3, Vector3};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

/// Parameters of the consensus search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsensusConfig {
    /// Maximum distance between a candidate and a hypothesis for the candidate
    /// to count as an inlier, in metres.
    pub inlier_threshold_m: f64,
    /// Minimum size of the winning inlier set.
    pub min_inliers: usize,
    /// Upper bound on evaluated hypotheses. Candidate sets up to this size are
    /// searched exhaustively, larger ones are sampled.
    pub max_hypotheses: usize,
    /// Seed of the hypothesis sampler.
    pub seed: u64,
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        ConsensusConfig {
            inlier_threshold_m: 15.0,
            min_inliers: 3,
            max_hypotheses: 256,
            seed: 0x5eed,
        }
    }
}

/// Outcome of a successful consensus search.
#[derive(Debug, Clone, PartialEq)]
pub struct Consensus {
    /// Estimate refitted on the inlier set.
    pub estimate: Point3<f64>,
    /// Indices of the inlier candidates, ascending.
    pub inliers: Vec<usize>,
}

struct Score {
    inliers: Vec<usize>,
    spread: f64,
}

impl Score {
    fn better_than(&self, other: &Score) -> bool {
        self.inliers.len() > other.inliers.len()
            || (self.inliers.len() == other.inliers.len() && self.spread < other.spread)
    }
}

fn score<C, D>(hypothesis: &Point3<f64>, candidates: &[C], distance: &D, threshold: f64) -> Score
where
    D: Fn(&Point3<f64>, &C) -> f64,
{
    let mut inliers = Vec::new();
    let mut spread = 0.0;
    for (i, candidate) in candidates.iter().enumerate() {
        let d = distance(hypothesis, candidate);
        if d <= threshold {
            inliers.push(i);
            spread += d;
        }
    }
    Score { inliers, spread }
}

/// Mean of the selected points.
pub fn centroid(points: &[Point3<f64>], indices: &[usize]) -> Option<Point3<f64>> {
    if indices.is_empty() {
        return None;
    }
    let sum = indices
        .iter()
        .fold(Vector3::zeros(), |acc, &i| acc + points[i].coords);
    Some(Point3::from(sum / indices.len() as f64))
}

/// Picks `k` distinct indices from `0..n` with a partial Fisher-Yates shuffle.
fn sample_indices(rng: &mut impl Rng, n: usize, k: usize) -> Vec<usize> {
    let k = k.min(n);
    let mut indices: Vec<usize> = (0..n).collect();
    for i in 0..k {
        let j = rng.gen_range(i..n);
        indices.swap(i, j);
    }
    indices.truncate(k);
    indices.sort_unstable();
    indices
}

/// Generic hypothesise-and-verify search.
///
/// Each hypothesis point (all of them, or a seeded random subset of
/// `max_hypotheses`) is scored by the candidates lying within
/// `inlier_threshold_m` of it under `distance`. The hypothesis with the most
/// inliers wins, ties going to the smaller summed inlier distance. The winner
/// is re-estimated from its inliers with `refit`, the inlier set recomputed
/// against the new estimate, and the refit kept only if it does not lose
/// inliers.
///
/// Returns `None` when fewer than `min_inliers` candidates agree or when
/// `refit` fails on the winning set.
pub fn consensus<C, D, R>(
    hypotheses: &[Point3<f64>],
    candidates: &[C],
    distance: D,
    refit: R,
    config: &ConsensusConfig,
) -> Option<Consensus>
where
    D: Fn(&Point3<f64>, &C) -> f64,
    R: Fn(&[usize]) -> Option<Point3<f64>>,
{
    let tried: Vec<usize> = if hypotheses.len() <= config.max_hypotheses {
        (0..hypotheses.len()).collect()
    } else {
        let mut rng = StdRng::seed_from_u64(config.seed);
        sample_indices(&mut rng, hypotheses.len(), config.max_hypotheses)
    };

    let threshold = config.inlier_threshold_m;
    let mut best: Option<Score> = None;
    for &h in &tried {
        if !hypotheses[h].coords.iter().all(|c| c.is_finite()) {
            continue;
        }
        let current = score(&hypotheses[h], candidates, &distance, threshold);
        if best.as_ref().map_or(true, |b| current.better_than(b)) {
            best = Some(current);
        }
    }
    let best = best?;
    if best.inliers.len() < config.min_inliers.max(1) {
        debug!(
            "Consensus failed: best hypothesis has {} of {} inliers",
            best.inliers.len(),
            candidates.len()
        );
        return None;
    }

    let estimate = refit(&best.inliers)?;
    let rescored = score(&estimate, candidates, &distance, threshold);
    let (estimate, inliers) = if rescored.inliers.len() >= best.inliers.len() {
        match refit(&rescored.inliers) {
            Some(refined) => (refined, rescored.inliers),
            None => (estimate, best.inliers),
        }
    } else {
        (estimate, best.inliers)
    };

    debug!(
        "Consensus: {} of {} candidates agree within {:.2} m",
        inliers.len(),
        candidates.len(),
        threshold
    );

    Some(Consensus { estimate, inliers })
}

/// Finds the largest mutually consistent subset of `candidates` and returns
/// its centroid.
///
/// Every candidate is itself a hypothesis; see [`consensus`]. Non-finite
/// candidates never count as inliers.
pub fn robust_point<D>(
    candidates: &[Point3<f64>],
    distance: D,
    config: &ConsensusConfig,
) -> Option<Consensus>
where
    D: Fn(&Point3<f64>, &Point3<f64>) -> f64,
{
    let finite_distance = |a: &Point3<f64>, b: &Point3<f64>| {
        if b.coords.iter().all(|c| c.is_finite()) {
            distance(a, b)
        } else {
            f64::INFINITY
        }
    };
    consensus(
        candidates,
        candidates,
        finite_distance,
        |indices| centroid(candidates, indices),
        config,
    )
}

/// Straight-line distance, the default consensus metric.
pub fn euclidean(a: &Point3<f64>, b: &Point3<f64>) -> f64 {
    (a - b).norm()
}
