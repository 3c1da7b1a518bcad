//! Pair generation and batched pair extraction.
//!
//! A congruent-set trial needs, for each edge of the base, every point pair
//! in the model cloud whose length matches that edge within tolerance. One
//! trial queries several target distances against the same cloud, so the
//! batch path resolves all targets in a single pass: one spatial query per
//! point at the largest target radius, then per-target annulus
//! classification. Cost scales with output size plus index traversal, never
//! with the square of the cloud size per target.
//!
//! Guarantee: no false negatives. Every pair within the exact tolerance is
//! emitted; near-boundary false positives are tolerated and weeded out later
//! during verification.

use nalgebra::Vector3;

use crate::cloud::{Point, PointCloud};
use crate::grid::GridIndex;

/// One requested pair-distance query: emit pairs with
/// `|dist(i, j) − distance| ≤ epsilon`.
#[derive(Debug, Clone, Copy)]
pub struct DistanceTarget {
    pub distance: f32,
    pub epsilon: f32,
}

impl DistanceTarget {
    /// Build a target whose tolerance is a fraction of the cloud diameter,
    /// so matching behaves consistently across differently sized inputs.
    pub fn with_relative_epsilon(distance: f32, epsilon_fraction: f32, diameter: f32) -> Self {
        Self {
            distance,
            epsilon: epsilon_fraction * diameter,
        }
    }
}

/// Compatibility constraints a candidate pair must satisfy against its base
/// edge, beyond the distance match.
///
/// The two booleans returned by [`admit`](Self::admit) say which orderings of
/// the pair are acceptable: `(p, q)` maps p onto the first base point, and
/// `(q, p)` the reverse.
#[derive(Debug, Clone, Default)]
pub struct PairConstraints {
    /// Normalized direction of the base edge, for the rotation-envelope test.
    pub base_dir: Option<Vector3<f32>>,
    /// Chord length between the base edge's two normals (`‖n₂ − n₁‖`);
    /// zero when the base carries no normals.
    pub base_normal_diff: f32,
    /// Maximum normal-angle deviation in radians. `None` disables the
    /// normal compatibility test entirely.
    pub normal_threshold: Option<f32>,
    /// Accept antiparallel normals as compatible (inconsistently oriented
    /// input normals).
    pub accept_flipped: bool,
    /// Maximum angle in radians between the candidate direction and the base
    /// direction. `None` accepts any direction (no prior on the rotation).
    pub max_dir_angle: Option<f32>,
}

impl PairConstraints {
    /// Decide which orderings of the pair `(p, q)` are admissible.
    pub fn admit(&self, p: &Point, q: &Point) -> (bool, bool) {
        // Normal compatibility is order-independent: the chord between the
        // candidate normals must deviate from the base's chord by no more
        // than half the configured angle. The antiparallel chord is also
        // tried when flipped normals are acceptable.
        if let (Some(threshold), Some(np), Some(nq)) = (self.normal_threshold, p.normal, q.normal) {
            let d_par = (nq - np).norm();
            let mut deviation = (d_par - self.base_normal_diff).abs();
            if self.accept_flipped {
                let d_anti = (nq + np).norm();
                deviation = deviation.min((d_anti - self.base_normal_diff).abs());
            }
            if deviation > 0.5 * threshold {
                return (false, false);
            }
        }

        // Direction envelope: only meaningful when the caller bounds the
        // rotation. Each ordering flips the candidate direction.
        if let (Some(max_angle), Some(base_dir)) = (self.max_dir_angle, self.base_dir) {
            let d = q.pos - p.pos;
            let n = d.norm();
            if n <= 0.0 {
                return (false, false);
            }
            let dir = d / n;
            let cos_max = max_angle.cos();
            let fwd = base_dir.dot(&dir) >= cos_max;
            let rev = base_dir.dot(&-dir) >= cos_max;
            return (fwd, rev);
        }

        (true, true)
    }
}

/// Extract all ordered pairs matching a single distance target.
pub fn extract_pairs(
    cloud: &PointCloud,
    grid: &GridIndex,
    target: DistanceTarget,
    constraints: &PairConstraints,
) -> Vec<(u32, u32)> {
    let mut batch = extract_pairs_batch(cloud, grid, &[(target, constraints.clone())]);
    batch.pop().unwrap_or_default()
}

/// Extract pair sets for many distance targets in one pass over the cloud.
///
/// `grid` must index `cloud`. Returns one pair list per requested target, in
/// request order; a target with no matches yields an empty list. The index
/// is never mutated.
pub fn extract_pairs_batch(
    cloud: &PointCloud,
    grid: &GridIndex,
    specs: &[(DistanceTarget, PairConstraints)],
) -> Vec<Vec<(u32, u32)>> {
    debug_assert_eq!(grid.len(), cloud.len(), "grid must index the same cloud");

    let mut results: Vec<Vec<(u32, u32)>> = vec![Vec::new(); specs.len()];
    if specs.is_empty() || cloud.is_empty() {
        return results;
    }

    let max_radius = specs
        .iter()
        .map(|(t, _)| t.distance + t.epsilon)
        .fold(0.0f32, f32::max);

    let points = cloud.points();
    let mut scratch: Vec<u32> = Vec::new();

    for i in 0..points.len() {
        grid.neighbors_within(&points[i].pos, max_radius, &mut scratch);
        for &j in &scratch {
            let j = j as usize;
            // Each unordered pair is visited once; ordering is decided below.
            if j <= i {
                continue;
            }
            let dist = (points[j].pos - points[i].pos).norm();
            for (k, (target, constraints)) in specs.iter().enumerate() {
                if (dist - target.distance).abs() <= target.epsilon {
                    let (fwd, rev) = constraints.admit(&points[i], &points[j]);
                    if fwd {
                        results[k].push((i as u32, j as u32));
                    }
                    if rev {
                        results[k].push((j as u32, i as u32));
                    }
                }
            }
        }
    }

    results
}
