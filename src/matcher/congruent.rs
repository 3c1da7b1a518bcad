//! Congruent-set exploration in the model cloud.
//!
//! Given the pair lists matching a base's edges, this module assembles the
//! candidate tuples congruent to the base. For 4-point bases the segment
//! intersection invariants collapse the quadratic pair-pair join into a
//! radius query: every first-list pair contributes one synthetic invariant
//! point, those points are indexed in a throwaway grid, and each second-list
//! pair probes it with its own invariant point. For 3-point bases the third
//! vertex is found by an annulus query around the matched edge.
//!
//! Candidates may still be spurious (mirrored or accidentally matching
//! tuples); the engine's transform fit and verification weed them out.

use nalgebra::Point3;

use crate::cloud::PointCloud;
use crate::grid::GridIndex;

/// Assemble 4-point candidates congruent to a base with invariants
/// `(invariant1, invariant2)`.
///
/// `pairs1` lists ordered model pairs matching the base's first segment,
/// `pairs2` those matching the second. A candidate `[a, b, c, d]` means the
/// segments (a,b) and (c,d) intersect with the base's fractional ratios, to
/// within `epsilon`. Tuples reusing a model point are dropped.
pub(crate) fn congruent_quads(
    model: &PointCloud,
    pairs1: &[(u32, u32)],
    pairs2: &[(u32, u32)],
    invariant1: f32,
    invariant2: f32,
    epsilon: f32,
) -> Vec<[u32; 4]> {
    if pairs1.is_empty() || pairs2.is_empty() {
        return Vec::new();
    }

    // Synthetic intersection points of the first pair list, indexed once.
    let probes: Vec<Point3<f32>> = pairs1
        .iter()
        .map(|&(i, j)| {
            let a = model.pos(i as usize);
            let b = model.pos(j as usize);
            a + invariant1 * (b - a)
        })
        .collect();
    let index = GridIndex::from_positions(probes, epsilon.max(f32::MIN_POSITIVE));

    let mut out = Vec::new();
    let mut hits: Vec<u32> = Vec::new();
    for &(k, l) in pairs2 {
        let c = model.pos(k as usize);
        let d = model.pos(l as usize);
        let probe = c + invariant2 * (d - c);
        index.neighbors_within(&probe, epsilon, &mut hits);
        for &h in &hits {
            let (i, j) = pairs1[h as usize];
            if i == k || i == l || j == k || j == l {
                continue;
            }
            out.push([i, j, k, l]);
        }
    }
    out
}

/// Assemble 3-point candidates congruent to a base with side lengths
/// `(d_ab, d_ac, d_bc)`.
///
/// `pairs_ab` lists ordered model pairs matching the base's first side; the
/// third vertex is any model point in the intersection of the two annuli
/// around the pair's endpoints. `grid` must index `model`.
pub(crate) fn congruent_triangles(
    model: &PointCloud,
    grid: &GridIndex,
    pairs_ab: &[(u32, u32)],
    d_ac: f32,
    d_bc: f32,
    epsilon: f32,
) -> Vec<[u32; 3]> {
    let mut out = Vec::new();
    let mut ring: Vec<u32> = Vec::new();
    for &(a, b) in pairs_ab {
        let pa = model.pos(a as usize);
        let pb = model.pos(b as usize);
        grid.neighbors_within(&pa, d_ac + epsilon, &mut ring);
        for &c in &ring {
            if c == a || c == b {
                continue;
            }
            let pc = model.pos(c as usize);
            if ((pc - pa).norm() - d_ac).abs() <= epsilon
                && ((pc - pb).norm() - d_bc).abs() <= epsilon
            {
                out.push([a, b, c]);
            }
        }
    }
    out
}
