//! Base selection from the target cloud.
//!
//! A good base is well spread (large pairwise distances improve the
//! conditioning of the later alignment solve) and, for the 4-point case,
//! near-planar so the two segment intersection invariants are sharp. Wide
//! triangles are drawn by best-of-K random sampling; degenerate draws
//! (collinear triangles, no acceptable fourth point) simply fail the trial
//! and the engine re-samples.

use nalgebra::{Point3, Vector3};
use rand::Rng;

use crate::cloud::PointCloud;

use super::BaseSize;

/// Random draws attempted when widening a triangle or placing a 4th point.
pub(crate) const NUM_SELECTION_TRIALS: usize = 100;

/// Minimum spacing of the 4th base point from the other three, as a
/// fraction of the maximum base diameter.
const BASE_TOO_SMALL: f32 = 0.2;

/// Triangle area floor relative to the squared base diameter; rejects
/// collinear and near-collinear draws.
const MIN_TRIANGLE_AREA_FRACTION: f32 = 1e-4;

/// A base drawn from the target cloud, with its precomputed invariants.
#[derive(Debug, Clone)]
pub(crate) enum SelectedBase {
    Three {
        ids: [u32; 3],
        /// Side lengths |ab|, |ac|, |bc|.
        sides: [f32; 3],
    },
    Four {
        /// Reordered so that (0,1) and (2,3) are the two matched segments.
        ids: [u32; 4],
        /// Lengths of segments (0,1) and (2,3).
        d1: f32,
        d2: f32,
        /// Fractional position of the closest-approach point along each
        /// segment; preserved under rigid motion.
        invariant1: f32,
        invariant2: f32,
    },
}

impl SelectedBase {
    pub(crate) fn ids(&self) -> &[u32] {
        match self {
            SelectedBase::Three { ids, .. } => ids,
            SelectedBase::Four { ids, .. } => ids,
        }
    }
}

/// Draw a base of the requested size, or `None` when the cloud yields no
/// non-degenerate base after bounded retries.
pub(crate) fn select_base<R: Rng>(
    cloud: &PointCloud,
    rng: &mut R,
    max_base_diameter: f32,
    size: BaseSize,
) -> Option<SelectedBase> {
    match size {
        BaseSize::Three => {
            let ids = select_wide_triangle(cloud, rng, max_base_diameter)?;
            let a = cloud.pos(ids[0] as usize);
            let b = cloud.pos(ids[1] as usize);
            let c = cloud.pos(ids[2] as usize);
            Some(SelectedBase::Three {
                ids,
                sides: [(b - a).norm(), (c - a).norm(), (c - b).norm()],
            })
        }
        BaseSize::Four => select_quadrilateral(cloud, rng, max_base_diameter),
    }
}

/// Best-of-K widest triangle whose edges stay below the base diameter.
fn select_wide_triangle<R: Rng>(
    cloud: &PointCloud,
    rng: &mut R,
    max_base_diameter: f32,
) -> Option<[u32; 3]> {
    let n = cloud.len();
    if n < 3 {
        return None;
    }
    let sq_max = max_base_diameter * max_base_diameter;
    let area_floor = MIN_TRIANGLE_AREA_FRACTION * sq_max;

    let first = rng.gen_range(0..n);
    let mut best: Option<[u32; 3]> = None;
    let mut best_wide = area_floor;

    for _ in 0..NUM_SELECTION_TRIALS {
        let second = rng.gen_range(0..n);
        let third = rng.gen_range(0..n);
        if second == first || third == first || third == second {
            continue;
        }
        let u = cloud.pos(second) - cloud.pos(first);
        let w = cloud.pos(third) - cloud.pos(first);
        // Wide but not wider than the diameter bound.
        let how_wide = u.cross(&w).norm();
        if how_wide > best_wide && u.norm_squared() < sq_max && w.norm_squared() < sq_max {
            best_wide = how_wide;
            best = Some([first as u32, second as u32, third as u32]);
        }
    }
    best
}

/// Triangle plus the most coplanar 4th point, reordered into its canonical
/// segment pairing with invariants.
fn select_quadrilateral<R: Rng>(
    cloud: &PointCloud,
    rng: &mut R,
    max_base_diameter: f32,
) -> Option<SelectedBase> {
    let too_small = (max_base_diameter * BASE_TOO_SMALL).powi(2);

    for _ in 0..NUM_SELECTION_TRIALS {
        let Some(tri) = select_wide_triangle(cloud, rng, max_base_diameter) else {
            return None;
        };
        let p1 = cloud.pos(tri[0] as usize);
        let p2 = cloud.pos(tri[1] as usize);
        let p3 = cloud.pos(tri[2] as usize);

        let normal = (p2 - p1).cross(&(p3 - p1));
        let norm = normal.norm();
        if norm <= 0.0 {
            continue;
        }
        let normal = normal / norm;

        // The 4th point: closest to the triangle's plane while staying well
        // separated from all three corners.
        let mut best_id: Option<u32> = None;
        let mut best_distance = f32::MAX;
        for (i, p) in cloud.points().iter().enumerate() {
            let x = p.pos;
            if (x - p1).norm_squared() >= too_small
                && (x - p2).norm_squared() >= too_small
                && (x - p3).norm_squared() >= too_small
            {
                let distance = (x - p1).dot(&normal).abs();
                if distance < best_distance {
                    best_distance = distance;
                    best_id = Some(i as u32);
                }
            }
        }

        if let Some(fourth) = best_id {
            let ids = [tri[0], tri[1], tri[2], fourth];
            if let Some(base) = canonicalize_quad(cloud, ids) {
                return Some(base);
            }
        }
    }
    None
}

/// Reorder a 4-point tuple so the two segments whose supporting lines pass
/// closest to each other become (0,1) and (2,3), and compute the two
/// intersection-ratio invariants for that pairing.
pub(crate) fn canonicalize_quad(cloud: &PointCloud, ids: [u32; 4]) -> Option<SelectedBase> {
    let pts: [Point3<f32>; 4] = [
        cloud.pos(ids[0] as usize),
        cloud.pos(ids[1] as usize),
        cloud.pos(ids[2] as usize),
        cloud.pos(ids[3] as usize),
    ];

    let mut best: Option<([usize; 4], f32, f32)> = None;
    let mut min_distance = f32::MAX;

    for i in 0..4 {
        for j in 0..4 {
            if i == j {
                continue;
            }
            let mut k = 0;
            while k == i || k == j {
                k += 1;
            }
            let mut l = 0;
            while l == i || l == j || l == k {
                l += 1;
            }
            let (inv1, inv2, distance) =
                segment_closest_approach(&pts[i], &pts[j], &pts[k], &pts[l]);
            if distance < min_distance {
                min_distance = distance;
                best = Some(([i, j, k, l], inv1, inv2));
            }
        }
    }

    let (order, invariant1, invariant2) = best?;
    let ids = [
        ids[order[0]],
        ids[order[1]],
        ids[order[2]],
        ids[order[3]],
    ];
    let d1 = (pts[order[1]] - pts[order[0]]).norm();
    let d2 = (pts[order[3]] - pts[order[2]]).norm();
    if d1 <= 0.0 || d2 <= 0.0 {
        return None;
    }
    Some(SelectedBase::Four {
        ids,
        d1,
        d2,
        invariant1,
        invariant2,
    })
}

/// Closest approach of segments (p1,p2) and (q1,q2).
///
/// Returns the fractional parameters of the closest points along each
/// segment and the distance between them. For a planar quad the segments
/// intersect and the distance is ~0; the parameters are exactly the 4PCS
/// invariants.
pub(crate) fn segment_closest_approach(
    p1: &Point3<f32>,
    p2: &Point3<f32>,
    q1: &Point3<f32>,
    q2: &Point3<f32>,
) -> (f32, f32, f32) {
    const SMALL: f32 = 1e-4;

    let u: Vector3<f32> = p2 - p1;
    let v: Vector3<f32> = q2 - q1;
    let w: Vector3<f32> = p1 - q1;
    let a = u.dot(&u);
    let b = u.dot(&v);
    let c = v.dot(&v);
    let d = u.dot(&w);
    let e = v.dot(&w);
    let f = a * c - b * b;

    // s/t are the clamped parametric closest-point coordinates, kept as
    // fractions s1/s2 and t1/t2 until the end.
    let mut s1;
    let mut s2 = f;
    let mut t1;
    let mut t2 = f;

    if f < SMALL {
        // Nearly parallel segments.
        s1 = 0.0;
        s2 = 1.0;
        t1 = e;
        t2 = c;
    } else {
        s1 = b * e - c * d;
        t1 = a * e - b * d;
        if s1 < 0.0 {
            s1 = 0.0;
            t1 = e;
            t2 = c;
        } else if s1 > s2 {
            s1 = s2;
            t1 = e + b;
            t2 = c;
        }
    }

    if t1 < 0.0 {
        t1 = 0.0;
        if -d < 0.0 {
            s1 = 0.0;
        } else if -d > a {
            s1 = s2;
        } else {
            s1 = -d;
            s2 = a;
        }
    } else if t1 > t2 {
        t1 = t2;
        if (-d + b) < 0.0 {
            s1 = 0.0;
        } else if (-d + b) > a {
            s1 = s2;
        } else {
            s1 = -d + b;
            s2 = a;
        }
    }

    let invariant1 = if s1.abs() < SMALL { 0.0 } else { s1 / s2 };
    let invariant2 = if t1.abs() < SMALL { 0.0 } else { t1 / t2 };
    let distance = (w + invariant1 * u - invariant2 * v).norm();

    (invariant1, invariant2, distance)
}
