//! Point and point-cloud containers.
//!
//! A [`PointCloud`] is an ordered, immutable sequence of [`Point`]s; a point's
//! identity is its index into the sequence. Two clouds exist per registration
//! run: the reference "target" and the "model" to be aligned toward it.

use nalgebra::{Point3, Vector3};
use rand::Rng;

/// A single point: position, optional unit normal, optional scalar weight.
#[derive(Debug, Clone, PartialEq)]
pub struct Point {
    /// Position in world coordinates.
    pub pos: Point3<f32>,
    /// Unit surface normal, when available. Orientation may be inconsistent
    /// across the cloud; see `MatchConfig::accept_flipped_normals`.
    pub normal: Option<Vector3<f32>>,
    /// Per-point weight, consumed by LCP verification: a matched point
    /// contributes its weight instead of a flat count. Defaults to 1.0;
    /// must be non-negative. Down-weight unreliable points (low confidence,
    /// oversampled regions) so they influence the score less.
    pub weight: f32,
}

impl Point {
    /// Create a point with no normal and unit weight.
    pub fn new(pos: Point3<f32>) -> Self {
        Self {
            pos,
            normal: None,
            weight: 1.0,
        }
    }

    /// Attach a normal, normalizing it. A zero-length normal is discarded.
    pub fn with_normal(mut self, normal: Vector3<f32>) -> Self {
        let n = normal.norm();
        self.normal = (n > 0.0).then(|| normal / n);
        self
    }

    /// Set the verification weight. Negative weights are clamped to zero.
    pub fn with_weight(mut self, weight: f32) -> Self {
        self.weight = weight.max(0.0);
        self
    }
}

/// An ordered, immutable collection of points.
#[derive(Debug, Clone, Default)]
pub struct PointCloud {
    points: Vec<Point>,
}

impl PointCloud {
    /// Build a cloud from owned points.
    pub fn new(points: Vec<Point>) -> Self {
        Self { points }
    }

    /// Build a cloud from bare positions (no normals, unit weights).
    pub fn from_positions<I>(positions: I) -> Self
    where
        I: IntoIterator<Item = [f32; 3]>,
    {
        Self {
            points: positions
                .into_iter()
                .map(|p| Point::new(Point3::new(p[0], p[1], p[2])))
                .collect(),
        }
    }

    /// Number of points.
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// `true` when the cloud contains no points.
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// All points as an immutable slice.
    pub fn points(&self) -> &[Point] {
        &self.points
    }

    /// Position of the point at `idx`.
    #[inline]
    pub fn pos(&self, idx: usize) -> Point3<f32> {
        self.points[idx].pos
    }

    /// Normal of the point at `idx`, if one was provided.
    #[inline]
    pub fn normal(&self, idx: usize) -> Option<Vector3<f32>> {
        self.points[idx].normal
    }

    /// Centroid of all point positions, or the origin for an empty cloud.
    pub fn centroid(&self) -> Point3<f32> {
        if self.points.is_empty() {
            return Point3::origin();
        }
        let sum: Vector3<f32> = self.points.iter().map(|p| p.pos.coords).sum();
        Point3::from(sum / self.points.len() as f32)
    }

    /// Axis-aligned bounding box, or `None` for an empty cloud.
    pub fn bounds(&self) -> Option<(Point3<f32>, Point3<f32>)> {
        let first = self.points.first()?.pos;
        let mut min = first;
        let mut max = first;
        for p in &self.points {
            for k in 0..3 {
                min[k] = min[k].min(p.pos[k]);
                max[k] = max[k].max(p.pos[k]);
            }
        }
        Some((min, max))
    }

    /// Approximate the cloud diameter (largest pairwise distance).
    ///
    /// Exact for small clouds; otherwise estimated by sampling random pairs,
    /// which is good enough for densely sampled objects and is how the run
    /// budget and base-spread limits are sized.
    pub fn approx_diameter<R: Rng>(&self, rng: &mut R, trials: usize) -> f32 {
        let n = self.points.len();
        if n < 2 {
            return 0.0;
        }
        let mut best = 0.0f32;
        if n * n <= 65_536 {
            for i in 0..n {
                for j in (i + 1)..n {
                    let d = (self.points[j].pos - self.points[i].pos).norm();
                    best = best.max(d);
                }
            }
        } else {
            for _ in 0..trials {
                let a = rng.gen_range(0..n);
                let b = rng.gen_range(0..n);
                let d = (self.points[b].pos - self.points[a].pos).norm();
                best = best.max(d);
            }
        }
        best
    }
}
