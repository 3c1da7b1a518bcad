//! Uniform-grid spatial index over a point cloud.
//!
//! `GridIndex` partitions points into regular cubic cells and stores per-cell
//! membership in a compact CSR layout (`cell_offsets` + `point_indices`).
//! Query flow:
//!
//! 1. Compute the cell ring intersecting the query ball.
//! 2. Scan only the points in those cells.
//! 3. Apply exact distance (and optionally normal) filtering.
//!
//! The index is immutable after build and safe to query from many threads.
//! Query results carry no ordering guarantee beyond being stable for a fixed
//! build: no duplicates, no omissions within the radius, and the boundary is
//! inclusive (points at exactly the query radius are returned).

use nalgebra::{Point3, Vector3};

use crate::cloud::PointCloud;
use crate::error::RegisterError;
use crate::neighborhood::visit_ring_offsets;

/// Fewest points for which building a queryable index makes sense.
const MIN_INDEX_POINTS: usize = 2;

/// Soft cap multiplier on the number of grid cells relative to point count.
/// A too-fine cell size is coarsened until the cell count is reasonable.
const CELLS_PER_POINT: usize = 4;

#[derive(Debug, Clone)]
pub struct GridIndex {
    origin: Point3<f32>,
    cell_size: f32,
    dims: [i32; 3],
    cell_offsets: Vec<u32>,
    point_indices: Vec<u32>,
    positions: Vec<Point3<f32>>,
    normals: Vec<Option<Vector3<f32>>>,
}

impl GridIndex {
    /// Build an index over a cloud.
    ///
    /// `cell_size` is a hint; it is coarsened automatically when it would
    /// produce an excessive number of cells. Fails with
    /// [`RegisterError::DegenerateInput`] when the cloud has fewer than two
    /// points or near-zero extent.
    pub fn build(cloud: &PointCloud, cell_size: f32) -> Result<Self, RegisterError> {
        if cloud.len() < MIN_INDEX_POINTS {
            return Err(RegisterError::DegenerateInput(format!(
                "cannot index a cloud of {} point(s)",
                cloud.len()
            )));
        }
        let (min, max) = cloud.bounds().expect("non-empty cloud has bounds");
        if (max - min).norm() <= f32::EPSILON {
            return Err(RegisterError::DegenerateInput(
                "cloud has near-zero extent".into(),
            ));
        }
        let positions: Vec<Point3<f32>> = cloud.points().iter().map(|p| p.pos).collect();
        let normals: Vec<Option<Vector3<f32>>> = cloud.points().iter().map(|p| p.normal).collect();
        Ok(Self::from_parts(positions, normals, cell_size))
    }

    /// Build an index over bare positions, tolerating degenerate inputs.
    ///
    /// Used for throwaway indices over synthetic points (e.g. segment
    /// intersection points during congruent-set search), where an empty or
    /// collapsed input simply means no matches.
    pub(crate) fn from_positions(positions: Vec<Point3<f32>>, cell_size: f32) -> Self {
        let normals = vec![None; positions.len()];
        Self::from_parts(positions, normals, cell_size)
    }

    fn from_parts(
        positions: Vec<Point3<f32>>,
        normals: Vec<Option<Vector3<f32>>>,
        cell_size: f32,
    ) -> Self {
        debug_assert!(cell_size > 0.0, "cell size must be positive");

        let n = positions.len();
        if n == 0 {
            return Self {
                origin: Point3::origin(),
                cell_size: cell_size.max(f32::MIN_POSITIVE),
                dims: [1, 1, 1],
                cell_offsets: vec![0, 0],
                point_indices: Vec::new(),
                positions,
                normals,
            };
        }

        let mut min = positions[0];
        let mut max = positions[0];
        for p in &positions {
            for k in 0..3 {
                min[k] = min[k].min(p[k]);
                max[k] = max[k].max(p[k]);
            }
        }

        // Coarsen the cell size until the cell count stays proportional to
        // the point count; a microscopic cell hint must not blow up memory.
        let target_cells = CELLS_PER_POINT * n + 1024;
        let mut cell = cell_size.max(f32::MIN_POSITIVE);
        let mut dims = [1i32; 3];
        for _ in 0..32 {
            let mut total: usize = 1;
            for k in 0..3 {
                let extent = (max[k] - min[k]).max(0.0);
                dims[k] = ((extent / cell).ceil() as i32).max(1);
                total = total.saturating_mul(dims[k] as usize);
            }
            if total <= target_cells {
                break;
            }
            cell *= 2.0;
        }

        let n_cells = (dims[0] as usize) * (dims[1] as usize) * (dims[2] as usize);
        let origin = min;

        let mut bins: Vec<Vec<u32>> = vec![Vec::new(); n_cells];
        for (idx, p) in positions.iter().enumerate() {
            let c = cell_coords_raw(&origin, cell, dims, p);
            bins[flat_cell(dims, c)].push(idx as u32);
        }

        let mut cell_offsets = Vec::with_capacity(n_cells + 1);
        let mut point_indices = Vec::with_capacity(n);
        cell_offsets.push(0);
        for bin in bins {
            point_indices.extend(bin);
            cell_offsets.push(point_indices.len() as u32);
        }

        Self {
            origin,
            cell_size: cell,
            dims,
            cell_offsets,
            point_indices,
            positions,
            normals,
        }
    }

    /// Number of indexed points.
    pub fn len(&self) -> usize {
        self.positions.len()
    }

    /// `true` when the index holds no points.
    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    /// Effective cell edge length after automatic coarsening.
    pub fn cell_size(&self) -> f32 {
        self.cell_size
    }

    /// Collect indices of all points within `radius` of `p` (inclusive).
    ///
    /// `out` is cleared first; callers reuse it as per-worker scratch.
    pub fn neighbors_within(&self, p: &Point3<f32>, radius: f32, out: &mut Vec<u32>) {
        out.clear();
        if radius < 0.0 {
            return;
        }
        let r2 = radius * radius;
        self.visit_ball(p, radius, |idx, d2| {
            if d2 <= r2 {
                out.push(idx);
            }
            false
        });
    }

    /// As [`neighbors_within`](Self::neighbors_within), additionally requiring
    /// the point's normal to lie within `max_angle` of `normal`.
    ///
    /// With `accept_flipped`, antiparallel normals also pass — point clouds
    /// with inconsistently oriented normals need this. Points without a
    /// stored normal are never rejected by the orientation test.
    pub fn neighbors_within_oriented(
        &self,
        p: &Point3<f32>,
        normal: &Vector3<f32>,
        radius: f32,
        max_angle: f32,
        accept_flipped: bool,
        out: &mut Vec<u32>,
    ) {
        out.clear();
        if radius < 0.0 {
            return;
        }
        let r2 = radius * radius;
        let cos_max = max_angle.cos();
        self.visit_ball(p, radius, |idx, d2| {
            if d2 <= r2 {
                let ok = match self.normals[idx as usize] {
                    Some(n) => {
                        let dot = n.dot(normal);
                        dot >= cos_max || (accept_flipped && -dot >= cos_max)
                    }
                    None => true,
                };
                if ok {
                    out.push(idx);
                }
            }
            false
        });
    }

    /// `true` when any indexed point lies within `radius` of `p` (inclusive).
    ///
    /// This is the hot path of LCP scoring; it returns on the first hit.
    pub fn has_neighbor_within(&self, p: &Point3<f32>, radius: f32) -> bool {
        if radius < 0.0 {
            return false;
        }
        let r2 = radius * radius;
        self.visit_ball(p, radius, |_idx, d2| d2 <= r2)
    }

    /// Visit every point in the cells intersecting the ball around `p`,
    /// passing (index, squared distance). Stops early when `f` returns true,
    /// and reports whether it did.
    ///
    /// Runs once per model point per verified candidate, so the cell walk
    /// must not allocate.
    fn visit_ball<F>(&self, p: &Point3<f32>, radius: f32, mut f: F) -> bool
    where
        F: FnMut(u32, f32) -> bool,
    {
        if self.positions.is_empty() {
            return false;
        }
        let center = cell_coords_unclamped(&self.origin, self.cell_size, p);
        let ring = (radius / self.cell_size).ceil() as i32;
        visit_ring_offsets::<3>(ring, &mut |off| {
            let c = [center[0] + off[0], center[1] + off[1], center[2] + off[2]];
            if c[0] < 0
                || c[1] < 0
                || c[2] < 0
                || c[0] >= self.dims[0]
                || c[1] >= self.dims[1]
                || c[2] >= self.dims[2]
            {
                return false;
            }
            let cell = flat_cell(self.dims, c);
            let start = self.cell_offsets[cell] as usize;
            let end = self.cell_offsets[cell + 1] as usize;
            for &idx in &self.point_indices[start..end] {
                let d2 = (self.positions[idx as usize] - p).norm_squared();
                if f(idx, d2) {
                    return true;
                }
            }
            false
        })
    }
}

/// Cell coordinates of a stored point, clamped into the grid.
fn cell_coords_raw(origin: &Point3<f32>, cell: f32, dims: [i32; 3], p: &Point3<f32>) -> [i32; 3] {
    let mut c = [0i32; 3];
    for k in 0..3 {
        let v = ((p[k] - origin[k]) / cell).floor() as i32;
        c[k] = v.clamp(0, dims[k] - 1);
    }
    c
}

/// Cell coordinates of a query point, possibly outside the grid.
fn cell_coords_unclamped(origin: &Point3<f32>, cell: f32, p: &Point3<f32>) -> [i32; 3] {
    [
        ((p[0] - origin[0]) / cell).floor() as i32,
        ((p[1] - origin[1]) / cell).floor() as i32,
        ((p[2] - origin[2]) / cell).floor() as i32,
    ]
}

#[inline]
fn flat_cell(dims: [i32; 3], c: [i32; 3]) -> usize {
    ((c[2] * dims[1] + c[1]) * dims[0] + c[0]) as usize
}
