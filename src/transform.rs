//! Rigid transforms and the closed-form base-to-candidate fit.
//!
//! The fit builds an orthonormal frame from the first three points of each
//! tuple and composes the rotation mapping one frame onto the other; the
//! translation then follows from the tuple centroids. Math runs in `f64` —
//! `f32` has proven too coarse for the frame construction when base points
//! are nearly collinear — and results are stored back as `f32`.

use nalgebra::{Matrix3, Matrix4, Point3, Vector3};

/// A rigid transform with optional uniform scale: `x ↦ R·(s·x) + t`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RigidTransform {
    pub rotation: Matrix3<f32>,
    pub translation: Vector3<f32>,
    pub scale: f32,
}

impl RigidTransform {
    /// The identity transform.
    pub fn identity() -> Self {
        Self {
            rotation: Matrix3::identity(),
            translation: Vector3::zeros(),
            scale: 1.0,
        }
    }

    /// Apply the transform to a point.
    #[inline]
    pub fn apply(&self, p: &Point3<f32>) -> Point3<f32> {
        Point3::from(self.rotation * (p.coords * self.scale) + self.translation)
    }

    /// Homogeneous 4×4 form.
    pub fn to_matrix4(&self) -> Matrix4<f32> {
        let mut m = Matrix4::identity();
        m.fixed_view_mut::<3, 3>(0, 0)
            .copy_from(&(self.rotation * self.scale));
        m.fixed_view_mut::<3, 1>(0, 3).copy_from(&self.translation);
        m
    }

    /// Rotation angle in radians, from the trace of the rotation matrix.
    pub fn rotation_angle(&self) -> f32 {
        let tr = self.rotation.trace();
        (((tr - 1.0) / 2.0).clamp(-1.0, 1.0)).acos()
    }
}

/// Result of fitting a base onto a congruent candidate.
#[derive(Debug, Clone, Copy)]
pub(crate) struct BaseFit {
    pub transform: RigidTransform,
    /// Mean residual over the tuple points after applying the transform.
    pub rms: f32,
}

/// Compute the rigid transform mapping `candidate` onto `reference`.
///
/// Both slices must have the same length (3 or 4); only the first three
/// points define the rotation — the planar construction keeps this exact for
/// congruent tuples and cheap for the thousands of candidates a trial tests.
///
/// With `with_scale`, a uniform scale is estimated from the two edge-length
/// ratios of a 4-point tuple; candidates whose two ratios disagree by more
/// than 10% are rejected. `max_rotation_angle` optionally rejects transforms
/// whose per-axis rotation angles exceed a known motion envelope.
///
/// Returns `None` for degenerate tuples (coincident or collinear points) and
/// for transforms outside the rotation envelope.
pub(crate) fn fit_base_transform(
    reference: &[Point3<f32>],
    candidate: &[Point3<f32>],
    with_scale: bool,
    max_rotation_angle: Option<f32>,
) -> Option<BaseFit> {
    debug_assert_eq!(reference.len(), candidate.len());
    debug_assert!(reference.len() >= 3);

    let p: Vec<nalgebra::Vector3<f64>> = reference.iter().map(|v| v.coords.cast()).collect();
    let q: Vec<nalgebra::Vector3<f64>> = candidate.iter().map(|v| v.coords.cast()).collect();

    // Uniform scale from the two edge ratios of the 4-point tuple; a
    // candidate with inconsistent ratios cannot be a scaled congruent copy.
    let mut scale = 1.0f64;
    if with_scale && p.len() == 4 {
        let lp1 = (p[1] - p[0]).norm();
        let lp2 = (p[3] - p[2]).norm();
        let lq1 = (q[1] - q[0]).norm();
        let lq2 = (q[3] - q[2]).norm();
        if lq1 <= 0.0 || lq2 <= 0.0 || lp2 <= 0.0 {
            return None;
        }
        let ratio1 = lp1 / lq1;
        let ratio2 = lp2 / lq2;
        if (ratio1 / ratio2 - 1.0).abs() > 0.1 {
            return None;
        }
        scale = 0.5 * (ratio1 + ratio2);
    }

    let frame_p = orthonormal_frame(&p)?;
    let frame_q = orthonormal_frame(&q)?;

    // frame_* rows express world vectors in tuple-local coordinates, so the
    // rotation taking candidate vectors to reference vectors is Pᵀ·Q.
    let rotation = frame_p.transpose() * frame_q;

    // Numerical sanity: the product of two orthonormal frames should itself
    // be orthonormal to well below query tolerances.
    let ortho_err = (rotation.transpose() * rotation - nalgebra::Matrix3::identity()).abs();
    if ortho_err.max() > 1e-5 {
        return None;
    }

    if let Some(max_angle) = max_rotation_angle {
        let max_angle = max_angle as f64;
        let r = &rotation;
        let rx = r[(2, 1)].atan2(r[(2, 2)]).abs();
        let ry = (-r[(2, 0)])
            .atan2((r[(2, 1)].powi(2) + r[(2, 2)].powi(2)).sqrt())
            .abs();
        let rz = r[(1, 0)].atan2(r[(0, 0)]).abs();
        if rx > max_angle || ry > max_angle || rz > max_angle {
            return None;
        }
    }

    let c_ref = (p[0] + p[1] + p[2]) / 3.0;
    let c_cand = (q[0] + q[1] + q[2]) / 3.0;
    let translation = c_ref - rotation * (scale * c_cand);

    let mut rms = 0.0f64;
    for (pi, qi) in p.iter().zip(q.iter()) {
        rms += (rotation * (scale * qi) + translation - pi).norm();
    }
    rms /= p.len() as f64;

    Some(BaseFit {
        transform: RigidTransform {
            rotation: rotation.cast(),
            translation: translation.cast(),
            scale: scale as f32,
        },
        rms: rms as f32,
    })
}

/// Orthonormal frame from three points, rows = frame axes.
/// `None` when the points are coincident or collinear.
fn orthonormal_frame(pts: &[nalgebra::Vector3<f64>]) -> Option<nalgebra::Matrix3<f64>> {
    let u1 = pts[1] - pts[0];
    if u1.norm_squared() <= 0.0 {
        return None;
    }
    let u1 = u1.normalize();
    let mut u2 = pts[2] - pts[0];
    u2 -= u2.dot(&u1) * u1;
    if u2.norm_squared() <= f64::EPSILON {
        return None;
    }
    let u2 = u2.normalize();
    let u3 = u1.cross(&u2);
    Some(nalgebra::Matrix3::from_rows(&[
        u1.transpose(),
        u2.transpose(),
        u3.transpose(),
    ]))
}
