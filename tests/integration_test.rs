//! Integration tests: build synthetic scan pairs with known relative poses
//! and verify the engine recovers the alignment.

use nalgebra::{Point3, Rotation3, Vector3};
use quadmatch::{
    register, MatchConfig, MatchStatus, PointCloud, RegisterError, RigidTransform,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_env_filter("info").try_init();
}

/// Apply the inverse of `truth` to a cloud, producing a model that `truth`
/// maps back onto the original.
fn displace(cloud: &PointCloud, truth: &RigidTransform) -> PointCloud {
    let inv_rot = truth.rotation.transpose();
    PointCloud::from_positions(cloud.points().iter().map(|p| {
        let q = inv_rot * ((p.pos.coords - truth.translation) / truth.scale);
        [q.x, q.y, q.z]
    }))
}

/// Distance from `p` to its nearest point of `cloud`.
fn nearest_distance(cloud: &PointCloud, p: &Point3<f32>) -> f32 {
    cloud
        .points()
        .iter()
        .map(|q| (q.pos - p).norm())
        .fold(f32::MAX, f32::min)
}

#[test]
fn cube_corners_align_under_quarter_turn() {
    init_tracing();

    let target = PointCloud::from_positions([
        [0.0, 0.0, 0.0],
        [1.0, 0.0, 0.0],
        [0.0, 1.0, 0.0],
        [1.0, 1.0, 0.0],
        [0.0, 0.0, 1.0],
        [1.0, 0.0, 1.0],
        [0.0, 1.0, 1.0],
        [1.0, 1.0, 1.0],
    ]);
    let truth = RigidTransform {
        rotation: *Rotation3::from_axis_angle(&Vector3::z_axis(), 90.0f32.to_radians()).matrix(),
        translation: Vector3::new(0.5, -0.3, 0.2),
        scale: 1.0,
    };
    let model = displace(&target, &truth);

    let config = MatchConfig {
        epsilon: 0.01,
        overlap_estimate: 0.9,
        terminate_threshold: Some(0.99),
        max_trials: Some(500),
        seed: 42,
        ..Default::default()
    };
    let result = register(&target, &model, &config).expect("valid inputs");

    // The cube is rotationally symmetric, so the recovered rotation need not
    // equal the planted one; every mapped corner must still land on a corner.
    assert!(result.success, "score = {}", result.score);
    assert_eq!(result.score, 1.0);
    assert_eq!(result.status, MatchStatus::Converged);
    let t = result.transform.expect("successful run carries a transform");
    for p in model.points() {
        assert!(nearest_distance(&target, &t.apply(&p.pos)) < 0.02);
    }
}

#[test]
fn asymmetric_shape_recovers_exact_rotation() {
    init_tracing();

    // Cube corners plus an off-center marker that breaks every symmetry.
    let target = PointCloud::from_positions([
        [0.0, 0.0, 0.0],
        [1.0, 0.0, 0.0],
        [0.0, 1.0, 0.0],
        [1.0, 1.0, 0.0],
        [0.0, 0.0, 1.0],
        [1.0, 0.0, 1.0],
        [0.0, 1.0, 1.0],
        [1.0, 1.0, 1.0],
        [0.25, 0.1, 0.05],
    ]);
    let truth = RigidTransform {
        rotation: *Rotation3::from_euler_angles(0.4, -0.7, 1.2).matrix(),
        translation: Vector3::new(-0.8, 0.6, 1.4),
        scale: 1.0,
    };
    let model = displace(&target, &truth);

    let config = MatchConfig {
        epsilon: 0.01,
        overlap_estimate: 0.9,
        terminate_threshold: Some(0.99),
        max_trials: Some(1000),
        seed: 7,
        ..Default::default()
    };
    let result = register(&target, &model, &config).expect("valid inputs");
    assert!(result.success, "score = {}", result.score);
    let t = result.transform.unwrap();

    // Exact correspondence: model point i must map back onto target point i.
    for (m, want) in model.points().iter().zip(target.points()) {
        assert!((t.apply(&m.pos) - want.pos).norm() < 0.02);
    }
    let rot_err = (t.rotation - truth.rotation).abs().max();
    assert!(rot_err < 1e-2, "rotation error {rot_err}");
}

#[test]
fn noisy_partial_overlap_with_outliers() {
    init_tracing();

    let mut rng = StdRng::seed_from_u64(99);
    let noise = Normal::new(0.0f32, 0.004).unwrap();

    // A shared shape observed twice: once as the target with sensor noise,
    // once displaced, noisy, and polluted with outliers.
    let shape: Vec<Point3<f32>> = (0..300)
        .map(|_| Point3::new(rng.gen::<f32>(), rng.gen::<f32>(), rng.gen::<f32>()))
        .collect();

    let target = PointCloud::from_positions(shape.iter().map(|p| {
        [
            p.x + noise.sample(&mut rng),
            p.y + noise.sample(&mut rng),
            p.z + noise.sample(&mut rng),
        ]
    }));

    let truth = RigidTransform {
        rotation: *Rotation3::from_euler_angles(0.3, 0.5, -0.4).matrix(),
        translation: Vector3::new(1.0, -0.5, 0.7),
        scale: 1.0,
    };
    let clean_model = PointCloud::from_positions(shape.iter().map(|p| [p.x, p.y, p.z]));
    let displaced = displace(&clean_model, &truth);
    let mut model_points: Vec<[f32; 3]> = displaced
        .points()
        .iter()
        .map(|p| {
            [
                p.pos.x + noise.sample(&mut rng),
                p.pos.y + noise.sample(&mut rng),
                p.pos.z + noise.sample(&mut rng),
            ]
        })
        .collect();
    for _ in 0..60 {
        model_points.push([
            rng.gen_range(-1.0..2.0),
            rng.gen_range(-1.0..2.0),
            rng.gen_range(-1.0..2.0),
        ]);
    }
    let model = PointCloud::from_positions(model_points);

    let config = MatchConfig {
        epsilon: 0.02,
        overlap_estimate: 0.8,
        terminate_threshold: Some(0.5),
        max_trials: Some(3000),
        min_score: 0.3,
        seed: 123,
        ..Default::default()
    };
    let result = register(&target, &model, &config).expect("valid inputs");
    assert!(result.success, "score = {}", result.score);
    assert!(result.score >= 0.5);
    assert_eq!(result.status, MatchStatus::Converged);

    // Most inlier model points must land near their true counterparts.
    let t = result.transform.unwrap();
    let close = model
        .points()
        .iter()
        .take(300)
        .zip(target.points())
        .filter(|(m, want)| (t.apply(&m.pos) - want.pos).norm() < 0.05)
        .count();
    assert!(close >= 240, "only {close}/300 inliers recovered");
}

#[test]
fn sparse_model_covers_a_third_of_dense_target() {
    init_tracing();

    let mut rng = StdRng::seed_from_u64(31);
    let noise = Normal::new(0.0f32, 0.004).unwrap();

    // The model observes only 30% of a dense target, so most target points
    // have no counterpart; scoring is model-side and must still converge.
    let target_points: Vec<[f32; 3]> = (0..1000)
        .map(|_| [rng.gen::<f32>(), rng.gen::<f32>(), rng.gen::<f32>()])
        .collect();
    let target = PointCloud::from_positions(target_points.iter().copied());

    let truth = RigidTransform {
        rotation: *Rotation3::from_euler_angles(-0.5, 0.2, 0.9).matrix(),
        translation: Vector3::new(0.6, 1.1, -0.4),
        scale: 1.0,
    };
    let subset = PointCloud::from_positions(target_points.iter().take(300).copied());
    let displaced = displace(&subset, &truth);
    let mut model_points: Vec<[f32; 3]> = displaced
        .points()
        .iter()
        .map(|p| {
            [
                p.pos.x + noise.sample(&mut rng),
                p.pos.y + noise.sample(&mut rng),
                p.pos.z + noise.sample(&mut rng),
            ]
        })
        .collect();
    for _ in 0..60 {
        model_points.push([
            rng.gen_range(-1.0..2.0),
            rng.gen_range(-1.0..2.0),
            rng.gen_range(-1.0..2.0),
        ]);
    }
    let model = PointCloud::from_positions(model_points);

    let config = MatchConfig {
        epsilon: 0.02,
        overlap_estimate: 0.8,
        terminate_threshold: Some(0.5),
        max_trials: Some(3000),
        min_score: 0.25,
        seed: 5,
        ..Default::default()
    };
    let result = register(&target, &model, &config).expect("valid inputs");
    assert!(result.success, "score = {}", result.score);
    assert!(result.score >= 0.25);

    // The recovered pose must map the observed subset back onto its true
    // target points, not just score well by accident.
    let t = result.transform.unwrap();
    let close = model
        .points()
        .iter()
        .take(300)
        .zip(subset.points())
        .filter(|(m, want)| (t.apply(&m.pos) - want.pos).norm() < 0.05)
        .count();
    assert!(close >= 240, "only {close}/300 subset points recovered");
}

#[test]
fn unrelated_clouds_report_failure_not_error() {
    init_tracing();

    let mut rng = StdRng::seed_from_u64(4);
    // Sphere surface versus an unrelated volume scatter: no rigid motion
    // aligns more than accidental fractions.
    let target = PointCloud::from_positions((0..60).map(|_| {
        let v = Vector3::new(
            rng.gen::<f32>() - 0.5,
            rng.gen::<f32>() - 0.5,
            rng.gen::<f32>() - 0.5,
        )
        .normalize();
        [v.x, v.y, v.z]
    }));
    let model = PointCloud::from_positions(
        (0..60).map(|_| [rng.gen::<f32>(), rng.gen::<f32>(), rng.gen::<f32>()]),
    );

    let config = MatchConfig {
        epsilon: 0.01,
        overlap_estimate: 0.9,
        terminate_threshold: Some(0.9),
        max_trials: Some(100),
        min_score: 0.5,
        seed: 8,
        ..Default::default()
    };
    let result = register(&target, &model, &config).expect("valid inputs");
    assert!(!result.success);
    assert!(result.transform.is_none());
    assert_eq!(result.status, MatchStatus::BudgetExhausted);
    assert!(result.score < 0.5);
}

#[test]
fn unusable_inputs_are_errors() {
    let ok = PointCloud::from_positions([
        [0.0, 0.0, 0.0],
        [1.0, 0.0, 0.0],
        [0.0, 1.0, 0.0],
        [0.0, 0.0, 1.0],
        [1.0, 1.0, 1.0],
    ]);
    let tiny = PointCloud::from_positions([[0.0, 0.0, 0.0], [1.0, 0.0, 0.0]]);
    assert!(matches!(
        register(&ok, &tiny, &MatchConfig::default()),
        Err(RegisterError::DegenerateInput(_))
    ));

    let collapsed = PointCloud::from_positions([[2.0, 2.0, 2.0]; 10]);
    assert!(matches!(
        register(&collapsed, &ok, &MatchConfig::default()),
        Err(RegisterError::DegenerateInput(_))
    ));

    let bad = MatchConfig {
        epsilon: -1.0,
        ..Default::default()
    };
    assert!(matches!(
        register(&ok, &ok, &bad),
        Err(RegisterError::InvalidConfiguration(_))
    ));
}
