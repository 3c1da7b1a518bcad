//! The trial-driven registration engine.
//!
//! Each trial draws a base from the target cloud, enumerates the model
//! tuples congruent to it, fits a rigid transform per candidate and scores
//! it by the fraction of model points landing near some target point (the
//! LCP score). The best hypothesis is kept in a shared slot that only ever
//! improves, so trials can run on any number of threads without further
//! coordination. The run stops when the best score reaches the terminate
//! threshold, the trial or time budget runs out, or the caller cancels.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Instant;

use nalgebra::Point3;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rayon::prelude::*;
use tracing::debug;

use crate::cloud::PointCloud;
use crate::error::RegisterError;
use crate::grid::GridIndex;
use crate::pairs::{extract_pairs_batch, DistanceTarget, PairConstraints};
use crate::transform::{fit_base_transform, RigidTransform};

use super::base::{select_base, SelectedBase};
use super::congruent::{congruent_quads, congruent_triangles};
use super::{MatchConfig, MatchResult, MatchStatus, DISTANCE_FACTOR};

/// Residual probability of missing a valid base after the planned trials.
const SMALL_ERROR: f64 = 1e-5;

/// Bounds on the derived trial budget.
const MIN_TRIALS: u32 = 4;
const MAX_TRIALS: u32 = 10_000;

/// Register `model` onto `target`.
///
/// On success the returned transform maps model points into the target's
/// frame. A run that never reaches `config.min_score` reports
/// `success == false` with no transform; that is an answer, not an error.
/// Errors are reserved for unusable inputs and invalid configuration.
pub fn register(
    target: &PointCloud,
    model: &PointCloud,
    config: &MatchConfig,
) -> Result<MatchResult, RegisterError> {
    register_with_observer(target, model, config, None, |_, _| {})
}

/// As [`register`], with cooperative cancellation and per-trial progress
/// reporting.
///
/// `observer` receives `(progress, best_score)` after every trial, where
/// `progress` is the fraction of the planned trial budget spent. It runs on
/// worker threads, so it must be cheap and `Sync`. Raising `cancel` stops
/// the run at the next trial boundary.
pub fn register_with_observer<F>(
    target: &PointCloud,
    model: &PointCloud,
    config: &MatchConfig,
    cancel: Option<&AtomicBool>,
    observer: F,
) -> Result<MatchResult, RegisterError>
where
    F: Fn(f32, f32) + Sync,
{
    config.validate()?;
    let base_points = config.base_size.point_count();
    if target.len() < base_points || model.len() < base_points {
        return Err(RegisterError::DegenerateInput(format!(
            "need at least {base_points} points per cloud, got {} target / {} model",
            target.len(),
            model.len()
        )));
    }

    let start = Instant::now();
    let cell = 2.0 * config.epsilon;
    let target_grid = GridIndex::build(target, cell)?;
    let model_grid = GridIndex::build(model, cell)?;

    let mut rng = StdRng::seed_from_u64(config.seed);
    let diameter = target.approx_diameter(&mut rng, 1024).max(config.epsilon);
    let max_base_diameter = (diameter * config.overlap_estimate).max(2.0 * config.epsilon);

    // A cloud that cannot yield one non-degenerate base after bounded
    // retries (collinear points, say) will not yield one in the trial loop
    // either; surface that immediately.
    if select_base(target, &mut rng, max_base_diameter, config.base_size).is_none() {
        return Err(RegisterError::DegenerateInput(
            "no non-degenerate base could be drawn from the target cloud".into(),
        ));
    }

    let planned = config
        .max_trials
        .unwrap_or_else(|| derive_trial_budget(config, diameter, max_base_diameter))
        .max(1);
    let terminate = config
        .terminate_threshold
        .unwrap_or(config.overlap_estimate);

    debug!(
        planned,
        terminate,
        diameter,
        max_base_diameter,
        target = target.len(),
        model = model.len(),
        "registration run starting"
    );

    // Seed the slot with the untransformed overlap so callers whose clouds
    // already align never get a worse answer than "leave them alone".
    let identity = RigidTransform::identity();
    let initial = lcp_score(model, &identity, &target_grid, config.epsilon, 0.0);
    let best = BestSlot::new(Hypothesis {
        transform: identity,
        score: initial,
    });

    let done = AtomicBool::new(initial >= terminate);
    let trials_run = AtomicU32::new(0);

    let trial = |i: u32| {
        if done.load(Ordering::Relaxed) {
            return;
        }
        if let Some(flag) = cancel {
            if flag.load(Ordering::Relaxed) {
                done.store(true, Ordering::Relaxed);
                return;
            }
        }
        if let Some(limit) = config.max_time_ms {
            if start.elapsed().as_millis() as u64 >= limit {
                done.store(true, Ordering::Relaxed);
                return;
            }
        }
        let executed = trials_run.fetch_add(1, Ordering::Relaxed) + 1;
        run_trial(
            target,
            model,
            &target_grid,
            &model_grid,
            config,
            max_base_diameter,
            terminate,
            i,
            &best,
            &done,
        );
        observer(executed as f32 / planned as f32, best.score());
    };

    match config.threads {
        1 => {
            for i in 0..planned {
                trial(i);
                if done.load(Ordering::Relaxed) {
                    break;
                }
            }
        }
        0 => (0..planned).into_par_iter().for_each(trial),
        n => {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(n)
                .build()
                .map_err(|e| {
                    RegisterError::InvalidConfiguration(format!("thread pool: {e}"))
                })?;
            pool.install(|| (0..planned).into_par_iter().for_each(trial));
        }
    }

    let Hypothesis { transform, score } = best.take();
    let cancelled = cancel.is_some_and(|c| c.load(Ordering::Relaxed));
    let status = if score >= terminate {
        MatchStatus::Converged
    } else if cancelled {
        MatchStatus::Cancelled
    } else {
        MatchStatus::BudgetExhausted
    };
    let success = score >= config.min_score;
    let trials = trials_run.load(Ordering::Relaxed);
    let time_ms = start.elapsed().as_secs_f32() * 1e3;

    debug!(score, trials, ?status, time_ms, "registration run finished");

    Ok(MatchResult {
        transform: success.then_some(transform),
        score,
        success,
        trials_run: trials,
        status,
        time_ms,
    })
}

/// Trial budget sized so a valid base is missed with probability below
/// `SMALL_ERROR`, scaled up when the base spread is small relative to the
/// cloud (small bases are drawn more often from non-overlap regions).
fn derive_trial_budget(config: &MatchConfig, diameter: f32, max_base_diameter: f32) -> u32 {
    let points = config.base_size.point_count() as i32;
    let miss = 1.0 - (config.overlap_estimate as f64).powi(points);
    let first = if miss <= 0.0 {
        MIN_TRIALS as f64
    } else {
        SMALL_ERROR.ln() / miss.ln()
    };
    let scaled = first * (diameter as f64 / max_base_diameter as f64) / 0.3;
    scaled.clamp(MIN_TRIALS as f64, MAX_TRIALS as f64) as u32
}

/// One trial: base, congruent candidates, fit, verify.
#[allow(clippy::too_many_arguments)]
fn run_trial(
    target: &PointCloud,
    model: &PointCloud,
    target_grid: &GridIndex,
    model_grid: &GridIndex,
    config: &MatchConfig,
    max_base_diameter: f32,
    terminate: f32,
    trial_index: u32,
    best: &BestSlot,
    done: &AtomicBool,
) {
    // Independent stream per trial; reordering trials across threads never
    // changes which bases get drawn.
    let mut rng = StdRng::seed_from_u64(
        config.seed ^ 0x9E37_79B9_7F4A_7C15u64.wrapping_mul(trial_index as u64 + 1),
    );
    let Some(base) = select_base(target, &mut rng, max_base_diameter, config.base_size) else {
        return;
    };

    let reference: Vec<Point3<f32>> = base
        .ids()
        .iter()
        .map(|&i| target.pos(i as usize))
        .collect();
    let widened = DISTANCE_FACTOR * config.epsilon;

    let constraints_for = |a: u32, b: u32| -> PairConstraints {
        let pa = &target.points()[a as usize];
        let pb = &target.points()[b as usize];
        let (base_normal_diff, normal_threshold) =
            match (config.normal_angle_threshold, pa.normal, pb.normal) {
                (Some(t), Some(na), Some(nb)) => ((nb - na).norm(), Some(t)),
                _ => (0.0, None),
            };
        let base_dir = config.max_rotation_angle.and_then(|_| {
            let d = pb.pos - pa.pos;
            let n = d.norm();
            (n > 0.0).then(|| d / n)
        });
        PairConstraints {
            base_dir,
            base_normal_diff,
            normal_threshold,
            accept_flipped: config.accept_flipped_normals,
            max_dir_angle: config.max_rotation_angle,
        }
    };

    let evaluate = |candidate: &[Point3<f32>]| {
        let Some(fit) =
            fit_base_transform(&reference, candidate, config.with_scale, config.max_rotation_angle)
        else {
            return;
        };
        if fit.rms > widened {
            return;
        }
        let score = lcp_score(model, &fit.transform, target_grid, config.epsilon, best.score());
        if best.offer(Hypothesis {
            transform: fit.transform,
            score,
        }) {
            debug!(trial_index, score, "new best hypothesis");
            if score >= terminate {
                done.store(true, Ordering::Relaxed);
            }
        }
    };

    match base {
        SelectedBase::Four {
            ids,
            d1,
            d2,
            invariant1,
            invariant2,
        } => {
            let specs = [
                (
                    DistanceTarget {
                        distance: d1,
                        epsilon: widened,
                    },
                    constraints_for(ids[0], ids[1]),
                ),
                (
                    DistanceTarget {
                        distance: d2,
                        epsilon: widened,
                    },
                    constraints_for(ids[2], ids[3]),
                ),
            ];
            let sets = extract_pairs_batch(model, model_grid, &specs);
            let quads =
                congruent_quads(model, &sets[0], &sets[1], invariant1, invariant2, widened);
            debug!(
                trial_index,
                pairs1 = sets[0].len(),
                pairs2 = sets[1].len(),
                candidates = quads.len(),
                "quad trial"
            );
            for q in quads {
                if done.load(Ordering::Relaxed) {
                    break;
                }
                evaluate(&q.map(|i| model.pos(i as usize)));
            }
        }
        SelectedBase::Three { ids, sides } => {
            let specs = [(
                DistanceTarget {
                    distance: sides[0],
                    epsilon: widened,
                },
                constraints_for(ids[0], ids[1]),
            )];
            let sets = extract_pairs_batch(model, model_grid, &specs);
            let tris =
                congruent_triangles(model, model_grid, &sets[0], sides[1], sides[2], widened);
            debug!(
                trial_index,
                pairs = sets[0].len(),
                candidates = tris.len(),
                "triangle trial"
            );
            for t in tris {
                if done.load(Ordering::Relaxed) {
                    break;
                }
                evaluate(&t.map(|i| model.pos(i as usize)));
            }
        }
    }
}

/// Weighted fraction of model points with a target neighbor within
/// `epsilon` after applying `t`.
///
/// A matched point contributes its weight rather than a flat count, so
/// down-weighted points dilute the score less; with all-unit weights this
/// is the plain LCP fraction.
///
/// `best_seen` enables the early exit: once even a perfect remainder cannot
/// beat it, scanning stops. The returned value is then an underestimate,
/// which is harmless because it loses the comparison anyway; whenever the
/// score does beat `best_seen` it is exact.
fn lcp_score(
    model: &PointCloud,
    t: &RigidTransform,
    target_grid: &GridIndex,
    epsilon: f32,
    best_seen: f32,
) -> f32 {
    let total: f32 = model.points().iter().map(|p| p.weight).sum();
    if total <= 0.0 {
        return 0.0;
    }
    let needed = best_seen * total;
    let mut good = 0.0f32;
    let mut seen = 0.0f32;
    for p in model.points() {
        seen += p.weight;
        if target_grid.has_neighbor_within(&t.apply(&p.pos), epsilon) {
            good += p.weight;
        }
        if good + (total - seen) < needed {
            break;
        }
    }
    good / total
}

// ── Best-hypothesis slot ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
struct Hypothesis {
    transform: RigidTransform,
    score: f32,
}

/// Monotonically improving best hypothesis, shared across trial workers.
///
/// The score is mirrored into an atomic so the hot path (comparing against
/// the current best) never takes the lock; the lock guards only the rare
/// improvement. Scores are non-negative, so their bit patterns order the
/// same way the floats do.
struct BestSlot {
    bits: AtomicU32,
    slot: Mutex<Hypothesis>,
}

impl BestSlot {
    fn new(h: Hypothesis) -> Self {
        Self {
            bits: AtomicU32::new(h.score.to_bits()),
            slot: Mutex::new(h),
        }
    }

    fn score(&self) -> f32 {
        f32::from_bits(self.bits.load(Ordering::Acquire))
    }

    /// Install `h` if it beats the current best. Returns whether it did.
    fn offer(&self, h: Hypothesis) -> bool {
        if h.score <= self.score() {
            return false;
        }
        let mut guard = self.slot.lock().unwrap_or_else(|e| e.into_inner());
        if h.score <= guard.score {
            return false;
        }
        *guard = h;
        self.bits.store(h.score.to_bits(), Ordering::Release);
        true
    }

    fn take(&self) -> Hypothesis {
        *self.slot.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloud::Point;
    use nalgebra::Vector3;
    use rand::Rng;

    fn scattered_cloud(n: usize, seed: u64) -> PointCloud {
        let mut rng = StdRng::seed_from_u64(seed);
        PointCloud::from_positions(
            (0..n).map(|_| [rng.gen::<f32>(), rng.gen::<f32>(), rng.gen::<f32>()]),
        )
    }

    fn shifted(cloud: &PointCloud, shift: Vector3<f32>) -> PointCloud {
        PointCloud::from_positions(cloud.points().iter().map(|p| {
            let q = p.pos + shift;
            [q.x, q.y, q.z]
        }))
    }

    #[test]
    fn lcp_score_is_one_for_exact_overlay() {
        let cloud = scattered_cloud(80, 2);
        let grid = GridIndex::build(&cloud, 0.05).unwrap();
        let score = lcp_score(&cloud, &RigidTransform::identity(), &grid, 0.01, 0.0);
        assert_eq!(score, 1.0);
    }

    #[test]
    fn lcp_score_is_zero_for_distant_clouds() {
        let cloud = scattered_cloud(80, 2);
        let grid = GridIndex::build(&cloud, 0.05).unwrap();
        let far = RigidTransform {
            translation: Vector3::new(100.0, 0.0, 0.0),
            ..RigidTransform::identity()
        };
        assert_eq!(lcp_score(&cloud, &far, &grid, 0.01, 0.0), 0.0);
    }

    #[test]
    fn early_exit_never_overstates() {
        let target = scattered_cloud(100, 5);
        let model = shifted(&target, Vector3::new(0.5, 0.0, 0.0));
        let grid = GridIndex::build(&target, 0.05).unwrap();
        let exact = lcp_score(&model, &RigidTransform::identity(), &grid, 0.02, 0.0);
        let bounded = lcp_score(&model, &RigidTransform::identity(), &grid, 0.02, 0.95);
        assert!(bounded <= exact);
    }

    #[test]
    fn best_slot_is_monotone() {
        let slot = BestSlot::new(Hypothesis {
            transform: RigidTransform::identity(),
            score: 0.3,
        });
        assert!(!slot.offer(Hypothesis {
            transform: RigidTransform::identity(),
            score: 0.2,
        }));
        assert!(slot.offer(Hypothesis {
            transform: RigidTransform::identity(),
            score: 0.6,
        }));
        assert!((slot.score() - 0.6).abs() < 1e-6);
    }

    #[test]
    fn recovers_pure_translation() {
        let target = scattered_cloud(60, 11);
        let shift = Vector3::new(0.3, -0.2, 0.1);
        let model = shifted(&target, shift);
        let config = MatchConfig {
            epsilon: 0.02,
            overlap_estimate: 0.9,
            max_trials: Some(200),
            seed: 3,
            ..Default::default()
        };
        let result = register(&target, &model, &config).unwrap();
        assert!(result.success, "score = {}", result.score);
        assert!(result.score >= 0.9);
        assert_eq!(result.status, MatchStatus::Converged);
        let t = result.transform.unwrap();
        for p in model.points() {
            let mapped = t.apply(&p.pos);
            let original = p.pos - shift;
            assert!((mapped - original).norm() < 0.05);
        }
    }

    #[test]
    fn pre_aligned_clouds_converge_immediately() {
        let target = scattered_cloud(50, 7);
        let config = MatchConfig {
            epsilon: 0.01,
            overlap_estimate: 0.8,
            seed: 1,
            ..Default::default()
        };
        let result = register(&target, &target, &config).unwrap();
        assert!(result.success);
        assert_eq!(result.score, 1.0);
        assert_eq!(result.trials_run, 0);
        assert_eq!(result.status, MatchStatus::Converged);
    }

    #[test]
    fn cancellation_is_honored() {
        let target = scattered_cloud(60, 13);
        let model = shifted(&target, Vector3::new(0.4, 0.4, 0.0));
        let config = MatchConfig {
            epsilon: 0.01,
            overlap_estimate: 0.9,
            max_trials: Some(500),
            min_score: 0.5,
            seed: 9,
            ..Default::default()
        };
        let cancel = AtomicBool::new(true);
        let result =
            register_with_observer(&target, &model, &config, Some(&cancel), |_, _| {}).unwrap();
        assert_eq!(result.status, MatchStatus::Cancelled);
        assert_eq!(result.trials_run, 0);
        assert!(!result.success);
        assert!(result.transform.is_none());
    }

    #[test]
    fn lcp_score_weighs_points() {
        let target = scattered_cloud(50, 3);
        let grid = GridIndex::build(&target, 0.05).unwrap();
        // Aligned copy of the target plus far-away clutter of equal size.
        let mut points: Vec<Point> = target.points().to_vec();
        for i in 0..50 {
            points.push(Point::new(Point3::new(100.0 + i as f32, 0.0, 0.0)));
        }
        let model = PointCloud::new(points.clone());
        let diluted = lcp_score(&model, &RigidTransform::identity(), &grid, 0.01, 0.0);
        assert!((diluted - 0.5).abs() < 1e-6);

        // Zero-weighting the clutter removes its dilution entirely.
        for p in &mut points[50..] {
            p.weight = 0.0;
        }
        let model = PointCloud::new(points);
        let score = lcp_score(&model, &RigidTransform::identity(), &grid, 0.01, 0.0);
        assert_eq!(score, 1.0);
    }

    #[test]
    fn observer_sees_monotone_progress() {
        // Unrelated scatters: the engine must exhaust its budget rather
        // than converge.
        let target = scattered_cloud(40, 17);
        let model = scattered_cloud(40, 18);
        let config = MatchConfig {
            epsilon: 0.01,
            overlap_estimate: 0.9,
            terminate_threshold: Some(1.0),
            max_trials: Some(20),
            seed: 21,
            ..Default::default()
        };
        let calls = AtomicU32::new(0);
        let last_seen = Mutex::new((0.0f32, 0.0f32));
        let result = register_with_observer(&target, &model, &config, None, |progress, score| {
            calls.fetch_add(1, Ordering::Relaxed);
            let mut last = last_seen.lock().unwrap();
            assert!(progress >= last.0);
            assert!(score >= last.1, "best score must never regress");
            *last = (progress, score);
        })
        .unwrap();
        assert_eq!(calls.load(Ordering::Relaxed), result.trials_run);
        assert_eq!(result.status, MatchStatus::BudgetExhausted);
    }

    #[test]
    fn collinear_target_is_degenerate() {
        let line = PointCloud::from_positions((0..20).map(|i| [i as f32 * 0.1, 0.0, 0.0]));
        let model = scattered_cloud(20, 3);
        assert!(matches!(
            register(&line, &model, &MatchConfig::default()),
            Err(RegisterError::DegenerateInput(_))
        ));
    }

    #[test]
    fn too_small_clouds_are_rejected() {
        let tiny = scattered_cloud(2, 1);
        let ok = scattered_cloud(20, 2);
        assert!(matches!(
            register(&tiny, &ok, &MatchConfig::default()),
            Err(RegisterError::DegenerateInput(_))
        ));
        assert!(matches!(
            register(&ok, &tiny, &MatchConfig::default()),
            Err(RegisterError::DegenerateInput(_))
        ));
    }
}
