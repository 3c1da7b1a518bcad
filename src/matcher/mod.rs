//! Congruent-set matching: base selection, congruent-set exploration, and
//! the trial-driven match engine.
//!
//! The engine repeats {select a base from the target → enumerate congruent
//! candidates in the model → fit and verify each candidate} until the best
//! hypothesis reaches the terminate threshold or the trial/time budget runs
//! out. Trials are independent given the immutable clouds and indices, so
//! they parallelize; the only shared mutable state is the best-hypothesis
//! slot, updated monotonically.

pub mod base;
pub mod congruent;
pub mod engine;

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use crate::error::RegisterError;
use crate::transform::RigidTransform;

pub use engine::{register, register_with_observer};

/// Widening factor applied to epsilon during pair extraction, congruent
/// matching and the base-fit RMS gate; verification uses plain epsilon.
pub(crate) const DISTANCE_FACTOR: f32 = 2.0;

/// How many points a base draws from the target cloud.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BaseSize {
    /// Triangle base: one matched edge plus two closing distances.
    Three,
    /// Coplanar quadrilateral base: two matched edges plus the segment
    /// intersection invariants. Far more selective; the default.
    Four,
}

impl BaseSize {
    pub fn point_count(self) -> usize {
        match self {
            BaseSize::Three => 3,
            BaseSize::Four => 4,
        }
    }
}

/// Cooperative cancellation flag, checked between trials.
pub type CancelFlag = Arc<AtomicBool>;

// ── Configuration ───────────────────────────────────────────────────────────

/// Parameters controlling a registration run.
#[derive(Debug, Clone)]
pub struct MatchConfig {
    /// Matching tolerance in world units. Controls pair-distance matching,
    /// congruent-set acceptance and the LCP neighbor radius. Must be > 0.
    pub epsilon: f32,
    /// Expected fraction of the two clouds that truly overlap, in (0, 1].
    /// Sizes the trial budget and the default terminate threshold.
    pub overlap_estimate: f32,
    /// LCP score at which the run may stop early. `None` = use the overlap
    /// estimate. Must be in [0, 1] when set.
    pub terminate_threshold: Option<f32>,
    /// Hard cap on the number of trials. `None` = derive from the overlap
    /// estimate and cloud diameter.
    pub max_trials: Option<u32>,
    /// Wall-clock budget in milliseconds. `None` = no time limit.
    pub max_time_ms: Option<u64>,
    /// Base size: 3- or 4-point congruent sets.
    pub base_size: BaseSize,
    /// Maximum normal-angle deviation (radians) for pair filtering.
    /// `None` disables normal filtering even when normals are present.
    pub normal_angle_threshold: Option<f32>,
    /// Treat antiparallel normals as compatible. Input clouds frequently
    /// carry inconsistently oriented normals, so this defaults to `true`.
    pub accept_flipped_normals: bool,
    /// Per-axis rotation limit in radians for applications that know their
    /// motion envelope. `None` = unrestricted.
    pub max_rotation_angle: Option<f32>,
    /// Also estimate a uniform scale between the clouds.
    pub with_scale: bool,
    /// Minimum LCP score for the run to count as a success. A run that
    /// never reaches this floor reports failure instead of returning a
    /// meaningless transform.
    pub min_score: f32,
    /// Seed for the run's random sampling, for reproducibility.
    pub seed: u64,
    /// Worker threads for the trial loop: 1 = sequential (fully
    /// deterministic), 0 = rayon's default parallelism.
    pub threads: usize,
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self {
            epsilon: 0.01,
            overlap_estimate: 0.5,
            terminate_threshold: None,
            max_trials: None,
            max_time_ms: None,
            base_size: BaseSize::Four,
            normal_angle_threshold: None,
            accept_flipped_normals: true,
            max_rotation_angle: None,
            with_scale: false,
            min_score: 0.1,
            seed: 0,
            threads: 1,
        }
    }
}

impl MatchConfig {
    /// Validate ranges before any trial runs.
    pub fn validate(&self) -> Result<(), RegisterError> {
        if !(self.epsilon > 0.0) {
            return Err(RegisterError::InvalidConfiguration(format!(
                "epsilon must be > 0, got {}",
                self.epsilon
            )));
        }
        if !(self.overlap_estimate > 0.0 && self.overlap_estimate <= 1.0) {
            return Err(RegisterError::InvalidConfiguration(format!(
                "overlap_estimate must be in (0, 1], got {}",
                self.overlap_estimate
            )));
        }
        if let Some(t) = self.terminate_threshold {
            if !(0.0..=1.0).contains(&t) {
                return Err(RegisterError::InvalidConfiguration(format!(
                    "terminate_threshold must be in [0, 1], got {t}"
                )));
            }
        }
        if !(0.0..=1.0).contains(&self.min_score) {
            return Err(RegisterError::InvalidConfiguration(format!(
                "min_score must be in [0, 1], got {}",
                self.min_score
            )));
        }
        if let Some(a) = self.normal_angle_threshold {
            if !(a > 0.0) {
                return Err(RegisterError::InvalidConfiguration(format!(
                    "normal_angle_threshold must be > 0, got {a}"
                )));
            }
        }
        Ok(())
    }
}

// ── Run outcome ─────────────────────────────────────────────────────────────

/// How a registration run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchStatus {
    /// The best hypothesis reached the terminate threshold.
    Converged,
    /// The trial or time budget ran out first.
    BudgetExhausted,
    /// The caller's cancellation flag was raised.
    Cancelled,
}

/// Terminal result of a registration run.
#[derive(Debug, Clone)]
pub struct MatchResult {
    /// Transform mapping model points toward the target cloud. `None` when
    /// the run failed to reach the acceptance floor.
    pub transform: Option<RigidTransform>,
    /// LCP score of the best hypothesis, in [0, 1].
    pub score: f32,
    /// Whether the best score reached the configured acceptance floor.
    pub success: bool,
    /// Trials actually executed.
    pub trials_run: u32,
    /// How the run terminated.
    pub status: MatchStatus,
    /// Wall-clock time spent, in milliseconds.
    pub time_ms: f32,
}
