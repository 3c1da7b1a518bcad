//! # quadmatch
//!
//! Global rigid registration of 3D point clouds by congruent-set matching.
//!
//! Given two point clouds with unknown relative pose, the engine finds the
//! rigid transform (optionally with uniform scale) that maximizes the
//! fraction of overlapping points — no initial alignment guess required. It
//! repeatedly draws a small wide-spread base from the target cloud,
//! enumerates the model tuples congruent to it using distance and
//! segment-intersection invariants, fits a transform per candidate and keeps
//! the hypothesis with the largest common pointset.
//!
//! ## Features
//!
//! - **Global** — no initial guess; works from any relative pose
//! - **4-point coplanar bases** (selective, the default) or 3-point bases
//! - **Batched pair extraction** over a uniform-grid spatial index
//! - **Optional filtering** by normal compatibility and rotation envelope
//! - **Controllable** — early termination, trial/time budgets, cancellation
//!   and progress reporting; deterministic for a fixed seed on one thread
//!
//! ## Example
//!
//! ```no_run
//! use quadmatch::{register, MatchConfig, PointCloud};
//!
//! let target = PointCloud::from_positions(load_scan_a());
//! let model = PointCloud::from_positions(load_scan_b());
//!
//! let config = MatchConfig {
//!     epsilon: 0.02,
//!     overlap_estimate: 0.6,
//!     ..Default::default()
//! };
//! let result = register(&target, &model, &config)?;
//! if result.success {
//!     let t = result.transform.unwrap();
//!     println!("score {:.2}\n{}", result.score, t.to_matrix4());
//! }
//! # fn load_scan_a() -> Vec<[f32; 3]> { vec![] }
//! # fn load_scan_b() -> Vec<[f32; 3]> { vec![] }
//! # Ok::<(), quadmatch::RegisterError>(())
//! ```

pub mod cloud;
pub mod error;
pub mod grid;
pub mod matcher;
pub mod neighborhood;
pub mod pairs;
pub mod transform;

pub use cloud::{Point, PointCloud};
pub use error::RegisterError;
pub use grid::GridIndex;
pub use matcher::{
    register, register_with_observer, BaseSize, CancelFlag, MatchConfig, MatchResult, MatchStatus,
};
pub use transform::RigidTransform;
