//! Error taxonomy for the registration engine.
//!
//! Only two conditions are surfaced as `Err`: inputs that can never produce a
//! meaningful registration, and configurations that fail validation before any
//! trial runs. A run that simply fails to find a good alignment is *not* an
//! error — it is reported through [`MatchResult`](crate::matcher::MatchResult)
//! with `success = false`.

use thiserror::Error;

/// Fatal errors raised before or during engine setup.
#[derive(Debug, Error)]
pub enum RegisterError {
    /// The input cloud is too small, has near-zero extent, or no
    /// non-degenerate base could be drawn from it.
    #[error("degenerate input: {0}")]
    DegenerateInput(String),

    /// A configuration value is outside its valid range.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),
}
