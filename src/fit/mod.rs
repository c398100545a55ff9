//! Fit orchestration.
//!
//! Responsibilities:
//!
//! - pick the routine for a call
//! - normalize atomic or linked input
//! - keep offset sub-models frozen for the duration of a fit
//! - run a single fit or a Monte-Carlo ensemble (parallel)
//! - aggregate and classify the outcome

pub mod fitter;
pub mod monte_carlo;
pub mod normalize;
pub mod offset_guard;
pub mod selection;

pub use fitter::*;
pub use monte_carlo::run_ensemble;
pub use normalize::{normalize, Normalized};
pub use offset_guard::OffsetGuard;
pub use selection::select_routine;
