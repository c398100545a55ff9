//! Routine selection.
//!
//! Rules:
//! 1. No routine requested: `odr_fit` when x uncertainties are given and Monte-Carlo
//!    sampling is off, `curve_fit` otherwise. Under Monte-Carlo the uncertainty is
//!    carried by the resampled data, so the plain routine is the inner sampler.
//! 2. A routine name must be one of the supported set; anything else is rejected
//!    before any data is touched.

use crate::domain::{RoutineChoice, RoutineKind};
use crate::error::FitError;

/// Resolve the routine for one fit call. Pure; never touches the model or data.
pub fn select_routine(
    choice: &RoutineChoice,
    has_sigma_x: bool,
    mc_sigma: usize,
) -> Result<RoutineKind, FitError> {
    match choice {
        RoutineChoice::Auto => Ok(if has_sigma_x && mc_sigma == 0 {
            RoutineKind::OdrFit
        } else {
            RoutineKind::CurveFit
        }),
        RoutineChoice::Name(name) => name.parse(),
        RoutineChoice::Kind(kind) => Ok(*kind),
    }
}
