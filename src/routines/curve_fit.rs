//! Weighted least squares with uncertainty on the dependent variable only.

use tracing::trace;

use crate::domain::RoutineKind;
use crate::error::RoutineError;
use crate::routines::lm::levenberg_marquardt;
use crate::routines::{FitProblem, FitRoutine, RoutineOutput};

/// Standard curve fit: minimizes `Σ ((y - f(x)) / sigma_y)^2`.
///
/// Without `sigma_y` every sample has unit weight and the covariance is scaled by the
/// reduced residual sum. With `sigma_y` and `absolute_sigma` the covariance is taken
/// as is.
#[derive(Debug, Clone, Copy, Default)]
pub struct CurveFit;

impl FitRoutine for CurveFit {
    fn kind(&self) -> RoutineKind {
        RoutineKind::CurveFit
    }

    fn fit(&self, problem: &FitProblem<'_>) -> Result<RoutineOutput, RoutineError> {
        let n = problem.y.len();
        let unit;
        let sigma: &[f64] = match problem.weights.sigma_y {
            Some(s) => s,
            None => {
                unit = vec![1.0; n];
                &unit
            }
        };

        let sol = levenberg_marquardt(
            |p: &[f64]| problem.evaluate(problem.x, p),
            problem.y,
            sigma,
            problem.p0,
            problem.fixed,
            problem.bounds,
            problem.options,
        )?;

        let absolute = problem.weights.absolute_sigma && problem.weights.sigma_y.is_some();
        let pcov = sol.covariance(!absolute);
        trace!(ssr = sol.ssr, n, "curve_fit converged");
        Ok(RoutineOutput {
            popt: sol.popt,
            pcov,
        })
    }
}
