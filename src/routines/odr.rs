//! Orthogonal distance regression via effective variance.
//!
//! Each round linearizes the model in x around the observed points and folds the
//! x uncertainty into an effective y uncertainty:
//!
//! ```text
//! sigma_eff_i^2 = sigma_y_i^2 + (df/dx_i * sigma_x_i)^2
//! ```
//!
//! then re-solves the weighted least-squares problem. Rounds stop once the parameters
//! settle. Slopes come from central differences, so models are expected to act
//! pointwise in x.

use tracing::trace;

use crate::domain::RoutineKind;
use crate::error::RoutineError;
use crate::routines::lm::{levenberg_marquardt, validate_sigma};
use crate::routines::{FitProblem, FitRoutine, RoutineOutput};

/// Upper limit on effective-variance rounds.
const MAX_ROUNDS: usize = 50;
/// Relative parameter change below which the rounds stop.
const ROUND_RTOL: f64 = 1e-10;

#[derive(Debug, Clone, Copy, Default)]
pub struct OdrFit;

fn slopes(problem: &FitProblem<'_>, p: &[f64]) -> Result<Vec<f64>, RoutineError> {
    let x = problem.x.flatten();
    let h: Vec<f64> = x
        .iter()
        .map(|xi| f64::EPSILON.cbrt() * xi.abs().max(1.0))
        .collect();
    let neg: Vec<f64> = h.iter().map(|v| -v).collect();

    let up = problem.evaluate(&problem.x.shifted(&h), p)?;
    let down = problem.evaluate(&problem.x.shifted(&neg), p)?;
    if up.len() != x.len() || down.len() != x.len() {
        return Err(RoutineError::Value(format!(
            "model returned {} values for {} x samples",
            up.len(),
            x.len()
        )));
    }
    Ok(up
        .iter()
        .zip(&down)
        .zip(&h)
        .map(|((u, d), hi)| (u - d) / (2.0 * hi))
        .collect())
}

fn effective_sigma(sigma_y: &[f64], sigma_x: &[f64], slope: &[f64]) -> Vec<f64> {
    sigma_y
        .iter()
        .zip(sigma_x)
        .zip(slope)
        .map(|((sy, sx), d)| (sy * sy + (d * sx).powi(2)).sqrt())
        .collect()
}

impl FitRoutine for OdrFit {
    fn kind(&self) -> RoutineKind {
        RoutineKind::OdrFit
    }

    fn fit(&self, problem: &FitProblem<'_>) -> Result<RoutineOutput, RoutineError> {
        let n = problem.y.len();
        let sigma_y = problem.weights.sigma_y.map_or_else(|| vec![1.0; n], <[f64]>::to_vec);

        let mut p = problem.p0.to_vec();
        let mut sigma = sigma_y.clone();
        let mut rounds = 1;

        let sol = match problem.weights.sigma_x {
            None => levenberg_marquardt(
                |q: &[f64]| problem.evaluate(problem.x, q),
                problem.y,
                &sigma,
                &p,
                problem.fixed,
                problem.bounds,
                problem.options,
            )?,
            Some(sigma_x) => {
                if sigma_x.len() != problem.x.n_samples() {
                    return Err(RoutineError::Value(format!(
                        "sigma_x has {} entries but x has {} samples",
                        sigma_x.len(),
                        problem.x.n_samples()
                    )));
                }
                if sigma_x.iter().any(|s| !(s.is_finite() && *s >= 0.0)) {
                    return Err(RoutineError::Value(
                        "sigma_x must be non-negative and finite".to_string(),
                    ));
                }
                validate_sigma(&sigma_y, n, "sigma_y")?;

                loop {
                    let slope = slopes(problem, &p)?;
                    if slope.len() != n {
                        return Err(RoutineError::Value(format!(
                            "model returned {} values but y has {n} samples",
                            slope.len()
                        )));
                    }
                    sigma = effective_sigma(&sigma_y, sigma_x, &slope);

                    let sol = levenberg_marquardt(
                        |q: &[f64]| problem.evaluate(problem.x, q),
                        problem.y,
                        &sigma,
                        &p,
                        problem.fixed,
                        problem.bounds,
                        problem.options,
                    )?;

                    let settled = sol
                        .popt
                        .iter()
                        .zip(&p)
                        .all(|(a, b)| (a - b).abs() <= ROUND_RTOL * b.abs().max(1.0));
                    p = sol.popt.clone();
                    if settled || rounds >= MAX_ROUNDS {
                        break sol;
                    }
                    rounds += 1;
                }
            }
        };

        let weighted = problem.weights.sigma_x.is_some() || problem.weights.sigma_y.is_some();
        let absolute = problem.weights.absolute_sigma && weighted;
        let pcov = sol.covariance(!absolute);
        trace!(ssr = sol.ssr, rounds, "odr_fit converged");
        Ok(RoutineOutput {
            popt: sol.popt,
            pcov,
        })
    }
}
