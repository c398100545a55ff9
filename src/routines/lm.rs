//! Levenberg–Marquardt on the free parameters.
//!
//! The iteration itself is the `levenberg-marquardt` crate's MINPACK port. This module
//! adapts a model evaluation to its [`LeastSquaresProblem`]:
//! - residuals `(f_i(p) - y_i) / σ_i` over the free parameters only
//! - forward-difference Jacobian (step flipped inward at an upper bound)
//! - bounds enforced by clamping every trial point
//!
//! and turns the converged point into a covariance estimate.

use std::cell::RefCell;

use levenberg_marquardt::{LeastSquaresProblem, LevenbergMarquardt, TerminationReason};
use nalgebra::storage::Owned;
use nalgebra::{DMatrix, DVector, Dyn};

use crate::domain::RoutineOptions;
use crate::error::RoutineError;
use crate::math::gram_inverse;

/// Converged least-squares state.
#[derive(Debug, Clone)]
pub(crate) struct LmSolution {
    pub popt: Vec<f64>,
    /// Weighted Jacobian at `popt`, one column per free parameter.
    pub jac: DMatrix<f64>,
    /// Weighted sum of squared residuals at `popt`.
    pub ssr: f64,
    pub free: Vec<usize>,
}

impl LmSolution {
    /// Full-size covariance; fixed rows/columns are zero.
    ///
    /// A rank-deficient Jacobian gives `+inf` on the free block. With `scale_by_residuals`
    /// the free block is multiplied by `ssr / (n - n_free)`.
    pub fn covariance(&self, scale_by_residuals: bool) -> DMatrix<f64> {
        let p = self.popt.len();
        let m = self.free.len();
        let mut pcov = DMatrix::<f64>::zeros(p, p);
        if m == 0 {
            return pcov;
        }

        let dof = self.jac.nrows().saturating_sub(m);
        let scale = if !scale_by_residuals {
            1.0
        } else if dof > 0 {
            self.ssr / dof as f64
        } else {
            f64::INFINITY
        };

        let block = gram_inverse(&self.jac);
        for (a, &ia) in self.free.iter().enumerate() {
            for (b, &ib) in self.free.iter().enumerate() {
                pcov[(ia, ib)] = match &block {
                    Some(cov) => cov[(a, b)] * scale,
                    None => f64::INFINITY,
                };
            }
        }
        pcov
    }
}

fn clamp(p: &mut [f64], bounds: &[(f64, f64)]) {
    for (v, &(lo, hi)) in p.iter_mut().zip(bounds) {
        *v = v.max(lo).min(hi);
    }
}

fn weighted_residuals(y: &[f64], f: &[f64], sigma: &[f64]) -> Result<DVector<f64>, RoutineError> {
    if f.len() != y.len() {
        return Err(RoutineError::Value(format!(
            "model returned {} values but y has {} samples",
            f.len(),
            y.len()
        )));
    }
    Ok(DVector::from_iterator(
        y.len(),
        y.iter().zip(f).zip(sigma).map(|((yi, fi), si)| (fi - yi) / si),
    ))
}

fn jacobian<F>(
    eval: &F,
    p: &[f64],
    f0: &[f64],
    sigma: &[f64],
    free: &[usize],
    bounds: &[(f64, f64)],
) -> Result<DMatrix<f64>, RoutineError>
where
    F: Fn(&[f64]) -> Result<Vec<f64>, RoutineError>,
{
    let n = f0.len();
    let mut jac = DMatrix::<f64>::zeros(n, free.len());
    let mut shifted = p.to_vec();
    for (col, &j) in free.iter().enumerate() {
        let mut h = f64::EPSILON.sqrt() * p[j].abs().max(1.0);
        if p[j] + h > bounds[j].1 {
            h = -h;
        }
        shifted[j] = p[j] + h;
        let fh = eval(&shifted)?;
        shifted[j] = p[j];
        if fh.len() != n {
            return Err(RoutineError::Value(
                "model output length changed between evaluations".to_string(),
            ));
        }
        for i in 0..n {
            jac[(i, col)] = (fh[i] - f0[i]) / h / sigma[i];
        }
    }
    if jac.iter().any(|v| !v.is_finite()) {
        return Err(RoutineError::Value("jacobian is not finite".to_string()));
    }
    Ok(jac)
}

/// Weighted least-squares problem over the free parameters.
///
/// `params` holds the full parameter vector; fixed entries never change. The model is
/// evaluated once per `set_params` and the result cached for the residuals and the
/// Jacobian. The first evaluation error is kept and ends the minimization.
struct WeightedProblem<'a, F> {
    eval: &'a F,
    y: &'a [f64],
    sigma: &'a [f64],
    free: &'a [usize],
    bounds: &'a [(f64, f64)],
    params: Vec<f64>,
    f: Option<Vec<f64>>,
    residuals: Option<DVector<f64>>,
    error: RefCell<Option<RoutineError>>,
}

impl<F> WeightedProblem<'_, F>
where
    F: Fn(&[f64]) -> Result<Vec<f64>, RoutineError>,
{
    fn record(&self, e: RoutineError) {
        self.error.borrow_mut().get_or_insert(e);
    }

    fn evaluate(&mut self) {
        self.residuals = None;
        self.f = None;
        let f = match (self.eval)(&self.params) {
            Ok(f) => f,
            Err(e) => return self.record(e),
        };
        match weighted_residuals(self.y, &f, self.sigma) {
            Ok(r) => {
                if r.iter().all(|v| v.is_finite()) {
                    self.residuals = Some(r);
                }
                self.f = Some(f);
            }
            Err(e) => self.record(e),
        }
    }
}

impl<F> LeastSquaresProblem<f64, Dyn, Dyn> for WeightedProblem<'_, F>
where
    F: Fn(&[f64]) -> Result<Vec<f64>, RoutineError>,
{
    type ResidualStorage = Owned<f64, Dyn>;
    type JacobianStorage = Owned<f64, Dyn, Dyn>;
    type ParameterStorage = Owned<f64, Dyn>;

    fn set_params(&mut self, x: &DVector<f64>) {
        for (k, &j) in self.free.iter().enumerate() {
            self.params[j] = x[k];
        }
        clamp(&mut self.params, self.bounds);
        self.evaluate();
    }

    fn params(&self) -> DVector<f64> {
        DVector::from_iterator(self.free.len(), self.free.iter().map(|&j| self.params[j]))
    }

    fn residuals(&self) -> Option<DVector<f64>> {
        self.residuals.clone()
    }

    fn jacobian(&self) -> Option<DMatrix<f64>> {
        let f0 = self.f.as_ref()?;
        match jacobian(self.eval, &self.params, f0, self.sigma, self.free, self.bounds) {
            Ok(jac) => Some(jac),
            Err(e) => {
                self.record(e);
                None
            }
        }
    }
}

/// Check sample-level inputs shared by both routines.
pub(crate) fn validate_sigma(sigma: &[f64], n: usize, label: &str) -> Result<(), RoutineError> {
    if sigma.len() != n {
        return Err(RoutineError::Value(format!(
            "{label} has {} entries but y has {n} samples",
            sigma.len()
        )));
    }
    if sigma.iter().any(|s| !(s.is_finite() && *s > 0.0)) {
        return Err(RoutineError::Value(format!("{label} must be positive and finite")));
    }
    Ok(())
}

pub(crate) fn levenberg_marquardt<F>(
    eval: F,
    y: &[f64],
    sigma: &[f64],
    p0: &[f64],
    fixed: &[bool],
    bounds: &[(f64, f64)],
    options: &RoutineOptions,
) -> Result<LmSolution, RoutineError>
where
    F: Fn(&[f64]) -> Result<Vec<f64>, RoutineError>,
{
    let n = y.len();
    if n == 0 {
        return Err(RoutineError::Value("no data to fit".to_string()));
    }
    if y.iter().any(|v| !v.is_finite()) {
        return Err(RoutineError::Value("y contains non-finite values".to_string()));
    }
    validate_sigma(sigma, n, "sigma")?;
    if fixed.len() != p0.len() || bounds.len() != p0.len() {
        return Err(RoutineError::Value(format!(
            "p0 has {} entries but fixed mask has {} and bounds {}",
            p0.len(),
            fixed.len(),
            bounds.len()
        )));
    }

    let free: Vec<usize> = (0..p0.len()).filter(|&i| !fixed[i]).collect();
    let mut p = p0.to_vec();
    clamp(&mut p, bounds);

    let f = eval(&p)?;
    let r = weighted_residuals(y, &f, sigma)?;
    if r.iter().any(|v| !v.is_finite()) {
        return Err(RoutineError::Value(
            "residuals are not finite at the initial guess".to_string(),
        ));
    }

    if free.is_empty() {
        return Ok(LmSolution {
            popt: p,
            jac: DMatrix::zeros(n, 0),
            ssr: r.norm_squared(),
            free,
        });
    }
    if n < free.len() {
        return Err(RoutineError::Value(format!(
            "improper input: {n} samples for {} free parameters",
            free.len()
        )));
    }

    let problem = WeightedProblem {
        eval: &eval,
        y,
        sigma,
        free: &free,
        bounds,
        params: p,
        f: Some(f),
        residuals: Some(r),
        error: RefCell::new(None),
    };
    let (problem, report) = LevenbergMarquardt::new()
        .with_ftol(options.ftol)
        .with_xtol(options.xtol)
        .with_patience(options.max_iter)
        .minimize(problem);

    if let Some(e) = problem.error.into_inner() {
        return Err(e);
    }
    if !report.termination.was_successful() {
        return Err(match report.termination {
            TerminationReason::LostPatience => RoutineError::Runtime(format!(
                "optimal parameters not found: number of calls to function has reached {}",
                report.number_of_evaluations
            )),
            TerminationReason::WrongDimensions(what) => {
                RoutineError::Value(format!("improper input: wrong dimensions of {what}"))
            }
            other => RoutineError::Runtime(format!("optimal parameters not found: {other:?}")),
        });
    }

    // The solver may leave a rejected trial point behind; re-evaluate at the solution.
    let p = problem.params;
    let f = eval(&p)?;
    let r = weighted_residuals(y, &f, sigma)?;
    let jac = jacobian(&eval, &p, &f, sigma, &free, bounds)?;
    Ok(LmSolution {
        popt: p,
        jac,
        ssr: r.norm_squared(),
        free,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(x: &[f64]) -> impl Fn(&[f64]) -> Result<Vec<f64>, RoutineError> + '_ {
        move |p: &[f64]| Ok(x.iter().map(|xi| p[0] * xi + p[1]).collect())
    }

    #[test]
    fn recovers_exact_line() {
        let x = [0.0, 1.0, 2.0, 3.0];
        let y: Vec<f64> = x.iter().map(|v| 3.0 * v - 1.0).collect();
        let sol = levenberg_marquardt(
            line(&x),
            &y,
            &[1.0; 4],
            &[1.0, 0.0],
            &[false, false],
            &[(f64::NEG_INFINITY, f64::INFINITY); 2],
            &RoutineOptions::default(),
        )
        .unwrap();
        assert!((sol.popt[0] - 3.0).abs() < 1e-8);
        assert!((sol.popt[1] + 1.0).abs() < 1e-8);
        assert!(sol.ssr < 1e-12);
    }

    #[test]
    fn fixed_parameter_keeps_initial_value() {
        let x = [0.0, 1.0, 2.0];
        let y = [1.0, 3.0, 5.0];
        let sol = levenberg_marquardt(
            line(&x),
            &y,
            &[1.0; 3],
            &[0.0, 1.0],
            &[false, true],
            &[(f64::NEG_INFINITY, f64::INFINITY); 2],
            &RoutineOptions::default(),
        )
        .unwrap();
        assert_eq!(sol.popt[1], 1.0);
        assert!((sol.popt[0] - 2.0).abs() < 1e-8);
        let cov = sol.covariance(false);
        assert_eq!(cov[(1, 1)], 0.0);
        assert_eq!(cov[(0, 1)], 0.0);
        assert!(cov[(0, 0)] > 0.0);
    }

    #[test]
    fn bounds_clamp_the_solution() {
        let x = [0.0, 1.0, 2.0];
        let y = [0.0, 5.0, 10.0];
        let sol = levenberg_marquardt(
            line(&x),
            &y,
            &[1.0; 3],
            &[1.0, 0.0],
            &[false, true],
            &[(0.0, 2.0), (f64::NEG_INFINITY, f64::INFINITY)],
            &RoutineOptions::default(),
        )
        .unwrap();
        assert!(sol.popt[0] <= 2.0);
        assert!((sol.popt[0] - 2.0).abs() < 1e-9);
    }

    #[test]
    fn rejects_mismatched_lengths_and_bad_sigma() {
        let x = [0.0, 1.0];
        let unbounded = [(f64::NEG_INFINITY, f64::INFINITY); 2];
        let opts = RoutineOptions::default();
        let err = levenberg_marquardt(
            line(&x),
            &[1.0, 2.0, 3.0],
            &[1.0; 3],
            &[1.0, 0.0],
            &[false; 2],
            &unbounded,
            &opts,
        )
        .unwrap_err();
        assert!(matches!(err, RoutineError::Value(_)));

        let err = levenberg_marquardt(
            line(&x),
            &[1.0, 2.0],
            &[1.0, 0.0],
            &[1.0, 0.0],
            &[false; 2],
            &unbounded,
            &opts,
        )
        .unwrap_err();
        assert!(matches!(err, RoutineError::Value(_)));
    }

    #[test]
    fn exhausted_iterations_are_runtime_errors() {
        let x: [f64; 4] = [0.0, 1.0, 2.0, 3.0];
        let y: Vec<f64> = x.iter().map(|v| (2.0 * v).exp()).collect();
        let exp = |p: &[f64]| -> Result<Vec<f64>, RoutineError> {
            Ok(x.iter().map(|xi| (p[0] * xi).exp()).collect())
        };
        let opts = RoutineOptions {
            max_iter: 1,
            ..RoutineOptions::default()
        };
        let err = levenberg_marquardt(
            exp,
            &y,
            &[1.0; 4],
            &[0.1],
            &[false],
            &[(f64::NEG_INFINITY, f64::INFINITY)],
            &opts,
        )
        .unwrap_err();
        assert!(matches!(err, RoutineError::Runtime(_)));
    }

    #[test]
    fn collinear_parameters_give_infinite_covariance() {
        // y = (a + b) * x cannot separate a and b.
        let x = [1.0, 2.0, 3.0];
        let y = [2.0, 4.0, 6.0];
        let eval = |p: &[f64]| -> Result<Vec<f64>, RoutineError> {
            Ok(x.iter().map(|xi| (p[0] + p[1]) * xi).collect())
        };
        let sol = levenberg_marquardt(
            eval,
            &y,
            &[1.0; 3],
            &[0.5, 0.5],
            &[false; 2],
            &[(f64::NEG_INFINITY, f64::INFINITY); 2],
            &RoutineOptions::default(),
        )
        .unwrap();
        let cov = sol.covariance(false);
        assert!(cov.iter().any(|v| v.is_infinite()));
    }

    #[test]
    fn evaluation_errors_end_the_fit() {
        let x = [0.0, 1.0, 2.0, 3.0];
        let y = [1.0, 2.0, 3.0, 4.0];
        // Fails as soon as the slope leaves its starting value.
        let eval = |p: &[f64]| -> Result<Vec<f64>, RoutineError> {
            if p[0] != 0.0 {
                return Err(RoutineError::Value("slope out of domain".to_string()));
            }
            Ok(x.iter().map(|xi| p[0] * xi + p[1]).collect())
        };
        let err = levenberg_marquardt(
            eval,
            &y,
            &[1.0; 4],
            &[0.0, 0.0],
            &[false; 2],
            &[(f64::NEG_INFINITY, f64::INFINITY); 2],
            &RoutineOptions::default(),
        )
        .unwrap_err();
        assert_eq!(err, RoutineError::Value("slope out of domain".to_string()));
    }
}
