//! The fit orchestrator.
//!
//! One call goes through:
//!
//! - routine selection and model validation (errors returned, nothing touched)
//! - normalization, which engages the offset guard
//! - a single routine run or a Monte-Carlo ensemble
//! - `update_args`, reduced chi-square and write-back into the model
//!
//! Routine failures never leave this module as `Err`: they are recorded in
//! [`FitInfo`], the model keeps its pre-fit values and the covariance is zero.

use std::sync::Arc;

use nalgebra::DMatrix;
use tracing::{debug, info, warn};

use crate::domain::{FitInfo, FitOptions, FitOutcome, FitRequest, FitStatus, RoutineKind, XData};
use crate::error::{FitError, RoutineError};
use crate::fit::monte_carlo::run_ensemble;
use crate::fit::normalize::{normalize, Normalized};
use crate::fit::selection::select_routine;
use crate::models::FitModel;
use crate::report::format_report;
use crate::routines::{CurveFit, FitProblem, FitRoutine, OdrFit, Weights};

/// Reduced chi-square `Σ ((y - f(x, params)) / sigma_y)^2 / (n - n_free)`.
///
/// Returns `0` when there are no degrees of freedom left.
pub fn reduced_chi2(
    model: &FitModel,
    x: &XData,
    y: &[f64],
    sigma_y: &[f64],
    params: &[f64],
) -> Result<f64, RoutineError> {
    let f = model.evaluate(x, params)?;
    if f.len() != y.len() || sigma_y.len() != y.len() {
        return Err(RoutineError::Value(format!(
            "cannot compute chi2 for {} model values, {} y samples and {} sigma_y entries",
            f.len(),
            y.len(),
            sigma_y.len()
        )));
    }

    let n_free = model.params().n_free();
    if y.len() <= n_free {
        warn!(samples = y.len(), n_free, "no degrees of freedom left; chi2 set to 0");
        return Ok(0.0);
    }
    let ssr: f64 = y
        .iter()
        .zip(&f)
        .zip(sigma_y)
        .map(|((yi, fi), si)| ((yi - fi) / si).powi(2))
        .sum();
    Ok(ssr / (y.len() - n_free) as f64)
}

struct Estimate {
    popt: Vec<f64>,
    pcov: DMatrix<f64>,
    chi2: f64,
}

/// Dispatches fits to the injected routines.
#[derive(Clone)]
pub struct Fitter {
    curve_fit: Arc<dyn FitRoutine>,
    odr_fit: Arc<dyn FitRoutine>,
}

impl Default for Fitter {
    fn default() -> Self {
        Self::new()
    }
}

impl Fitter {
    pub fn new() -> Self {
        Self {
            curve_fit: Arc::new(CurveFit),
            odr_fit: Arc::new(OdrFit),
        }
    }

    /// Replace the routine registered under `routine.kind()`.
    pub fn with_routine(mut self, routine: impl FitRoutine + 'static) -> Self {
        let routine: Arc<dyn FitRoutine> = Arc::new(routine);
        match routine.kind() {
            RoutineKind::CurveFit => self.curve_fit = routine,
            RoutineKind::OdrFit => self.odr_fit = routine,
        }
        self
    }

    pub fn routine(&self, kind: RoutineKind) -> &dyn FitRoutine {
        match kind {
            RoutineKind::CurveFit => self.curve_fit.as_ref(),
            RoutineKind::OdrFit => self.odr_fit.as_ref(),
        }
    }

    /// Fit `model` to the request's data.
    ///
    /// `Err` is returned only for configuration problems, before the model is touched.
    /// On success the model holds the optimized values; on a routine failure it keeps
    /// its previous values and the failure is reported through `info`.
    pub fn fit(&self, model: &mut FitModel, request: FitRequest) -> Result<FitOutcome, FitError> {
        let FitRequest {
            x,
            y,
            sigma_x,
            sigma_y,
            options,
        } = request;

        let kind = select_routine(&options.routine, sigma_x.is_some(), options.mc_sigma)?;
        if let Some(e) = model.error() {
            return Err(FitError::Model(e));
        }
        let (mut guard, data) = normalize(model, x, y, sigma_x, sigma_y, &options)?;
        debug!(
            routine = %kind,
            linked = guard.is_linked(),
            samples = data.n_samples(),
            mc_sigma = options.mc_sigma,
            "fit started"
        );

        let (popt, pcov, chi2, error) = match self.estimate(kind, &guard, &data, &options) {
            Ok(est) => {
                guard.set_values(&est.popt, true);
                (est.popt, est.pcov, est.chi2, None)
            }
            Err(e) => {
                warn!(routine = %kind, error = %e, "fit failed; model left unchanged");
                let popt = guard.values().to_vec();
                let p = popt.len();
                (popt, DMatrix::zeros(p, p), 0.0, Some(e))
            }
        };

        let err = error.is_some();
        let status = if err {
            FitStatus::Error
        } else if pcov.iter().any(|v| v.is_infinite()) || !chi2.is_finite() {
            FitStatus::Warning
        } else {
            FitStatus::Success
        };
        let warn = status != FitStatus::Success;

        if options.report {
            println!(
                "{}",
                format_report(guard.names(), &popt, &pcov, chi2, status, error.as_ref(), true)
            );
        }
        drop(guard);

        info!(routine = %kind, ?status, chi2, "fit finished");
        Ok(FitOutcome {
            popt,
            pcov,
            info: FitInfo {
                warn,
                err,
                chi2,
                status,
                error,
            },
        })
    }

    fn estimate(
        &self,
        kind: RoutineKind,
        model: &FitModel,
        data: &Normalized,
        options: &FitOptions,
    ) -> Result<Estimate, RoutineError> {
        let routine = self.routine(kind);
        let out = if options.mc_sigma > 0 {
            run_ensemble(
                routine,
                model,
                data,
                options.mc_sigma,
                &options.routine_options,
                options.seed,
            )?
        } else {
            let (fixed, bounds) = model.fit_prepare();
            let sigma_x = match kind {
                RoutineKind::OdrFit => data.sigma_x.as_deref(),
                RoutineKind::CurveFit => None,
            };
            let problem = FitProblem {
                model,
                x: &data.x,
                y: &data.y,
                p0: model.values(),
                fixed: &fixed,
                bounds: &bounds,
                weights: Weights {
                    sigma_x,
                    sigma_y: data.sigma_y.as_deref(),
                    absolute_sigma: options.routine_options.absolute_sigma,
                },
                options: &options.routine_options,
            };
            routine.fit(&problem)?
        };
        out.check_shape(model.values().len())?;

        let popt = model.update_args(&out.popt);
        let chi2 = match &data.sigma_y {
            Some(sigma_y) => reduced_chi2(model, &data.x, &data.y, sigma_y, &popt)?,
            None => 0.0,
        };
        Ok(Estimate {
            popt,
            pcov: out.pcov,
            chi2,
        })
    }
}

/// Fit with the default routines.
pub fn fit(model: &mut FitModel, request: FitRequest) -> Result<FitOutcome, FitError> {
    Fitter::new().fit(model, request)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::models::{Offset, Straight};
    use crate::routines::RoutineOutput;

    #[derive(Default)]
    struct Counting {
        calls: Arc<AtomicUsize>,
    }

    impl FitRoutine for Counting {
        fn kind(&self) -> RoutineKind {
            RoutineKind::CurveFit
        }

        fn fit(&self, problem: &FitProblem<'_>) -> Result<RoutineOutput, RoutineError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            CurveFit.fit(problem)
        }
    }

    struct Failing(RoutineKind);

    impl FitRoutine for Failing {
        fn kind(&self) -> RoutineKind {
            self.0
        }

        fn fit(&self, _problem: &FitProblem<'_>) -> Result<RoutineOutput, RoutineError> {
            Err(RoutineError::Runtime("optimal parameters not found".to_string()))
        }
    }

    fn line() -> (Vec<f64>, Vec<f64>) {
        let x: Vec<f64> = (0..6).map(f64::from).collect();
        let y = x.iter().map(|v| 2.0 * v - 1.0).collect();
        (x, y)
    }

    #[test]
    fn reduced_chi2_divides_by_degrees_of_freedom() {
        let model = FitModel::atomic(Straight::new(1.0, 0.0));
        let x = XData::Flat(vec![0.0, 1.0, 2.0, 3.0]);
        let chi2 = reduced_chi2(&model, &x, &[1.0, 1.0, 2.0, 4.0], &[0.5; 4], &[1.0, 0.0]).unwrap();
        // residuals 1, 0, 0, 1 over sigma 0.5 -> 8, dof 2
        assert!((chi2 - 4.0).abs() < 1e-12);
    }

    #[test]
    fn reduced_chi2_without_dof_is_zero() {
        let model = FitModel::atomic(Straight::new(1.0, 0.0));
        let x = XData::Flat(vec![0.0, 1.0]);
        assert_eq!(reduced_chi2(&model, &x, &[5.0, 1.0], &[1.0; 2], &[1.0, 0.0]).unwrap(), 0.0);
    }

    #[test]
    fn config_errors_never_reach_the_routine() {
        let counting = Counting::default();
        let calls = Arc::clone(&counting.calls);
        let fitter = Fitter::new().with_routine(counting);
        let (x, y) = line();

        let mut model = FitModel::atomic(Straight::new(1.0, 0.0));
        let err = fitter
            .fit(&mut model, FitRequest::new(x.clone(), y.clone()).routine("leastsq"))
            .unwrap_err();
        assert!(matches!(err, FitError::UnsupportedRoutine { .. }));

        let mut broken = FitModel::atomic(Offset::new(Straight::new(1.0, 0.0), vec![f64::NAN]));
        let err = fitter.fit(&mut broken, FitRequest::new(x.clone(), y.clone())).unwrap_err();
        assert!(matches!(err, FitError::Model(_)));
        assert_eq!(broken.offset_flags(), vec![Some(true)]);

        assert_eq!(calls.load(Ordering::SeqCst), 0);
        fitter.fit(&mut model, FitRequest::new(x, y)).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn routine_failure_is_recorded_not_returned() {
        let fitter = Fitter::new().with_routine(Failing(RoutineKind::CurveFit));
        let mut model = FitModel::atomic(Offset::new(Straight::new(1.0, 0.5), Vec::new()));
        let before = model.values().to_vec();
        let (x, y) = line();

        let out = fitter
            .fit(&mut model, FitRequest::new(x, y).sigma_y(vec![0.1; 6]))
            .unwrap();
        assert!(out.info.err && out.info.warn);
        assert_eq!(out.info.status, FitStatus::Error);
        assert_eq!(out.info.chi2, 0.0);
        assert_eq!(out.popt, before);
        assert_eq!(out.pcov, DMatrix::zeros(3, 3));
        assert_eq!(model.values(), before.as_slice());
        assert_eq!(model.offset_flags(), vec![Some(true)]);
    }

    #[test]
    fn successful_fit_writes_values_back() {
        let mut model = FitModel::atomic(Straight::new(1.0, 0.0));
        let (x, y) = line();
        let out = fit(&mut model, FitRequest::new(x, y).sigma_y(vec![0.1; 6])).unwrap();
        assert_eq!(out.info.status, FitStatus::Success);
        assert!(!out.info.warn && !out.info.err);
        assert!((out.popt[0] - 2.0).abs() < 1e-8);
        assert!((out.popt[1] + 1.0).abs() < 1e-8);
        assert_eq!(model.values(), out.popt.as_slice());
        assert!(out.info.chi2.abs() < 1e-12);
    }

    #[test]
    fn odr_only_sees_sigma_x_when_selected() {
        struct ExpectSigmaX(RoutineKind);
        impl FitRoutine for ExpectSigmaX {
            fn kind(&self) -> RoutineKind {
                self.0
            }
            fn fit(&self, problem: &FitProblem<'_>) -> Result<RoutineOutput, RoutineError> {
                let expect_x = self.0 == RoutineKind::OdrFit;
                assert_eq!(problem.weights.sigma_x.is_some(), expect_x);
                CurveFit.fit(problem)
            }
        }

        let fitter = Fitter::new()
            .with_routine(ExpectSigmaX(RoutineKind::CurveFit))
            .with_routine(ExpectSigmaX(RoutineKind::OdrFit));
        let (x, y) = line();
        let mut model = FitModel::atomic(Straight::new(1.0, 0.0));
        fitter
            .fit(&mut model, FitRequest::new(x.clone(), y.clone()).sigma_x(vec![0.1; 6]))
            .unwrap();
        fitter
            .fit(
                &mut model,
                FitRequest::new(x, y).sigma_x(vec![0.1; 6]).routine(RoutineKind::CurveFit),
            )
            .unwrap();
    }

    /// Returns one parameter whatever the model.
    struct OneParameter;

    impl FitRoutine for OneParameter {
        fn kind(&self) -> RoutineKind {
            RoutineKind::CurveFit
        }

        fn fit(&self, _problem: &FitProblem<'_>) -> Result<RoutineOutput, RoutineError> {
            Ok(RoutineOutput {
                popt: vec![1.0],
                pcov: DMatrix::zeros(1, 1),
            })
        }
    }

    /// Delegates to `CurveFit` but fails on the `k`-th call.
    struct FailsOnCall {
        k: usize,
        calls: AtomicUsize,
    }

    impl FitRoutine for FailsOnCall {
        fn kind(&self) -> RoutineKind {
            RoutineKind::CurveFit
        }

        fn fit(&self, problem: &FitProblem<'_>) -> Result<RoutineOutput, RoutineError> {
            if self.calls.fetch_add(1, Ordering::SeqCst) + 1 == self.k {
                return Err(RoutineError::Runtime("optimal parameters not found".to_string()));
            }
            CurveFit.fit(problem)
        }
    }

    #[test]
    fn malformed_routine_output_is_recorded_as_a_value_error() {
        let fitter = Fitter::new().with_routine(OneParameter);
        let (x, y) = line();

        for mc_sigma in [0, 3] {
            let mut model = FitModel::atomic(Straight::new(1.0, 0.0));
            let out = fitter
                .fit(&mut model, FitRequest::new(x.clone(), y.clone()).mc_sigma(mc_sigma).seed(1))
                .unwrap();
            assert!(out.info.err, "mc_sigma = {mc_sigma}");
            assert!(matches!(out.info.error, Some(RoutineError::Value(_))));
            assert_eq!(out.popt, vec![1.0, 0.0]);
            assert_eq!(out.pcov, DMatrix::zeros(2, 2));
            assert_eq!(model.values(), &[1.0, 0.0]);
        }
    }

    #[test]
    fn ensemble_failing_mid_way_leaves_the_model_untouched() {
        let fitter = Fitter::new().with_routine(FailsOnCall {
            k: 3,
            calls: AtomicUsize::new(0),
        });
        let mut model = FitModel::atomic(Offset::new(Straight::new(1.0, 0.5), Vec::new()));
        let before = model.values().to_vec();
        let (x, y) = line();

        let out = fitter
            .fit(
                &mut model,
                FitRequest::new(x, y).sigma_y(vec![0.1; 6]).mc_sigma(6).seed(11),
            )
            .unwrap();
        assert!(out.info.err && out.info.warn);
        assert!(matches!(out.info.error, Some(RoutineError::Runtime(_))));
        assert_eq!(out.pcov, DMatrix::zeros(3, 3));
        assert_eq!(out.popt, before);
        assert_eq!(model.values(), before.as_slice());
        assert_eq!(model.offset_flags(), vec![Some(true)]);
    }

    #[test]
    fn zero_sigma_y_fails_the_same_way_with_and_without_ensemble() {
        let (x, y) = line();
        for mc_sigma in [0, 4] {
            let mut model = FitModel::atomic(Straight::new(1.0, 0.0));
            let out = fit(
                &mut model,
                FitRequest::new(x.clone(), y.clone())
                    .sigma_y(vec![0.0; 6])
                    .mc_sigma(mc_sigma)
                    .seed(2),
            )
            .unwrap();
            assert_eq!(out.info.status, FitStatus::Error, "mc_sigma = {mc_sigma}");
            assert!(matches!(out.info.error, Some(RoutineError::Value(_))));
            assert!(out.info.chi2.is_finite());
        }
    }

    #[test]
    fn reporting_does_not_change_the_outcome() {
        let (x, y) = line();
        let request = FitRequest::new(x, y).sigma_y(vec![0.1; 6]);

        let mut quiet = FitModel::atomic(Straight::new(1.0, 0.0));
        let mut loud = FitModel::atomic(Straight::new(1.0, 0.0));
        let a = fit(&mut quiet, request.clone()).unwrap();
        let b = fit(&mut loud, request.clone().report(true)).unwrap();
        assert_eq!(a, b);

        let mut failing = FitModel::atomic(Straight::new(1.0, 0.0));
        let out = Fitter::new()
            .with_routine(Failing(RoutineKind::CurveFit))
            .fit(&mut failing, request.report(true))
            .unwrap();
        assert_eq!(out.info.status, FitStatus::Error);
    }
}
