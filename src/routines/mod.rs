//! Fit routines: the numerical optimizers the orchestration dispatches to.
//!
//! Two interchangeable routines implement [`FitRoutine`]:
//!
//! - [`CurveFit`]: weighted least squares, uncertainty on y only
//! - [`OdrFit`]: orthogonal distance regression, uncertainty on x and y
//!
//! Both share the Levenberg–Marquardt adapter in `lm`.

pub mod curve_fit;
mod lm;
pub mod odr;

pub use curve_fit::CurveFit;
pub use odr::OdrFit;

use nalgebra::DMatrix;

use crate::domain::{RoutineKind, RoutineOptions, XData};
use crate::error::RoutineError;
use crate::models::FitModel;

/// Uncertainties handed to a routine.
///
/// `CurveFit` only reads `sigma_y`. During Monte-Carlo sampling all of them are absent
/// because the uncertainty is carried by the resampled data instead.
#[derive(Debug, Clone, Copy, Default)]
pub struct Weights<'a> {
    pub sigma_x: Option<&'a [f64]>,
    pub sigma_y: Option<&'a [f64]>,
    pub absolute_sigma: bool,
}

impl Weights<'_> {
    /// No weighting; covariances are scaled by the residual variance.
    pub fn none() -> Self {
        Self::default()
    }
}

/// Everything a routine needs for one optimization.
#[derive(Debug, Clone, Copy)]
pub struct FitProblem<'a> {
    pub model: &'a FitModel,
    pub x: &'a XData,
    pub y: &'a [f64],
    /// Initial guess, also the value of every fixed parameter.
    pub p0: &'a [f64],
    pub fixed: &'a [bool],
    pub bounds: &'a [(f64, f64)],
    pub weights: Weights<'a>,
    pub options: &'a RoutineOptions,
}

impl FitProblem<'_> {
    pub(crate) fn evaluate(&self, x: &XData, params: &[f64]) -> Result<Vec<f64>, RoutineError> {
        Ok(self.model.evaluate(x, params)?)
    }
}

/// Raw optimizer output, in the model's parameter order.
#[derive(Debug, Clone, PartialEq)]
pub struct RoutineOutput {
    pub popt: Vec<f64>,
    /// Covariance; rows/columns of fixed parameters are zero.
    pub pcov: DMatrix<f64>,
}

impl RoutineOutput {
    /// Reject output that does not match a model with `p` parameters.
    pub fn check_shape(&self, p: usize) -> Result<(), RoutineError> {
        if self.popt.len() != p || self.pcov.shape() != (p, p) {
            return Err(RoutineError::Value(format!(
                "routine returned {} parameters and a {}x{} covariance for a model with {p} parameters",
                self.popt.len(),
                self.pcov.nrows(),
                self.pcov.ncols()
            )));
        }
        Ok(())
    }
}

/// A numerical fitter.
pub trait FitRoutine: Send + Sync {
    fn kind(&self) -> RoutineKind;

    fn fit(&self, problem: &FitProblem<'_>) -> Result<RoutineOutput, RoutineError>;
}
