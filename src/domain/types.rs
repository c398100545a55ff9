//! Shared domain types.
//!
//! These types are intentionally kept lightweight so they can be:
//!
//! - built per call by the caller (`FitRequest`)
//! - handed to routines in normalized form (`XData`, flat `y`)
//! - returned without retaining any state (`FitOutcome`)

use std::fmt;
use std::ops::Index;
use std::str::FromStr;

use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};

use crate::error::{FitError, RoutineError};

/// Observations as handed in by the caller.
///
/// Atomic models take `Flat` data. Linked models take one inner vector per dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Series {
    Flat(Vec<f64>),
    Sets(Vec<Vec<f64>>),
}

impl Series {
    pub fn kind_name(&self) -> &'static str {
        match self {
            Series::Flat(_) => "flat data",
            Series::Sets(_) => "per-dataset data",
        }
    }

    /// Concatenate along the sample axis.
    pub fn concat(self) -> Vec<f64> {
        match self {
            Series::Flat(v) => v,
            Series::Sets(sets) => sets.into_iter().flatten().collect(),
        }
    }
}

impl From<Vec<f64>> for Series {
    fn from(value: Vec<f64>) -> Self {
        Series::Flat(value)
    }
}

impl From<&[f64]> for Series {
    fn from(value: &[f64]) -> Self {
        Series::Flat(value.to_vec())
    }
}

impl From<Vec<Vec<f64>>> for Series {
    fn from(value: Vec<Vec<f64>>) -> Self {
        Series::Sets(value)
    }
}

/// Per-dataset x values of a linked fit.
///
/// Datasets may differ in length. The list stays indexable so a linked model can
/// dispatch each dataset to its child while y and sigma are already flat.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct XList {
    sets: Vec<Vec<f64>>,
}

impl XList {
    pub fn new(sets: Vec<Vec<f64>>) -> Self {
        Self { sets }
    }

    /// Number of datasets.
    pub fn len(&self) -> usize {
        self.sets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sets.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Vec<f64>> {
        self.sets.iter()
    }

    /// Total number of samples over all datasets.
    pub fn n_samples(&self) -> usize {
        self.sets.iter().map(Vec::len).sum()
    }
}

impl Index<usize> for XList {
    type Output = [f64];

    fn index(&self, index: usize) -> &Self::Output {
        &self.sets[index]
    }
}

impl<'a> IntoIterator for &'a XList {
    type Item = &'a Vec<f64>;
    type IntoIter = std::slice::Iter<'a, Vec<f64>>;

    fn into_iter(self) -> Self::IntoIter {
        self.sets.iter()
    }
}

/// Normalized x data passed to routines and models.
#[derive(Debug, Clone, PartialEq)]
pub enum XData {
    Flat(Vec<f64>),
    Linked(XList),
}

impl XData {
    /// Total number of samples.
    pub fn n_samples(&self) -> usize {
        match self {
            XData::Flat(x) => x.len(),
            XData::Linked(list) => list.n_samples(),
        }
    }

    /// All samples in flat (concatenated) order.
    pub fn flatten(&self) -> Vec<f64> {
        match self {
            XData::Flat(x) => x.clone(),
            XData::Linked(list) => list.iter().flatten().copied().collect(),
        }
    }

    /// Copy with `steps[i]` added to the i-th sample in flat order.
    ///
    /// Samples beyond `steps.len()` are left untouched.
    pub fn shifted(&self, steps: &[f64]) -> XData {
        let mut k = 0usize;
        let mut shift = |v: &[f64]| -> Vec<f64> {
            v.iter()
                .map(|&xi| {
                    let s = steps.get(k).copied().unwrap_or(0.0);
                    k += 1;
                    xi + s
                })
                .collect()
        };
        match self {
            XData::Flat(x) => XData::Flat(shift(x.as_slice())),
            XData::Linked(list) => {
                XData::Linked(XList::new(list.iter().map(|v| shift(v.as_slice())).collect()))
            }
        }
    }
}

/// The two supported fit routines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoutineKind {
    /// Weighted least squares, uncertainty on y only.
    CurveFit,
    /// Orthogonal distance regression, uncertainty on x and y.
    OdrFit,
}

impl RoutineKind {
    pub const ALL: [RoutineKind; 2] = [RoutineKind::CurveFit, RoutineKind::OdrFit];

    pub fn name(self) -> &'static str {
        match self {
            RoutineKind::CurveFit => "curve_fit",
            RoutineKind::OdrFit => "odr_fit",
        }
    }
}

impl fmt::Display for RoutineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for RoutineKind {
    type Err = FitError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RoutineKind::ALL
            .into_iter()
            .find(|k| k.name() == s)
            .ok_or_else(|| FitError::UnsupportedRoutine { name: s.to_string() })
    }
}

/// How the routine is picked for a call.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoutineChoice {
    /// `odr_fit` when sigma_x is given and Monte-Carlo is off, else `curve_fit`.
    #[default]
    Auto,
    /// Resolve by name; unknown names are configuration errors.
    Name(String),
    /// An already resolved routine.
    Kind(RoutineKind),
}

impl From<RoutineKind> for RoutineChoice {
    fn from(value: RoutineKind) -> Self {
        RoutineChoice::Kind(value)
    }
}

impl From<&str> for RoutineChoice {
    fn from(value: &str) -> Self {
        RoutineChoice::Name(value.to_string())
    }
}

/// Options passed through to the fit routine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutineOptions {
    /// Maximum number of optimizer iterations.
    pub max_iter: usize,
    /// Relative tolerance on the weighted sum of squared residuals.
    pub ftol: f64,
    /// Relative tolerance on the parameter step.
    pub xtol: f64,
    /// Treat sigma as absolute (`true`) or only as relative weights (`false`).
    ///
    /// With relative weights the covariance is rescaled by the reduced residual sum.
    pub absolute_sigma: bool,
}

impl Default for RoutineOptions {
    fn default() -> Self {
        Self {
            max_iter: 200,
            ftol: 1e-12,
            xtol: 1e-12,
            absolute_sigma: true,
        }
    }
}

/// Fit configuration.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FitOptions {
    /// Print the fit report to stdout.
    pub report: bool,
    pub routine: RoutineChoice,
    /// Seed offset baselines from y before fitting.
    pub guess_offset: bool,
    /// Number of Monte-Carlo samples; `0` disables resampling.
    pub mc_sigma: usize,
    /// Seed for the Monte-Carlo generator. `None` draws from entropy.
    pub seed: Option<u64>,
    pub routine_options: RoutineOptions,
}

/// One fit call. Built per call and not retained.
#[derive(Debug, Clone, PartialEq)]
pub struct FitRequest {
    pub x: Series,
    pub y: Series,
    pub sigma_x: Option<Series>,
    pub sigma_y: Option<Series>,
    pub options: FitOptions,
}

impl FitRequest {
    pub fn new(x: impl Into<Series>, y: impl Into<Series>) -> Self {
        Self {
            x: x.into(),
            y: y.into(),
            sigma_x: None,
            sigma_y: None,
            options: FitOptions::default(),
        }
    }

    pub fn sigma_x(mut self, sigma_x: impl Into<Series>) -> Self {
        self.sigma_x = Some(sigma_x.into());
        self
    }

    pub fn sigma_y(mut self, sigma_y: impl Into<Series>) -> Self {
        self.sigma_y = Some(sigma_y.into());
        self
    }

    pub fn options(mut self, options: FitOptions) -> Self {
        self.options = options;
        self
    }

    pub fn routine(mut self, routine: impl Into<RoutineChoice>) -> Self {
        self.options.routine = routine.into();
        self
    }

    pub fn report(mut self, report: bool) -> Self {
        self.options.report = report;
        self
    }

    pub fn guess_offset(mut self, guess_offset: bool) -> Self {
        self.options.guess_offset = guess_offset;
        self
    }

    pub fn mc_sigma(mut self, mc_sigma: usize) -> Self {
        self.options.mc_sigma = mc_sigma;
        self
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.options.seed = Some(seed);
        self
    }
}

/// Outcome classification of a fit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FitStatus {
    Success,
    /// Fit ran but some covariance entries are infinite.
    Warning,
    /// The routine failed; the model was left unchanged.
    Error,
}

/// Diagnostics of a fit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitInfo {
    pub warn: bool,
    pub err: bool,
    /// Reduced chi-square, `0` without y uncertainties.
    pub chi2: f64,
    pub status: FitStatus,
    /// The routine failure that caused `err`.
    pub error: Option<RoutineError>,
}

/// Result of a fit call.
#[derive(Debug, Clone, PartialEq)]
pub struct FitOutcome {
    /// Optimized parameters in model order.
    pub popt: Vec<f64>,
    /// Covariance matrix; rows/columns of fixed parameters are zero.
    pub pcov: DMatrix<f64>,
    pub info: FitInfo,
}

impl FitOutcome {
    /// One-sigma uncertainties (square root of the covariance diagonal).
    pub fn uncertainties(&self) -> Vec<f64> {
        self.pcov.diagonal().iter().map(|v| v.sqrt()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn routine_kind_parses_known_names() {
        assert_eq!("curve_fit".parse::<RoutineKind>().unwrap(), RoutineKind::CurveFit);
        assert_eq!("odr_fit".parse::<RoutineKind>().unwrap(), RoutineKind::OdrFit);
        assert!(matches!(
            "york".parse::<RoutineKind>(),
            Err(FitError::UnsupportedRoutine { name }) if name == "york"
        ));
    }

    #[test]
    fn xlist_indexes_irregular_sets() {
        let list = XList::new(vec![vec![1.0, 2.0], vec![3.0], vec![]]);
        assert_eq!(list.len(), 3);
        assert_eq!(list.n_samples(), 3);
        assert_eq!(&list[1], &[3.0]);
        assert_eq!(list.iter().count(), 3);
    }

    #[test]
    fn shifted_walks_datasets_in_flat_order() {
        let x = XData::Linked(XList::new(vec![vec![0.0, 1.0], vec![2.0]]));
        let shifted = x.shifted(&[0.5, 0.25, 0.125]);
        assert_eq!(shifted.flatten(), vec![0.5, 1.25, 2.125]);
    }

    #[test]
    fn options_deserialize_with_defaults() {
        let opts: FitOptions =
            serde_json::from_str(r#"{"mc_sigma": 50, "routine": {"name": "odr_fit"}}"#).unwrap();
        assert_eq!(opts.mc_sigma, 50);
        assert_eq!(opts.routine, RoutineChoice::Name("odr_fit".to_string()));
        assert!(!opts.report);
        assert_eq!(opts.routine_options, RoutineOptions::default());
    }

    #[test]
    fn series_concat_flattens_sets() {
        let s = Series::from(vec![vec![1.0], vec![2.0, 3.0]]);
        assert_eq!(s.concat(), vec![1.0, 2.0, 3.0]);
    }
}
