//! `isofit` library crate.
//!
//! Fit orchestration for isotope-shift spectroscopy models:
//!
//! - `models`: parametrized models, offset baselines and linked multi-dataset fits
//! - `routines`: the numerical fitters (`curve_fit`, `odr_fit`)
//! - `fit`: routine selection, input normalization, Monte-Carlo ensembles
//! - `report`: terminal output of a fit
//!
//! Optimization failures are reported in the returned diagnostics, never as `Err`.

pub mod domain;
pub mod error;
pub mod fit;
pub mod math;
pub mod models;
pub mod report;
pub mod routines;

pub use domain::{FitInfo, FitOptions, FitOutcome, FitRequest, FitStatus, RoutineChoice, RoutineKind};
pub use error::{FitError, ModelError, RoutineError};
pub use fit::{fit, Fitter};
pub use models::{FitModel, Linked, Model, Offset};
