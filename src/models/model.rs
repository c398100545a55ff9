//! The model capability consumed by the fit orchestration.
//!
//! A fit works on one of two shapes:
//!
//! - an atomic [`Model`] evaluated on flat x data
//! - a [`Linked`] composite evaluated on one x dataset per child
//!
//! [`FitModel`] makes that distinction an explicit tagged variant. Offset sub-models are
//! discovered through the declared [`Model::as_offset_mut`] accessor.

use std::fmt;

use crate::domain::XData;
use crate::error::ModelError;
use crate::models::linked::Linked;
use crate::models::offset::Offset;
use crate::models::params::Parameters;

/// A parametrized function `y = f(x, params)`.
pub trait Model: Send + Sync + fmt::Debug {
    fn params(&self) -> &Parameters;

    fn params_mut(&mut self) -> &mut Parameters;

    /// Evaluate at `x` with an explicit parameter vector.
    fn evaluate(&self, x: &[f64], params: &[f64]) -> Result<Vec<f64>, ModelError>;

    fn names(&self) -> &[String] {
        self.params().names()
    }

    fn values(&self) -> &[f64] {
        self.params().values()
    }

    fn size(&self) -> usize {
        self.params().len()
    }

    /// Fixed mask and bounds as handed to a routine.
    fn fit_prepare(&self) -> (Vec<bool>, Vec<(f64, f64)>) {
        (self.params().fixed().to_vec(), self.params().bounds().to_vec())
    }

    fn set_values(&mut self, values: &[f64], force: bool) {
        self.params_mut().set_values(values, force);
    }

    /// Map raw optimizer output into this model's parameter semantics.
    fn update_args(&self, values: &[f64]) -> Vec<f64> {
        values.to_vec()
    }

    /// Pre-existing configuration problem, if any.
    fn error(&self) -> Option<String> {
        self.params().consistency_error()
    }

    /// Evaluate with the current parameter values.
    fn call(&self, x: &[f64]) -> Result<Vec<f64>, ModelError> {
        self.evaluate(x, self.values())
    }

    fn as_offset(&self) -> Option<&Offset> {
        None
    }

    fn as_offset_mut(&mut self) -> Option<&mut Offset> {
        None
    }
}

/// Fail unless `params` has the expected length.
pub fn check_param_count(params: &[f64], expected: usize) -> Result<(), ModelError> {
    if params.len() == expected {
        Ok(())
    } else {
        Err(ModelError::ParamCount {
            expected,
            got: params.len(),
        })
    }
}

/// The unit a fit operates on.
#[derive(Debug)]
pub enum FitModel {
    Atomic(Box<dyn Model>),
    Linked(Linked),
}

impl FitModel {
    pub fn atomic(model: impl Model + 'static) -> Self {
        FitModel::Atomic(Box::new(model))
    }

    pub fn is_linked(&self) -> bool {
        matches!(self, FitModel::Linked(_))
    }

    /// The flat parameter vector a routine optimizes.
    pub fn params(&self) -> &Parameters {
        match self {
            FitModel::Atomic(m) => m.params(),
            FitModel::Linked(l) => l.params(),
        }
    }

    pub fn names(&self) -> &[String] {
        self.params().names()
    }

    pub fn values(&self) -> &[f64] {
        self.params().values()
    }

    pub fn size(&self) -> usize {
        self.params().len()
    }

    pub fn fit_prepare(&self) -> (Vec<bool>, Vec<(f64, f64)>) {
        match self {
            FitModel::Atomic(m) => m.fit_prepare(),
            FitModel::Linked(l) => (l.params().fixed().to_vec(), l.params().bounds().to_vec()),
        }
    }

    pub fn set_values(&mut self, values: &[f64], force: bool) {
        match self {
            FitModel::Atomic(m) => m.set_values(values, force),
            FitModel::Linked(l) => l.set_values(values, force),
        }
    }

    pub fn update_args(&self, values: &[f64]) -> Vec<f64> {
        match self {
            FitModel::Atomic(m) => m.update_args(values),
            FitModel::Linked(l) => l.update_args(values),
        }
    }

    pub fn error(&self) -> Option<String> {
        match self {
            FitModel::Atomic(m) => m.error(),
            FitModel::Linked(l) => l.error(),
        }
    }

    pub fn evaluate(&self, x: &XData, params: &[f64]) -> Result<Vec<f64>, ModelError> {
        match (self, x) {
            (FitModel::Atomic(m), XData::Flat(x)) => m.evaluate(x, params),
            (FitModel::Linked(l), XData::Linked(x)) => l.evaluate(x, params),
            (FitModel::Atomic(_), XData::Linked(_)) => Err(ModelError::XShape(
                "atomic model evaluated on per-dataset x".to_string(),
            )),
            (FitModel::Linked(_), XData::Flat(_)) => Err(ModelError::XShape(
                "linked model evaluated on flat x".to_string(),
            )),
        }
    }

    /// Offset slots: one for an atomic model, one per child for a linked model.
    pub fn offsets_mut(&mut self) -> Vec<Option<&mut Offset>> {
        match self {
            FitModel::Atomic(m) => vec![m.as_offset_mut()],
            FitModel::Linked(l) => l.offsets_mut(),
        }
    }

    /// Current `update_on_call` flag of every offset slot.
    pub fn offset_flags(&self) -> Vec<Option<bool>> {
        match self {
            FitModel::Atomic(m) => vec![m.as_offset().map(Offset::update_on_call)],
            FitModel::Linked(l) => l
                .children()
                .iter()
                .map(|c| c.as_offset().map(Offset::update_on_call))
                .collect(),
        }
    }
}

impl<M: Model + 'static> From<M> for FitModel {
    fn from(value: M) -> Self {
        FitModel::atomic(value)
    }
}

impl From<Linked> for FitModel {
    fn from(value: Linked) -> Self {
        FitModel::Linked(value)
    }
}
