//! Error types for fitting.
//!
//! Two families with different propagation rules:
//!
//! - [`FitError`] is a caller bug (bad routine name, unsupported combination, broken
//!   model) and is always returned as `Err` before any data is touched.
//! - [`RoutineError`] is an expected outcome of numerical fitting. The orchestrator
//!   recovers it into [`crate::domain::FitInfo`] and never returns it as `Err`.

use serde::{Deserialize, Serialize};

/// Configuration and type errors surfaced to the caller of [`crate::fit::fit`].
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FitError {
    /// The requested routine name is not one of `curve_fit`, `odr_fit`.
    #[error("specified routine '{name}' is not supported")]
    UnsupportedRoutine {
        /// The name as requested.
        name: String,
    },

    /// Monte-Carlo sampling was requested for a linked model.
    #[error("linked models are currently not supported with Monte-Carlo sampling")]
    LinkedMonteCarlo,

    /// The model reports a pre-existing configuration problem.
    #[error("{0}")]
    Model(String),

    /// The data layout does not match the model variant.
    #[error("expected {expected} but got {found}")]
    TypeMismatch {
        /// What the model variant needs.
        expected: &'static str,
        /// What the request provided.
        found: &'static str,
    },
}

/// Failure raised by a fit routine while optimizing.
#[derive(Debug, Clone, PartialEq, thiserror::Error, Serialize, Deserialize)]
pub enum RoutineError {
    /// Invalid numeric input (shape mismatch, bad sigma, non-finite values).
    #[error("{0}")]
    Value(String),

    /// The optimizer ran but did not converge.
    #[error("{0}")]
    Runtime(String),
}

/// Failure while evaluating a model.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ModelError {
    /// Parameter vector length differs from what the model expects.
    #[error("model expects {expected} parameters, got {got}")]
    ParamCount {
        /// Expected length.
        expected: usize,
        /// Given length.
        got: usize,
    },

    /// The x data does not have the layout the model evaluates on.
    #[error("x data mismatch: {0}")]
    XShape(String),
}

impl From<ModelError> for RoutineError {
    fn from(value: ModelError) -> Self {
        RoutineError::Value(value.to_string())
    }
}
