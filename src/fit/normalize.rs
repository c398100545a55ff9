//! Input normalization.
//!
//! Routines only understand flat y and sigma arrays. This module:
//!
//! - checks that the data layout matches the model variant
//! - hands offset handling to [`OffsetGuard`] (one slot per dataset)
//! - synchronizes shared parameters of linked models
//! - concatenates per-dataset y / sigma and wraps per-dataset x into an [`XList`]

use tracing::debug;

use crate::domain::{FitOptions, Series, XData, XList};
use crate::error::FitError;
use crate::fit::offset_guard::OffsetGuard;
use crate::models::FitModel;

/// Observations in the layout the routines consume.
#[derive(Debug, Clone, PartialEq)]
pub struct Normalized {
    pub x: XData,
    pub y: Vec<f64>,
    pub sigma_x: Option<Vec<f64>>,
    pub sigma_y: Option<Vec<f64>>,
}

impl Normalized {
    pub fn n_samples(&self) -> usize {
        self.y.len()
    }
}

fn slices(sets: &[Vec<f64>]) -> Vec<&[f64]> {
    sets.iter().map(Vec::as_slice).collect()
}

/// Every dataset of `sets` must have as many samples as the matching x dataset.
fn check_dataset_lengths(x: &[Vec<f64>], sets: &[Vec<f64>], label: &'static str) -> Result<(), FitError> {
    let mismatch = sets.len() != x.len() || x.iter().zip(sets).any(|(xi, si)| xi.len() != si.len());
    if mismatch {
        return Err(FitError::TypeMismatch {
            expected: "per-dataset data matching the length of each x dataset",
            found: label,
        });
    }
    Ok(())
}

/// Validate the layout, engage the offset guard and flatten the data.
///
/// Configuration errors are returned before the model is touched.
pub fn normalize<'m>(
    model: &'m mut FitModel,
    x: Series,
    y: Series,
    sigma_x: Option<Series>,
    sigma_y: Option<Series>,
    options: &FitOptions,
) -> Result<(OffsetGuard<'m>, Normalized), FitError> {
    match model {
        FitModel::Atomic(_) => {
            let x = match x {
                Series::Flat(x) => x,
                other => {
                    return Err(FitError::TypeMismatch {
                        expected: "flat x data for an atomic model",
                        found: other.kind_name(),
                    });
                }
            };
            let y = y.concat();
            let sigma_x = sigma_x.map(Series::concat);
            let sigma_y = sigma_y.map(Series::concat);

            let guard = OffsetGuard::engage(model, &[x.as_slice()], &[y.as_slice()], options.guess_offset);
            debug!(samples = y.len(), offsets = guard.n_offsets(), "normalized atomic input");
            Ok((
                guard,
                Normalized {
                    x: XData::Flat(x),
                    y,
                    sigma_x,
                    sigma_y,
                },
            ))
        }
        FitModel::Linked(linked) => {
            if options.mc_sigma != 0 {
                return Err(FitError::LinkedMonteCarlo);
            }
            let n_models = linked.children().len();
            let (x, y) = match (x, y) {
                (Series::Sets(x), Series::Sets(y)) => (x, y),
                (x, y) => {
                    let found = if matches!(x, Series::Flat(_)) { x.kind_name() } else { y.kind_name() };
                    return Err(FitError::TypeMismatch {
                        expected: "per-dataset x and y data for a linked model",
                        found,
                    });
                }
            };
            if x.len() != n_models || y.len() != n_models {
                return Err(FitError::TypeMismatch {
                    expected: "one x and y dataset per linked model",
                    found: "a different number of datasets",
                });
            }
            check_dataset_lengths(&x, &y, "y datasets of other lengths")?;
            for sigma in [&sigma_x, &sigma_y] {
                if let Some(Series::Sets(sets)) = sigma {
                    check_dataset_lengths(&x, sets, "sigma datasets of other lengths")?;
                }
            }

            let mut guard =
                OffsetGuard::engage(model, &slices(&x), &slices(&y), options.guess_offset);
            if let FitModel::Linked(linked) = &mut *guard {
                linked.inherit_values();
            }

            let x = XData::Linked(XList::new(x));
            let y = Series::Sets(y).concat();
            debug!(
                datasets = n_models,
                samples = y.len(),
                offsets = guard.n_offsets(),
                "normalized linked input"
            );
            Ok((
                guard,
                Normalized {
                    x,
                    y,
                    sigma_x: sigma_x.map(Series::concat),
                    sigma_y: sigma_y.map(Series::concat),
                },
            ))
        }
    }
}
