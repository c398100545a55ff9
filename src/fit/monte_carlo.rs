//! Monte-Carlo ensemble fitting.
//!
//! Every sample perturbs x and y by Gaussian noise scaled with their uncertainties and
//! is fitted without weights, starting from the model's current values. The ensemble
//! mean is the estimate and the sample covariance its uncertainty.
//!
//! Noise is drawn sequentially from one generator, so a fixed seed reproduces the
//! ensemble regardless of how the fits are scheduled across threads.

use std::borrow::Cow;

use nalgebra::DMatrix;
use rand::prelude::*;
use rand::rngs::StdRng;
use rand_distr::StandardNormal;
use rayon::prelude::*;
use tracing::debug;

use crate::domain::{RoutineOptions, XData};
use crate::error::RoutineError;
use crate::fit::normalize::Normalized;
use crate::math::{column_means, sample_covariance};
use crate::models::FitModel;
use crate::routines::{FitProblem, FitRoutine, RoutineOutput, Weights};

struct Sample<'a> {
    x: Cow<'a, XData>,
    y: Cow<'a, [f64]>,
}

/// `sigma_x` may contain zeros (exact x); `sigma_y` also divides the reduced chi-square
/// and must be strictly positive, as in the weighted single-fit path.
fn check_sigma(sigma: &[f64], n: usize, label: &str, allow_zero: bool) -> Result<(), RoutineError> {
    if sigma.len() != n {
        return Err(RoutineError::Value(format!(
            "{label} has {} entries but the data has {n} samples",
            sigma.len()
        )));
    }
    let valid = |s: f64| s.is_finite() && (s > 0.0 || (allow_zero && s == 0.0));
    if !sigma.iter().all(|&s| valid(s)) {
        let rule = if allow_zero { "non-negative" } else { "positive" };
        return Err(RoutineError::Value(format!("{label} must be {rule} and finite")));
    }
    Ok(())
}

fn noise(rng: &mut StdRng, sigma: &[f64]) -> Vec<f64> {
    sigma
        .iter()
        .map(|s| {
            let z: f64 = rng.sample(StandardNormal);
            s * z
        })
        .collect()
}

fn draw_samples<'a>(
    data: &'a Normalized,
    n: usize,
    seed: Option<u64>,
) -> Result<Vec<Sample<'a>>, RoutineError> {
    let n_x = data.x.n_samples();
    if let Some(sx) = &data.sigma_x {
        check_sigma(sx, n_x, "sigma_x", true)?;
    }
    if let Some(sy) = &data.sigma_y {
        check_sigma(sy, data.y.len(), "sigma_y", false)?;
    }

    let mut rng = match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };

    let mut samples = Vec::with_capacity(n);
    for _ in 0..n {
        let x = match &data.sigma_x {
            Some(sx) => Cow::Owned(data.x.shifted(&noise(&mut rng, sx))),
            None => Cow::Borrowed(&data.x),
        };
        let y = match &data.sigma_y {
            Some(sy) => Cow::Owned(
                data.y
                    .iter()
                    .zip(noise(&mut rng, sy))
                    .map(|(yi, e)| yi + e)
                    .collect(),
            ),
            None => Cow::Borrowed(data.y.as_slice()),
        };
        samples.push(Sample { x, y });
    }
    Ok(samples)
}

/// Fit `n` resampled copies of the data and aggregate them.
///
/// The covariance uses `N - 1` normalization and is zero for a single sample. Rows and
/// columns of fixed parameters are zero. Any failing sample fails the whole ensemble.
pub fn run_ensemble(
    routine: &dyn FitRoutine,
    model: &FitModel,
    data: &Normalized,
    n: usize,
    options: &RoutineOptions,
    seed: Option<u64>,
) -> Result<RoutineOutput, RoutineError> {
    if n == 0 {
        return Err(RoutineError::Value(
            "Monte-Carlo ensemble needs at least one sample".to_string(),
        ));
    }
    let samples = draw_samples(data, n, seed)?;
    let (fixed, bounds) = model.fit_prepare();
    let p0 = model.values();
    let p = p0.len();

    let estimates: Vec<Vec<f64>> = samples
        .par_iter()
        .map(|s| -> Result<Vec<f64>, RoutineError> {
            let problem = FitProblem {
                model,
                x: &s.x,
                y: &s.y,
                p0,
                fixed: &fixed,
                bounds: &bounds,
                weights: Weights::none(),
                options,
            };
            let out = routine.fit(&problem)?;
            out.check_shape(p)?;
            Ok(out.popt)
        })
        .collect::<Result<_, _>>()?;

    let free: Vec<usize> = (0..fixed.len()).filter(|&i| !fixed[i]).collect();
    let block = sample_covariance(&estimates, &free);
    let mut pcov = DMatrix::<f64>::zeros(p, p);
    for (a, &ia) in free.iter().enumerate() {
        for (b, &ib) in free.iter().enumerate() {
            pcov[(ia, ib)] = block[(a, b)];
        }
    }

    debug!(samples = n, free = free.len(), routine = %routine.kind(), "Monte-Carlo ensemble done");
    Ok(RoutineOutput {
        popt: column_means(&estimates),
        pcov,
    })
}
