//! Concrete line shapes.
//!
//! Every shape is a pure function of `(x, params)`; the structs only carry the
//! parameter metadata.

use std::fmt;
use std::sync::Arc;

use crate::error::ModelError;
use crate::models::model::{check_param_count, Model};
use crate::models::params::Parameters;

/// Straight line `y = slope * x + intercept`.
#[derive(Debug, Clone)]
pub struct Straight {
    params: Parameters,
}

impl Straight {
    pub fn new(slope: f64, intercept: f64) -> Self {
        Self {
            params: Parameters::new(["slope", "intercept"], vec![slope, intercept]),
        }
    }
}

impl Default for Straight {
    fn default() -> Self {
        Self::new(1.0, 0.0)
    }
}

impl Model for Straight {
    fn params(&self) -> &Parameters {
        &self.params
    }

    fn params_mut(&mut self) -> &mut Parameters {
        &mut self.params
    }

    fn evaluate(&self, x: &[f64], params: &[f64]) -> Result<Vec<f64>, ModelError> {
        check_param_count(params, 2)?;
        Ok(x.iter().map(|&xi| params[0] * xi + params[1]).collect())
    }
}

/// Polynomial `y = p0 + p1 x + ... + pk x^k`.
#[derive(Debug, Clone)]
pub struct Polynomial {
    params: Parameters,
}

impl Polynomial {
    /// Coefficients in ascending order of the power.
    pub fn new(coeffs: Vec<f64>) -> Self {
        let names: Vec<String> = (0..coeffs.len()).map(|i| format!("p{i}")).collect();
        Self {
            params: Parameters::new(names, coeffs),
        }
    }

    pub fn order(&self) -> usize {
        self.params.len().saturating_sub(1)
    }
}

impl Model for Polynomial {
    fn params(&self) -> &Parameters {
        &self.params
    }

    fn params_mut(&mut self) -> &mut Parameters {
        &mut self.params
    }

    fn evaluate(&self, x: &[f64], params: &[f64]) -> Result<Vec<f64>, ModelError> {
        check_param_count(params, self.params.len())?;
        Ok(x
            .iter()
            .map(|&xi| params.iter().rev().fold(0.0, |acc, &c| acc * xi + c))
            .collect())
    }

    fn error(&self) -> Option<String> {
        if self.params.is_empty() {
            return Some("polynomial needs at least one coefficient".to_string());
        }
        self.params.consistency_error()
    }
}

/// Lorentz profile with peak height `scale` at `x0` and full width `gamma`.
///
/// `y = scale * (gamma/2)^2 / ((x - x0)^2 + (gamma/2)^2)`
#[derive(Debug, Clone)]
pub struct Lorentz {
    params: Parameters,
}

impl Lorentz {
    pub fn new(x0: f64, gamma: f64, scale: f64) -> Self {
        Self {
            params: Parameters::new(["x0", "gamma", "scale"], vec![x0, gamma, scale]),
        }
    }
}

impl Model for Lorentz {
    fn params(&self) -> &Parameters {
        &self.params
    }

    fn params_mut(&mut self) -> &mut Parameters {
        &mut self.params
    }

    fn evaluate(&self, x: &[f64], params: &[f64]) -> Result<Vec<f64>, ModelError> {
        check_param_count(params, 3)?;
        let (x0, half, scale) = (params[0], 0.5 * params[1], params[2]);
        let h2 = half * half;
        Ok(x
            .iter()
            .map(|&xi| {
                let d = xi - x0;
                scale * h2 / (d * d + h2)
            })
            .collect())
    }

    /// The profile only depends on `gamma^2`; report the positive width.
    fn update_args(&self, values: &[f64]) -> Vec<f64> {
        let mut out = values.to_vec();
        if let Some(g) = out.get_mut(1) {
            *g = g.abs();
        }
        out
    }
}

type ShapeFn = dyn Fn(&[f64], &[f64]) -> Vec<f64> + Send + Sync;

/// Model backed by a user function `f(x, params)`.
#[derive(Clone)]
pub struct FnModel {
    params: Parameters,
    f: Arc<ShapeFn>,
}

impl FnModel {
    pub fn new<S: Into<String>>(
        names: impl IntoIterator<Item = S>,
        values: Vec<f64>,
        f: impl Fn(&[f64], &[f64]) -> Vec<f64> + Send + Sync + 'static,
    ) -> Self {
        Self {
            params: Parameters::new(names, values),
            f: Arc::new(f),
        }
    }
}

impl fmt::Debug for FnModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnModel").field("params", &self.params).finish_non_exhaustive()
    }
}

impl Model for FnModel {
    fn params(&self) -> &Parameters {
        &self.params
    }

    fn params_mut(&mut self) -> &mut Parameters {
        &mut self.params
    }

    fn evaluate(&self, x: &[f64], params: &[f64]) -> Result<Vec<f64>, ModelError> {
        check_param_count(params, self.params.len())?;
        Ok((self.f)(x, params))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn straight_evaluates_line() {
        let m = Straight::new(2.0, 1.0);
        assert_eq!(m.call(&[0.0, 1.0, 2.0]).unwrap(), vec![1.0, 3.0, 5.0]);
        assert!(matches!(
            m.evaluate(&[0.0], &[1.0]),
            Err(ModelError::ParamCount { expected: 2, got: 1 })
        ));
    }

    #[test]
    fn polynomial_uses_ascending_coefficients() {
        let m = Polynomial::new(vec![1.0, 0.0, 2.0]);
        assert_eq!(m.order(), 2);
        assert_eq!(m.call(&[0.0, 1.0, 3.0]).unwrap(), vec![1.0, 3.0, 19.0]);
        assert!(Polynomial::new(Vec::new()).error().is_some());
    }

    #[test]
    fn lorentz_peaks_at_center_and_reports_positive_width() {
        let m = Lorentz::new(5.0, 2.0, 3.0);
        let y = m.call(&[5.0, 6.0]).unwrap();
        assert!((y[0] - 3.0).abs() < 1e-12);
        assert!((y[1] - 1.5).abs() < 1e-12);
        assert_eq!(m.update_args(&[5.0, -2.0, 3.0]), vec![5.0, 2.0, 3.0]);
    }

    #[test]
    fn fn_model_reports_name_value_mismatch() {
        let m = FnModel::new(["a", "b"], vec![1.0], |x, p| x.iter().map(|v| v * p[0]).collect());
        assert!(m.error().is_some());

        let m = FnModel::new(["a"], vec![2.0], |x, p| x.iter().map(|v| v * p[0]).collect());
        assert!(m.error().is_none());
        assert_eq!(m.call(&[1.5]).unwrap(), vec![3.0]);
    }
}
