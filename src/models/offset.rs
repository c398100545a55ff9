//! Offset sub-model: an additive baseline per x-group.
//!
//! Groups are delimited by ascending `cuts`. A sample belongs to group
//! `#{c in cuts : c <= x}`, so `k` cuts give `k + 1` baselines `off0..offk`.
//!
//! While `update_on_call` is set, every evaluation derives groups from the x it is
//! given. While a fit runs the flag is cleared and the masks precomputed from the
//! observed x are used instead, so resampled x values cannot move samples between
//! groups.

use crate::error::ModelError;
use crate::models::model::{check_param_count, Model};
use crate::models::params::Parameters;

#[derive(Debug)]
pub struct Offset {
    inner: Box<dyn Model>,
    cuts: Vec<f64>,
    params: Parameters,
    masks: Vec<usize>,
    update_on_call: bool,
}

impl Offset {
    /// Wrap `inner` with one baseline per group. Baselines start at zero.
    pub fn new(inner: impl Model + 'static, cuts: Vec<f64>) -> Self {
        let inner: Box<dyn Model> = Box::new(inner);
        let mut params = inner.params().clone();
        for g in 0..=cuts.len() {
            params.push(format!("off{g}"), 0.0, false, (f64::NEG_INFINITY, f64::INFINITY));
        }
        Self {
            inner,
            cuts,
            params,
            masks: Vec::new(),
            update_on_call: true,
        }
    }

    pub fn n_groups(&self) -> usize {
        self.cuts.len() + 1
    }

    fn n_inner(&self) -> usize {
        self.params.len() - self.n_groups()
    }

    pub fn update_on_call(&self) -> bool {
        self.update_on_call
    }

    pub fn set_update_on_call(&mut self, update: bool) {
        self.update_on_call = update;
    }

    pub fn masks(&self) -> &[usize] {
        &self.masks
    }

    fn group_of(&self, x: f64) -> usize {
        self.cuts.iter().take_while(|&&c| c <= x).count()
    }

    fn groups(&self, x: &[f64]) -> Vec<usize> {
        x.iter().map(|&xi| self.group_of(xi)).collect()
    }

    /// Precompute the group of every sample of `x`.
    pub fn gen_offset_masks(&mut self, x: &[f64]) {
        self.masks = self.groups(x);
    }

    /// Seed every free baseline with the mean of `y - inner(x)` over its group.
    ///
    /// Never fails: groups without samples, empty input, or an inner model that cannot
    /// be evaluated on `x` seed with the plain group mean of `y` or zero.
    pub fn guess_offset(&mut self, x: &[f64], y: &[f64]) {
        let n = x.len().min(y.len());
        let (x, y) = (&x[..n], &y[..n]);
        let k = self.n_inner();

        let base = self
            .inner
            .evaluate(x, &self.params.values()[..k])
            .ok()
            .filter(|b| b.len() == n)
            .unwrap_or_else(|| vec![0.0; n]);

        let mut sums = vec![0.0; self.n_groups()];
        let mut counts = vec![0usize; self.n_groups()];
        for ((&xi, &yi), &bi) in x.iter().zip(y).zip(&base) {
            let g = self.group_of(xi);
            sums[g] += yi - bi;
            counts[g] += 1;
        }

        for g in 0..self.n_groups() {
            let idx = k + g;
            if self.params.fixed()[idx] {
                continue;
            }
            let guess = if counts[g] > 0 { sums[g] / counts[g] as f64 } else { 0.0 };
            self.params.set_value(idx, if guess.is_finite() { guess } else { 0.0 });
        }
    }
}

impl Model for Offset {
    fn params(&self) -> &Parameters {
        &self.params
    }

    fn params_mut(&mut self) -> &mut Parameters {
        &mut self.params
    }

    fn evaluate(&self, x: &[f64], params: &[f64]) -> Result<Vec<f64>, ModelError> {
        check_param_count(params, self.params.len())?;
        let k = self.n_inner();
        let base = self.inner.evaluate(x, &params[..k])?;

        let computed;
        let groups: &[usize] = if self.update_on_call {
            computed = self.groups(x);
            &computed
        } else {
            if self.masks.len() != x.len() {
                return Err(ModelError::XShape(format!(
                    "offset masks cover {} samples but x has {}",
                    self.masks.len(),
                    x.len()
                )));
            }
            &self.masks
        };

        Ok(base
            .iter()
            .zip(groups)
            .map(|(&b, &g)| b + params[k + g])
            .collect())
    }

    fn set_values(&mut self, values: &[f64], force: bool) {
        self.params.set_values(values, force);
        let k = self.n_inner();
        let inner_values = self.params.values()[..k].to_vec();
        self.inner.set_values(&inner_values, true);
    }

    fn update_args(&self, values: &[f64]) -> Vec<f64> {
        let k = self.n_inner().min(values.len());
        let mut out = self.inner.update_args(&values[..k]);
        out.extend_from_slice(&values[k..]);
        out
    }

    fn error(&self) -> Option<String> {
        if let Some(e) = self.inner.error() {
            return Some(e);
        }
        if self.cuts.iter().any(|c| !c.is_finite()) || self.cuts.windows(2).any(|w| w[0] > w[1]) {
            return Some("offset cuts must be finite and ascending".to_string());
        }
        self.params.consistency_error()
    }

    fn as_offset(&self) -> Option<&Offset> {
        Some(self)
    }

    fn as_offset_mut(&mut self) -> Option<&mut Offset> {
        Some(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::shapes::Straight;

    fn two_group_offset() -> Offset {
        let mut off = Offset::new(Straight::new(1.0, 0.0), vec![10.0]);
        off.set_values(&[1.0, 0.0, 0.5, -0.5], true);
        off
    }

    #[test]
    fn evaluation_adds_group_baseline() {
        let off = two_group_offset();
        assert_eq!(off.names(), &["slope", "intercept", "off0", "off1"]);
        let y = off.call(&[1.0, 10.0, 12.0]).unwrap();
        assert_eq!(y, vec![1.5, 9.5, 11.5]);
    }

    #[test]
    fn suppressed_update_uses_precomputed_masks() {
        let mut off = two_group_offset();
        off.gen_offset_masks(&[1.0, 12.0]);
        off.set_update_on_call(false);
        // 11.0 would be group 1 and 9.0 group 0 if recomputed.
        let y = off.call(&[11.0, 9.0]).unwrap();
        assert_eq!(y, vec![11.5, 8.5]);
        assert!(matches!(off.call(&[1.0]), Err(ModelError::XShape(_))));
    }

    #[test]
    fn guess_offset_uses_group_means() {
        let mut off = Offset::new(Straight::new(1.0, 0.0), vec![10.0]);
        off.guess_offset(&[1.0, 2.0, 11.0], &[3.0, 4.0, 10.0]);
        assert_eq!(&off.values()[2..], &[2.0, -1.0]);
    }

    #[test]
    fn guess_offset_on_empty_input_seeds_zero() {
        let mut off = two_group_offset();
        off.guess_offset(&[], &[]);
        assert_eq!(&off.values()[2..], &[0.0, 0.0]);
    }

    #[test]
    fn guess_offset_keeps_fixed_baselines() {
        let mut off = two_group_offset();
        off.params_mut().set_fixed("off0", true);
        off.guess_offset(&[1.0], &[4.0]);
        assert_eq!(&off.values()[2..], &[0.5, 0.0]);
    }

    #[test]
    fn unsorted_cuts_are_a_configuration_error() {
        let off = Offset::new(Straight::default(), vec![2.0, 1.0]);
        assert!(off.error().is_some());
    }
}
