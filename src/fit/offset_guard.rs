//! Scoped suppression of offset auto-updates.
//!
//! [`OffsetGuard`] takes the model for the duration of a fit. On entry every offset
//! slot gets `update_on_call = false`, masks precomputed from its dataset's x and,
//! optionally, baselines seeded from y. On drop the flags are restored to their
//! pre-fit values, whichever way the fit ends.

use std::ops::{Deref, DerefMut};

use tracing::trace;

use crate::models::FitModel;

#[derive(Debug)]
pub struct OffsetGuard<'m> {
    model: &'m mut FitModel,
    previous: Vec<Option<bool>>,
}

impl<'m> OffsetGuard<'m> {
    /// Suppress offset updates. `x[i]` / `y[i]` belong to offset slot `i`; missing
    /// datasets count as empty.
    pub fn engage(model: &'m mut FitModel, x: &[&[f64]], y: &[&[f64]], guess_offset: bool) -> Self {
        let previous = model.offset_flags();
        for (i, slot) in model.offsets_mut().into_iter().enumerate() {
            let Some(offset) = slot else {
                continue;
            };
            let xi = x.get(i).copied().unwrap_or(&[]);
            offset.set_update_on_call(false);
            offset.gen_offset_masks(xi);
            if guess_offset {
                offset.guess_offset(xi, y.get(i).copied().unwrap_or(&[]));
            }
            trace!(slot = i, samples = xi.len(), "offset updates suppressed");
        }
        Self { model, previous }
    }

    /// Number of offset slots that are actually occupied.
    pub fn n_offsets(&self) -> usize {
        self.previous.iter().filter(|p| p.is_some()).count()
    }

    fn restore(&mut self) {
        for (slot, prev) in self.model.offsets_mut().into_iter().zip(&self.previous) {
            if let (Some(offset), Some(flag)) = (slot, prev) {
                offset.set_update_on_call(*flag);
            }
        }
    }
}

impl Deref for OffsetGuard<'_> {
    type Target = FitModel;

    fn deref(&self) -> &Self::Target {
        self.model
    }
}

impl DerefMut for OffsetGuard<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.model
    }
}

impl Drop for OffsetGuard<'_> {
    fn drop(&mut self) {
        self.restore();
    }
}
