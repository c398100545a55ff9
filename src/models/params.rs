//! Named parameter storage shared by all models.

/// Ordered parameter vector with fixed-mask and bounds metadata.
///
/// `names`, `fixed` and `bounds` always have the same length. `values` is taken as
/// given so a model built from inconsistent input can report it through
/// [`Parameters::consistency_error`] instead of panicking at construction.
#[derive(Debug, Clone, PartialEq)]
pub struct Parameters {
    names: Vec<String>,
    values: Vec<f64>,
    fixed: Vec<bool>,
    bounds: Vec<(f64, f64)>,
}

impl Parameters {
    pub fn new<S: Into<String>>(names: impl IntoIterator<Item = S>, values: Vec<f64>) -> Self {
        let names: Vec<String> = names.into_iter().map(Into::into).collect();
        let n = names.len();
        Self {
            names,
            values,
            fixed: vec![false; n],
            bounds: vec![(f64::NEG_INFINITY, f64::INFINITY); n],
        }
    }

    pub fn empty() -> Self {
        Self::new(Vec::<String>::new(), Vec::new())
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn fixed(&self) -> &[bool] {
        &self.fixed
    }

    pub fn bounds(&self) -> &[(f64, f64)] {
        &self.bounds
    }

    /// Number of parameters that are not fixed.
    pub fn n_free(&self) -> usize {
        self.fixed.iter().filter(|f| !**f).count()
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.names.iter().position(|n| n == name)
    }

    /// Append a parameter.
    pub fn push(&mut self, name: impl Into<String>, value: f64, fixed: bool, bounds: (f64, f64)) {
        self.names.push(name.into());
        self.values.push(value);
        self.fixed.push(fixed);
        self.bounds.push(bounds);
    }

    /// Set the fixed flag of `name`. Returns `false` for unknown names.
    pub fn set_fixed(&mut self, name: &str, fixed: bool) -> bool {
        match self.index_of(name) {
            Some(i) => {
                self.fixed[i] = fixed;
                true
            }
            None => false,
        }
    }

    /// Set the `(lower, upper)` bounds of `name`. Returns `false` for unknown names.
    pub fn set_bounds(&mut self, name: &str, lower: f64, upper: f64) -> bool {
        match self.index_of(name) {
            Some(i) => {
                self.bounds[i] = (lower, upper);
                true
            }
            None => false,
        }
    }

    /// Overwrite the value at `index` regardless of the fixed flag.
    pub fn set_value(&mut self, index: usize, value: f64) {
        if let Some(v) = self.values.get_mut(index) {
            *v = value;
        }
    }

    /// Overwrite values in order. Fixed parameters keep their value unless `force`.
    pub fn set_values(&mut self, values: &[f64], force: bool) {
        for (i, (slot, &v)) in self.values.iter_mut().zip(values).enumerate() {
            if force || !self.fixed.get(i).copied().unwrap_or(false) {
                *slot = v;
            }
        }
    }

    pub fn consistency_error(&self) -> Option<String> {
        if self.values.len() != self.names.len() {
            return Some(format!(
                "model has {} parameter names but {} values",
                self.names.len(),
                self.values.len()
            ));
        }
        for (name, &(lo, hi)) in self.names.iter().zip(&self.bounds) {
            if lo.is_nan() || hi.is_nan() || lo > hi {
                return Some(format!("invalid bounds ({lo}, {hi}) for parameter '{name}'"));
            }
        }
        None
    }
}
