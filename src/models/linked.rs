//! Linked model: several datasets fitted at once with shared parameters.
//!
//! The flat parameter vector holds every shared name once (the first child defining it
//! provides value, fixed flag and bounds). Parameters that are not shared are renamed
//! `name__i` with `i` the child index.

use crate::domain::XList;
use crate::error::ModelError;
use crate::models::model::{check_param_count, Model};
use crate::models::offset::Offset;
use crate::models::params::Parameters;

#[derive(Debug)]
pub struct Linked {
    children: Vec<Box<dyn Model>>,
    shared: Vec<String>,
    params: Parameters,
    /// For every child, the flat index of each of its parameters.
    index_map: Vec<Vec<usize>>,
}

impl Linked {
    pub fn new<S: Into<String>>(
        children: Vec<Box<dyn Model>>,
        shared: impl IntoIterator<Item = S>,
    ) -> Self {
        let shared: Vec<String> = shared.into_iter().map(Into::into).collect();
        let mut params = Parameters::empty();
        let mut index_map = Vec::with_capacity(children.len());

        for (i, child) in children.iter().enumerate() {
            let p = child.params();
            let mut map = Vec::with_capacity(p.len());
            for (j, name) in p.names().iter().enumerate() {
                let value = p.values().get(j).copied().unwrap_or(f64::NAN);
                let (fixed, bounds) = (p.fixed()[j], p.bounds()[j]);
                if shared.contains(name) {
                    match params.index_of(name) {
                        Some(g) => map.push(g),
                        None => {
                            map.push(params.len());
                            params.push(name.clone(), value, fixed, bounds);
                        }
                    }
                } else {
                    map.push(params.len());
                    params.push(format!("{name}__{i}"), value, fixed, bounds);
                }
            }
            index_map.push(map);
        }

        Self {
            children,
            shared,
            params,
            index_map,
        }
    }

    pub fn params(&self) -> &Parameters {
        &self.params
    }

    pub fn params_mut(&mut self) -> &mut Parameters {
        &mut self.params
    }

    pub fn children(&self) -> &[Box<dyn Model>] {
        &self.children
    }

    fn child_values(&self, i: usize, params: &[f64]) -> Vec<f64> {
        self.index_map[i].iter().map(|&g| params[g]).collect()
    }

    fn push_values(&mut self) {
        for i in 0..self.children.len() {
            let values = self.child_values(i, self.params.values());
            self.children[i].set_values(&values, true);
        }
    }

    /// Synchronize shared parameters across children.
    ///
    /// Current child values are read back into the flat vector (the first child owning
    /// a shared parameter wins), then pushed into every child.
    pub fn inherit_values(&mut self) {
        let mut seen = vec![false; self.params.len()];
        for (child, map) in self.children.iter().zip(&self.index_map) {
            for (&g, &v) in map.iter().zip(child.values()) {
                if !seen[g] {
                    self.params.set_value(g, v);
                    seen[g] = true;
                }
            }
        }
        self.push_values();
    }

    pub fn set_values(&mut self, values: &[f64], force: bool) {
        self.params.set_values(values, force);
        self.push_values();
    }

    /// Apply each child's `update_args` to its slice; the first child owning a shared
    /// parameter decides its value.
    pub fn update_args(&self, values: &[f64]) -> Vec<f64> {
        let mut out = values.to_vec();
        let mut written = vec![false; values.len()];
        for (i, child) in self.children.iter().enumerate() {
            let mapped = child.update_args(&self.child_values(i, values));
            for (&g, v) in self.index_map[i].iter().zip(mapped) {
                if !written[g] {
                    out[g] = v;
                    written[g] = true;
                }
            }
        }
        out
    }

    pub fn error(&self) -> Option<String> {
        if self.children.is_empty() {
            return Some("linked model has no models to link".to_string());
        }
        for (i, child) in self.children.iter().enumerate() {
            if let Some(e) = child.error() {
                return Some(format!("linked model {i}: {e}"));
            }
        }
        for name in &self.shared {
            if self.params.index_of(name).is_none() {
                return Some(format!("shared parameter '{name}' is not defined by any linked model"));
            }
        }
        self.params.consistency_error()
    }

    /// Evaluate each child on its dataset and concatenate.
    pub fn evaluate(&self, x: &XList, params: &[f64]) -> Result<Vec<f64>, ModelError> {
        check_param_count(params, self.params.len())?;
        if x.len() != self.children.len() {
            return Err(ModelError::XShape(format!(
                "{} datasets for {} linked models",
                x.len(),
                self.children.len()
            )));
        }
        let mut out = Vec::with_capacity(x.n_samples());
        for (i, child) in self.children.iter().enumerate() {
            out.extend(child.evaluate(&x[i], &self.child_values(i, params))?);
        }
        Ok(out)
    }

    pub fn offsets_mut(&mut self) -> Vec<Option<&mut Offset>> {
        self.children.iter_mut().map(|c| c.as_offset_mut()).collect()
    }
}
