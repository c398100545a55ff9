//! Covariance of a linear least squares problem.
//!
//! Computed through SVD. (Nalgebra's `QR::solve` is intended for square systems
//! and will panic for non-square matrices.) Parameter counts are tiny, so SVD cost does
//! not matter.

use nalgebra::DMatrix;

/// Relative singular value cutoff below which a Jacobian counts as rank deficient.
const RANK_RTOL: f64 = 1e-12;

/// Covariance estimate `(JᵀJ)^-1` of a weighted Jacobian.
///
/// Returns `None` when `J` is rank deficient, i.e. some parameter combination is not
/// identified by the data.
pub fn gram_inverse(jac: &DMatrix<f64>) -> Option<DMatrix<f64>> {
    let p = jac.ncols();
    if p == 0 {
        return Some(DMatrix::zeros(0, 0));
    }
    if jac.nrows() < p {
        return None;
    }

    let svd = jac.clone().svd(false, true);
    let v_t = svd.v_t.as_ref()?;
    let s_max = svd.singular_values.max();
    if !(s_max.is_finite() && s_max > 0.0) {
        return None;
    }
    let cutoff = s_max * RANK_RTOL * (jac.nrows().max(p) as f64);
    if svd.singular_values.iter().any(|&s| s <= cutoff) {
        return None;
    }

    // (JᵀJ)^-1 = V Σ^-2 Vᵀ
    let mut scaled = v_t.transpose();
    for (j, &s) in svd.singular_values.iter().enumerate() {
        let inv = 1.0 / (s * s);
        scaled.column_mut(j).scale_mut(inv);
    }
    Some(scaled * v_t)
}
