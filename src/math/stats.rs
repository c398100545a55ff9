//! Ensemble statistics over repeated parameter estimates.

use nalgebra::DMatrix;

/// Elementwise mean of equally long rows.
///
/// Returns an empty vector for an empty ensemble.
pub fn column_means(rows: &[Vec<f64>]) -> Vec<f64> {
    let Some(first) = rows.first() else {
        return Vec::new();
    };
    let n = rows.len() as f64;
    let mut mean = vec![0.0; first.len()];
    for row in rows {
        for (m, v) in mean.iter_mut().zip(row) {
            *m += v;
        }
    }
    mean.iter_mut().for_each(|m| *m /= n);
    mean
}

/// Sample covariance (`N - 1` normalization) of the selected columns.
///
/// Fewer than two rows carry no spread information; the result is then a zero matrix.
pub fn sample_covariance(rows: &[Vec<f64>], columns: &[usize]) -> DMatrix<f64> {
    let k = columns.len();
    let mut cov = DMatrix::<f64>::zeros(k, k);
    if rows.len() < 2 {
        return cov;
    }

    let means: Vec<f64> = {
        let all = column_means(rows);
        columns.iter().map(|&c| all[c]).collect()
    };
    for row in rows {
        for a in 0..k {
            let da = row[columns[a]] - means[a];
            for b in a..k {
                cov[(a, b)] += da * (row[columns[b]] - means[b]);
            }
        }
    }

    let denom = (rows.len() - 1) as f64;
    for a in 0..k {
        for b in a..k {
            let v = cov[(a, b)] / denom;
            cov[(a, b)] = v;
            cov[(b, a)] = v;
        }
    }
    cov
}
