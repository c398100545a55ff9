//! Terminal report of a fit.
//!
//! Layout:
//!
//! ```text
//! Optimized parameters:
//! 0:   slope = 69.0001 +/- 0.0031
//! 1:   intercept = 0.4199 +/- 0.0102
//!
//! Cov. Matrix:
//!   1.00 -0.87
//!  -0.87  1.00
//!
//! Red. chi2 = 0.93
//! Fit successful.
//! ```
//!
//! The covariance is printed normalized to correlations. Indices are zero-padded to the
//! digit count of the parameter total.

use crossterm::style::Stylize;
use nalgebra::DMatrix;

use crate::domain::FitStatus;
use crate::error::RoutineError;

fn digits(n: usize) -> usize {
    n.max(1).to_string().len()
}

/// Correlation of entry `(i, j)`, or `None` when a variance is zero.
fn correlation(pcov: &DMatrix<f64>, i: usize, j: usize) -> Option<f64> {
    let norm = (pcov[(i, i)] * pcov[(j, j)]).sqrt();
    if norm == 0.0 {
        None
    } else {
        Some(pcov[(i, j)] / norm)
    }
}

fn fmt_entry(v: Option<f64>) -> String {
    match v {
        None => "0.00".to_string(),
        Some(v) if v.is_infinite() || v.is_nan() => "inf".to_string(),
        Some(v) => format!("{v:.2}"),
    }
}

/// Correlation matrix block, one row per line.
pub fn format_correlation(pcov: &DMatrix<f64>) -> String {
    let mut out = String::new();
    for i in 0..pcov.nrows() {
        let row: Vec<String> = (0..pcov.ncols())
            .map(|j| format!("{:>6}", fmt_entry(correlation(pcov, i, j))))
            .collect();
        out.push_str(&row.join(""));
        out.push('\n');
    }
    out
}

/// Status line without styling.
pub fn status_line(status: FitStatus, error: Option<&RoutineError>) -> String {
    match status {
        FitStatus::Error => match error {
            Some(e) => format!("Error while fitting: {e}"),
            None => "Error while fitting.".to_string(),
        },
        FitStatus::Warning => "Failed to estimate uncertainties.".to_string(),
        FitStatus::Success => "Fit successful.".to_string(),
    }
}

/// Full report. With `styled` the status line carries terminal colors.
pub fn format_report(
    names: &[String],
    popt: &[f64],
    pcov: &DMatrix<f64>,
    chi2: f64,
    status: FitStatus,
    error: Option<&RoutineError>,
    styled: bool,
) -> String {
    let width = digits(names.len());
    let mut out = String::from("Optimized parameters:\n");
    for (j, (name, val)) in names.iter().zip(popt).enumerate() {
        let unc = pcov.get((j, j)).map_or(f64::NAN, |v| v.sqrt());
        out.push_str(&format!("{j:0width$}:   {name} = {val} +/- {unc}\n"));
    }

    out.push_str("\nCov. Matrix:\n");
    out.push_str(&format_correlation(pcov));
    out.push_str(&format!("\nRed. chi2 = {chi2:.2}\n"));

    let line = status_line(status, error);
    if styled {
        let styled = match status {
            FitStatus::Error => line.red(),
            FitStatus::Warning => line.yellow(),
            FitStatus::Success => line.green(),
        };
        out.push_str(&format!("{styled}\n"));
    } else {
        out.push_str(&line);
        out.push('\n');
    }
    out
}
