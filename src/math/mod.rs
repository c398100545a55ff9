//! Mathematical utilities: least-squares covariance estimates and ensemble
//! statistics.

pub mod ols;
pub mod stats;

pub use ols::*;
pub use stats::*;
