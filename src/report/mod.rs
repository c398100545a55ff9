//! Fit reports for the terminal.
//!
//! Formatting lives here so the orchestration only decides *whether* to print.

pub mod format;

pub use format::{format_correlation, format_report, status_line};
