//! Domain types used throughout the fit pipeline.
//!
//! This module defines:
//!
//! - caller-facing input (`Series`, `FitRequest`, `FitOptions`)
//! - normalized data handed to routines (`XData`, `XList`)
//! - routine selection (`RoutineKind`, `RoutineChoice`, `RoutineOptions`)
//! - fit outputs (`FitOutcome`, `FitInfo`, `FitStatus`)

pub mod types;

pub use types::*;
