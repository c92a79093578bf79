#![deny(unused_variables)]
#![deny(dead_code)]
#![deny(unused_imports)]
#![deny(clippy::no_effect_underscore_binding)]

//! Hessian-based confidence regions for gate set tomography estimates.
//!
//! A [`ConfidenceRegion`] turns the Hessian of a likelihood (or chi-squared)
//! objective at a gate set estimate into calibrated error bars: per-parameter
//! profile-likelihood half-widths and linearized half-widths for arbitrary
//! functions of a gate, of the whole gate set, or of the SPAM vectors.

pub mod config;
pub mod confidence;
pub mod diagnostics;
pub mod gateset;
pub mod linalg;
pub mod optimize;
pub mod propagate;
pub mod quadform;
pub mod report;
pub mod stats;
pub mod types;
pub mod value;

pub use confidence::{ConfidenceRegion, ConfidenceRegionBuilder, RegionError};
pub use gateset::{Gate, GateSet, GateSetError};
pub use propagate::{DEFAULT_EPS, FnInterval, IntervalError};
pub use types::{GateSelection, ParameterizationFlags, ProjectionMode};
pub use value::FnValue;
