//! A serializable summary of a confidence region.
//!
//! The report lists the profile-likelihood half-widths of every gate set object
//! and, for every gate, the linearized interval on its trace. Traces are
//! invariant under gauge transformations, so their intervals are meaningful no
//! matter how the gauge was fixed.

use crate::confidence::{ConfidenceRegion, RegionError};
use crate::propagate::IntervalError;
use crate::types::ProjectionMode;
use crate::value::FnValue;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{BufWriter, Write};
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ReportError {
    #[error("Failed to read or write report file: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Failed to parse TOML report: {0}")]
    TomlParseError(#[from] toml::de::Error),
    #[error("Failed to serialize report to TOML format: {0}")]
    TomlSerializeError(#[from] toml::ser::Error),
    #[error("Failed to read intervals from the region: {0}")]
    Region(#[from] RegionError),
    #[error("Failed to propagate a gate interval: {0}")]
    Interval(#[from] IntervalError),
}

/// Profile-likelihood half-widths of one gate set object's parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectIntervals {
    pub label: String,
    pub half_widths: Vec<f64>,
}

/// A scalar quantity with its linearized half-width.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScalarInterval {
    pub label: String,
    pub value: f64,
    pub half_width: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegionReport {
    pub confidence_level: f64,
    pub projection: ProjectionMode,
    pub n_gauge_params: usize,
    pub n_nongauge_params: usize,
    pub interval_scaling: f64,
    /// `sqrt(sum(gateCIs^2))` over every gate's profile half-widths.
    pub gate_interval_norm: f64,
    pub objects: Vec<ObjectIntervals>,
    pub gate_traces: Vec<ScalarInterval>,
}

impl RegionReport {
    /// Summarizes `region`, propagating gate traces with forward-difference step `eps`.
    pub fn from_region(region: &ConfidenceRegion, eps: f64) -> Result<Self, ReportError> {
        let gateset = region.gateset();
        let mut objects = Vec::new();
        for label in gateset.object_labels() {
            let half_widths = region
                .profile_likelihood_confidence_intervals(Some(&label))?
                .to_vec();
            objects.push(ObjectIntervals { label, half_widths });
        }

        let gate_labels = gateset.gate_labels();
        let gate_interval_norm = objects
            .iter()
            .filter(|o| gate_labels.contains(&o.label))
            .flat_map(|o| o.half_widths.iter())
            .map(|v| v * v)
            .sum::<f64>()
            .sqrt();

        let mut gate_traces = Vec::with_capacity(gate_labels.len());
        for label in gate_labels {
            let interval = region.gate_fn_confidence_interval(
                |g| FnValue::Scalar(g.diag().sum()),
                &label,
                eps,
            )?;
            let (half_width, value) = interval.into_parts();
            gate_traces.push(ScalarInterval {
                label,
                value: value.as_scalar().unwrap_or(f64::NAN),
                half_width: half_width.as_scalar().unwrap_or(f64::NAN),
            });
        }

        Ok(Self {
            confidence_level: region.confidence_level(),
            projection: region.projection_mode(),
            n_gauge_params: region.n_gauge_params(),
            n_nongauge_params: region.n_nongauge_params(),
            interval_scaling: region.interval_scaling(),
            gate_interval_norm,
            objects,
            gate_traces,
        })
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ReportError> {
        let toml_string = toml::to_string_pretty(self)?;
        let mut file = BufWriter::new(fs::File::create(path)?);
        file.write_all(toml_string.as_bytes())?;
        Ok(())
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ReportError> {
        let toml_string = fs::read_to_string(path)?;
        let report = toml::from_str(&toml_string)?;
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateset::GateSet;
    use crate::propagate::DEFAULT_EPS;
    use crate::types::ParameterizationFlags;
    use ndarray::{Array1, Array2};

    fn region() -> ConfidenceRegion {
        let hessian = Array2::from_diag(&Array1::from_shape_fn(56, |i| 30.0 + i as f64));
        ConfidenceRegion::new(
            GateSet::std1q_xyi(),
            hessian,
            95.0,
            ParameterizationFlags::default(),
            ProjectionMode::Standard,
        )
        .unwrap()
    }

    #[test]
    fn lists_every_object_in_vector_order() {
        let report = RegionReport::from_region(&region(), DEFAULT_EPS).unwrap();
        let labels: Vec<&str> = report.objects.iter().map(|o| o.label.as_str()).collect();
        assert_eq!(labels, vec!["rho0", "E0", "Gi", "Gx", "Gy"]);
        assert_eq!(report.objects[2].half_widths.len(), 16);
        assert_eq!(report.n_gauge_params + report.n_nongauge_params, 56);
        assert_eq!(report.gate_traces.len(), 3);
        assert!((report.gate_traces[0].value - 4.0).abs() < 1e-12);
        assert!(report.gate_traces.iter().all(|t| t.half_width > 0.0));
    }

    #[test]
    fn survives_a_file_round_trip() {
        let report = RegionReport::from_region(&region(), DEFAULT_EPS).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.toml");
        report.save(&path).unwrap();
        let loaded = RegionReport::load(&path).unwrap();
        assert_eq!(loaded.objects, report.objects);
        assert_eq!(loaded.projection, ProjectionMode::Standard);
        assert_eq!(loaded.gate_traces.len(), report.gate_traces.len());
    }
}
