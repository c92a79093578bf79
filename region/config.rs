//! TOML-backed options for building regions and propagating intervals.
//!
//! Every field has a default, so a configuration file only needs the keys it
//! changes:
//!
//! ```toml
//! confidence_level = 68.0
//! projection = "optimal"
//!
//! [flags]
//! gates = ["Gx", "Gy"]
//! sp0 = false
//!
//! [optimizer]
//! max_evaluations = 2000
//! ```

use crate::confidence::ConfidenceRegionBuilder;
use crate::gateset::{GateSet, GateSetError};
use crate::optimize::MinimizerSettings;
use crate::propagate::DEFAULT_EPS;
use crate::types::{InvalidProjectionMode, ParameterizationFlags, ProjectionMode};
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read or write configuration file: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Failed to parse TOML configuration: {0}")]
    TomlParseError(#[from] toml::de::Error),
    #[error("Failed to serialize configuration to TOML format: {0}")]
    TomlSerializeError(#[from] toml::ser::Error),
    #[error(transparent)]
    InvalidProjectionMode(#[from] InvalidProjectionMode),
    #[error("Input file holds an inconsistent gate set: {0}")]
    InvalidGateSet(#[from] GateSetError),
}

/// A gate set estimate and the Hessian of the fit objective at it, as read from disk.
///
/// The Hessian uses the `ndarray` serde layout, e.g.
/// `hessian = { v = 1, dim = [2, 2], data = [1.0, 0.0, 0.0, 1.0] }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegionInput {
    pub gateset: GateSet,
    pub hessian: Array2<f64>,
}

impl RegionInput {
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let toml_string = toml::to_string_pretty(self)?;
        let mut file = BufWriter::new(fs::File::create(path)?);
        file.write_all(toml_string.as_bytes())?;
        Ok(())
    }

    /// Reads and validates an input file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let toml_string = fs::read_to_string(path)?;
        let input: RegionInput = toml::from_str(&toml_string)?;
        input.gateset.validate()?;
        Ok(input)
    }
}

/// Options for linearized interval propagation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PropagationSettings {
    /// Forward-difference step.
    pub eps: f64,
}

impl Default for PropagationSettings {
    fn default() -> Self {
        Self { eps: DEFAULT_EPS }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegionConfig {
    /// Percentage in (0, 100).
    pub confidence_level: f64,
    pub projection: ProjectionMode,
    pub flags: ParameterizationFlags,
    pub optimizer: MinimizerSettings,
    pub propagation: PropagationSettings,
}

impl Default for RegionConfig {
    fn default() -> Self {
        Self {
            confidence_level: 95.0,
            projection: ProjectionMode::Standard,
            flags: ParameterizationFlags::default(),
            optimizer: MinimizerSettings::default(),
            propagation: PropagationSettings::default(),
        }
    }
}

impl RegionConfig {
    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let toml_string = self.to_toml_string()?;
        let mut file = BufWriter::new(fs::File::create(path)?);
        file.write_all(toml_string.as_bytes())?;
        Ok(())
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let toml_string = fs::read_to_string(path)?;
        let config = toml::from_str(&toml_string)?;
        Ok(config)
    }

    /// Applies command-line overrides on top of file values.
    pub fn apply_overrides(
        &mut self,
        confidence_level: Option<f64>,
        projection: Option<&str>,
    ) -> Result<(), ConfigError> {
        if let Some(level) = confidence_level {
            self.confidence_level = level;
        }
        if let Some(name) = projection {
            self.projection = name.parse()?;
        }
        Ok(())
    }

    /// A region builder carrying this configuration.
    pub fn builder(
        &self,
        gateset: impl Into<Arc<GateSet>>,
        hessian: Array2<f64>,
    ) -> ConfidenceRegionBuilder {
        ConfidenceRegionBuilder::new(gateset, hessian, self.confidence_level)
            .with_flags(self.flags.clone())
            .with_projection(self.projection)
            .with_minimizer_settings(self.optimizer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::GateSelection;

    #[test]
    fn partial_file_keeps_defaults() {
        let config: RegionConfig = toml::from_str(
            "confidence_level = 68.0\nprojection = \"std\"\n\n[flags]\ngates = [\"Gx\"]\n",
        )
        .unwrap();
        assert_eq!(config.confidence_level, 68.0);
        assert_eq!(config.projection, ProjectionMode::Standard);
        assert_eq!(config.flags.gates, GateSelection::Named(vec!["Gx".to_string()]));
        assert!(config.flags.spam);
        assert_eq!(config.optimizer, MinimizerSettings::default());
        assert_eq!(config.propagation.eps, DEFAULT_EPS);
    }

    #[test]
    fn round_trips_through_a_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("region.toml");
        let mut config = RegionConfig::default();
        config.projection = ProjectionMode::Optimal;
        config.flags.sp0 = false;
        config.optimizer.max_evaluations = 250;
        config.save(&path).unwrap();
        assert_eq!(RegionConfig::load(&path).unwrap(), config);
    }

    #[test]
    fn region_input_round_trips_and_validates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("input.toml");
        let input = RegionInput {
            gateset: GateSet::std1q_xyi(),
            hessian: Array2::eye(56),
        };
        input.save(&path).unwrap();
        assert_eq!(RegionInput::load(&path).unwrap(), input);

        let broken = "hessian = { v = 1, dim = [1, 1], data = [1.0] }\n\n\
                      [gateset]\ndim = 2\nrho_vecs = [{ v = 1, dim = [3], data = [1.0, 0.0, 0.0] }]\n";
        fs::write(&path, broken).unwrap();
        assert!(matches!(
            RegionInput::load(&path),
            Err(ConfigError::InvalidGateSet(GateSetError::ShapeMismatch { .. }))
        ));
    }

    #[test]
    fn overrides_replace_file_values() {
        let mut config = RegionConfig::default();
        config.apply_overrides(Some(90.0), Some("none")).unwrap();
        assert_eq!(config.confidence_level, 90.0);
        assert_eq!(config.projection, ProjectionMode::None);
        assert!(matches!(
            config.apply_overrides(None, Some("bogus")),
            Err(ConfigError::InvalidProjectionMode(_))
        ));
    }
}
