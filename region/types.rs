use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Which gates contribute parameters to the flattened gate set vector.
///
/// Serialized untagged so that a configuration file can say either
/// `gates = true` or `gates = ["Gx", "Gy"]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum GateSelection {
    /// `true` varies every gate, `false` holds every gate fixed.
    Flag(bool),
    /// Only the named gates are varied.
    Named(Vec<String>),
}

impl GateSelection {
    /// Returns true when the gate with `label` is parameterized.
    pub fn includes(&self, label: &str) -> bool {
        match self {
            GateSelection::Flag(enabled) => *enabled,
            GateSelection::Named(labels) => labels.iter().any(|l| l == label),
        }
    }
}

impl Default for GateSelection {
    fn default() -> Self {
        GateSelection::Flag(true)
    }
}

impl From<bool> for GateSelection {
    fn from(enabled: bool) -> Self {
        GateSelection::Flag(enabled)
    }
}

impl From<Vec<String>> for GateSelection {
    fn from(labels: Vec<String>) -> Self {
        GateSelection::Named(labels)
    }
}

/// Selects the active subset of the full gate set parameter vector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParameterizationFlags {
    /// Vary gate parameters (all, none, or only the named gates).
    pub gates: GateSelection,
    /// Vary the first row of each gate matrix.
    pub g0: bool,
    /// Vary state preparation and effect vectors.
    pub spam: bool,
    /// Vary the first element of each state preparation vector.
    pub sp0: bool,
}

impl Default for ParameterizationFlags {
    fn default() -> Self {
        Self {
            gates: GateSelection::Flag(true),
            g0: true,
            spam: true,
            sp0: true,
        }
    }
}

impl ParameterizationFlags {
    pub fn new(gates: impl Into<GateSelection>, g0: bool, spam: bool, sp0: bool) -> Self {
        Self {
            gates: gates.into(),
            g0,
            spam,
            sp0,
        }
    }
}

/// How the supplied Hessian is projected onto the non-gauge subspace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProjectionMode {
    /// The Hessian is used as supplied; the caller asserts it is already projected.
    None,
    /// `H' = P H P` with the standard non-gauge projector.
    #[default]
    #[serde(alias = "std")]
    Standard,
    /// Search over gauge/non-gauge mixings for the projector minimizing gate intervals.
    #[serde(alias = "optimal gate CIs")]
    Optimal,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error(
    "Invalid value of hessian projection: '{0}'. Expected one of 'none', 'std', 'standard', 'optimal', 'optimal gate CIs'."
)]
pub struct InvalidProjectionMode(pub String);

impl FromStr for ProjectionMode {
    type Err = InvalidProjectionMode;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "none" => Ok(ProjectionMode::None),
            "std" | "standard" => Ok(ProjectionMode::Standard),
            "optimal" | "optimal gate CIs" => Ok(ProjectionMode::Optimal),
            other => Err(InvalidProjectionMode(other.to_string())),
        }
    }
}

impl fmt::Display for ProjectionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ProjectionMode::None => "none",
            ProjectionMode::Standard => "standard",
            ProjectionMode::Optimal => "optimal",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn projection_mode_accepts_short_and_long_names() {
        assert_eq!("none".parse::<ProjectionMode>(), Ok(ProjectionMode::None));
        assert_eq!("std".parse::<ProjectionMode>(), Ok(ProjectionMode::Standard));
        assert_eq!(
            "optimal gate CIs".parse::<ProjectionMode>(),
            Ok(ProjectionMode::Optimal)
        );
        assert_eq!(
            "bogus".parse::<ProjectionMode>(),
            Err(InvalidProjectionMode("bogus".to_string()))
        );
    }

    #[test]
    fn gate_selection_by_name() {
        let selection = GateSelection::Named(vec!["Gx".to_string()]);
        assert!(selection.includes("Gx"));
        assert!(!selection.includes("Gy"));
        assert!(GateSelection::Flag(true).includes("anything"));
        assert!(!GateSelection::Flag(false).includes("Gx"));
    }

    #[test]
    fn flags_parse_from_toml_with_named_gates() {
        let flags: ParameterizationFlags =
            toml::from_str("gates = [\"Gx\", \"Gy\"]\ng0 = false\nspam = true\nsp0 = false\n")
                .unwrap();
        assert_eq!(
            flags.gates,
            GateSelection::Named(vec!["Gx".to_string(), "Gy".to_string()])
        );
        assert!(!flags.g0);
        assert!(!flags.sp0);

        let flags: ParameterizationFlags =
            toml::from_str("gates = true\ng0 = true\nspam = false\nsp0 = true\n").unwrap();
        assert_eq!(flags.gates, GateSelection::Flag(true));
        assert!(!flags.spam);
    }
}
