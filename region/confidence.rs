//! # Confidence regions
//!
//! A [`ConfidenceRegion`] is built once from a gate set estimate, the Hessian of
//! the fit objective at that estimate and a confidence level, and is immutable
//! afterwards. Construction:
//!
//! 1. validates the level and the Hessian shape,
//! 2. counts gauge and non-gauge directions from the rank of the standard
//!    non-gauge projector,
//! 3. projects the Hessian according to the [`ProjectionMode`],
//! 4. calibrates and inverts it into a [`ConfidenceQuadraticForm`].
//!
//! Profile-likelihood intervals are read straight off the inverse. Intervals on
//! derived quantities live in [`crate::propagate`].

use crate::diagnostics::{Diagnostic, DiagnosticSink, default_sink};
use crate::gateset::{GateSet, GateSetError};
use crate::linalg::{P_RANK_TOL, matrix_rank, sandwich};
use crate::optimize::{
    BfgsMinimizer, MinimizerSettings, OptimalProjection, ProjectionMinimizer,
    optimal_projected_hessian,
};
use crate::quadform::{ConfidenceQuadraticForm, QuadFormError};
use crate::stats::StatsError;
use crate::types::{InvalidProjectionMode, ParameterizationFlags, ProjectionMode};
use ndarray::{Array1, Array2, s};
use ndarray_linalg::error::LinalgError;
use std::collections::HashMap;
use std::ops::Range;
use std::sync::Arc;
use thiserror::Error;

/// Levels below this are probably fractions passed where a percentage was meant.
const SUSPICIOUS_LEVEL: f64 = 1.0;

#[derive(Error, Debug)]
pub enum RegionError {
    #[error("Confidence level must be a percentage strictly between 0 and 100, got {0}.")]
    InvalidConfidenceLevel(f64),

    #[error(transparent)]
    InvalidProjectionMode(#[from] InvalidProjectionMode),

    #[error(
        "Hessian has shape {found:?}, but the gate set parameterization has {expected} parameters."
    )]
    HessianShape {
        found: (usize, usize),
        expected: usize,
    },

    #[error(
        "The non-gauge projector has rank 0: there are no gauge-invariant directions to build a region over."
    )]
    NoNonGaugeParameters,

    #[error(
        "Calibration constants disagree: chi2 quantile C1 = {c1} but seScaleFactor^2 = {se_squared}."
    )]
    CalibrationMismatch { c1: f64, se_squared: f64 },

    #[error("No gate set object labeled '{0}'.")]
    UnknownLabel(String),

    #[error("Statistics failure: {0}")]
    Statistics(StatsError),

    #[error("Linear algebra failure: {0}")]
    Linalg(#[from] LinalgError),

    #[error("Gate set error: {0}")]
    GateSet(#[from] GateSetError),

    #[error("Projection search returned a point of length {found}, expected {expected}.")]
    MinimizerDimension { found: usize, expected: usize },
}

impl From<StatsError> for RegionError {
    fn from(err: StatsError) -> Self {
        match err {
            StatsError::LevelOutOfRange(level) => RegionError::InvalidConfidenceLevel(level),
            StatsError::CalibrationMismatch { c1, se_squared } => {
                RegionError::CalibrationMismatch { c1, se_squared }
            }
            other => RegionError::Statistics(other),
        }
    }
}

impl From<QuadFormError> for RegionError {
    fn from(err: QuadFormError) -> Self {
        match err {
            QuadFormError::NotSquare(found) => RegionError::HessianShape {
                found,
                expected: found.0,
            },
            QuadFormError::TooManyGaugeParams { .. } => RegionError::NoNonGaugeParameters,
            QuadFormError::Statistics(e) => e.into(),
            QuadFormError::Eigendecomposition(e) => RegionError::Linalg(e),
        }
    }
}

/// Collects the inputs of a [`ConfidenceRegion`].
pub struct ConfidenceRegionBuilder {
    gateset: Arc<GateSet>,
    hessian: Array2<f64>,
    level: f64,
    flags: ParameterizationFlags,
    projection: ProjectionMode,
    minimizer: Box<dyn ProjectionMinimizer>,
    settings: MinimizerSettings,
    sink: Arc<dyn DiagnosticSink>,
}

impl ConfidenceRegionBuilder {
    /// Starts a builder with every parameter active, standard projection, the
    /// BFGS projection search and diagnostics forwarded to `log`.
    pub fn new(gateset: impl Into<Arc<GateSet>>, hessian: Array2<f64>, level: f64) -> Self {
        Self {
            gateset: gateset.into(),
            hessian,
            level,
            flags: ParameterizationFlags::default(),
            projection: ProjectionMode::default(),
            minimizer: Box::new(BfgsMinimizer),
            settings: MinimizerSettings::default(),
            sink: default_sink(),
        }
    }

    pub fn with_flags(mut self, flags: ParameterizationFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn with_projection(mut self, projection: ProjectionMode) -> Self {
        self.projection = projection;
        self
    }

    /// Like [`Self::with_projection`] but parses the mode name, e.g. `"std"` or `"optimal gate CIs"`.
    pub fn with_projection_name(self, name: &str) -> Result<Self, RegionError> {
        let projection = name.parse::<ProjectionMode>()?;
        Ok(self.with_projection(projection))
    }

    /// Replaces the search used by [`ProjectionMode::Optimal`].
    pub fn with_minimizer(mut self, minimizer: Box<dyn ProjectionMinimizer>) -> Self {
        self.minimizer = minimizer;
        self
    }

    pub fn with_minimizer_settings(mut self, settings: MinimizerSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn DiagnosticSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn build(self) -> Result<ConfidenceRegion, RegionError> {
        let level = self.level;
        if !(level > 0.0 && level < 100.0) {
            return Err(RegionError::InvalidConfidenceLevel(level));
        }
        if level < SUSPICIOUS_LEVEL {
            self.sink
                .emit(Diagnostic::SuspiciousConfidenceLevel { level });
        }

        let n_params = self.gateset.num_params(&self.flags);
        if self.hessian.dim() != (n_params, n_params) {
            return Err(RegionError::HessianShape {
                found: self.hessian.dim(),
                expected: n_params,
            });
        }

        let projector = self.gateset.nongauge_projector(&self.flags, None)?;
        let n_nongauge = matrix_rank(projector.view(), P_RANK_TOL)?;
        if n_nongauge == 0 {
            return Err(RegionError::NoNonGaugeParameters);
        }
        let n_gauge = n_params - n_nongauge;
        log::info!(
            "Building {level}% confidence region: {n_params} parameters, {n_nongauge} non-gauge, {n_gauge} gauge, projection '{}'",
            self.projection
        );

        let mut optimal = None;
        let projected = match self.projection {
            ProjectionMode::None => self.hessian,
            ProjectionMode::Standard => sandwich(projector.view(), self.hessian.view()),
            ProjectionMode::Optimal => {
                let (projected, search) = optimal_projected_hessian(
                    &self.gateset,
                    self.hessian.view(),
                    &self.flags,
                    level,
                    self.minimizer.as_ref(),
                    &self.settings,
                    self.sink.as_ref(),
                )?;
                optimal = Some(search);
                projected
            }
        };

        let form = ConfidenceQuadraticForm::from_projected_hessian(projected.view(), n_gauge, level)?;
        let offsets = self.gateset.vector_offsets(&self.flags);

        Ok(ConfidenceRegion {
            gateset: self.gateset,
            flags: self.flags,
            projection: self.projection,
            offsets,
            form,
            optimal,
        })
    }
}

/// A calibrated confidence region around a gate set estimate.
#[derive(Debug, Clone)]
pub struct ConfidenceRegion {
    gateset: Arc<GateSet>,
    flags: ParameterizationFlags,
    projection: ProjectionMode,
    offsets: HashMap<String, Range<usize>>,
    form: ConfidenceQuadraticForm,
    optimal: Option<OptimalProjection>,
}

impl ConfidenceRegion {
    /// Builds a region in one call with the default minimizer and diagnostics.
    ///
    /// # Arguments
    /// * `gateset`: the point estimate.
    /// * `hessian`: `nParams x nParams` Hessian of the objective at the estimate.
    /// * `level`: confidence level as a percentage in (0, 100).
    /// * `flags`: which gate set parameters the Hessian covers.
    /// * `projection`: how the Hessian is restricted to non-gauge directions.
    pub fn new(
        gateset: impl Into<Arc<GateSet>>,
        hessian: Array2<f64>,
        level: f64,
        flags: ParameterizationFlags,
        projection: ProjectionMode,
    ) -> Result<Self, RegionError> {
        ConfidenceRegionBuilder::new(gateset, hessian, level)
            .with_flags(flags)
            .with_projection(projection)
            .build()
    }

    pub fn gateset(&self) -> &GateSet {
        &self.gateset
    }

    pub fn parameterization_flags(&self) -> &ParameterizationFlags {
        &self.flags
    }

    pub fn projection_mode(&self) -> ProjectionMode {
        self.projection
    }

    /// Profile-likelihood half-widths of every parameter, or only of one object's parameters.
    pub fn profile_likelihood_confidence_intervals(
        &self,
        label: Option<&str>,
    ) -> Result<Array1<f64>, RegionError> {
        let intervals = self.form.profile_intervals();
        match label {
            None => Ok(intervals.clone()),
            Some(label) => {
                let range = self
                    .offsets
                    .get(label)
                    .ok_or_else(|| RegionError::UnknownLabel(label.to_string()))?;
                Ok(intervals.slice(s![range.clone()]).to_owned())
            }
        }
    }

    /// Where each labeled object sits in the flattened parameter vector.
    pub fn vector_offsets(&self) -> &HashMap<String, Range<usize>> {
        &self.offsets
    }

    pub fn confidence_level(&self) -> f64 {
        self.form.constants().level
    }

    /// `sqrt(Ck / C1)`; multiplies profile half-widths into joint-region half-widths.
    pub fn interval_scaling(&self) -> f64 {
        self.form.interval_scaling()
    }

    pub fn n_gauge_params(&self) -> usize {
        self.form.n_gauge_params()
    }

    pub fn n_nongauge_params(&self) -> usize {
        self.form.n_nongauge_params()
    }

    pub fn n_params(&self) -> usize {
        self.form.dim()
    }

    pub fn quadratic_form(&self) -> &ConfidenceQuadraticForm {
        &self.form
    }

    /// The mixing chosen by the projection search; only set for [`ProjectionMode::Optimal`].
    pub fn optimal_projection(&self) -> Option<&OptimalProjection> {
        self.optimal.as_ref()
    }
}
