//! Chi-squared calibration of a Hessian into a confidence quadratic form.
//!
//! If the Hessian is the Fisher information, the estimator is asymptotically
//! normal and a single-parameter interval is `+/- seScaleFactor / sqrt(h)`, where
//! integrating the standard normal density over `[-seScaleFactor, seScaleFactor]`
//! gives the confidence level. Squaring that factor gives the one-degree-of-freedom
//! chi-squared quantile `C1`, which is what the quadratic form is divided by.

use statrs::distribution::{ChiSquared, Continuous, ContinuousCDF, Normal};
use thiserror::Error;

/// Relative tolerance of the `C1 == seScaleFactor^2` consistency check (numpy `isclose`).
const ISCLOSE_RTOL: f64 = 1e-5;
/// Absolute tolerance of the same check.
const ISCLOSE_ATOL: f64 = 1e-8;
/// Newton steps applied on top of the library's chi-squared inverse CDF.
const QUANTILE_NEWTON_STEPS: usize = 4;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum StatsError {
    #[error("Confidence level must be a percentage strictly between 0 and 100, got {0}.")]
    LevelOutOfRange(f64),

    #[error("Chi-squared distribution needs at least one degree of freedom, got {0}.")]
    NoDegreesOfFreedom(usize),

    #[error("Failed to construct {distribution} distribution: {message}")]
    Distribution {
        distribution: &'static str,
        message: String,
    },

    #[error(
        "Single-DOF chi-squared quantile {c1} disagrees with the squared normal scale factor {se_squared}."
    )]
    CalibrationMismatch { c1: f64, se_squared: f64 },
}

/// Constants that turn a projected Hessian into a confidence quadratic form.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConfidenceConstants {
    /// Confidence level as a percentage in (0, 100).
    pub level: f64,
    /// Chi-squared quantile with 1 degree of freedom (profile likelihood contour).
    pub c1: f64,
    /// Chi-squared quantile with `nNonGaugeParams` degrees of freedom (joint region contour).
    pub ck: f64,
    /// Standard error multiplier of the two-sided normal interval at this level.
    pub se_scale_factor: f64,
    /// `sqrt(ck / c1)`: converts profile half-widths to joint-region half-widths.
    pub interval_scaling: f64,
}

/// Inverse CDF of the chi-squared distribution with `dof` degrees of freedom.
pub fn chi2_quantile(p: f64, dof: usize) -> Result<f64, StatsError> {
    if dof == 0 {
        return Err(StatsError::NoDegreesOfFreedom(dof));
    }
    let dist = ChiSquared::new(dof as f64).map_err(|e| StatsError::Distribution {
        distribution: "chi-squared",
        message: e.to_string(),
    })?;
    Ok(refine_quantile(&dist, p, dist.inverse_cdf(p)))
}

/// Newton iterations on `cdf(x) = p`, keeping `x` on the positive half-line.
fn refine_quantile(dist: &ChiSquared, p: f64, start: f64) -> f64 {
    let mut x = start;
    for _ in 0..QUANTILE_NEWTON_STEPS {
        let density = dist.pdf(x);
        if !x.is_finite() || !density.is_finite() || density <= 0.0 {
            break;
        }
        let step = (dist.cdf(x) - p) / density;
        x = if x - step > 0.0 { x - step } else { 0.5 * x };
    }
    x
}

/// Inverse CDF of the standard normal distribution.
pub fn normal_quantile(p: f64) -> Result<f64, StatsError> {
    let dist = Normal::new(0.0, 1.0).map_err(|e| StatsError::Distribution {
        distribution: "normal",
        message: e.to_string(),
    })?;
    Ok(dist.inverse_cdf(p))
}

fn is_close(a: f64, b: f64) -> bool {
    (a - b).abs() <= ISCLOSE_ATOL + ISCLOSE_RTOL * b.abs()
}

impl ConfidenceConstants {
    /// Computes the calibration constants for a `level` percent region over
    /// `n_nongauge_params` free directions.
    pub fn new(level: f64, n_nongauge_params: usize) -> Result<Self, StatsError> {
        if !(level > 0.0 && level < 100.0) {
            return Err(StatsError::LevelOutOfRange(level));
        }
        let p = level / 100.0;

        let c1 = chi2_quantile(p, 1)?;
        let ck = chi2_quantile(p, n_nongauge_params)?;

        // The normal quantile is taken where the CDF equals the probability left over on one side.
        let se_scale_factor = -normal_quantile((1.0 - p) / 2.0)?;
        let se_squared = se_scale_factor * se_scale_factor;
        if !is_close(c1, se_squared) {
            return Err(StatsError::CalibrationMismatch { c1, se_squared });
        }

        let interval_scaling = (ck / c1).sqrt();
        log::debug!("C1 = {c1}, Ck = {ck}, scaling = {interval_scaling}");

        Ok(Self {
            level,
            c1,
            ck,
            se_scale_factor,
            interval_scaling,
        })
    }
}
