//! The calibrated quadratic form `Q` of a confidence region and its gauge-nulled inverse.
//!
//! `x^T Q x = 1` traces the boundary of a region appropriate for one-dimensional
//! (profile-likelihood) intervals. Because `Q` is symmetric its eigenvalues and
//! singular values coincide, so inversion is done in the eigenbasis: the
//! `nGaugeParams` eigenvalues closest to zero are treated as the gauge subspace and
//! get an inverse of exactly zero, every other eigenvalue is inverted directly.

use crate::linalg::{self, SymmetricEigen, invert_outside_null_space, reconstruct};
use crate::stats::{ConfidenceConstants, StatsError};
use ndarray::{Array1, Array2, ArrayView1, ArrayView2};
use ndarray_linalg::error::LinalgError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum QuadFormError {
    #[error("Projected Hessian must be square, got shape {0:?}.")]
    NotSquare((usize, usize)),

    #[error("Cannot null {n_gauge} gauge directions in a {dim}-dimensional quadratic form.")]
    TooManyGaugeParams { n_gauge: usize, dim: usize },

    #[error("Calibration failed: {0}")]
    Statistics(#[from] StatsError),

    #[error("Eigendecomposition of the quadratic form failed: {0}")]
    Eigendecomposition(#[from] LinalgError),
}

/// `Q`, its eigenbasis, its gauge-nulled inverse and the profile half-widths.
#[derive(Debug, Clone)]
pub struct ConfidenceQuadraticForm {
    constants: ConfidenceConstants,
    n_gauge_params: usize,
    q: Array2<f64>,
    eigenvalues: Array1<f64>,
    eigenvectors: Array2<f64>,
    inverse_eigenvalues: Array1<f64>,
    inv_q: Array2<f64>,
    profile_intervals: Array1<f64>,
}

impl ConfidenceQuadraticForm {
    /// Calibrates an already-projected Hessian at `level` percent confidence.
    ///
    /// # Arguments
    /// * `projected_hessian`: symmetric `nParams x nParams` Hessian restricted to the non-gauge space.
    /// * `n_gauge_params`: how many smallest-magnitude eigenvalues to treat as gauge.
    /// * `level`: confidence level as a percentage in (0, 100).
    pub fn from_projected_hessian(
        projected_hessian: ArrayView2<f64>,
        n_gauge_params: usize,
        level: f64,
    ) -> Result<Self, QuadFormError> {
        let dim = projected_hessian.nrows();
        if projected_hessian.ncols() != dim {
            return Err(QuadFormError::NotSquare(projected_hessian.dim()));
        }
        if n_gauge_params > dim {
            return Err(QuadFormError::TooManyGaugeParams {
                n_gauge: n_gauge_params,
                dim,
            });
        }

        let constants = ConfidenceConstants::new(level, dim - n_gauge_params)?;
        let q = projected_hessian.mapv(|h| h / constants.c1);

        let SymmetricEigen {
            eigenvalues,
            eigenvectors,
        } = linalg::symmetric_eigen(q.view())?;
        let inverse_eigenvalues = invert_outside_null_space(&eigenvalues, n_gauge_params);
        let inv_q = reconstruct(eigenvectors.view(), &inverse_eigenvalues);

        // The absolute value absorbs tiny negative diagonal entries from round-off.
        let profile_intervals = inv_q.diag().mapv(|v| v.abs().sqrt());

        Ok(Self {
            constants,
            n_gauge_params,
            q,
            eigenvalues,
            eigenvectors,
            inverse_eigenvalues,
            inv_q,
            profile_intervals,
        })
    }

    pub fn constants(&self) -> &ConfidenceConstants {
        &self.constants
    }

    pub fn dim(&self) -> usize {
        self.q.nrows()
    }

    pub fn n_gauge_params(&self) -> usize {
        self.n_gauge_params
    }

    pub fn n_nongauge_params(&self) -> usize {
        self.dim() - self.n_gauge_params
    }

    /// The calibrated form `Q = H' / C1`.
    pub fn q(&self) -> &Array2<f64> {
        &self.q
    }

    /// Gauge-nulled inverse of `Q`.
    pub fn inv_q(&self) -> &Array2<f64> {
        &self.inv_q
    }

    pub fn eigenvalues(&self) -> &Array1<f64> {
        &self.eigenvalues
    }

    /// `U`, with `Q = U diag(eigenvalues) U^T`.
    pub fn eigenvectors(&self) -> &Array2<f64> {
        &self.eigenvectors
    }

    /// `U^T`, which is also `U^-1`.
    pub fn eigenvectors_adjoint(&self) -> Array2<f64> {
        self.eigenvectors.t().to_owned()
    }

    pub fn inverse_eigenvalues(&self) -> &Array1<f64> {
        &self.inverse_eigenvalues
    }

    /// `sqrt(|invQ[k,k]|)` for every parameter `k`.
    pub fn profile_intervals(&self) -> &Array1<f64> {
        &self.profile_intervals
    }

    pub fn interval_scaling(&self) -> f64 {
        self.constants.interval_scaling
    }

    /// `sqrt(|g^T invQ g|)`, the linearized half-width along gradient `g`.
    pub fn half_width(&self, gradient: ArrayView1<f64>) -> f64 {
        gradient.dot(&self.inv_q.dot(&gradient)).abs().sqrt()
    }
}
