//! Dense linear algebra helpers built on `ndarray-linalg`.

use ndarray::{Array1, Array2, ArrayView2};
use ndarray_linalg::error::LinalgError;
use ndarray_linalg::{Eigh, SVD, UPLO};

/// Tolerance used when counting the rank of a projector.
pub const P_RANK_TOL: f64 = 1e-7;

/// Symmetric eigendecomposition `A = U diag(eigenvalues) U^T`.
#[derive(Debug, Clone)]
pub struct SymmetricEigen {
    pub eigenvalues: Array1<f64>,
    /// Columns are the orthonormal eigenvectors.
    pub eigenvectors: Array2<f64>,
}

/// Symmetric part `(A + A^T) / 2`.
pub fn symmetrize(a: ArrayView2<f64>) -> Array2<f64> {
    let mut out = a.to_owned();
    out += &a.t();
    out.mapv_inplace(|v| 0.5 * v);
    out
}

/// Eigendecomposition of the symmetric part of `a`.
pub fn symmetric_eigen(a: ArrayView2<f64>) -> Result<SymmetricEigen, LinalgError> {
    let (eigenvalues, eigenvectors) = symmetrize(a).eigh(UPLO::Lower)?;
    Ok(SymmetricEigen {
        eigenvalues,
        eigenvectors,
    })
}

/// Number of singular values strictly greater than `tol`.
pub fn matrix_rank(a: ArrayView2<f64>, tol: f64) -> Result<usize, LinalgError> {
    if a.is_empty() {
        return Ok(0);
    }
    let (_, singular_values, _) = a.to_owned().svd(false, false)?;
    Ok(singular_values.iter().filter(|&&s| s > tol).count())
}

/// `P^T H P`; equal to `P H P` for a symmetric projector.
///
/// Mixed projectors `P_M` are not symmetric, so this differs from the plain
/// product `P_M H P_M`; the transposed form keeps the result symmetric.
pub fn sandwich(projector: ArrayView2<f64>, hessian: ArrayView2<f64>) -> Array2<f64> {
    projector.t().dot(&hessian.dot(&projector))
}

/// Indices that order `values` by ascending absolute magnitude.
pub fn order_by_magnitude(values: &Array1<f64>) -> Vec<usize> {
    let mut order: Vec<usize> = (0..values.len()).collect();
    order.sort_by(|&a, &b| {
        values[a]
            .abs()
            .partial_cmp(&values[b].abs())
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    order
}

/// Inverts every eigenvalue except the `n_null` smallest in magnitude, which map to exactly zero.
///
/// No regularization is applied to the inverted eigenvalues: a near-zero eigenvalue
/// that falls outside the nulled group produces a very large entry.
pub fn invert_outside_null_space(eigenvalues: &Array1<f64>, n_null: usize) -> Array1<f64> {
    let mut inverse = Array1::zeros(eigenvalues.len());
    for &i in order_by_magnitude(eigenvalues).iter().skip(n_null) {
        inverse[i] = 1.0 / eigenvalues[i];
    }
    inverse
}

/// `U diag(d) U^T`.
pub fn reconstruct(eigenvectors: ArrayView2<f64>, diagonal: &Array1<f64>) -> Array2<f64> {
    let scaled = &eigenvectors * &diagonal.view().insert_axis(ndarray::Axis(0));
    scaled.dot(&eigenvectors.t())
}

/// Moore-Penrose pseudo-inverse of a symmetric matrix, dropping eigenvalues below `rel_tol * max|eval|`.
pub fn symmetric_pinv(a: ArrayView2<f64>, rel_tol: f64) -> Result<Array2<f64>, LinalgError> {
    let eigen = symmetric_eigen(a)?;
    let largest = eigen
        .eigenvalues
        .iter()
        .fold(0.0_f64, |acc, &v| acc.max(v.abs()));
    let cutoff = rel_tol * largest;
    let inverse = eigen
        .eigenvalues
        .mapv(|v| if v.abs() > cutoff && v != 0.0 { 1.0 / v } else { 0.0 });
    Ok(reconstruct(eigen.eigenvectors.view(), &inverse))
}
