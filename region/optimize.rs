//! # Optimal non-gauge projection
//!
//! The standard projector splits the parameter space into gauge and non-gauge
//! directions orthogonally, but any complement of the gauge subspace is an
//! equally valid set of "physical" directions. This module searches over
//! complements parameterized by a mixing matrix `M` (`nNonGauge x nGauge`, see
//! [`NonGaugeBasis::mixed_projector`]) for the one whose projected Hessian gives
//! the smallest aggregate gate confidence intervals.
//!
//! The minimizer itself sits behind [`ProjectionMinimizer`] so callers can swap in
//! their own search. The default is [`BfgsMinimizer`], a quasi-Newton search with
//! a forward-difference gradient.

use crate::confidence::RegionError;
use crate::diagnostics::{Diagnostic, DiagnosticSink};
use crate::gateset::{GateSet, NonGaugeBasis};
use crate::linalg::sandwich;
use crate::quadform::ConfidenceQuadraticForm;
use crate::types::ParameterizationFlags;
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, s};
use serde::{Deserialize, Serialize};
use std::cell::{Cell, RefCell};
use std::ops::Range;
use wolfe_bfgs::{Bfgs, BfgsSolution};

/// Objective value reported for mixings whose region cannot be evaluated.
const FAILED_EVALUATION_PENALTY: f64 = 1e10;

/// Limits and step sizes of the projection search.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MinimizerSettings {
    pub max_iterations: usize,
    /// Hard cap on objective evaluations, gradient probes included.
    pub max_evaluations: usize,
    pub tolerance: f64,
    /// Forward-difference step of the numerical gradient.
    pub gradient_step: f64,
}

impl Default for MinimizerSettings {
    fn default() -> Self {
        Self {
            max_iterations: 10000,
            max_evaluations: 10000,
            tolerance: 1e-6,
            gradient_step: 1e-8,
        }
    }
}

/// Result of a minimization run.
#[derive(Debug, Clone, PartialEq)]
pub struct MinimizerOutcome {
    /// Best point seen during the search.
    pub x: Array1<f64>,
    /// Objective value at `x`.
    pub objective: f64,
    pub evaluations: usize,
    /// False when the search stopped on a cap or a line-search failure.
    pub converged: bool,
}

/// A derivative-free view of a minimizer: only objective values are supplied.
pub trait ProjectionMinimizer {
    /// Minimizes `objective` starting at `x0`.
    ///
    /// Implementations must respect `settings.max_evaluations` and must never
    /// return a point worse than the best one they evaluated.
    fn minimize(
        &self,
        objective: &dyn Fn(ArrayView1<f64>) -> f64,
        x0: Array1<f64>,
        settings: &MinimizerSettings,
        sink: &dyn DiagnosticSink,
    ) -> MinimizerOutcome;
}

/// BFGS with Wolfe line search and a forward-difference gradient.
#[derive(Debug, Default, Clone, Copy)]
pub struct BfgsMinimizer;

impl ProjectionMinimizer for BfgsMinimizer {
    fn minimize(
        &self,
        objective: &dyn Fn(ArrayView1<f64>) -> f64,
        x0: Array1<f64>,
        settings: &MinimizerSettings,
        sink: &dyn DiagnosticSink,
    ) -> MinimizerOutcome {
        let evaluations = Cell::new(0usize);
        let best = RefCell::new((x0.clone(), f64::INFINITY));

        // Returns None once the evaluation budget is spent.
        let evaluate = |x: &Array1<f64>| -> Option<f64> {
            if evaluations.get() >= settings.max_evaluations {
                return None;
            }
            let evaluation = evaluations.get() + 1;
            evaluations.set(evaluation);
            let value = objective(x.view());
            sink.emit(Diagnostic::OptimizerProgress {
                evaluation,
                objective: value,
            });
            let mut best = best.borrow_mut();
            if value < best.1 {
                *best = (x.clone(), value);
            }
            Some(value)
        };

        // A zero gradient makes the line search stop as soon as the budget runs out.
        let cost_and_grad = |x: &Array1<f64>| -> (f64, Array1<f64>) {
            let Some(f0) = evaluate(x) else {
                return (best.borrow().1, Array1::zeros(x.len()));
            };
            let mut grad = Array1::zeros(x.len());
            let mut probe = x.clone();
            for i in 0..x.len() {
                probe[i] += settings.gradient_step;
                match evaluate(&probe) {
                    Some(fi) => grad[i] = (fi - f0) / settings.gradient_step,
                    None => return (f0, Array1::zeros(x.len())),
                }
                probe[i] = x[i];
            }
            (f0, grad)
        };

        let result = Bfgs::new(x0, cost_and_grad)
            .with_tolerance(settings.tolerance)
            .with_max_iterations(settings.max_iterations)
            .run();

        let within_budget = evaluations.get() < settings.max_evaluations;
        let converged = match result {
            Ok(BfgsSolution {
                final_value,
                iterations,
                ..
            }) => {
                log::info!(
                    "BFGS projection search finished in {iterations} iterations with value {final_value:.6e}"
                );
                within_budget
            }
            Err(e) => {
                log::info!("BFGS projection search stopped early ({e:?}); keeping the best point seen.");
                false
            }
        };

        let (x, objective) = best.borrow().clone();
        MinimizerOutcome {
            x,
            objective,
            evaluations: evaluations.get(),
            converged,
        }
    }
}

/// The mixing matrix chosen by the projection search and how the search went.
#[derive(Debug, Clone, PartialEq)]
pub struct OptimalProjection {
    /// `nNonGauge x nGauge` mixing matrix of the chosen projector.
    pub mixing: Array2<f64>,
    /// Euclidean norm of all gate profile intervals under the chosen projector.
    pub objective: f64,
    pub evaluations: usize,
    pub converged: bool,
}

/// Norm of the concatenated gate profile intervals for one mixing matrix.
///
/// This is the quadratic form a region built with no further projection would
/// hold for the sandwiched Hessian.
fn gate_interval_norm(
    basis: &NonGaugeBasis,
    hessian: ArrayView2<f64>,
    mixing: ArrayView1<f64>,
    level: f64,
    gate_ranges: &[Range<usize>],
) -> Result<f64, RegionError> {
    let mix = mixing_matrix(basis, mixing)?;
    let projector = basis.mixed_projector(mix.view())?;
    let projected = sandwich(projector.view(), hessian);
    let form =
        ConfidenceQuadraticForm::from_projected_hessian(projected.view(), basis.n_gauge(), level)?;
    let intervals = form.profile_intervals();
    let sum_of_squares: f64 = gate_ranges
        .iter()
        .flat_map(|range| intervals.slice(s![range.clone()]).to_vec())
        .map(|v| v * v)
        .sum();
    Ok(sum_of_squares.sqrt())
}

fn mixing_matrix(basis: &NonGaugeBasis, x: ArrayView1<f64>) -> Result<Array2<f64>, RegionError> {
    let shape = (basis.n_nongauge(), basis.n_gauge());
    Array2::from_shape_vec(shape, x.to_vec()).map_err(|_| RegionError::MinimizerDimension {
        found: x.len(),
        expected: shape.0 * shape.1,
    })
}

/// Searches for the mixing matrix minimizing the gate intervals and returns the
/// Hessian projected with it.
///
/// # Arguments
/// * `gateset`: the estimate whose gauge structure defines the search space.
/// * `hessian`: the raw, unprojected Hessian.
/// * `flags`: active parameters; decides which offsets count as gate intervals.
/// * `level`: confidence level percentage used to calibrate each candidate.
/// * `minimizer`, `settings`: the search strategy and its limits.
/// * `sink`: receives progress and the final summary.
///
/// # Returns
/// `P_M^T H P_M` for the best mixing `M` found, together with that `M`.
pub fn optimal_projected_hessian(
    gateset: &GateSet,
    hessian: ArrayView2<f64>,
    flags: &ParameterizationFlags,
    level: f64,
    minimizer: &dyn ProjectionMinimizer,
    settings: &MinimizerSettings,
    sink: &dyn DiagnosticSink,
) -> Result<(Array2<f64>, OptimalProjection), RegionError> {
    let basis = gateset.nongauge_basis(flags)?;
    let offsets = gateset.vector_offsets(flags);
    let gate_ranges: Vec<Range<usize>> = gateset
        .gate_labels()
        .iter()
        .filter_map(|label| offsets.get(label).cloned())
        .collect();

    let objective = |x: ArrayView1<f64>| -> f64 {
        match gate_interval_norm(&basis, hessian, x, level, &gate_ranges) {
            Ok(value) if value.is_finite() => value,
            Ok(value) => {
                log::warn!("Non-finite gate interval norm {value}, returning a large finite value");
                FAILED_EVALUATION_PENALTY
            }
            Err(e) => {
                log::warn!("Gate interval evaluation failed: {e}, returning a large finite value");
                FAILED_EVALUATION_PENALTY
            }
        }
    };

    let n_mixing = basis.n_nongauge() * basis.n_gauge();
    log::info!(
        "Searching {} x {} gauge mixings for the optimal non-gauge projection",
        basis.n_nongauge(),
        basis.n_gauge()
    );
    let outcome = if n_mixing == 0 {
        // Nothing to mix: the standard projector is the only candidate.
        let x = Array1::zeros(0);
        let value = objective(x.view());
        MinimizerOutcome {
            x,
            objective: value,
            evaluations: 1,
            converged: true,
        }
    } else {
        minimizer.minimize(&objective, Array1::zeros(n_mixing), settings, sink)
    };

    sink.emit(Diagnostic::OptimizerFinished {
        evaluations: outcome.evaluations,
        best_objective: outcome.objective,
        converged: outcome.converged,
    });

    let mixing = mixing_matrix(&basis, outcome.x.view())?;
    let projector = basis.mixed_projector(mixing.view())?;
    let projected = sandwich(projector.view(), hessian);

    Ok((
        projected,
        OptimalProjection {
            mixing,
            objective: outcome.objective,
            evaluations: outcome.evaluations,
            converged: outcome.converged,
        },
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::CollectingSink;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    /// Returns the starting point untouched.
    struct StayPut;

    impl ProjectionMinimizer for StayPut {
        fn minimize(
            &self,
            objective: &dyn Fn(ArrayView1<f64>) -> f64,
            x0: Array1<f64>,
            _: &MinimizerSettings,
            _: &dyn DiagnosticSink,
        ) -> MinimizerOutcome {
            let value = objective(x0.view());
            MinimizerOutcome {
                x: x0,
                objective: value,
                evaluations: 1,
                converged: true,
            }
        }
    }

    #[test]
    fn bfgs_finds_minimum_of_shifted_quadratic() {
        let target = array![1.0, -2.0, 0.5];
        let objective = |x: ArrayView1<f64>| -> f64 {
            let diff = &x - &target;
            diff.dot(&diff)
        };
        let sink = CollectingSink::new();
        let outcome = BfgsMinimizer.minimize(
            &objective,
            Array1::zeros(3),
            &MinimizerSettings::default(),
            &sink,
        );
        assert_abs_diff_eq!(outcome.x, target, epsilon = 1e-3);
        assert!(outcome.objective < 1e-6);
        assert_eq!(sink.diagnostics().len(), outcome.evaluations);
    }

    #[test]
    fn evaluation_cap_returns_best_point_seen() {
        let objective = |x: ArrayView1<f64>| -> f64 { (x[0] - 3.0).powi(2) + 1.0 };
        let settings = MinimizerSettings {
            max_evaluations: 5,
            ..MinimizerSettings::default()
        };
        let sink = CollectingSink::new();
        let outcome = BfgsMinimizer.minimize(&objective, array![0.0], &settings, &sink);
        assert!(outcome.evaluations <= 5);
        assert!(outcome.objective <= 10.0);
        assert_abs_diff_eq!(outcome.objective, objective(outcome.x.view()), epsilon = 1e-12);
    }

    #[test]
    fn zero_mixing_reproduces_standard_projection() {
        let gs = GateSet::std1q_xyi();
        let flags = ParameterizationFlags::default();
        let n = gs.num_params(&flags);
        let hessian = Array2::from_shape_fn((n, n), |(i, j)| {
            if i == j { 50.0 + i as f64 } else { 1.0 / (1.0 + (i + j) as f64) }
        });
        let sink = CollectingSink::new();
        let (projected, optimal) = optimal_projected_hessian(
            &gs,
            hessian.view(),
            &flags,
            95.0,
            &StayPut,
            &MinimizerSettings::default(),
            &sink,
        )
        .unwrap();

        let p = gs.nongauge_projector(&flags, None).unwrap();
        let standard = sandwich(p.view(), hessian.view());
        assert_abs_diff_eq!(projected, standard, epsilon = 1e-8);
        assert!(optimal.mixing.iter().all(|&m| m == 0.0));
        assert!(matches!(
            sink.diagnostics().last(),
            Some(Diagnostic::OptimizerFinished { evaluations: 1, .. })
        ));
    }
}
