//! # Linearized interval propagation
//!
//! For a function `f` of the estimate, the half-width of its confidence interval
//! is approximated by linearizing `f` around the estimate:
//!
//! ```text
//! df = sqrt(|grad(f)^T invQ grad(f)|)
//! ```
//!
//! The gradient is a forward difference in the flattened parameter vector. Every
//! perturbation happens on a private working copy, so the region's gate set is
//! never touched. Vector and matrix outputs are handled element by element,
//! row-major.
//!
//! Complex outputs get one half-width for the real part and one for the imaginary
//! part, returned as `re + i*im`. This ignores the correlation between the two
//! parts and is only an approximation of a region in the complex plane.

use crate::confidence::ConfidenceRegion;
use crate::gateset::{GateSet, GateSetError, effect_label, prep_label};
use crate::value::{Elements, FnValue, OutputShape, UnsupportedRank};
use ndarray::{Array1, Array2, ArrayView2};
use num_complex::Complex64;
use thiserror::Error;

/// Forward-difference step used when a caller has no preference.
pub const DEFAULT_EPS: f64 = 1e-7;

#[derive(Error, Debug)]
pub enum IntervalError {
    #[error("No gate labeled '{0}' in the region's gate set.")]
    UnknownGate(String),

    #[error("Function outputs of rank {0} are not supported; only scalars, vectors and matrices are.")]
    UnsupportedOutputRank(usize),

    #[error("Function output changed from {expected} to {found} under a parameter perturbation.")]
    OutputShapeChanged { expected: String, found: String },

    #[error("Working parameter vector has length {found}, but the region covers {expected} parameters.")]
    VectorLength { found: usize, expected: usize },

    #[error("Finite-difference step must be finite and non-zero, got {0}.")]
    InvalidStep(f64),

    #[error("Gate set error while perturbing parameters: {0}")]
    GateSet(#[from] GateSetError),
}

impl From<UnsupportedRank> for IntervalError {
    fn from(err: UnsupportedRank) -> Self {
        IntervalError::UnsupportedOutputRank(err.0)
    }
}

/// A function value together with its linearized confidence half-width.
#[derive(Debug, Clone, PartialEq)]
pub struct FnInterval {
    half_width: FnValue,
    value: FnValue,
}

impl FnInterval {
    /// Half-width with the same shape and real/complex kind as [`Self::value`].
    pub fn half_width(&self) -> &FnValue {
        &self.half_width
    }

    /// The function evaluated at the unperturbed estimate.
    pub fn value(&self) -> &FnValue {
        &self.value
    }

    /// `(half_width, value)`.
    pub fn into_parts(self) -> (FnValue, FnValue) {
        (self.half_width, self.value)
    }
}

fn describe(shape: OutputShape, elements: &Elements) -> String {
    if elements.is_complex() {
        format!("complex {shape}")
    } else {
        format!("real {shape}")
    }
}

/// Forward-difference Jacobian of one function output, `nOutputs x nParams`.
struct Jacobian {
    shape: OutputShape,
    base: Elements,
    real: Array2<f64>,
    imag: Option<Array2<f64>>,
    eps: f64,
}

impl Jacobian {
    fn new(f0: &FnValue, n_params: usize, eps: f64) -> Result<Self, IntervalError> {
        let (shape, base) = f0.decompose()?;
        let n_outputs = shape.len();
        let imag = base
            .is_complex()
            .then(|| Array2::zeros((n_outputs, n_params)));
        Ok(Self {
            shape,
            base,
            real: Array2::zeros((n_outputs, n_params)),
            imag,
            eps,
        })
    }

    /// Stores column `index` from the value at the perturbed point.
    fn record(&mut self, index: usize, perturbed: &FnValue) -> Result<(), IntervalError> {
        let (shape, elements) = perturbed.decompose()?;
        let mismatch = || IntervalError::OutputShapeChanged {
            expected: describe(self.shape, &self.base),
            found: describe(shape, &elements),
        };
        if shape != self.shape {
            return Err(mismatch());
        }
        match (&self.base, &elements, self.imag.as_mut()) {
            (Elements::Real(f0), Elements::Real(f1), None) => {
                for (o, (a, b)) in f0.iter().zip(f1).enumerate() {
                    self.real[[o, index]] = (b - a) / self.eps;
                }
            }
            (Elements::Complex(f0), Elements::Complex(f1), Some(imag)) => {
                for (o, (a, b)) in f0.iter().zip(f1).enumerate() {
                    let d = (b - a) / self.eps;
                    self.real[[o, index]] = d.re;
                    imag[[o, index]] = d.im;
                }
            }
            _ => return Err(mismatch()),
        }
        Ok(())
    }

    fn into_interval(self, region: &ConfidenceRegion) -> FnInterval {
        let form = region.quadratic_form();
        log::debug!("gradF = {:?}", self.real);
        let half_width = match &self.imag {
            None => {
                let df: Vec<f64> = self
                    .real
                    .rows()
                    .into_iter()
                    .map(|g| form.half_width(g))
                    .collect();
                log::debug!("df = {df:?}");
                Elements::Real(df)
            }
            Some(imag) => {
                log::debug!("gradF (imaginary part) = {imag:?}");
                let df: Vec<Complex64> = self
                    .real
                    .rows()
                    .into_iter()
                    .zip(imag.rows())
                    .map(|(re, im)| Complex64::new(form.half_width(re), form.half_width(im)))
                    .collect();
                log::debug!("df = {df:?}");
                Elements::Complex(df)
            }
        };
        FnInterval {
            half_width: FnValue::compose(self.shape, half_width),
            value: FnValue::compose(self.shape, self.base),
        }
    }
}

fn check_step(eps: f64) -> Result<(), IntervalError> {
    if eps.is_finite() && eps != 0.0 {
        Ok(())
    } else {
        Err(IntervalError::InvalidStep(eps))
    }
}

impl ConfidenceRegion {
    /// Confidence interval of a function of a single gate matrix.
    ///
    /// Only the gate's own parameters are perturbed. A gate excluded by the
    /// parameterization flags has no parameters in the region, so its gradient is
    /// zero and so is the returned half-width.
    ///
    /// # Arguments
    /// * `f`: maps the `d x d` gate matrix to a scalar, vector or matrix.
    /// * `gate_label`: which gate to perturb.
    /// * `eps`: forward-difference step, usually [`DEFAULT_EPS`].
    pub fn gate_fn_confidence_interval<F>(
        &self,
        f: F,
        gate_label: &str,
        eps: f64,
    ) -> Result<FnInterval, IntervalError>
    where
        F: Fn(ArrayView2<f64>) -> FnValue,
    {
        Ok(self.gate_fn_jacobian(f, gate_label, eps)?.into_interval(self))
    }

    fn gate_fn_jacobian<F>(&self, f: F, gate_label: &str, eps: f64) -> Result<Jacobian, IntervalError>
    where
        F: Fn(ArrayView2<f64>) -> FnValue,
    {
        check_step(eps)?;
        let gate = self
            .gateset()
            .gate(gate_label)
            .ok_or_else(|| IntervalError::UnknownGate(gate_label.to_string()))?;
        let flags = self.parameterization_flags();
        let f0 = f(gate.matrix.view());
        let mut jacobian = Jacobian::new(&f0, self.n_params(), eps)?;

        let block = self
            .vector_offsets()
            .get(gate_label)
            .cloned()
            .unwrap_or(0..0);
        if flags.gates.includes(gate_label) {
            let d = gate.dim();
            let first_row = if flags.g0 { 0 } else { 1 };
            let mut working = gate.matrix.clone();
            for (k, index) in block.enumerate() {
                let (row, col) = (first_row + k / d, k % d);
                let original = working[[row, col]];
                working[[row, col]] = original + eps;
                let perturbed = f(working.view());
                working[[row, col]] = original;
                jacobian.record(index, &perturbed)?;
            }
        }
        Ok(jacobian)
    }

    /// Confidence interval of a function of the whole gate set.
    ///
    /// Every active parameter is perturbed in turn on a clone of the estimate.
    pub fn gateset_fn_confidence_interval<F>(
        &self,
        f: F,
        eps: f64,
    ) -> Result<FnInterval, IntervalError>
    where
        F: Fn(&GateSet) -> FnValue,
    {
        Ok(self.gateset_fn_jacobian(f, eps)?.into_interval(self))
    }

    fn gateset_fn_jacobian<F>(&self, f: F, eps: f64) -> Result<Jacobian, IntervalError>
    where
        F: Fn(&GateSet) -> FnValue,
    {
        check_step(eps)?;
        let flags = self.parameterization_flags();
        let mut working = self.gateset().clone();
        let mut v = working.to_vector(flags);
        if v.len() != self.n_params() {
            return Err(IntervalError::VectorLength {
                found: v.len(),
                expected: self.n_params(),
            });
        }

        let f0 = f(&working);
        let mut jacobian = Jacobian::new(&f0, v.len(), eps)?;
        for i in 0..v.len() {
            let original = v[i];
            v[i] = original + eps;
            working.from_vector(flags, v.view())?;
            let perturbed = f(&working);
            v[i] = original;
            jacobian.record(i, &perturbed)?;
        }
        Ok(jacobian)
    }

    /// Confidence interval of a function of the state preparation and effect vectors.
    ///
    /// `f` receives every state preparation and every effect, the complement
    /// effect included. Without SPAM parameters the half-width is zero.
    pub fn spam_fn_confidence_interval<F>(
        &self,
        f: F,
        eps: f64,
    ) -> Result<FnInterval, IntervalError>
    where
        F: Fn(&[Array1<f64>], &[Array1<f64>]) -> FnValue,
    {
        Ok(self.spam_fn_jacobian(f, eps)?.into_interval(self))
    }

    fn spam_fn_jacobian<F>(&self, f: F, eps: f64) -> Result<Jacobian, IntervalError>
    where
        F: Fn(&[Array1<f64>], &[Array1<f64>]) -> FnValue,
    {
        check_step(eps)?;
        let flags = self.parameterization_flags();
        let mut working = self.gateset().clone();
        let evaluate = |gs: &GateSet| f(gs.prep_vectors(), &gs.effect_vectors());

        let f0 = evaluate(&working);
        let mut jacobian = Jacobian::new(&f0, self.n_params(), eps)?;
        if !flags.spam {
            return Ok(jacobian);
        }

        let offsets = self.vector_offsets();
        let first = if flags.sp0 { 0 } else { 1 };
        for k in 0..working.prep_vectors().len() {
            let start = offsets.get(&prep_label(k)).map_or(0, |r| r.start);
            let original = working.prep_vectors()[k].clone();
            for j in first..original.len() {
                let mut perturbed = original.clone();
                perturbed[j] += eps;
                working.set_prep_vector(k, perturbed)?;
                let value = evaluate(&working);
                jacobian.record(start + j - first, &value)?;
            }
            working.set_prep_vector(k, original)?;
        }
        for k in 0..working.raw_effect_vectors().len() {
            let start = offsets.get(&effect_label(k)).map_or(0, |r| r.start);
            let original = working.raw_effect_vectors()[k].clone();
            for j in 0..original.len() {
                let mut perturbed = original.clone();
                perturbed[j] += eps;
                working.set_effect_vector(k, perturbed)?;
                let value = evaluate(&working);
                jacobian.record(start + j, &value)?;
            }
            working.set_effect_vector(k, original)?;
        }
        Ok(jacobian)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ParameterizationFlags, ProjectionMode};
    use approx::assert_abs_diff_eq;
    use ndarray::{ArrayD, IxDyn};

    fn region(flags: ParameterizationFlags) -> ConfidenceRegion {
        let gs = GateSet::std1q_xyi();
        let n = gs.num_params(&flags);
        let hessian = Array2::from_diag(&Array1::from_shape_fn(n, |i| 20.0 + (i % 7) as f64));
        ConfidenceRegion::new(gs, hessian, 95.0, flags, ProjectionMode::None).unwrap()
    }

    #[test]
    fn constant_function_has_zero_half_width() {
        let r = region(ParameterizationFlags::default());
        let interval = r
            .gateset_fn_confidence_interval(|_| FnValue::Scalar(4.2), DEFAULT_EPS)
            .unwrap();
        assert_eq!(interval.half_width(), &FnValue::Scalar(0.0));
        assert_eq!(interval.value(), &FnValue::Scalar(4.2));
    }

    #[test]
    fn single_element_of_unnulled_inverse_matches_profile_interval() {
        // With no projection and nothing gauge-nulled in this entry, f = G[1,2]
        // has half-width sqrt(invQ[k,k]) = profLCI[k].
        let r = region(ParameterizationFlags::default());
        let interval = r
            .gate_fn_confidence_interval(|g| FnValue::Scalar(g[[1, 2]]), "Gx", DEFAULT_EPS)
            .unwrap();
        let k = r.vector_offsets()["Gx"].start + 4 + 2;
        let expected = r.quadratic_form().profile_intervals()[k];
        let FnValue::Scalar(df) = interval.half_width() else {
            panic!("expected a scalar half-width");
        };
        assert_abs_diff_eq!(*df, expected, epsilon = 1e-5);
    }

    #[test]
    fn unselected_gate_has_zero_gradient() {
        let flags = ParameterizationFlags::new(vec!["Gx".to_string()], true, true, true);
        let r = region(flags);
        let interval = r
            .gate_fn_confidence_interval(|g| FnValue::Scalar(g.sum()), "Gy", DEFAULT_EPS)
            .unwrap();
        assert_eq!(interval.half_width(), &FnValue::Scalar(0.0));
        assert!(matches!(
            r.gate_fn_confidence_interval(|g| FnValue::Scalar(g.sum()), "Gz", DEFAULT_EPS),
            Err(IntervalError::UnknownGate(_))
        ));
    }

    #[test]
    fn matrix_output_keeps_its_shape() {
        let r = region(ParameterizationFlags::default());
        let interval = r
            .gate_fn_confidence_interval(|g| FnValue::Matrix(g.dot(&g)), "Gy", DEFAULT_EPS)
            .unwrap();
        let (df, value) = interval.into_parts();
        let df = df.as_matrix().unwrap();
        assert_eq!(df.dim(), (4, 4));
        assert!(df.iter().all(|&v| v.is_finite() && v >= 0.0));
        assert_eq!(value.as_matrix().unwrap().dim(), (4, 4));
    }

    #[test]
    fn rank_three_output_is_rejected() {
        let r = region(ParameterizationFlags::default());
        let result = r.gateset_fn_confidence_interval(
            |_| FnValue::Array(ArrayD::zeros(IxDyn(&[2, 2, 2]))),
            DEFAULT_EPS,
        );
        assert!(matches!(result, Err(IntervalError::UnsupportedOutputRank(3))));
    }

    #[test]
    fn complex_output_combines_real_and_imaginary_widths() {
        let r = region(ParameterizationFlags::default());
        let interval = r
            .gate_fn_confidence_interval(
                |g| FnValue::ComplexScalar(Complex64::new(g[[1, 1]], 2.0 * g[[2, 2]])),
                "Gi",
                DEFAULT_EPS,
            )
            .unwrap();
        let start = r.vector_offsets()["Gi"].start;
        let intervals = r.quadratic_form().profile_intervals();
        let df = interval.half_width().as_complex_scalar().unwrap();
        assert_abs_diff_eq!(df.re, intervals[start + 5], epsilon = 1e-5);
        assert_abs_diff_eq!(df.im, 2.0 * intervals[start + 10], epsilon = 1e-5);
    }

    #[test]
    fn spam_function_without_spam_parameters_is_exact_zero() {
        let flags = ParameterizationFlags::new(true, true, false, true);
        let r = region(flags);
        let interval = r
            .spam_fn_confidence_interval(|rhos, es| FnValue::Scalar(es[0].dot(&rhos[0])), DEFAULT_EPS)
            .unwrap();
        assert_eq!(interval.half_width(), &FnValue::Scalar(0.0));
    }

    #[test]
    fn spam_function_sees_complement_effect() {
        let r = region(ParameterizationFlags::default());
        let interval = r
            .spam_fn_confidence_interval(
                |rhos, es| {
                    assert_eq!(es.len(), 2);
                    FnValue::Scalar(es[1].dot(&rhos[0]))
                },
                DEFAULT_EPS,
            )
            .unwrap();
        let FnValue::Scalar(value) = interval.value() else {
            panic!("expected a scalar value");
        };
        assert_abs_diff_eq!(*value, 0.0, epsilon = 1e-12);
        assert!(interval.half_width().as_scalar().unwrap() > 0.0);
    }

    #[test]
    fn estimate_is_left_untouched() {
        let r = region(ParameterizationFlags::default());
        let before = r.gateset().clone();
        r.gateset_fn_confidence_interval(|gs| FnValue::Scalar(gs.gates()[1].matrix[[2, 3]]), 1e-3)
            .unwrap();
        assert_eq!(r.gateset(), &before);
        assert!(matches!(
            r.gateset_fn_confidence_interval(|_| FnValue::Scalar(0.0), 0.0),
            Err(IntervalError::InvalidStep(_))
        ));
    }

    fn weights(rows: usize, cols: usize) -> Array2<f64> {
        Array2::from_shape_fn((rows, cols), |(i, j)| 0.5 + (3 * i + j) as f64 * 0.25)
    }

    fn trace_preserving() -> ParameterizationFlags {
        ParameterizationFlags::new(true, false, true, false)
    }

    #[test]
    fn linear_gate_function_gradient_equals_its_weights() {
        let a = weights(4, 4);
        for flags in [ParameterizationFlags::default(), trace_preserving()] {
            let r = region(flags.clone());
            let jacobian = r
                .gate_fn_jacobian(|g| FnValue::Scalar((&g * &a).sum()), "Gx", DEFAULT_EPS)
                .unwrap();
            let block = r.vector_offsets()["Gx"].clone();
            let first_row = if flags.g0 { 0 } else { 1 };
            let mut expected = Array1::<f64>::zeros(r.n_params());
            for (k, index) in block.enumerate() {
                expected[index] = a[[first_row + k / 4, k % 4]];
            }
            assert_abs_diff_eq!(jacobian.real.row(0).to_owned(), expected, epsilon = 1e-6);
        }
    }

    #[test]
    fn linear_gateset_function_gradient_equals_its_weights() {
        for flags in [ParameterizationFlags::default(), trace_preserving()] {
            let r = region(flags.clone());
            let a = Array1::from_shape_fn(r.n_params(), |i| 1.0 - 0.05 * i as f64);
            let jacobian = r
                .gateset_fn_jacobian(|gs| FnValue::Scalar(a.dot(&gs.to_vector(&flags))), DEFAULT_EPS)
                .unwrap();
            assert_abs_diff_eq!(jacobian.real.row(0).to_owned(), a, epsilon = 1e-6);
        }
    }

    #[test]
    fn gate_and_gateset_functions_agree_without_first_row() {
        let r = region(trace_preserving());
        let a = weights(4, 4);
        let on_gate = |g: ArrayView2<f64>| FnValue::Vector(g.dot(&a).diag().to_owned());
        let on_gateset = |gs: &GateSet| match gs.gate("Gy") {
            Some(gate) => on_gate(gate.matrix.view()),
            None => FnValue::Scalar(f64::NAN),
        };

        let from_gate = r.gate_fn_jacobian(on_gate, "Gy", DEFAULT_EPS).unwrap();
        let from_gateset = r.gateset_fn_jacobian(on_gateset, DEFAULT_EPS).unwrap();
        assert_abs_diff_eq!(from_gate.real, from_gateset.real, epsilon = 1e-6);
        // The fixed first row never enters the gradient.
        assert!(from_gate.real.row(0).iter().all(|&v| v == 0.0));

        let df_gate = r.gate_fn_confidence_interval(on_gate, "Gy", DEFAULT_EPS).unwrap();
        let df_gateset = r.gateset_fn_confidence_interval(on_gateset, DEFAULT_EPS).unwrap();
        assert_abs_diff_eq!(
            df_gate.half_width().as_vector().unwrap(),
            df_gateset.half_width().as_vector().unwrap(),
            epsilon = 1e-5
        );
    }

    #[test]
    fn spam_gradient_skips_fixed_prep_element() {
        let flags = trace_preserving();
        let r = region(flags.clone());
        let w = Array1::from_vec(vec![9.0, 1.0, 2.0, 3.0]);
        let u = Array1::from_vec(vec![4.0, 5.0, 6.0, 7.0]);
        let f = |rhos: &[Array1<f64>], es: &[Array1<f64>]| {
            FnValue::Scalar(w.dot(&rhos[0]) + u.dot(&es[0]))
        };
        let jacobian = r.spam_fn_jacobian(f, DEFAULT_EPS).unwrap();

        let rho = r.vector_offsets()["rho0"].clone();
        let effect = r.vector_offsets()["E0"].clone();
        assert_eq!(rho, 0..3);
        let mut expected = Array1::<f64>::zeros(r.n_params());
        for (j, index) in rho.enumerate() {
            expected[index] = w[j + 1];
        }
        for (j, index) in effect.enumerate() {
            expected[index] = u[j];
        }
        assert_abs_diff_eq!(jacobian.real.row(0).to_owned(), expected, epsilon = 1e-6);

        let through_gateset = r
            .gateset_fn_jacobian(
                |gs| f(gs.prep_vectors(), &gs.effect_vectors()),
                DEFAULT_EPS,
            )
            .unwrap();
        assert_abs_diff_eq!(jacobian.real, through_gateset.real, epsilon = 1e-6);
    }
}
