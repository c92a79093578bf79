mod common;

use approx::assert_abs_diff_eq;
use common::{random_spd, random_vector};
use gstci::{
    ConfidenceRegion, DEFAULT_EPS, FnValue, GateSet, IntervalError, ParameterizationFlags,
    ProjectionMode,
};
use ndarray::{Array1, ArrayD, IxDyn};
use num_complex::Complex64;

fn region() -> ConfidenceRegion {
    ConfidenceRegion::new(
        GateSet::std1q_xyi(),
        random_spd(56, 11),
        95.0,
        ParameterizationFlags::default(),
        ProjectionMode::Standard,
    )
    .unwrap()
}

fn expected_half_width(region: &ConfidenceRegion, gradient: &Array1<f64>) -> f64 {
    gradient
        .dot(&region.quadratic_form().inv_q().dot(gradient))
        .abs()
        .sqrt()
}

#[test]
fn linear_gateset_function_recovers_its_coefficients() {
    let region = region();
    let flags = region.parameterization_flags().clone();
    let a = random_vector(56, 12);
    let coefficients = a.clone();
    let interval = region
        .gateset_fn_confidence_interval(
            move |gs| FnValue::Scalar(coefficients.dot(&gs.to_vector(&flags))),
            DEFAULT_EPS,
        )
        .unwrap();
    let df = interval.half_width().as_scalar().unwrap();
    let expected = expected_half_width(&region, &a);
    assert!((df - expected).abs() <= 1e-5 * expected.max(1.0), "{df} vs {expected}");
}

#[test]
fn gate_and_gateset_paths_agree() {
    let region = region();
    let f = |g: ndarray::ArrayView2<f64>| FnValue::Scalar(g[[2, 3]] * g[[3, 2]] + g.diag().sum());
    let via_gate = region
        .gate_fn_confidence_interval(f, "Gx", DEFAULT_EPS)
        .unwrap();
    let via_gateset = region
        .gateset_fn_confidence_interval(
            |gs| f(gs.gate("Gx").map(|g| g.matrix.view()).unwrap()),
            DEFAULT_EPS,
        )
        .unwrap();
    assert_abs_diff_eq!(
        via_gate.half_width().as_scalar().unwrap(),
        via_gateset.half_width().as_scalar().unwrap(),
        epsilon = 1e-6
    );
    assert_eq!(via_gate.value(), via_gateset.value());
}

#[test]
fn constant_functions_have_zero_width_for_every_kind() {
    let region = region();
    let scalar = region
        .spam_fn_confidence_interval(|_, _| FnValue::Scalar(1.0), DEFAULT_EPS)
        .unwrap();
    assert_eq!(scalar.half_width(), &FnValue::Scalar(0.0));

    let vector = region
        .gate_fn_confidence_interval(|_| FnValue::Vector(Array1::ones(3)), "Gi", DEFAULT_EPS)
        .unwrap();
    assert_eq!(vector.half_width(), &FnValue::Vector(Array1::zeros(3)));

    let complex = region
        .gateset_fn_confidence_interval(
            |_| FnValue::ComplexScalar(Complex64::new(1.0, 2.0)),
            DEFAULT_EPS,
        )
        .unwrap();
    assert_eq!(
        complex.half_width(),
        &FnValue::ComplexScalar(Complex64::new(0.0, 0.0))
    );
}

#[test]
fn linear_spam_function_matches_direct_propagation() {
    let region = region();
    let interval = region
        .spam_fn_confidence_interval(
            |rhos, es| FnValue::Scalar(rhos[0][1] + 2.0 * es[0][3]),
            DEFAULT_EPS,
        )
        .unwrap();
    let mut gradient = Array1::zeros(56);
    gradient[region.vector_offsets()["rho0"].start + 1] = 1.0;
    gradient[region.vector_offsets()["E0"].start + 3] = 2.0;
    let expected = expected_half_width(&region, &gradient);
    assert_abs_diff_eq!(
        interval.half_width().as_scalar().unwrap(),
        expected,
        epsilon = 1e-6
    );
}

#[test]
fn complex_matrix_output_is_split_into_parts() {
    let region = region();
    let interval = region
        .gate_fn_confidence_interval(
            |g| FnValue::ComplexMatrix(g.mapv(|x| Complex64::new(x, -3.0 * x))),
            "Gy",
            DEFAULT_EPS,
        )
        .unwrap();
    let df = interval.half_width().as_complex_matrix().unwrap();
    assert_eq!(df.dim(), (4, 4));
    for z in df.iter() {
        assert_abs_diff_eq!(z.im, 3.0 * z.re, epsilon = 1e-5);
    }
}

#[test]
fn unsupported_outputs_are_errors() {
    let region = region();
    let result = region.gate_fn_confidence_interval(
        |_| FnValue::ComplexArray(ArrayD::zeros(IxDyn(&[2, 1, 2]))),
        "Gx",
        DEFAULT_EPS,
    );
    assert!(matches!(result, Err(IntervalError::UnsupportedOutputRank(3))));

    let result = region.gate_fn_confidence_interval(
        |g| {
            if g[[0, 0]] == 1.0 {
                FnValue::Scalar(1.0)
            } else {
                FnValue::Vector(Array1::ones(2))
            }
        },
        "Gx",
        DEFAULT_EPS,
    );
    assert!(matches!(result, Err(IntervalError::OutputShapeChanged { .. })));

    assert!(matches!(
        region.gate_fn_confidence_interval(|_| FnValue::Scalar(0.0), "Gq", DEFAULT_EPS),
        Err(IntervalError::UnknownGate(_))
    ));
}

#[test]
fn regions_can_be_queried_from_several_threads() {
    fn assert_send_sync<T: Send + Sync>() {}
    assert_send_sync::<ConfidenceRegion>();

    let region = region();
    let widths: Vec<f64> = std::thread::scope(|scope| {
        let handles: Vec<_> = ["Gi", "Gx", "Gy"]
            .into_iter()
            .map(|label| {
                let region = &region;
                scope.spawn(move || {
                    region
                        .gate_fn_confidence_interval(
                            |g| FnValue::Scalar(g.diag().sum()),
                            label,
                            DEFAULT_EPS,
                        )
                        .unwrap()
                        .half_width()
                        .as_scalar()
                        .unwrap()
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });
    assert_eq!(widths.len(), 3);
    assert!(widths.iter().all(|w| w.is_finite() && *w > 0.0));
}
