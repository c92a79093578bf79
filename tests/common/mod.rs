use gstci::GateSet;
use ndarray::{Array1, Array2, array};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Symmetric positive definite `A A^T + n I` for a seeded random `A`.
pub fn random_spd(n: usize, seed: u64) -> Array2<f64> {
    let mut rng = StdRng::seed_from_u64(seed);
    let a = Array2::from_shape_fn((n, n), |_| rng.gen_range(-1.0..1.0));
    a.dot(&a.t()) + Array2::<f64>::eye(n) * n as f64
}

pub fn random_vector(n: usize, seed: u64) -> Array1<f64> {
    let mut rng = StdRng::seed_from_u64(seed);
    Array1::from_shape_fn(n, |_| rng.gen_range(-1.0..1.0))
}

/// A two-dimensional gate set with one gate: 8 parameters, 4 of them gauge.
pub fn small_gateset() -> GateSet {
    let mut gs = GateSet::new(2).unwrap();
    gs.add_prep_vector(array![0.7071, 0.6]).unwrap();
    gs.add_effect_vector(array![0.7071, 0.5]).unwrap();
    gs.add_gate("G", array![[1.0, 0.0], [0.1, 0.8]]).unwrap();
    gs
}
