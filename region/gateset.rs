//! # Gate Set Model
//!
//! A gate set is a collection of `d x d` gate matrices, state preparation vectors
//! and effect vectors, all real-valued in a fixed operator basis. This module owns
//! the mapping between those objects and the flat parameter vector that a Hessian
//! is expressed in, and the gauge structure of that vector space.
//!
//! ## Parameter layout
//!
//! The flattened vector holds, in order: every state preparation (`rho0`,
//! `rho1`, ...), every effect (`E0`, `E1`, ...), then every gate in insertion
//! order. Which entries are present is decided by [`ParameterizationFlags`]:
//!
//! - a gate contributes `d*d` entries, or `d*(d-1)` when `g0` is off (its first
//!   row is held fixed); gates are flattened row-major,
//! - a state preparation contributes `d` entries, or `d-1` when `sp0` is off
//!   (its first element is held fixed),
//! - an effect contributes `d` entries,
//! - nothing from SPAM is present when `spam` is off.
//!
//! Objects that contribute nothing still get a zero-length offset range.
//!
//! ## Gauge
//!
//! Under `G -> S^-1 G S`-type gauge transformations the predictions of a gate set
//! do not change. The tangent directions of those transformations at the
//! estimate span the gauge subspace; its orthogonal complement is the non-gauge
//! subspace onto which Hessians are projected.

use crate::linalg::{self, symmetric_eigen, symmetric_pinv};
use crate::types::ParameterizationFlags;
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis, array, s};
use ndarray_linalg::Inverse;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::ops::Range;
use thiserror::Error;

/// Relative eigenvalue cutoff used when pseudo-inverting the gauge Gram matrix.
const GAUGE_GRAM_REL_TOL: f64 = 1e-12;

#[derive(Error, Debug)]
pub enum GateSetError {
    #[error("Gate set dimension must be at least 1.")]
    ZeroDimension,

    #[error("Object '{label}' has shape {found:?}, but the gate set dimension requires {expected:?}.")]
    ShapeMismatch {
        label: String,
        found: Vec<usize>,
        expected: Vec<usize>,
    },

    #[error("A gate labeled '{0}' already exists in this gate set.")]
    DuplicateGate(String),

    #[error("Unknown gate set object '{0}'.")]
    UnknownLabel(String),

    #[error("Parameter vector has length {found}, but the parameterization requires {expected}.")]
    VectorLength { found: usize, expected: usize },

    #[error("Mixing matrix has shape {found:?}, expected (nNonGaugeParams, nGaugeParams) = {expected:?}.")]
    MixingShape {
        found: (usize, usize),
        expected: (usize, usize),
    },

    #[error("Linear algebra failure while computing gauge structure: {0}")]
    Linalg(#[from] ndarray_linalg::error::LinalgError),
}

/// A single labeled gate matrix.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Gate {
    pub label: String,
    pub matrix: Array2<f64>,
}

impl Gate {
    pub fn new(label: impl Into<String>, matrix: Array2<f64>) -> Result<Self, GateSetError> {
        let label = label.into();
        if matrix.nrows() != matrix.ncols() {
            return Err(GateSetError::ShapeMismatch {
                label,
                found: matrix.shape().to_vec(),
                expected: vec![matrix.nrows(), matrix.nrows()],
            });
        }
        Ok(Self { label, matrix })
    }

    pub fn dim(&self) -> usize {
        self.matrix.nrows()
    }

    /// Number of free parameters; the first row is fixed when `g0` is false.
    pub fn num_params(&self, g0: bool) -> usize {
        let d = self.dim();
        if g0 { d * d } else { d * d.saturating_sub(1) }
    }

    pub fn to_vector(&self, g0: bool) -> Array1<f64> {
        flatten_gate(self.matrix.view(), g0)
    }

    pub fn set_from_vector(&mut self, v: ArrayView1<f64>, g0: bool) -> Result<(), GateSetError> {
        let expected = self.num_params(g0);
        if v.len() != expected {
            return Err(GateSetError::VectorLength {
                found: v.len(),
                expected,
            });
        }
        let d = self.dim();
        let first_row = if g0 { 0 } else { 1 };
        for (k, &value) in v.iter().enumerate() {
            self.matrix[[first_row + k / d, k % d]] = value;
        }
        Ok(())
    }
}

fn flatten_gate(matrix: ArrayView2<f64>, g0: bool) -> Array1<f64> {
    let first_row = if g0 { 0 } else { 1 };
    matrix.slice(s![first_row.., ..]).iter().copied().collect()
}

fn flatten_prep(vector: ArrayView1<f64>, sp0: bool) -> Array1<f64> {
    let first = if sp0 { 0 } else { 1 };
    vector.slice(s![first..]).to_owned()
}

/// Label of the `k`-th state preparation in offset maps and reports.
pub fn prep_label(k: usize) -> String {
    format!("rho{k}")
}

/// Label of the `k`-th effect in offset maps and reports.
pub fn effect_label(k: usize) -> String {
    format!("E{k}")
}

/// Orthonormal bases of the gauge and non-gauge subspaces at a gate set.
#[derive(Debug, Clone)]
pub struct NonGaugeBasis {
    /// `nParams x nNonGaugeParams`, orthonormal columns.
    pub nongauge: Array2<f64>,
    /// `nParams x nGaugeParams`, orthonormal columns.
    pub gauge: Array2<f64>,
}

impl NonGaugeBasis {
    pub fn n_nongauge(&self) -> usize {
        self.nongauge.ncols()
    }

    pub fn n_gauge(&self) -> usize {
        self.gauge.ncols()
    }

    /// Splits the parameter space using the eigenvectors of a standard non-gauge projector.
    pub fn from_projector(projector: ArrayView2<f64>) -> Result<Self, GateSetError> {
        let eigen = symmetric_eigen(projector)?;
        let nongauge_cols: Vec<usize> = (0..eigen.eigenvalues.len())
            .filter(|&i| eigen.eigenvalues[i] > 0.5)
            .collect();
        let gauge_cols: Vec<usize> = (0..eigen.eigenvalues.len())
            .filter(|&i| eigen.eigenvalues[i] <= 0.5)
            .collect();
        Ok(Self {
            nongauge: eigen.eigenvectors.select(Axis(1), &nongauge_cols),
            gauge: eigen.eigenvectors.select(Axis(1), &gauge_cols),
        })
    }

    /// Projector onto the non-gauge directions tilted by `mix` into the gauge space.
    ///
    /// The mixed directions are `Bn' = Bn + Bg M^T` and the returned matrix is
    /// `Bn (I + M M^T)^-1 Bn'^T`, so that `P^T H P` has exactly the orthogonal
    /// complement of `Bn'` as its null space. `M = 0` gives the standard projector.
    pub fn mixed_projector(&self, mix: ArrayView2<f64>) -> Result<Array2<f64>, GateSetError> {
        let expected = (self.n_nongauge(), self.n_gauge());
        if mix.dim() != expected {
            return Err(GateSetError::MixingShape {
                found: mix.dim(),
                expected,
            });
        }
        let mixed = &self.nongauge + &self.gauge.dot(&mix.t());
        let mut gram = mix.dot(&mix.t());
        for i in 0..gram.nrows() {
            gram[[i, i]] += 1.0;
        }
        let gram_inv = gram.inv()?;
        Ok(self.nongauge.dot(&gram_inv).dot(&mixed.t()))
    }
}

/// A gate set point estimate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateSet {
    dim: usize,
    #[serde(default)]
    rho_vecs: Vec<Array1<f64>>,
    #[serde(default)]
    e_vecs: Vec<Array1<f64>>,
    /// When present, a complement effect `identity - sum(E_k)` is appended to the effects.
    #[serde(default)]
    identity_vec: Option<Array1<f64>>,
    #[serde(default)]
    gates: Vec<Gate>,
}

impl GateSet {
    pub fn new(dim: usize) -> Result<Self, GateSetError> {
        if dim == 0 {
            return Err(GateSetError::ZeroDimension);
        }
        Ok(Self {
            dim,
            rho_vecs: Vec::new(),
            e_vecs: Vec::new(),
            identity_vec: None,
            gates: Vec::new(),
        })
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    fn check_vector(&self, label: String, v: &ArrayView1<f64>) -> Result<(), GateSetError> {
        if v.len() != self.dim {
            return Err(GateSetError::ShapeMismatch {
                label,
                found: vec![v.len()],
                expected: vec![self.dim],
            });
        }
        Ok(())
    }

    pub fn add_prep_vector(&mut self, v: Array1<f64>) -> Result<(), GateSetError> {
        self.check_vector(prep_label(self.rho_vecs.len()), &v.view())?;
        self.rho_vecs.push(v);
        Ok(())
    }

    pub fn add_effect_vector(&mut self, v: Array1<f64>) -> Result<(), GateSetError> {
        self.check_vector(effect_label(self.e_vecs.len()), &v.view())?;
        self.e_vecs.push(v);
        Ok(())
    }

    pub fn set_identity_vector(&mut self, v: Array1<f64>) -> Result<(), GateSetError> {
        self.check_vector("identity".to_string(), &v.view())?;
        self.identity_vec = Some(v);
        Ok(())
    }

    pub fn add_gate(
        &mut self,
        label: impl Into<String>,
        matrix: Array2<f64>,
    ) -> Result<(), GateSetError> {
        let gate = Gate::new(label, matrix)?;
        let dim = gate.dim();
        if dim != self.dim {
            return Err(GateSetError::ShapeMismatch {
                label: gate.label,
                found: vec![dim, dim],
                expected: vec![self.dim, self.dim],
            });
        }
        if self.gates.iter().any(|g| g.label == gate.label) {
            return Err(GateSetError::DuplicateGate(gate.label));
        }
        self.gates.push(gate);
        Ok(())
    }

    /// Checks every object against the gate set dimension. Deserialized gate sets skip
    /// the constructor checks, so loaders call this before use.
    pub fn validate(&self) -> Result<(), GateSetError> {
        if self.dim == 0 {
            return Err(GateSetError::ZeroDimension);
        }
        for (k, v) in self.rho_vecs.iter().enumerate() {
            self.check_vector(prep_label(k), &v.view())?;
        }
        for (k, v) in self.e_vecs.iter().enumerate() {
            self.check_vector(effect_label(k), &v.view())?;
        }
        if let Some(identity) = &self.identity_vec {
            self.check_vector("identity".to_string(), &identity.view())?;
        }
        for (i, gate) in self.gates.iter().enumerate() {
            if gate.matrix.dim() != (self.dim, self.dim) {
                return Err(GateSetError::ShapeMismatch {
                    label: gate.label.clone(),
                    found: gate.matrix.shape().to_vec(),
                    expected: vec![self.dim, self.dim],
                });
            }
            if self.gates[..i].iter().any(|g| g.label == gate.label) {
                return Err(GateSetError::DuplicateGate(gate.label.clone()));
            }
        }
        Ok(())
    }

    pub fn gate_labels(&self) -> Vec<String> {
        self.gates.iter().map(|g| g.label.clone()).collect()
    }

    pub fn gates(&self) -> &[Gate] {
        &self.gates
    }

    pub fn gate(&self, label: &str) -> Option<&Gate> {
        self.gates.iter().find(|g| g.label == label)
    }

    /// Labels of every parameterized object in flattened-vector order.
    pub fn object_labels(&self) -> Vec<String> {
        let mut labels: Vec<String> = (0..self.rho_vecs.len()).map(prep_label).collect();
        labels.extend((0..self.e_vecs.len()).map(effect_label));
        labels.extend(self.gate_labels());
        labels
    }

    /// The parameterized state preparation vectors.
    pub fn prep_vectors(&self) -> &[Array1<f64>] {
        &self.rho_vecs
    }

    /// The parameterized effect vectors, without the complement.
    pub fn raw_effect_vectors(&self) -> &[Array1<f64>] {
        &self.e_vecs
    }

    /// All effect vectors, including the complement effect when an identity vector is set.
    pub fn effect_vectors(&self) -> Vec<Array1<f64>> {
        let mut effects = self.e_vecs.clone();
        if let Some(identity) = &self.identity_vec {
            let mut complement = identity.clone();
            for e in &self.e_vecs {
                complement -= e;
            }
            effects.push(complement);
        }
        effects
    }

    pub fn set_prep_vector(&mut self, k: usize, v: Array1<f64>) -> Result<(), GateSetError> {
        self.check_vector(prep_label(k), &v.view())?;
        let slot = self
            .rho_vecs
            .get_mut(k)
            .ok_or_else(|| GateSetError::UnknownLabel(prep_label(k)))?;
        *slot = v;
        Ok(())
    }

    pub fn set_effect_vector(&mut self, k: usize, v: Array1<f64>) -> Result<(), GateSetError> {
        self.check_vector(effect_label(k), &v.view())?;
        let slot = self
            .e_vecs
            .get_mut(k)
            .ok_or_else(|| GateSetError::UnknownLabel(effect_label(k)))?;
        *slot = v;
        Ok(())
    }

    fn prep_params(&self, flags: &ParameterizationFlags) -> usize {
        if !flags.spam {
            0
        } else if flags.sp0 {
            self.dim
        } else {
            self.dim - 1
        }
    }

    fn effect_params(&self, flags: &ParameterizationFlags) -> usize {
        if flags.spam { self.dim } else { 0 }
    }

    fn gate_params(&self, gate: &Gate, flags: &ParameterizationFlags) -> usize {
        if flags.gates.includes(&gate.label) {
            gate.num_params(flags.g0)
        } else {
            0
        }
    }

    /// Total number of active parameters.
    pub fn num_params(&self, flags: &ParameterizationFlags) -> usize {
        self.rho_vecs.len() * self.prep_params(flags)
            + self.e_vecs.len() * self.effect_params(flags)
            + self
                .gates
                .iter()
                .map(|g| self.gate_params(g, flags))
                .sum::<usize>()
    }

    /// Half-open range of each object's parameters within the flattened vector.
    pub fn vector_offsets(&self, flags: &ParameterizationFlags) -> HashMap<String, Range<usize>> {
        let mut offsets = HashMap::new();
        let mut start = 0;
        let mut push = |label: String, len: usize| {
            offsets.insert(label, start..start + len);
            start += len;
        };
        for k in 0..self.rho_vecs.len() {
            push(prep_label(k), self.prep_params(flags));
        }
        for k in 0..self.e_vecs.len() {
            push(effect_label(k), self.effect_params(flags));
        }
        for gate in &self.gates {
            push(gate.label.clone(), self.gate_params(gate, flags));
        }
        offsets
    }

    /// Flattens the active parameters.
    pub fn to_vector(&self, flags: &ParameterizationFlags) -> Array1<f64> {
        let mut v = Vec::with_capacity(self.num_params(flags));
        if flags.spam {
            for rho in &self.rho_vecs {
                v.extend(flatten_prep(rho.view(), flags.sp0));
            }
            for e in &self.e_vecs {
                v.extend(e.iter().copied());
            }
        }
        for gate in &self.gates {
            if flags.gates.includes(&gate.label) {
                v.extend(gate.to_vector(flags.g0));
            }
        }
        Array1::from_vec(v)
    }

    /// Writes the active parameters back; inactive entries keep their values.
    pub fn from_vector(
        &mut self,
        flags: &ParameterizationFlags,
        v: ArrayView1<f64>,
    ) -> Result<(), GateSetError> {
        let expected = self.num_params(flags);
        if v.len() != expected {
            return Err(GateSetError::VectorLength {
                found: v.len(),
                expected,
            });
        }
        let mut cursor = 0;
        if flags.spam {
            let first = if flags.sp0 { 0 } else { 1 };
            let n_rho = self.prep_params(flags);
            for rho in &mut self.rho_vecs {
                rho.slice_mut(s![first..])
                    .assign(&v.slice(s![cursor..cursor + n_rho]));
                cursor += n_rho;
            }
            let n_e = self.dim;
            for e in &mut self.e_vecs {
                e.assign(&v.slice(s![cursor..cursor + n_e]));
                cursor += n_e;
            }
        }
        for gate in &mut self.gates {
            if flags.gates.includes(&gate.label) {
                let n = gate.num_params(flags.g0);
                gate.set_from_vector(v.slice(s![cursor..cursor + n]), flags.g0)?;
                cursor += n;
            }
        }
        Ok(())
    }

    /// True when the parameterization pins the first gate row or the first
    /// state-prep element, leaving only trace-preserving gauge freedom.
    fn trace_preserving_gauge(&self, flags: &ParameterizationFlags) -> bool {
        let fixed_gate_row = !flags.g0
            && self
                .gates
                .iter()
                .any(|gate| flags.gates.includes(&gate.label));
        let fixed_prep_element = flags.spam && !flags.sp0;
        fixed_gate_row || fixed_prep_element
    }

    /// First-order change of the active parameters under each gauge generator.
    ///
    /// Column `(a - a0)*d + b` corresponds to the matrix unit `K = e_a e_b^T`,
    /// acting as `G -> KG - GK`, `rho -> K rho` and `E -> -K^T E`. When a first
    /// gate row or first state-prep element is held fixed, generators with
    /// `a == 0` would move it, so only `a >= 1` is used (`a0 = 1`, `d(d-1)`
    /// columns).
    pub fn gauge_derivative(&self, flags: &ParameterizationFlags) -> Array2<f64> {
        let d = self.dim;
        let n_params = self.num_params(flags);
        let first_row = if self.trace_preserving_gauge(flags) { 1 } else { 0 };
        let mut deriv = Array2::zeros((n_params, (d - first_row) * d));

        for a in first_row..d {
            for b in 0..d {
                let mut column = Vec::with_capacity(n_params);
                if flags.spam {
                    for rho in &self.rho_vecs {
                        let mut drho = Array1::zeros(d);
                        drho[a] = rho[b];
                        column.extend(flatten_prep(drho.view(), flags.sp0));
                    }
                    for e in &self.e_vecs {
                        let mut de = Array1::zeros(d);
                        de[b] = -e[a];
                        column.extend(de);
                    }
                }
                for gate in &self.gates {
                    if !flags.gates.includes(&gate.label) {
                        continue;
                    }
                    let g = &gate.matrix;
                    let mut dg = Array2::<f64>::zeros((d, d));
                    dg.row_mut(a).assign(&g.row(b));
                    let mut col_b = dg.column_mut(b);
                    col_b -= &g.column(a);
                    column.extend(flatten_gate(dg.view(), flags.g0));
                }
                deriv
                    .column_mut((a - first_row) * d + b)
                    .assign(&Array1::from_vec(column));
            }
        }
        deriv
    }

    fn standard_nongauge_projector(
        &self,
        flags: &ParameterizationFlags,
    ) -> Result<Array2<f64>, GateSetError> {
        let n_params = self.num_params(flags);
        let deriv = self.gauge_derivative(flags);
        let gram = deriv.t().dot(&deriv);
        let gram_pinv = symmetric_pinv(gram.view(), GAUGE_GRAM_REL_TOL)?;
        let gauge_projector = deriv.dot(&gram_pinv).dot(&deriv.t());
        let nongauge = Array2::<f64>::eye(n_params) - &gauge_projector;
        Ok(linalg::symmetrize(nongauge.view()))
    }

    /// Orthonormal gauge / non-gauge bases at this gate set.
    pub fn nongauge_basis(
        &self,
        flags: &ParameterizationFlags,
    ) -> Result<NonGaugeBasis, GateSetError> {
        let projector = self.standard_nongauge_projector(flags)?;
        NonGaugeBasis::from_projector(projector.view())
    }

    /// Projector onto the non-gauge subspace, optionally tilted by a mixing matrix.
    ///
    /// Without `mix` this is the symmetric, idempotent `I - D (D^T D)^+ D^T` where
    /// `D` is [`GateSet::gauge_derivative`]. With `mix` (shape
    /// `nNonGaugeParams x nGaugeParams`) see [`NonGaugeBasis::mixed_projector`].
    pub fn nongauge_projector(
        &self,
        flags: &ParameterizationFlags,
        mix: Option<ArrayView2<f64>>,
    ) -> Result<Array2<f64>, GateSetError> {
        match mix {
            None => self.standard_nongauge_projector(flags),
            Some(mix) => self.nongauge_basis(flags)?.mixed_projector(mix),
        }
    }

    /// The standard single-qubit gate set with idle, X(pi/2) and Y(pi/2) gates in the
    /// normalized Pauli basis, one state preparation, one effect and its complement.
    pub fn std1q_xyi() -> Self {
        let r = std::f64::consts::FRAC_1_SQRT_2;
        let zero_state = Array1::from_vec(vec![r, 0.0, 0.0, r]);
        let gi = Array2::<f64>::eye(4);
        let gx = array![
            [1.0, 0.0, 0.0, 0.0],
            [0.0, 1.0, 0.0, 0.0],
            [0.0, 0.0, 0.0, -1.0],
            [0.0, 0.0, 1.0, 0.0],
        ];
        let gy = array![
            [1.0, 0.0, 0.0, 0.0],
            [0.0, 0.0, 0.0, 1.0],
            [0.0, 0.0, 1.0, 0.0],
            [0.0, -1.0, 0.0, 0.0],
        ];

        Self {
            dim: 4,
            rho_vecs: vec![zero_state.clone()],
            e_vecs: vec![zero_state],
            identity_vec: Some(Array1::from_vec(vec![std::f64::consts::SQRT_2, 0.0, 0.0, 0.0])),
            gates: vec![
                Gate {
                    label: "Gi".to_string(),
                    matrix: gi,
                },
                Gate {
                    label: "Gx".to_string(),
                    matrix: gx,
                },
                Gate {
                    label: "Gy".to_string(),
                    matrix: gy,
                },
            ],
        }
    }
}
