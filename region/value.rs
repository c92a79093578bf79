//! Values returned by caller-supplied functions whose confidence intervals are requested.
//!
//! A function may return a real or complex scalar, vector or matrix. Internally
//! every value is flattened (row-major) into a list of elements plus an
//! [`OutputShape`], so the linearization and propagation code has one path for
//! real values and one for complex values, and the shape is reapplied at the end.

use ndarray::{Array1, Array2, ArrayD, Ix1, Ix2};
use num_complex::Complex64;
use std::fmt;

/// Output of a function of a gate, a gate set, or the SPAM vectors.
#[derive(Debug, Clone, PartialEq)]
pub enum FnValue {
    Scalar(f64),
    ComplexScalar(Complex64),
    Vector(Array1<f64>),
    ComplexVector(Array1<Complex64>),
    Matrix(Array2<f64>),
    ComplexMatrix(Array2<Complex64>),
    /// Arbitrary-rank real array; only ranks 0 through 2 are supported.
    Array(ArrayD<f64>),
    /// Arbitrary-rank complex array; only ranks 0 through 2 are supported.
    ComplexArray(ArrayD<Complex64>),
}

/// Shape of a function output after dynamic arrays have been resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputShape {
    Scalar,
    Vector(usize),
    Matrix(usize, usize),
}

impl OutputShape {
    pub fn len(&self) -> usize {
        match *self {
            OutputShape::Scalar => 1,
            OutputShape::Vector(n) => n,
            OutputShape::Matrix(r, c) => r * c,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn from_dims(dims: &[usize]) -> Option<Self> {
        match *dims {
            [] => Some(OutputShape::Scalar),
            [n] => Some(OutputShape::Vector(n)),
            [r, c] => Some(OutputShape::Matrix(r, c)),
            _ => None,
        }
    }
}

impl fmt::Display for OutputShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputShape::Scalar => f.write_str("scalar"),
            OutputShape::Vector(n) => write!(f, "vector({n})"),
            OutputShape::Matrix(r, c) => write!(f, "matrix({r}x{c})"),
        }
    }
}

/// Row-major elements of a function output.
#[derive(Debug, Clone, PartialEq)]
pub enum Elements {
    Real(Vec<f64>),
    Complex(Vec<Complex64>),
}

impl Elements {
    pub fn is_complex(&self) -> bool {
        matches!(self, Elements::Complex(_))
    }
}

/// An output whose rank is not 0, 1 or 2.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnsupportedRank(pub usize);

impl FnValue {
    /// Splits the value into its shape and row-major elements.
    pub fn decompose(&self) -> Result<(OutputShape, Elements), UnsupportedRank> {
        let parts = match self {
            FnValue::Scalar(v) => (OutputShape::Scalar, Elements::Real(vec![*v])),
            FnValue::ComplexScalar(v) => (OutputShape::Scalar, Elements::Complex(vec![*v])),
            FnValue::Vector(v) => (OutputShape::Vector(v.len()), Elements::Real(v.to_vec())),
            FnValue::ComplexVector(v) => {
                (OutputShape::Vector(v.len()), Elements::Complex(v.to_vec()))
            }
            FnValue::Matrix(m) => (
                OutputShape::Matrix(m.nrows(), m.ncols()),
                Elements::Real(m.iter().copied().collect()),
            ),
            FnValue::ComplexMatrix(m) => (
                OutputShape::Matrix(m.nrows(), m.ncols()),
                Elements::Complex(m.iter().copied().collect()),
            ),
            FnValue::Array(a) => {
                let shape = OutputShape::from_dims(a.shape()).ok_or(UnsupportedRank(a.ndim()))?;
                (shape, Elements::Real(a.iter().copied().collect()))
            }
            FnValue::ComplexArray(a) => {
                let shape = OutputShape::from_dims(a.shape()).ok_or(UnsupportedRank(a.ndim()))?;
                (shape, Elements::Complex(a.iter().copied().collect()))
            }
        };
        Ok(parts)
    }

    /// Rebuilds a value from its shape and row-major elements.
    ///
    /// Dynamic-rank arrays come back as the matching fixed-rank variant.
    pub fn compose(shape: OutputShape, elements: Elements) -> FnValue {
        match (shape, elements) {
            (OutputShape::Scalar, Elements::Real(v)) => {
                FnValue::Scalar(v.first().copied().unwrap_or(0.0))
            }
            (OutputShape::Scalar, Elements::Complex(v)) => {
                FnValue::ComplexScalar(v.first().copied().unwrap_or_default())
            }
            (OutputShape::Vector(_), Elements::Real(v)) => FnValue::Vector(Array1::from_vec(v)),
            (OutputShape::Vector(_), Elements::Complex(v)) => {
                FnValue::ComplexVector(Array1::from_vec(v))
            }
            (OutputShape::Matrix(r, c), Elements::Real(v)) => {
                FnValue::Matrix(Array2::from_shape_fn((r, c), |(i, j)| v[i * c + j]))
            }
            (OutputShape::Matrix(r, c), Elements::Complex(v)) => {
                FnValue::ComplexMatrix(Array2::from_shape_fn((r, c), |(i, j)| v[i * c + j]))
            }
        }
    }

    /// The value as a real scalar, if it is one.
    pub fn as_scalar(&self) -> Option<f64> {
        match self {
            FnValue::Scalar(v) => Some(*v),
            FnValue::Array(a) if a.ndim() == 0 => a.iter().next().copied(),
            _ => None,
        }
    }

    pub fn as_complex_scalar(&self) -> Option<Complex64> {
        match self {
            FnValue::ComplexScalar(v) => Some(*v),
            FnValue::ComplexArray(a) if a.ndim() == 0 => a.iter().next().copied(),
            _ => None,
        }
    }

    pub fn as_vector(&self) -> Option<Array1<f64>> {
        match self {
            FnValue::Vector(v) => Some(v.clone()),
            FnValue::Array(a) => a.clone().into_dimensionality::<Ix1>().ok(),
            _ => None,
        }
    }

    pub fn as_matrix(&self) -> Option<Array2<f64>> {
        match self {
            FnValue::Matrix(m) => Some(m.clone()),
            FnValue::Array(a) => a.clone().into_dimensionality::<Ix2>().ok(),
            _ => None,
        }
    }

    pub fn as_complex_matrix(&self) -> Option<Array2<Complex64>> {
        match self {
            FnValue::ComplexMatrix(m) => Some(m.clone()),
            FnValue::ComplexArray(a) => a.clone().into_dimensionality::<Ix2>().ok(),
            _ => None,
        }
    }
}

impl From<f64> for FnValue {
    fn from(v: f64) -> Self {
        FnValue::Scalar(v)
    }
}

impl From<Complex64> for FnValue {
    fn from(v: Complex64) -> Self {
        FnValue::ComplexScalar(v)
    }
}

impl From<Array1<f64>> for FnValue {
    fn from(v: Array1<f64>) -> Self {
        FnValue::Vector(v)
    }
}

impl From<Array1<Complex64>> for FnValue {
    fn from(v: Array1<Complex64>) -> Self {
        FnValue::ComplexVector(v)
    }
}

impl From<Array2<f64>> for FnValue {
    fn from(m: Array2<f64>) -> Self {
        FnValue::Matrix(m)
    }
}

impl From<Array2<Complex64>> for FnValue {
    fn from(m: Array2<Complex64>) -> Self {
        FnValue::ComplexMatrix(m)
    }
}

impl From<ArrayD<f64>> for FnValue {
    fn from(a: ArrayD<f64>) -> Self {
        FnValue::Array(a)
    }
}

impl From<ArrayD<Complex64>> for FnValue {
    fn from(a: ArrayD<Complex64>) -> Self {
        FnValue::ComplexArray(a)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{IxDyn, array};

    #[test]
    fn matrix_round_trips_through_elements() {
        let m = array![[1.0, 2.0, 3.0], [4.0, 5.0, 6.0]];
        let (shape, elements) = FnValue::Matrix(m.clone()).decompose().unwrap();
        assert_eq!(shape, OutputShape::Matrix(2, 3));
        assert_eq!(elements, Elements::Real(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]));
        assert_eq!(FnValue::compose(shape, elements), FnValue::Matrix(m));
    }

    #[test]
    fn dynamic_arrays_resolve_to_fixed_rank() {
        let a = ArrayD::from_shape_vec(IxDyn(&[3]), vec![1.0, 2.0, 3.0]).unwrap();
        let (shape, elements) = FnValue::Array(a).decompose().unwrap();
        assert_eq!(shape, OutputShape::Vector(3));
        assert_eq!(
            FnValue::compose(shape, elements),
            FnValue::Vector(array![1.0, 2.0, 3.0])
        );

        let zero_dim = ArrayD::from_elem(IxDyn(&[]), 2.5);
        assert_eq!(FnValue::Array(zero_dim).as_scalar(), Some(2.5));
    }

    #[test]
    fn rank_three_is_unsupported() {
        let cube = ArrayD::<f64>::zeros(IxDyn(&[2, 2, 2]));
        assert_eq!(FnValue::Array(cube).decompose(), Err(UnsupportedRank(3)));
        let cube = ArrayD::<Complex64>::zeros(IxDyn(&[1, 1, 1, 1]));
        assert_eq!(FnValue::ComplexArray(cube).decompose(), Err(UnsupportedRank(4)));
    }

    #[test]
    fn complex_scalar_keeps_kind() {
        let (shape, elements) = FnValue::from(Complex64::new(1.0, -2.0)).decompose().unwrap();
        assert_eq!(shape, OutputShape::Scalar);
        assert!(elements.is_complex());
    }
}
