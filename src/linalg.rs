//! Some shared linear algebra concepts

use crate::numeric::Float;
use nalgebra::{Matrix4, SVector, Vector3, Vector4};

// ### RELATIVISTIC 4-VECTORS ###

/// 4-vector dimension
pub const MOMENTUM_DIM: usize = 4;

/// Components of a relativistic 4-vector, in (E, px, py, pz) order
pub type Components = SVector<Float, MOMENTUM_DIM>;

/// Spatial part of a 4-vector, also used for boost velocities and axes
pub type ThreeVector = Vector3<Float>;

/// Linear map acting on 4-vector components
pub type LorentzMatrix = Matrix4<Float>;

/// Convenience const for accessing the E coordinate of a 4-vector
pub const E: usize = 0;

/// Convenience const for accessing the X coordinate of a 4-vector
pub const X: usize = 1;

/// Convenience const for accessing the Y coordinate of a 4-vector
pub const Y: usize = 2;

/// Convenience const for accessing the Z coordinate of a 4-vector
pub const Z: usize = 3;

/// Extract the spatial part of a 4-vector
pub fn xyz(c: &Components) -> ThreeVector {
    c.fixed_rows::<3>(X).into_owned()
}

/// Minkowski metric with (+, -, -, -) signature
pub fn metric() -> LorentzMatrix {
    LorentzMatrix::from_diagonal(&Vector4::new(1., -1., -1., -1.))
}
