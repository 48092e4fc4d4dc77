//! Lorentz transformations (boosts and rotations) of 4-vectors
//!
//! Every transformation is a 4x4 matrix acting on (E, px, py, pz) column
//! vectors. Transformations compose in application order: the left-hand
//! side of `then()` is applied first.

use crate::{
    error::{Error, Result},
    fourvec::FourVector,
    linalg::{self, LorentzMatrix, ThreeVector, E, X},
    numeric::{functions::*, Float},
};
use nalgebra::{Rotation3, Unit};

/// Proper Lorentz transformation
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LorentzTransform(LorentzMatrix);
//
impl LorentzTransform {
    // ### CONSTRUCTION ###

    /// Transformation that does nothing
    pub fn identity() -> Self {
        Self(LorentzMatrix::identity())
    }

    /// Pure boost into the frame which moves with velocity `beta` (in units
    /// of c) relative to the current frame
    ///
    /// In the new frame, a particle with velocity `beta` is at rest.
    ///
    pub fn boost(beta: &ThreeVector) -> Result<Self> {
        if beta.iter().any(|b| !b.is_finite()) {
            return Err(Error::InvalidKinematics(format!(
                "boost velocity ({}, {}, {}) is not finite",
                beta.x, beta.y, beta.z
            )));
        }
        let beta2 = beta.norm_squared();
        if beta2 >= 1. {
            return Err(Error::InvalidKinematics(format!(
                "boost velocity |β| = {} is not below the speed of light",
                sqrt(beta2)
            )));
        }
        if beta2 == 0. {
            return Ok(Self::identity());
        }

        let gamma = 1. / sqrt(1. - beta2);
        let k = (gamma - 1.) / beta2;
        let b = [beta.x, beta.y, beta.z];
        let matrix = LorentzMatrix::from_fn(|row, col| match (row, col) {
            (E, E) => gamma,
            (E, i) | (i, E) => -gamma * b[i - X],
            (i, j) => {
                let delta = if i == j { 1. } else { 0. };
                delta + k * b[i - X] * b[j - X]
            }
        });
        Ok(Self(matrix))
    }

    /// Active right-handed rotation of the spatial part by `angle` radians
    /// around `axis`
    pub fn rotation(axis: &ThreeVector, angle: Float) -> Result<Self> {
        if !angle.is_finite() || axis.iter().any(|a| !a.is_finite()) {
            return Err(Error::InvalidKinematics(format!(
                "rotation by {} around ({}, {}, {}) is not finite",
                angle, axis.x, axis.y, axis.z
            )));
        }
        let axis = Unit::try_new(*axis, 0.).ok_or_else(|| {
            Error::InvalidKinematics("rotation axis has zero length".to_owned())
        })?;
        let rotation = Rotation3::from_axis_angle(&axis, angle);
        Ok(Self::embed(rotation.matrix()))
    }

    /// Rotation given by z-x-z Euler angles (Goldstein convention)
    ///
    /// The resulting rotation matrix is R = Rz(psi)·Rx(theta)·Rz(phi): the
    /// vector is first rotated by `phi` around z, then by `theta` around x,
    /// finally by `psi` around z.
    ///
    pub fn euler(phi: Float, theta: Float, psi: Float) -> Result<Self> {
        let z = ThreeVector::z();
        Ok(Self::rotation(&z, phi)?
            .then(&Self::rotation(&ThreeVector::x(), theta)?)
            .then(&Self::rotation(&z, psi)?))
    }

    /// Embed a 3x3 rotation matrix into the spatial block of a 4x4 one
    fn embed(r: &nalgebra::Matrix3<Float>) -> Self {
        Self(LorentzMatrix::from_fn(|row, col| match (row, col) {
            (E, E) => 1.,
            (E, _) | (_, E) => 0.,
            (i, j) => r[(i - X, j - X)],
        }))
    }

    // ### COMPOSITION ###

    /// Transformation that applies `self`, then `next`
    pub fn then(&self, next: &Self) -> Self {
        Self(next.0 * self.0)
    }

    /// Transformation that undoes this one
    ///
    /// Lorentz matrices satisfy Λ⁻¹ = η·Λᵀ·η where η is the metric, so no
    /// numerical matrix inversion is needed.
    ///
    pub fn inverse(&self) -> Self {
        let eta = linalg::metric();
        Self(eta * self.0.transpose() * eta)
    }

    /// Apply this transformation to a 4-vector
    pub fn apply(&self, v: &FourVector) -> FourVector {
        FourVector::from_components(self.0 * v.components())
    }

    /// Underlying matrix
    pub fn matrix(&self) -> &LorentzMatrix {
        &self.0
    }
}
//
impl Default for LorentzTransform {
    fn default() -> Self {
        Self::identity()
    }
}

/// Transformation conveniences that are directly available on 4-vectors
impl FourVector {
    /// Components in the frame that moves with velocity `beta` relative to
    /// the current one
    pub fn boost(&self, beta: &ThreeVector) -> Result<Self> {
        Ok(LorentzTransform::boost(beta)?.apply(self))
    }

    /// Components in the rest frame of a timelike 4-vector
    pub fn boost_to_rest_frame_of(&self, frame: &Self) -> Result<Self> {
        self.boost(&frame.beta_vector()?)
    }

    /// Components in the frame where a timelike 4-vector is at rest, given
    /// components in that vector's rest frame
    pub fn boost_from_rest_frame_of(&self, frame: &Self) -> Result<Self> {
        self.boost(&-frame.beta_vector()?)
    }

    /// Rotate the spatial part by `angle` radians around `axis`
    pub fn rotate(&self, axis: &ThreeVector, angle: Float) -> Result<Self> {
        Ok(LorentzTransform::rotation(axis, angle)?.apply(self))
    }

    /// Rotate around the x axis
    pub fn rotate_x(&self, angle: Float) -> Result<Self> {
        self.rotate(&ThreeVector::x(), angle)
    }

    /// Rotate around the y axis
    pub fn rotate_y(&self, angle: Float) -> Result<Self> {
        self.rotate(&ThreeVector::y(), angle)
    }

    /// Rotate around the z axis
    pub fn rotate_z(&self, angle: Float) -> Result<Self> {
        self.rotate(&ThreeVector::z(), angle)
    }

    /// Rotate by z-x-z Euler angles, see `LorentzTransform::euler`
    pub fn rotate_euler(&self, phi: Float, theta: Float, psi: Float) -> Result<Self> {
        Ok(LorentzTransform::euler(phi, theta, psi)?.apply(self))
    }
}
