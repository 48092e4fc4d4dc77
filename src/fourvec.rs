//! This module implements relativistic 4-vectors (4-momenta or 4-positions)
//!
//! A `FourVector` stores its four Cartesian components (E, px, py, pz) and
//! nothing else. Every other view of it (transverse momentum, pseudorapidity,
//! azimuthal angle, mass...) is computed on demand. Since components are never
//! mutated after construction, there is no cached state to invalidate.

use crate::{
    error::{Error, Result},
    linalg::{self, Components, ThreeVector, E, X, Y, Z},
    numeric::{functions::*, reals::consts::PI, Float, Tolerance},
};
use approx::{AbsDiffEq, RelativeEq};
use num_traits::Zero;
use std::{
    fmt::{self, Display},
    iter::Sum,
    ops::{Add, Div, Mul, Neg, Sub},
};

/// What to do with 4-vectors whose mass² is negative
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum SpacelikePolicy {
    /// Reject vectors whose mass² is below `-tolerance * (E² + |p|²)`
    ///
    /// The tolerance band lets nearly-massless detector objects through even
    /// when measurement or rounding errors made their mass² slightly negative.
    Reject {
        /// Relative width of the accepted band of negative mass²
        tolerance: Float,
    },

    /// Accept any finite vector
    Allow,
}

/// Rules applied when constructing 4-vectors from user input
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct KinematicsPolicy {
    /// Handling of spacelike vectors
    pub spacelike: SpacelikePolicy,
}
//
impl KinematicsPolicy {
    /// Default relative width of the band of accepted negative mass²
    pub const DEFAULT_SPACELIKE_TOLERANCE: Float = 1e-6;

    /// Reject spacelike vectors beyond a given relative tolerance
    pub const fn reject_spacelike(tolerance: Float) -> Self {
        Self {
            spacelike: SpacelikePolicy::Reject { tolerance },
        }
    }

    /// Accept spacelike vectors
    pub const fn allow_spacelike() -> Self {
        Self {
            spacelike: SpacelikePolicy::Allow,
        }
    }

    /// Check that some 4-vector components are acceptable
    fn check(&self, c: &Components) -> Result<()> {
        if c.iter().any(|x| !x.is_finite()) {
            return Err(Error::InvalidKinematics(format!(
                "non-finite component in [{}, {}, {}, {}]",
                c[E], c[X], c[Y], c[Z]
            )));
        }
        if let SpacelikePolicy::Reject { tolerance } = self.spacelike {
            let e2 = sqr(c[E]);
            let p2 = linalg::xyz(c).norm_squared();
            let m2 = e2 - p2;
            if m2 < -tolerance * (e2 + p2) {
                return Err(Error::InvalidKinematics(format!(
                    "mass² = {} is spacelike beyond tolerance (E = {}, |p| = {})",
                    m2,
                    c[E],
                    sqrt(p2)
                )));
            }
        }
        Ok(())
    }
}
//
impl Default for KinematicsPolicy {
    fn default() -> Self {
        Self::reject_spacelike(Self::DEFAULT_SPACELIKE_TOLERANCE)
    }
}

/// Fourth coordinate accompanying the three momentum coordinates of a
/// physics-coordinate construction
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Temporal {
    /// Invariant mass, the energy is derived from it
    Mass(Float),

    /// Energy, the mass is derived from it
    Energy(Float),
}

/// Relativistic 4-vector
#[derive(Clone, Copy, Debug)]
pub struct FourVector {
    c: Components,
}
//
impl FourVector {
    // ### CONSTRUCTION ###

    /// Build from Cartesian components, rejecting spacelike vectors beyond
    /// the default tolerance
    pub fn from_cartesian(e: Float, px: Float, py: Float, pz: Float) -> Result<Self> {
        Self::from_cartesian_with(e, px, py, pz, &KinematicsPolicy::default())
    }

    /// Build from Cartesian components, with explicit validation rules
    pub fn from_cartesian_with(
        e: Float,
        px: Float,
        py: Float,
        pz: Float,
        policy: &KinematicsPolicy,
    ) -> Result<Self> {
        let c = Components::new(e, px, py, pz);
        policy.check(&c)?;
        Ok(Self { c })
    }

    /// Build from the three momentum components and the invariant mass
    pub fn from_momentum_and_mass(px: Float, py: Float, pz: Float, m: Float) -> Result<Self> {
        check_mass(m)?;
        let e = sqrt(sqr(px) + sqr(py) + sqr(pz) + sqr(m));
        Self::from_cartesian(e, px, py, pz)
    }

    /// Build from collider coordinates (pt, eta, phi) plus mass or energy
    pub fn from_coordinates(pt: Float, eta: Float, phi: Float, temporal: Temporal) -> Result<Self> {
        Self::from_coordinates_with(pt, eta, phi, temporal, &KinematicsPolicy::default())
    }

    /// Build from collider coordinates, with explicit validation rules
    pub fn from_coordinates_with(
        pt: Float,
        eta: Float,
        phi: Float,
        temporal: Temporal,
        policy: &KinematicsPolicy,
    ) -> Result<Self> {
        check_pt(pt)?;
        check_finite("eta", eta)?;
        check_finite("phi", phi)?;
        let pz = pt * eta.sinh();
        let p = pt * eta.cosh();
        Self::from_polar(pt, phi, pz, p, temporal, policy)
    }

    /// Build from transverse momentum, polar angle, azimuthal angle, plus mass
    /// or energy
    ///
    /// The polar angle must lie strictly between 0 and π, otherwise the
    /// longitudinal momentum would be infinite.
    ///
    pub fn from_pt_theta_phi(pt: Float, theta: Float, phi: Float, temporal: Temporal) -> Result<Self> {
        Self::from_pt_theta_phi_with(pt, theta, phi, temporal, &KinematicsPolicy::default())
    }

    /// Build from polar coordinates, with explicit validation rules
    pub fn from_pt_theta_phi_with(
        pt: Float,
        theta: Float,
        phi: Float,
        temporal: Temporal,
        policy: &KinematicsPolicy,
    ) -> Result<Self> {
        check_pt(pt)?;
        check_finite("phi", phi)?;
        if !(theta > 0. && theta < PI) {
            return Err(Error::InvalidKinematics(format!(
                "polar angle {} is outside of ]0, π[",
                theta
            )));
        }
        let pz = pt * cos(theta) / sin(theta);
        let p = pt / sin(theta);
        Self::from_polar(pt, phi, pz, p, temporal, policy)
    }

    /// Common tail of the physics-coordinate constructors
    fn from_polar(
        pt: Float,
        phi: Float,
        pz: Float,
        p: Float,
        temporal: Temporal,
        policy: &KinematicsPolicy,
    ) -> Result<Self> {
        let e = match temporal {
            Temporal::Mass(m) => {
                check_mass(m)?;
                sqrt(sqr(p) + sqr(m))
            }
            Temporal::Energy(e) => e,
        };
        Self::from_cartesian_with(e, pt * cos(phi), pt * sin(phi), pz, policy)
    }

    /// Build from a sequence of numbers in [E, px, py, pz] order
    pub fn from_slice(components: &[Float]) -> Result<Self> {
        Self::from_slice_with(components, &KinematicsPolicy::default())
    }

    /// Build from a sequence of numbers in [E, px, py, pz] order, with
    /// explicit validation rules
    pub fn from_slice_with(components: &[Float], policy: &KinematicsPolicy) -> Result<Self> {
        match *components {
            [e, px, py, pz] => Self::from_cartesian_with(e, px, py, pz, policy),
            _ => Err(Error::InvalidKinematics(format!(
                "expected 4 components [E, px, py, pz], got {}",
                components.len()
            ))),
        }
    }

    /// Build a batch of vectors from a flat sequence of [E, px, py, pz]
    /// quadruplets
    pub fn batch_from_flat(flat: &[Float], policy: &KinematicsPolicy) -> Result<Vec<Self>> {
        if flat.len() % 4 != 0 {
            return Err(Error::InvalidKinematics(format!(
                "flat 4-vector input has {} numbers, which is not a multiple of 4",
                flat.len()
            )));
        }
        flat.chunks_exact(4)
            .map(|quad| Self::from_slice_with(quad, policy))
            .collect()
    }

    /// The null 4-vector
    pub fn zero() -> Self {
        Self {
            c: Components::zeros(),
        }
    }

    /// Wrap raw components that result from an algebraic operation
    ///
    /// Differences of physical 4-momenta are legitimately spacelike, so only
    /// direct user input goes through validation.
    ///
    pub(crate) fn from_components(c: Components) -> Self {
        Self { c }
    }

    // ### CARTESIAN COMPONENTS ###

    /// Energy (time component)
    #[inline]
    pub fn e(&self) -> Float {
        self.c[E]
    }

    /// X component of the momentum
    #[inline]
    pub fn px(&self) -> Float {
        self.c[X]
    }

    /// Y component of the momentum
    #[inline]
    pub fn py(&self) -> Float {
        self.c[Y]
    }

    /// Z component of the momentum (along the beam axis)
    #[inline]
    pub fn pz(&self) -> Float {
        self.c[Z]
    }

    /// Underlying component vector
    pub fn components(&self) -> &Components {
        &self.c
    }

    /// Components in canonical [E, px, py, pz] order
    pub fn to_array(&self) -> [Float; 4] {
        [self.e(), self.px(), self.py(), self.pz()]
    }

    /// Spatial part (3-momentum)
    pub fn p3(&self) -> ThreeVector {
        linalg::xyz(&self.c)
    }

    // ### DERIVED QUANTITIES ###

    /// Squared magnitude of the 3-momentum
    pub fn p2(&self) -> Float {
        self.p3().norm_squared()
    }

    /// Magnitude of the 3-momentum
    pub fn p(&self) -> Float {
        sqrt(self.p2())
    }

    /// Squared transverse momentum
    pub fn pt2(&self) -> Float {
        sqr(self.px()) + sqr(self.py())
    }

    /// Transverse momentum
    pub fn pt(&self) -> Float {
        self.px().hypot(self.py())
    }

    /// Invariant mass squared, E² - |p|²
    pub fn m2(&self) -> Float {
        self.dot(self)
    }

    /// Invariant mass
    ///
    /// Following the usual convention of collider physics software, spacelike
    /// vectors get a negative mass -√(-m²).
    ///
    pub fn m(&self) -> Float {
        signed_sqrt(self.m2())
    }

    /// Transverse mass squared, E² - pz²
    pub fn mt2(&self) -> Float {
        sqr(self.e()) - sqr(self.pz())
    }

    /// Transverse mass, negative when E² < pz²
    pub fn mt(&self) -> Float {
        signed_sqrt(self.mt2())
    }

    /// Transverse energy E·sin(θ), zero for a vector at rest
    pub fn et(&self) -> Float {
        let p = self.p();
        if p == 0. {
            0.
        } else {
            self.e() * self.pt() / p
        }
    }

    /// Pseudorapidity -ln(tan(θ/2))
    pub fn eta(&self) -> Result<Float> {
        let pt = self.pt();
        if pt == 0. {
            return Err(Error::undefined("eta", "transverse momentum is zero"));
        }
        Ok((self.pz() / pt).asinh())
    }

    /// Azimuthal angle in ]-π, π]
    pub fn phi(&self) -> Result<Float> {
        if self.pt2() == 0. {
            return Err(Error::undefined("phi", "transverse momentum is zero"));
        }
        Ok(self.py().atan2(self.px()))
    }

    /// Polar angle with respect to the beam (z) axis, in [0, π]
    pub fn theta(&self) -> Result<Float> {
        if self.p2() == 0. {
            return Err(Error::undefined("theta", "3-momentum is zero"));
        }
        Ok(self.pt().atan2(self.pz()))
    }

    /// Rapidity ½·ln((E + pz) / (E - pz))
    pub fn rapidity(&self) -> Result<Float> {
        let (e, pz) = (self.e(), self.pz());
        if e <= pz.abs() {
            return Err(Error::undefined("rapidity", "|pz| is not smaller than E"));
        }
        Ok(0.5 * ln((e + pz) / (e - pz)))
    }

    /// Speed |p| / E, in units of c
    pub fn beta(&self) -> Result<Float> {
        Ok(self.beta_vector()?.norm())
    }

    /// Velocity p / E, in units of c
    pub fn beta_vector(&self) -> Result<ThreeVector> {
        if self.e() == 0. {
            return Err(Error::undefined("beta", "energy is zero"));
        }
        Ok(self.p3() / self.e())
    }

    /// Lorentz factor E / m
    pub fn gamma(&self) -> Result<Float> {
        let m2 = self.m2();
        if m2 <= 0. {
            return Err(Error::undefined("gamma", "vector is not timelike"));
        }
        Ok(self.e() / sqrt(m2))
    }

    // ### PAIRWISE QUANTITIES ###

    /// Lorentz-invariant scalar product, with (+, -, -, -) metric
    pub fn dot(&self, other: &Self) -> Float {
        self.e() * other.e() - self.p3().dot(&other.p3())
    }

    /// Azimuthal separation with another vector, in ]-π, π]
    pub fn delta_phi(&self, other: &Self) -> Result<Float> {
        let mut dphi = self.phi()? - other.phi()?;
        if dphi > PI {
            dphi -= 2. * PI;
        } else if dphi <= -PI {
            dphi += 2. * PI;
        }
        Ok(dphi)
    }

    /// Angular separation √(Δη² + Δφ²) with another vector
    pub fn delta_r(&self, other: &Self) -> Result<Float> {
        let deta = self.eta()? - other.eta()?;
        let dphi = self.delta_phi(other)?;
        Ok(deta.hypot(dphi))
    }

    /// Cosine of the opening angle between the 3-momenta of two vectors
    pub fn cos_angle(&self, other: &Self) -> Result<Float> {
        let norms = self.p() * other.p();
        if norms == 0. {
            return Err(Error::undefined("opening angle", "3-momentum is zero"));
        }
        Ok(self.p3().dot(&other.p3()) / norms)
    }

    /// Space-inverted copy (E, -p)
    pub fn parity(&self) -> Self {
        Self::from_components(Components::new(self.e(), -self.px(), -self.py(), -self.pz()))
    }

    // ### COMPARISON ###

    /// Truth that two vectors are equal within some tolerance
    ///
    /// The relative tolerance is scaled by the largest component of either
    /// vector, so that small components are not held to an unreachable
    /// standard of relative precision.
    ///
    pub fn approx_eq(&self, other: &Self, tolerance: Tolerance) -> bool {
        let scale = self.c.amax().max(other.c.amax());
        self.c
            .iter()
            .zip(other.c.iter())
            .all(|(&a, &b)| tolerance.matches_at_scale(a, b, scale))
    }
}

/// Check a user-provided mass
fn check_mass(m: Float) -> Result<()> {
    if !(m.is_finite() && m >= 0.) {
        return Err(Error::InvalidKinematics(format!(
            "mass must be finite and non-negative, got {}",
            m
        )));
    }
    Ok(())
}

/// Check a user-provided transverse momentum
fn check_pt(pt: Float) -> Result<()> {
    if !(pt.is_finite() && pt >= 0.) {
        return Err(Error::InvalidKinematics(format!(
            "transverse momentum must be finite and non-negative, got {}",
            pt
        )));
    }
    Ok(())
}

/// Check that a user-provided coordinate is finite
fn check_finite(name: &str, x: Float) -> Result<()> {
    if !x.is_finite() {
        return Err(Error::InvalidKinematics(format!(
            "{} must be finite, got {}",
            name, x
        )));
    }
    Ok(())
}

/// Equality within the default tolerance (see `FourVector::approx_eq`)
///
/// Like any tolerance-based comparison, this equality is not transitive.
///
impl PartialEq for FourVector {
    fn eq(&self, other: &Self) -> bool {
        self.approx_eq(other, Tolerance::default())
    }
}

impl AbsDiffEq for FourVector {
    type Epsilon = Float;

    fn default_epsilon() -> Self::Epsilon {
        Float::default_epsilon()
    }

    fn abs_diff_eq(&self, other: &Self, epsilon: Self::Epsilon) -> bool {
        self.c.abs_diff_eq(&other.c, epsilon)
    }
}

impl RelativeEq for FourVector {
    fn default_max_relative() -> Self::Epsilon {
        Float::default_max_relative()
    }

    fn relative_eq(&self, other: &Self, epsilon: Self::Epsilon, max_relative: Self::Epsilon) -> bool {
        self.c.relative_eq(&other.c, epsilon, max_relative)
    }
}

impl Display for FourVector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}; {}, {}, {}]", self.e(), self.px(), self.py(), self.pz())
    }
}

impl From<FourVector> for [Float; 4] {
    fn from(v: FourVector) -> Self {
        v.to_array()
    }
}

impl TryFrom<[Float; 4]> for FourVector {
    type Error = Error;

    fn try_from(c: [Float; 4]) -> Result<Self> {
        Self::from_slice(&c[..])
    }
}

// ### ARITHMETIC ###

/// Implement a binary operator between 4-vectors for every combination of
/// owned and borrowed operands
macro_rules! impl_vector_op {
    ($trait:ident, $method:ident, $op:tt) => {
        impl $trait<&FourVector> for &FourVector {
            type Output = FourVector;
            fn $method(self, rhs: &FourVector) -> FourVector {
                FourVector::from_components(self.c $op rhs.c)
            }
        }
        impl $trait<FourVector> for FourVector {
            type Output = FourVector;
            fn $method(self, rhs: FourVector) -> FourVector {
                &self $op &rhs
            }
        }
        impl $trait<&FourVector> for FourVector {
            type Output = FourVector;
            fn $method(self, rhs: &FourVector) -> FourVector {
                &self $op rhs
            }
        }
        impl $trait<FourVector> for &FourVector {
            type Output = FourVector;
            fn $method(self, rhs: FourVector) -> FourVector {
                self $op &rhs
            }
        }
    };
}
impl_vector_op!(Add, add, +);
impl_vector_op!(Sub, sub, -);

impl Neg for FourVector {
    type Output = FourVector;
    fn neg(self) -> FourVector {
        FourVector::from_components(-self.c)
    }
}

impl Neg for &FourVector {
    type Output = FourVector;
    fn neg(self) -> FourVector {
        -*self
    }
}

impl Mul<Float> for FourVector {
    type Output = FourVector;
    fn mul(self, rhs: Float) -> FourVector {
        FourVector::from_components(self.c * rhs)
    }
}

impl Mul<Float> for &FourVector {
    type Output = FourVector;
    fn mul(self, rhs: Float) -> FourVector {
        *self * rhs
    }
}

impl Mul<FourVector> for Float {
    type Output = FourVector;
    fn mul(self, rhs: FourVector) -> FourVector {
        rhs * self
    }
}

impl Mul<&FourVector> for Float {
    type Output = FourVector;
    fn mul(self, rhs: &FourVector) -> FourVector {
        *rhs * self
    }
}

impl Div<Float> for FourVector {
    type Output = FourVector;
    fn div(self, rhs: Float) -> FourVector {
        FourVector::from_components(self.c / rhs)
    }
}

impl Sum for FourVector {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::zero(), |acc, v| acc + v)
    }
}

impl<'a> Sum<&'a FourVector> for FourVector {
    fn sum<I: Iterator<Item = &'a Self>>(iter: I) -> Self {
        iter.fold(Self::zero(), |acc, v| acc + v)
    }
}

impl Zero for FourVector {
    fn zero() -> Self {
        FourVector::zero()
    }

    fn is_zero(&self) -> bool {
        self.c.iter().all(|x| *x == 0.)
    }
}
