//! Basic numerical concepts used throughout the crate

/// Floating-point type of every kinematic quantity
pub type Float = f64;
#[allow(missing_docs)]
pub use std::f64 as reals;

/// Mathematical functions
pub mod functions {
    pub use prefix_num_ops::real::*;

    /// Square of a number
    #[inline]
    pub fn sqr(x: super::Float) -> super::Float {
        x * x
    }

    /// Square root that keeps the sign of its argument, as done for the
    /// "mass" of spacelike four-vectors
    #[inline]
    pub fn signed_sqrt(x: super::Float) -> super::Float {
        if x >= 0. {
            sqrt(x)
        } else {
            -sqrt(-x)
        }
    }
}

/// Numerical tolerance used when comparing floating-point quantities
///
/// Two numbers match when their difference is below the absolute tolerance,
/// or below the relative tolerance scaled by the magnitude of the quantities
/// being compared.
///
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Tolerance {
    /// Absolute difference below which numbers always match
    pub absolute: Float,

    /// Difference allowed per unit of magnitude
    pub relative: Float,
}
//
impl Tolerance {
    /// Default relative tolerance of comparisons
    pub const DEFAULT_RELATIVE: Float = 1e-9;

    /// Tolerance with both an absolute and a relative component
    pub const fn new(absolute: Float, relative: Float) -> Self {
        Self { absolute, relative }
    }

    /// Purely relative tolerance
    pub const fn relative(relative: Float) -> Self {
        Self::new(0., relative)
    }

    /// Truth that two numbers match, using their own magnitude as a scale
    pub fn matches(&self, a: Float, b: Float) -> bool {
        self.matches_at_scale(a, b, a.abs().max(b.abs()))
    }

    /// Truth that two numbers match, given the magnitude of the quantity
    /// which they belong to (e.g. the largest component of a vector)
    pub fn matches_at_scale(&self, a: Float, b: Float, scale: Float) -> bool {
        // Also handles identical infinities, for which a - b is NaN
        if a == b {
            return true;
        }
        let diff = (a - b).abs();
        diff <= self.absolute || diff <= self.relative * scale
    }
}
//
impl Default for Tolerance {
    fn default() -> Self {
        Self::relative(Self::DEFAULT_RELATIVE)
    }
}

#[cfg(test)]
mod tests {
    use super::{functions::*, *};

    #[test]
    fn relative_tolerance() {
        let tol = Tolerance::relative(1e-6);
        assert!(tol.matches(1e6, 1e6 + 0.5));
        assert!(!tol.matches(1e6, 1e6 + 2.));
        assert!(!tol.matches(0., 1e-300));
        assert!(tol.matches(reals::INFINITY, reals::INFINITY));
        assert!(!tol.matches(reals::NAN, reals::NAN));
    }

    #[test]
    fn scaled_and_absolute_tolerance() {
        let tol = Tolerance::default();
        assert!(tol.matches_at_scale(1e-17, 0., 100.));
        assert!(!tol.matches_at_scale(1e-5, 0., 100.));
        assert!(Tolerance::new(1e-3, 0.).matches(0., 1e-4));
    }

    #[test]
    fn signed_square_root() {
        assert_eq!(signed_sqrt(4.), 2.);
        assert_eq!(signed_sqrt(-9.), -3.);
        assert_eq!(sqr(-3.), 9.);
    }
}
