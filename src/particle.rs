//! Physics objects: a 4-momentum tagged with identity metadata

use crate::{
    error::{Error, Result},
    fourvec::FourVector,
    numeric::Float,
    pdg,
};
use std::fmt::{self, Display};

/// A particle or reconstructed physics object
///
/// The identity metadata never alters the kinematics. Particles are built
/// once with the `with_*` builder methods and never mutated afterwards.
///
#[derive(Clone, Debug, PartialEq)]
pub struct Particle {
    /// Measured 4-momentum
    momentum: FourVector,

    /// PDG species code, if known
    species: Option<i32>,

    /// Electric charge in units of the positron charge
    charge: Float,

    /// Generator status code, for generator-level particles
    status: Option<i32>,

    /// Isolation variable, for reconstructed leptons
    isolation: Option<Float>,

    /// Free-form label
    tag: Option<String>,

    /// Numeric identifier
    id: Option<u64>,
}
//
impl Particle {
    // ### CONSTRUCTION ###

    /// Particle with a given 4-momentum and no identity information
    pub fn new(momentum: FourVector) -> Self {
        Self {
            momentum,
            species: None,
            charge: 0.,
            status: None,
            isolation: None,
            tag: None,
            id: None,
        }
    }

    /// Charged lepton of a given species, whose charge must be ±1
    pub fn lepton(momentum: FourVector, species: i32, charge: Float) -> Result<Self> {
        if charge.abs() != 1. {
            return Err(Error::InvalidKinematics(format!(
                "lepton charge must be +1 or -1, got {}",
                charge
            )));
        }
        Ok(Self::new(momentum).with_species(species).with_charge(charge))
    }

    /// Electron (charge -1) or positron (charge +1)
    pub fn electron(momentum: FourVector, charge: Float) -> Result<Self> {
        Self::lepton(momentum, signed_code(pdg::ELECTRON, charge), charge)
    }

    /// Muon (charge -1) or antimuon (charge +1)
    pub fn muon(momentum: FourVector, charge: Float) -> Result<Self> {
        Self::lepton(momentum, signed_code(pdg::MUON, charge), charge)
    }

    /// Set the PDG species code
    pub fn with_species(mut self, species: i32) -> Self {
        self.species = Some(species);
        self
    }

    /// Set the electric charge
    pub fn with_charge(mut self, charge: Float) -> Self {
        self.charge = charge;
        self
    }

    /// Set the generator status code
    pub fn with_status(mut self, status: i32) -> Self {
        self.status = Some(status);
        self
    }

    /// Set the isolation variable
    pub fn with_isolation(mut self, isolation: Float) -> Self {
        self.isolation = Some(isolation);
        self
    }

    /// Set the free-form label
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(tag.into());
        self
    }

    /// Set the numeric identifier
    pub fn with_id(mut self, id: u64) -> Self {
        self.id = Some(id);
        self
    }

    /// Copy of this particle whose energy is recomputed from the measured
    /// 3-momentum and a mass hypothesis
    ///
    /// Useful when the energy measurement is poor but the direction and
    /// momentum magnitude are trustworthy. The original particle is unchanged.
    ///
    pub fn with_mass_hypothesis(&self, mass: Float) -> Result<Self> {
        let p = &self.momentum;
        let momentum = FourVector::from_momentum_and_mass(p.px(), p.py(), p.pz(), mass)?;
        Ok(Self {
            momentum,
            ..self.clone()
        })
    }

    // ### IDENTITY ###

    /// PDG species code
    pub fn species(&self) -> Option<i32> {
        self.species
    }

    /// Absolute value of the PDG species code, which ignores the
    /// particle/antiparticle distinction
    pub fn abs_species(&self) -> Option<i32> {
        self.species.map(i32::abs)
    }

    /// Electric charge
    pub fn charge(&self) -> Float {
        self.charge
    }

    /// Generator status code
    pub fn status(&self) -> Option<i32> {
        self.status
    }

    /// Isolation variable
    pub fn isolation(&self) -> Option<Float> {
        self.isolation
    }

    /// Free-form label
    pub fn tag(&self) -> Option<&str> {
        self.tag.as_deref()
    }

    /// Numeric identifier
    pub fn id(&self) -> Option<u64> {
        self.id
    }

    /// Truth that this is a (possibly anti-) neutrino
    pub fn is_neutrino(&self) -> bool {
        self.species.map_or(false, pdg::is_neutrino)
    }

    // ### KINEMATICS ###

    /// 4-momentum
    pub fn momentum(&self) -> &FourVector {
        &self.momentum
    }

    /// Energy
    pub fn e(&self) -> Float {
        self.momentum.e()
    }

    /// Transverse momentum
    pub fn pt(&self) -> Float {
        self.momentum.pt()
    }

    /// Magnitude of the 3-momentum
    pub fn p(&self) -> Float {
        self.momentum.p()
    }

    /// Invariant mass derived from the measured 4-momentum
    pub fn m(&self) -> Float {
        self.momentum.m()
    }

    /// Pseudorapidity
    pub fn eta(&self) -> Result<Float> {
        self.momentum.eta()
    }

    /// Azimuthal angle
    pub fn phi(&self) -> Result<Float> {
        self.momentum.phi()
    }

    /// Rapidity
    pub fn rapidity(&self) -> Result<Float> {
        self.momentum.rapidity()
    }

    /// Copy of this particle with its 4-momentum transformed by `f`
    pub(crate) fn map_momentum(
        &self,
        f: impl FnOnce(&FourVector) -> Result<FourVector>,
    ) -> Result<Self> {
        Ok(Self {
            momentum: f(&self.momentum)?,
            ..self.clone()
        })
    }
}

/// Species code of a particle (negative charge) or antiparticle
fn signed_code(code: i32, charge: Float) -> i32 {
    if charge > 0. {
        -code
    } else {
        code
    }
}

impl From<FourVector> for Particle {
    fn from(momentum: FourVector) -> Self {
        Self::new(momentum)
    }
}

impl Display for Particle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.species {
            Some(species) => write!(f, "{:>6}", species)?,
            None => write!(f, "{:>6}", "?")?,
        }
        write!(f, " q={:+} {}", self.charge, self.momentum)?;
        if let Some(tag) = &self.tag {
            write!(f, " ({})", tag)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn p4(e: Float, px: Float, py: Float, pz: Float) -> FourVector {
        FourVector::from_cartesian(e, px, py, pz).unwrap()
    }

    #[test]
    fn identity_defaults() {
        let p = Particle::new(p4(10., 1., 2., 3.));
        assert_eq!(p.species(), None);
        assert_eq!(p.charge(), 0.);
        assert_eq!(p.tag(), None);
        assert!(!p.is_neutrino());
        assert_relative_eq!(p.m(), p.momentum().m());
    }

    #[test]
    fn leptons() {
        let electron = Particle::electron(p4(10., 1., 2., 3.), -1.).unwrap();
        assert_eq!(electron.species(), Some(pdg::ELECTRON));
        let positron = Particle::electron(p4(10., 1., 2., 3.), 1.).unwrap();
        assert_eq!(positron.species(), Some(-pdg::ELECTRON));
        assert_eq!(positron.abs_species(), Some(pdg::ELECTRON));

        let muon = Particle::muon(p4(10., 1., 2., 3.), 1.)
            .unwrap()
            .with_isolation(0.05);
        assert_eq!(muon.species(), Some(-pdg::MUON));
        assert_eq!(muon.isolation(), Some(0.05));

        assert!(matches!(
            Particle::lepton(p4(10., 1., 2., 3.), pdg::TAU, 0.),
            Err(Error::InvalidKinematics(_))
        ));
    }

    #[test]
    fn mass_hypothesis_does_not_mutate() {
        let measured = Particle::new(p4(10., 3., 4., 0.))
            .with_species(pdg::MUON)
            .with_tag("loose")
            .with_id(7);
        let hypothesis = measured.with_mass_hypothesis(0.105_658).unwrap();
        assert_eq!(measured.e(), 10.);
        assert_relative_eq!(hypothesis.m(), 0.105_658, max_relative = 1e-9);
        assert_eq!(hypothesis.momentum().p3(), measured.momentum().p3());
        assert_eq!(hypothesis.tag(), Some("loose"));
        assert_eq!(hypothesis.id(), Some(7));
        assert!(measured.with_mass_hypothesis(-1.).is_err());
    }

    #[test]
    fn neutrinos() {
        let nu = Particle::new(p4(5., 3., 4., 0.)).with_species(-pdg::MUON_NEUTRINO);
        assert!(nu.is_neutrino());
        let gen = nu.clone().with_status(1);
        assert_eq!(gen.status(), Some(1));
    }
}
