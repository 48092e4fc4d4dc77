//! Mechanism to apply a cut to reconstructed particles

use crate::{numeric::Float, particle::Particle};

/// Kinematic and identity cuts on particles
///
/// Unset cuts always pass. A particle whose pseudorapidity is undefined
/// (zero transverse momentum) fails any pseudorapidity cut.
///
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ParticleCut {
    /// Cut on minimum transverse momentum
    pub pt_min: Option<Float>,

    /// Cut on maximum absolute pseudorapidity
    pub abs_eta_max: Option<Float>,

    /// Accepted species codes, compared in absolute value
    pub species: Option<Vec<i32>>,
}
//
impl ParticleCut {
    /// Cut which accepts everything
    pub fn new() -> Self {
        Self::default()
    }

    /// Require a minimal transverse momentum
    pub fn with_pt_min(mut self, pt_min: Float) -> Self {
        self.pt_min = Some(pt_min);
        self
    }

    /// Require a maximal absolute pseudorapidity
    pub fn with_abs_eta_max(mut self, abs_eta_max: Float) -> Self {
        self.abs_eta_max = Some(abs_eta_max);
        self
    }

    /// Only accept some species (and their antiparticles)
    pub fn with_species(mut self, species: impl IntoIterator<Item = i32>) -> Self {
        self.species = Some(species.into_iter().map(i32::abs).collect());
        self
    }

    /// Decide whether a particle passes the cut or should be rejected
    pub fn keep(&self, particle: &Particle) -> bool {
        // Check the species first, it's cheapest
        if let Some(accepted) = &self.species {
            match particle.abs_species() {
                Some(code) if accepted.contains(&code) => {}
                _ => return false,
            }
        }

        // Check the transverse momentum cut
        if let Some(pt_min) = self.pt_min {
            if particle.pt() < pt_min {
                return false;
            }
        }

        // Check the pseudorapidity cut
        if let Some(abs_eta_max) = self.abs_eta_max {
            match particle.eta() {
                Ok(eta) if eta.abs() <= abs_eta_max => {}
                _ => return false,
            }
        }
        true
    }

    /// Use this cut as a selection predicate
    pub fn predicate(&self) -> impl Fn(&Particle) -> bool + '_ {
        move |p| self.keep(p)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        event::Event,
        fourvec::{FourVector, Temporal},
        pdg,
    };

    fn particle(pt: Float, eta: Float, species: i32) -> Particle {
        Particle::new(FourVector::from_coordinates(pt, eta, 0.3, Temporal::Mass(0.)).unwrap())
            .with_species(species)
    }

    #[test]
    fn unset_cut_keeps_everything() {
        let beam = FourVector::from_cartesian(5., 0., 0., 5.).unwrap();
        assert!(ParticleCut::new().keep(&Particle::new(beam)));
    }

    #[test]
    fn kinematic_cuts() {
        let cut = ParticleCut::new().with_pt_min(20.).with_abs_eta_max(2.5);
        assert!(cut.keep(&particle(25., -2., pdg::PHOTON)));
        assert!(!cut.keep(&particle(15., 0., pdg::PHOTON)));
        assert!(!cut.keep(&particle(25., 3., pdg::PHOTON)));

        // Undefined pseudorapidity never passes silently
        let beam = FourVector::from_cartesian(5., 0., 0., 5.).unwrap();
        let eta_only = ParticleCut::new().with_abs_eta_max(2.5);
        assert!(!eta_only.keep(&Particle::new(beam)));
    }

    #[test]
    fn species_cut_as_predicate() {
        let event = Event::from_particles(vec![
            particle(25., 0., pdg::ELECTRON),
            particle(30., 1., -pdg::MUON),
            particle(35., 1., pdg::PHOTON),
            particle(5., 1., pdg::MUON),
        ]);
        let cut = ParticleCut::new()
            .with_species([pdg::ELECTRON, pdg::MUON])
            .with_pt_min(10.);
        let selected = event.select(cut.predicate());
        let pts: Vec<_> = selected.iter().map(|p| p.pt().round()).collect();
        assert_eq!(pts, vec![25., 30.]);
    }
}
