//! Particle Data Group species codes used by the event model
//!
//! Antiparticles carry the negated code of their particle.

/// Electron (e-)
pub const ELECTRON: i32 = 11;

/// Electron neutrino
pub const ELECTRON_NEUTRINO: i32 = 12;

/// Muon (mu-)
pub const MUON: i32 = 13;

/// Muon neutrino
pub const MUON_NEUTRINO: i32 = 14;

/// Tau lepton (tau-)
pub const TAU: i32 = 15;

/// Tau neutrino
pub const TAU_NEUTRINO: i32 = 16;

/// Photon
pub const PHOTON: i32 = 22;

/// Truth that a species code denotes a neutrino or antineutrino
pub fn is_neutrino(code: i32) -> bool {
    matches!(code.abs(), ELECTRON_NEUTRINO | MUON_NEUTRINO | TAU_NEUTRINO)
}

/// Truth that a species code denotes a charged lepton or antilepton
pub fn is_charged_lepton(code: i32) -> bool {
    matches!(code.abs(), ELECTRON | MUON | TAU)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification() {
        assert!(is_neutrino(12) && is_neutrino(-14) && is_neutrino(16));
        assert!(!is_neutrino(ELECTRON) && !is_neutrino(PHOTON));
        assert!(is_charged_lepton(-MUON) && !is_charged_lepton(TAU_NEUTRINO));
    }
}
