//! This module defines the properties and storage of physics events

use crate::{
    error::{Error, Result},
    fourvec::FourVector,
    linalg::Components,
    numeric::Float,
    particle::Particle,
    pdg,
};
use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    fmt::{self, Display},
};

/// Value of a named event tag
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum Scalar {
    /// Integer value
    Int(i64),
    /// Floating-point value
    Float(Float),
    /// Boolean flag
    Bool(bool),
    /// Text, e.g. a generator comment
    Text(String),
}

impl Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scalar::Int(i) => write!(f, "{}", i),
            Scalar::Float(x) => write!(f, "{}", x),
            Scalar::Bool(b) => write!(f, "{}", b),
            Scalar::Text(s) => write!(f, "{:?}", s),
        }
    }
}

impl From<i64> for Scalar {
    fn from(i: i64) -> Self {
        Scalar::Int(i)
    }
}

impl From<Float> for Scalar {
    fn from(x: Float) -> Self {
        Scalar::Float(x)
    }
}

impl From<bool> for Scalar {
    fn from(b: bool) -> Self {
        Scalar::Bool(b)
    }
}

impl From<&str> for Scalar {
    fn from(s: &str) -> Self {
        Scalar::Text(s.to_owned())
    }
}

impl From<String> for Scalar {
    fn from(s: String) -> Self {
        Scalar::Text(s)
    }
}

/// Event-level metadata
///
/// Every field is optional. Reading an unset field through the `Event`
/// accessors is an error, never a silent default.
///
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Attributes {
    /// Statistical weight of the event
    pub weight: Option<Float>,

    /// Data-taking run number
    pub run_number: Option<u64>,

    /// Event number within the run
    pub event_number: Option<u64>,

    /// Arbitrary named tags
    pub tags: BTreeMap<String, Scalar>,
}

/// Storage for physics event data
///
/// Particles are kept in insertion order, which is the physical enumeration
/// order (e.g. detector order). Derived quantities are always recomputed from
/// the current particle list.
///
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Event {
    /// Particles, in enumeration order
    particles: Vec<Particle>,

    /// Event-level metadata
    attributes: Attributes,
}
//
impl Event {
    // ### CONSTRUCTION ###

    /// Build an empty event
    pub fn new() -> Self {
        Self::default()
    }

    /// Build an event from a complete list of particles
    pub fn from_particles(particles: Vec<Particle>) -> Self {
        Self {
            particles,
            attributes: Attributes::default(),
        }
    }

    /// Build an event from its constituents
    pub fn from_parts(particles: Vec<Particle>, attributes: Attributes) -> Self {
        Self {
            particles,
            attributes,
        }
    }

    /// Append a particle (no deduplication is performed)
    pub fn add(&mut self, particle: Particle) {
        self.particles.push(particle);
    }

    /// Builder flavor of `add`
    pub fn with_particle(mut self, particle: Particle) -> Self {
        self.add(particle);
        self
    }

    // ### PARTICLES ###

    /// Access the particles, in enumeration order
    pub fn particles(&self) -> &[Particle] {
        &self.particles[..]
    }

    /// Number of particles
    pub fn len(&self) -> usize {
        self.particles.len()
    }

    /// Truth that the event holds no particle
    pub fn is_empty(&self) -> bool {
        self.particles.is_empty()
    }

    /// Lazily select the particles which satisfy a predicate, preserving
    /// their order
    pub fn select<P>(&self, predicate: P) -> Selection<'_, Particle, P>
    where
        P: Fn(&Particle) -> bool,
    {
        Selection::new(self.particles(), predicate)
    }

    /// Particles whose species code matches `code` in absolute value, that
    /// is particles of that species and their antiparticles
    pub fn particles_with_species(
        &self,
        code: i32,
    ) -> Selection<'_, Particle, impl Fn(&Particle) -> bool> {
        let code = code.abs();
        self.select(move |p| p.abs_species() == Some(code))
    }

    /// Electrons and positrons
    pub fn electrons(&self) -> Selection<'_, Particle, impl Fn(&Particle) -> bool> {
        self.particles_with_species(pdg::ELECTRON)
    }

    /// Muons and antimuons
    pub fn muons(&self) -> Selection<'_, Particle, impl Fn(&Particle) -> bool> {
        self.particles_with_species(pdg::MUON)
    }

    // ### DERIVED QUANTITIES ###

    /// Vector sum of every particle's 4-momentum
    pub fn total_momentum(&self) -> FourVector {
        self.particles.iter().map(Particle::momentum).sum()
    }

    /// Missing transverse momentum, as a massless 4-vector in the transverse
    /// plane (beam along z)
    ///
    /// This is minus the transverse momentum sum of the particles which are
    /// deemed visible by the caller-provided predicate.
    ///
    pub fn missing_momentum(&self, visible: impl Fn(&Particle) -> bool) -> FourVector {
        let (px, py) = self
            .particles
            .iter()
            .filter(|p| visible(p))
            .fold((0., 0.), |(px, py), p| {
                (px - p.momentum().px(), py - p.momentum().py())
            });
        FourVector::from_components(Components::new(px.hypot(py), px, py, 0.))
    }

    /// Missing transverse energy, i.e. magnitude of the missing transverse
    /// momentum
    pub fn missing_et(&self, visible: impl Fn(&Particle) -> bool) -> Float {
        self.missing_momentum(visible).pt()
    }

    /// Missing transverse momentum, treating only neutrinos as invisible
    pub fn missing_momentum_default(&self) -> FourVector {
        self.missing_momentum(|p| !p.is_neutrino())
    }

    /// Copy of this event with every particle boosted into the rest frame of
    /// some 4-vector
    pub fn boost_to_rest_frame_of(&self, frame: &FourVector) -> Result<Self> {
        let particles = self
            .particles
            .iter()
            .map(|p| p.map_momentum(|v| v.boost_to_rest_frame_of(frame)))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            particles,
            attributes: self.attributes.clone(),
        })
    }

    // ### ATTRIBUTES ###

    /// Access all event-level metadata
    pub fn attributes(&self) -> &Attributes {
        &self.attributes
    }

    /// Statistical weight
    pub fn weight(&self) -> Result<Float> {
        self.attributes.weight.ok_or_else(|| missing("weight"))
    }

    /// Run number
    pub fn run_number(&self) -> Result<u64> {
        self.attributes.run_number.ok_or_else(|| missing("run_number"))
    }

    /// Event number
    pub fn event_number(&self) -> Result<u64> {
        self.attributes
            .event_number
            .ok_or_else(|| missing("event_number"))
    }

    /// Named tag
    pub fn tag(&self, name: &str) -> Result<&Scalar> {
        self.attributes
            .tags
            .get(name)
            .ok_or_else(|| missing(&format!("tag {:?}", name)))
    }

    /// Set the statistical weight
    pub fn set_weight(&mut self, weight: Float) {
        self.attributes.weight = Some(weight);
    }

    /// Set the run number
    pub fn set_run_number(&mut self, run_number: u64) {
        self.attributes.run_number = Some(run_number);
    }

    /// Set the event number
    pub fn set_event_number(&mut self, event_number: u64) {
        self.attributes.event_number = Some(event_number);
    }

    /// Set a named tag, returning its previous value if any
    pub fn set_tag(&mut self, name: impl Into<String>, value: impl Into<Scalar>) -> Option<Scalar> {
        self.attributes.tags.insert(name.into(), value.into())
    }

    /// Builder flavor of `set_weight`
    pub fn with_weight(mut self, weight: Float) -> Self {
        self.set_weight(weight);
        self
    }

    /// Builder flavor of `set_run_number` and `set_event_number`
    pub fn with_numbers(mut self, run_number: u64, event_number: u64) -> Self {
        self.set_run_number(run_number);
        self.set_event_number(event_number);
        self
    }

    /// Builder flavor of `set_tag`
    pub fn with_tag(mut self, name: impl Into<String>, value: impl Into<Scalar>) -> Self {
        self.set_tag(name, value);
        self
    }
}

fn missing(what: &str) -> Error {
    Error::AttributeNotFound(what.to_owned())
}

impl Display for Event {
    /// Dump the event metadata, then one particle per line
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        let attrs = &self.attributes;
        write!(fmt, "Event")?;
        if let (Some(run), Some(event)) = (attrs.run_number, attrs.event_number) {
            write!(fmt, " {}:{}", run, event)?;
        }
        if let Some(weight) = attrs.weight {
            write!(fmt, " (weight {})", weight)?;
        }
        writeln!(fmt, " with {} particles", self.len())?;
        for (name, value) in &attrs.tags {
            writeln!(fmt, "  {} = {}", name, value)?;
        }
        for (idx, particle) in self.particles.iter().enumerate() {
            writeln!(fmt, "{}\t{}", idx, particle)?;
        }
        Ok(())
    }
}

/// Lazy, re-iterable, order-preserving filtered view of a slice
pub struct Selection<'a, T, P> {
    items: &'a [T],
    predicate: P,
}
//
impl<'a, T, P> Selection<'a, T, P>
where
    P: Fn(&T) -> bool,
{
    /// Set up a selection
    pub fn new(items: &'a [T], predicate: P) -> Self {
        Self { items, predicate }
    }

    /// Iterate over the selected items. Can be called any number of times.
    pub fn iter(&self) -> SelectionIter<'a, '_, T, P> {
        SelectionIter {
            inner: self.items.iter(),
            predicate: &self.predicate,
        }
    }

    /// Number of selected items
    pub fn count(&self) -> usize {
        self.iter().count()
    }

    /// First selected item, if any
    pub fn first(&self) -> Option<&'a T> {
        self.iter().next()
    }

    /// Truth that nothing is selected
    pub fn is_empty(&self) -> bool {
        self.first().is_none()
    }

    /// Collect the selected items
    pub fn to_vec(&self) -> Vec<T>
    where
        T: Clone,
    {
        self.iter().cloned().collect()
    }
}

impl<'a, 's, T, P> IntoIterator for &'s Selection<'a, T, P>
where
    P: Fn(&T) -> bool,
{
    type Item = &'a T;
    type IntoIter = SelectionIter<'a, 's, T, P>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Iterator over a `Selection`
pub struct SelectionIter<'a, 's, T, P> {
    inner: std::slice::Iter<'a, T>,
    predicate: &'s P,
}
//
impl<'a, 's, T, P> Iterator for SelectionIter<'a, 's, T, P>
where
    P: Fn(&T) -> bool,
{
    type Item = &'a T;

    fn next(&mut self) -> Option<&'a T> {
        let predicate = self.predicate;
        self.inner.find(|item| predicate(item))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, self.inner.size_hint().1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::numeric::Tolerance;
    use approx::assert_relative_eq;

    fn particle(e: Float, px: Float, py: Float, pz: Float) -> Particle {
        Particle::new(FourVector::from_cartesian(e, px, py, pz).unwrap())
    }

    fn sample_event() -> Event {
        Event::new()
            .with_particle(particle(50., 10., 20., 30.).with_species(pdg::ELECTRON))
            .with_particle(particle(40., -5., 15., 20.).with_species(-pdg::MUON))
            .with_particle(particle(30., 10., -25., 5.).with_species(pdg::MUON_NEUTRINO))
            .with_particle(particle(60., 1., 2., -50.).with_species(-pdg::ELECTRON))
    }

    #[test]
    fn total_momentum_is_order_independent() {
        let event = sample_event();
        let total = event.total_momentum();
        assert_eq!(total.to_array(), [180., 16., 12., 5.]);

        let mut reversed = event.particles().to_vec();
        reversed.reverse();
        let reversed = Event::from_particles(reversed);
        assert!(reversed
            .total_momentum()
            .approx_eq(&total, Tolerance::default()));
        assert!(Event::new().total_momentum().to_array() == [0.; 4]);
    }

    #[test]
    fn missing_momentum() {
        let event = sample_event();
        // Everything visible
        let all = event.missing_momentum(|_| true);
        assert_eq!(all.to_array(), [20., -16., -12., 0.]);
        assert_relative_eq!(event.missing_et(|_| true), 20.);

        // Neutrinos invisible by default
        let met = event.missing_momentum_default();
        assert_relative_eq!(met.px(), -6.);
        assert_relative_eq!(met.py(), -37.);
        assert_relative_eq!(met.e(), met.pt());
        assert_relative_eq!(met.m2(), 0., epsilon = 1e-9);
    }

    #[test]
    fn selection_is_lazy_ordered_and_restartable() {
        let event = sample_event();
        let hard = event.select(|p| p.pt() > 15.);
        let first_pass: Vec<_> = hard.iter().map(|p| p.e()).collect();
        let second_pass: Vec<_> = (&hard).into_iter().map(|p| p.e()).collect();
        assert_eq!(first_pass, vec![50., 40., 30.]);
        assert_eq!(first_pass, second_pass);
        assert_eq!(hard.count(), 3);
        assert_eq!(hard.first().map(Particle::e), Some(50.));
        assert!(event.select(|p| p.e() > 1e3).is_empty());
    }

    #[test]
    fn species_selection() {
        let event = sample_event();
        assert_eq!(event.electrons().count(), 2);
        assert_eq!(event.muons().to_vec()[0].species(), Some(-pdg::MUON));
        assert_eq!(event.particles_with_species(-pdg::MUON_NEUTRINO).count(), 1);
    }

    #[test]
    fn attributes() {
        let mut event = sample_event();
        assert!(matches!(event.weight(), Err(Error::AttributeNotFound(_))));
        assert!(matches!(event.run_number(), Err(Error::AttributeNotFound(_))));
        assert!(matches!(event.tag("trigger"), Err(Error::AttributeNotFound(_))));

        event.set_weight(0.5);
        let event = event
            .with_numbers(42, 1337)
            .with_tag("trigger", true)
            .with_tag("comment", "generated");
        assert_eq!(event.weight().unwrap(), 0.5);
        assert_eq!(event.run_number().unwrap(), 42);
        assert_eq!(event.event_number().unwrap(), 1337);
        assert_eq!(event.tag("trigger").unwrap(), &Scalar::Bool(true));
        assert_eq!(
            event.tag("comment").unwrap(),
            &Scalar::Text("generated".to_owned())
        );
    }

    #[test]
    fn rest_frame_boost() {
        let event = sample_event().with_weight(2.);
        let total = event.total_momentum();
        let boosted = event.boost_to_rest_frame_of(&total).unwrap();
        let boosted_total = boosted.total_momentum();
        assert_relative_eq!(boosted_total.e(), total.m(), max_relative = 1e-12);
        assert!(boosted_total.p() < 1e-12 * total.e());
        assert_eq!(boosted.weight().unwrap(), 2.);
        assert_eq!(boosted.particles()[1].species(), Some(-pdg::MUON));
    }

    #[test]
    fn display() {
        let text = sample_event().with_numbers(1, 2).to_string();
        assert!(text.starts_with("Event 1:2 with 4 particles\n"));
        assert_eq!(text.lines().count(), 5);
    }
}
