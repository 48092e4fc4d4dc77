//! Plain structured records which the object store persists
//!
//! Every persisted entity is a nested mapping of numbers and strings, encoded
//! as JSON. Floats are written with enough digits to come back bit-for-bit
//! identical.

use crate::{
    error::{Error, Result},
    event::{Attributes, Event, Scalar},
    fourvec::{FourVector, KinematicsPolicy},
    numeric::Float,
    particle::Particle,
};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::collections::BTreeMap;
use time::{format_description::well_known::Rfc3339, OffsetDateTime};

/// Version of the record layout written by this crate
pub const FORMAT_VERSION: u32 = 1;

/// A 4-vector, in canonical basis
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FourVectorRecord {
    /// Energy
    pub e: Float,
    /// X momentum
    pub px: Float,
    /// Y momentum
    pub py: Float,
    /// Z momentum
    pub pz: Float,
}

/// A particle: 4-vector plus identity fields
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ParticleRecord {
    /// 4-momentum
    pub p4: FourVectorRecord,
    /// PDG species code
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub species: Option<i32>,
    /// Electric charge
    pub charge: Float,
    /// Generator status code
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<i32>,
    /// Isolation variable
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub isolation: Option<Float>,
    /// Free-form label
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    /// Numeric identifier
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
}

/// An event: ordered particles plus attributes
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EventRecord {
    /// Particles, in enumeration order
    pub particles: Vec<ParticleRecord>,
    /// Statistical weight
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight: Option<Float>,
    /// Run number
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_number: Option<u64>,
    /// Event number
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_number: Option<u64>,
    /// Named tags
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tags: BTreeMap<String, Scalar>,
}

/// Ensemble manifest, stored next to the events
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EnsembleRecord {
    /// Layout version, see `FORMAT_VERSION`
    pub format_version: u32,
    /// Number of committed events
    pub len: u64,
    /// Ensemble-level attributes
    #[serde(default)]
    pub metadata: BTreeMap<String, Scalar>,
    /// Creation time (RFC 3339)
    pub created: String,
    /// Last commit time (RFC 3339)
    pub updated: String,
}

/// Positions of the events with a given (run, event) number pair
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IndexRecord {
    /// Positions within the ensemble, in increasing order
    pub positions: Vec<u64>,
}

// ### DOMAIN -> RECORD ###

impl From<&FourVector> for FourVectorRecord {
    fn from(v: &FourVector) -> Self {
        Self {
            e: v.e(),
            px: v.px(),
            py: v.py(),
            pz: v.pz(),
        }
    }
}

impl TryFrom<&Particle> for ParticleRecord {
    type Error = Error;

    fn try_from(p: &Particle) -> Result<Self> {
        check_particle(p)?;
        Ok(particle_record(p))
    }
}

impl TryFrom<&Event> for EventRecord {
    type Error = Error;

    fn try_from(event: &Event) -> Result<Self> {
        check_event(event)?;
        let attrs = event.attributes();
        Ok(Self {
            particles: event.particles().iter().map(particle_record).collect(),
            weight: attrs.weight,
            run_number: attrs.run_number,
            event_number: attrs.event_number,
            tags: attrs.tags.clone(),
        })
    }
}

fn particle_record(p: &Particle) -> ParticleRecord {
    ParticleRecord {
        p4: p.momentum().into(),
        species: p.species(),
        charge: p.charge(),
        status: p.status(),
        isolation: p.isolation(),
        tag: p.tag().map(str::to_owned),
        id: p.id(),
    }
}

/// Check that a particle can be stored
pub fn check_particle(p: &Particle) -> Result<()> {
    check_storable("particle charge", p.charge())?;
    if let Some(isolation) = p.isolation() {
        check_storable("particle isolation", isolation)?;
    }
    Ok(())
}

/// Check that an event can be stored
///
/// 4-momenta are finite by construction, but weights, tags and particle
/// metadata are not validated when they are set.
///
pub fn check_event(event: &Event) -> Result<()> {
    event.particles().iter().try_for_each(check_particle)?;
    if let Some(weight) = event.attributes().weight {
        check_storable("event weight", weight)?;
    }
    check_tags(&event.attributes().tags)
}

/// Check that a float can be stored
///
/// JSON has no representation for NaN and infinities, they would come back as
/// missing values or fail to load.
///
fn check_storable(what: &str, x: Float) -> Result<()> {
    if !x.is_finite() {
        return Err(Error::InvalidKinematics(format!(
            "{} is {}, which cannot be stored",
            what, x
        )));
    }
    Ok(())
}

/// Check that a named value can be stored
pub fn check_tag(name: &str, value: &Scalar) -> Result<()> {
    match *value {
        Scalar::Float(x) => check_storable(&format!("tag {:?}", name), x),
        Scalar::Int(_) | Scalar::Bool(_) | Scalar::Text(_) => Ok(()),
    }
}

/// Check that a set of named values can be stored
pub fn check_tags(tags: &BTreeMap<String, Scalar>) -> Result<()> {
    tags.iter().try_for_each(|(name, value)| check_tag(name, value))
}

// ### RECORD -> DOMAIN ###

impl TryFrom<FourVectorRecord> for FourVector {
    type Error = Error;

    /// Stored vectors may legitimately be spacelike (they could have been
    /// built in allow-spacelike mode), so only finiteness is checked.
    fn try_from(r: FourVectorRecord) -> Result<Self> {
        FourVector::from_cartesian_with(r.e, r.px, r.py, r.pz, &KinematicsPolicy::allow_spacelike())
            .map_err(|e| Error::CorruptData(format!("stored 4-vector is invalid ({})", e)))
    }
}

impl TryFrom<ParticleRecord> for Particle {
    type Error = Error;

    fn try_from(r: ParticleRecord) -> Result<Self> {
        if !r.charge.is_finite() || r.isolation.map_or(false, |iso| !iso.is_finite()) {
            return Err(Error::CorruptData(
                "stored particle has a non-finite charge or isolation".to_owned(),
            ));
        }
        let mut particle = Particle::new(r.p4.try_into()?).with_charge(r.charge);
        if let Some(species) = r.species {
            particle = particle.with_species(species);
        }
        if let Some(status) = r.status {
            particle = particle.with_status(status);
        }
        if let Some(isolation) = r.isolation {
            particle = particle.with_isolation(isolation);
        }
        if let Some(tag) = r.tag {
            particle = particle.with_tag(tag);
        }
        if let Some(id) = r.id {
            particle = particle.with_id(id);
        }
        Ok(particle)
    }
}

impl TryFrom<EventRecord> for Event {
    type Error = Error;

    fn try_from(r: EventRecord) -> Result<Self> {
        let particles = r
            .particles
            .into_iter()
            .map(Particle::try_from)
            .collect::<Result<Vec<_>>>()?;
        if r.weight.map_or(false, |w| !w.is_finite()) {
            return Err(Error::CorruptData(
                "stored event has a non-finite weight".to_owned(),
            ));
        }
        check_tags(&r.tags)
            .map_err(|e| Error::CorruptData(format!("stored event has a bad tag ({})", e)))?;
        let attributes = Attributes {
            weight: r.weight,
            run_number: r.run_number,
            event_number: r.event_number,
            tags: r.tags,
        };
        Ok(Event::from_parts(particles, attributes))
    }
}

impl EnsembleRecord {
    /// Check that this manifest can be understood by this crate
    pub fn validate(&self) -> Result<()> {
        if self.format_version != FORMAT_VERSION {
            return Err(Error::CorruptData(format!(
                "unsupported ensemble format version {} (expected {})",
                self.format_version, FORMAT_VERSION
            )));
        }
        parse_timestamp(&self.created)?;
        parse_timestamp(&self.updated)?;
        check_tags(&self.metadata)
            .map_err(|e| Error::CorruptData(format!("ensemble metadata is invalid ({})", e)))
    }
}

// ### ENCODING ###

/// Serialize a record
pub fn encode<T: Serialize>(what: &str, record: &T) -> Result<Vec<u8>> {
    serde_json::to_vec(record).map_err(|e| Error::persistence(format!("encoding {}", what), e))
}

/// Deserialize a record, reporting shape mismatches as corrupt data
pub fn decode<T: DeserializeOwned>(what: &str, bytes: &[u8]) -> Result<T> {
    serde_json::from_slice(bytes)
        .map_err(|e| Error::CorruptData(format!("{} does not match its record shape ({})", what, e)))
}

/// Deserialize and validate a stored event
pub fn decode_event(bytes: &[u8]) -> Result<Event> {
    decode::<EventRecord>("stored event", bytes)?.try_into()
}

/// Format a timestamp the way manifests store it
pub fn format_timestamp(t: OffsetDateTime) -> Result<String> {
    t.format(&Rfc3339)
        .map_err(|e| Error::persistence("formatting timestamp", e))
}

/// Parse a timestamp from a manifest
pub fn parse_timestamp(s: &str) -> Result<OffsetDateTime> {
    OffsetDateTime::parse(s, &Rfc3339)
        .map_err(|e| Error::CorruptData(format!("invalid timestamp {:?} ({})", s, e)))
}
