//! HEP ensemble: relativistic kinematics and persistent event collections
//!
//!
//! # Introduction (for the physicist)
//!
//! This library models the output of collider experiments and simulations.
//! A `FourVector` holds the energy-momentum of a particle in the (+,−,−,−)
//! metric, a `Particle` attaches a species and a few measured properties to
//! it, an `Event` groups the particles of one collision along with its weight
//! and run/event numbers, and an `Ensemble` is a named collection of events
//! which can be stored and loaded again.
//!
//! Kinematic quantities follow the usual collider conventions: the beam axis
//! is z, pseudorapidity and azimuth are derived from the 3-momentum, and the
//! mass of spacelike vectors is reported with a negative sign.
//!
//!
//! # Introduction (for the computer guy)
//!
//! Ensembles are persisted into an `ObjectStore`, a minimal key-value store
//! contract with snapshots and optimistic transactions. Two backends are
//! provided: a volatile in-memory store, which can also inject failures for
//! testing purposes, and an append-only log file.
//!
//! A commit writes all pending events of an ensemble and its manifest in one
//! transaction, so either everything becomes visible or nothing does. Loading
//! an ensemble validates every stored event, batch by batch, so that memory
//! usage stays bounded. Batches may be decoded on multiple threads by enabling
//! the `multi-threading` feature.

#![warn(missing_docs)]

pub mod config;
pub mod cuts;
pub mod ensemble;
pub mod error;
pub mod event;
pub mod fourvec;
pub mod linalg;
pub mod numeric;
pub mod particle;
pub mod pdg;
pub mod record;
pub mod scheduling;
pub mod store;
pub mod summary;
pub mod transform;

pub use crate::{
    config::Configuration,
    cuts::ParticleCut,
    ensemble::{Ensemble, EnsembleId, EnsembleOptions, EnsembleState},
    error::{Error, Result},
    event::{Attributes, Event, Scalar},
    fourvec::{FourVector, KinematicsPolicy, SpacelikePolicy, Temporal},
    numeric::{Float, Tolerance},
    particle::Particle,
    store::{FileStore, MemoryStore, ObjectStore},
    summary::EnsembleSummary,
    transform::LorentzTransform,
};
