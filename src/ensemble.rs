//! Persistent collections of events
//!
//! An ensemble lives in an object store under a validated identifier. Its
//! committed events are not kept in memory: reads stream them from a store
//! snapshot, one batch at a time. Appended events stay pending in memory until
//! the next commit, which publishes all of them in a single transaction.

use crate::{
    error::{Error, Result},
    event::{Event, Scalar},
    record::{self, EnsembleRecord, EventRecord, IndexRecord, FORMAT_VERSION},
    scheduling::{self, DEFAULT_BATCH_SIZE},
    store::{keys, ObjectStore, Snapshot, Version},
    summary::EnsembleSummary,
};
use log::{debug, info, trace, warn};
use std::{
    borrow::Cow,
    collections::BTreeMap,
    fmt::{self, Display},
    ops::Range,
};
use time::OffsetDateTime;

/// Identifier of an ensemble within its store
///
/// Must be non-empty and only contain ASCII alphanumerics, `-`, `_` and `.`,
/// so that it can be embedded in store keys.
///
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EnsembleId(String);
//
impl EnsembleId {
    /// Validate an identifier
    pub fn new(id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        let valid_char = |c: char| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.');
        if id.is_empty() || !id.chars().all(valid_char) {
            return Err(Error::persistence_msg(format!(
                "invalid ensemble identifier {:?}",
                id
            )));
        }
        Ok(Self(id))
    }

    /// Identifier as a string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for EnsembleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<&str> for EnsembleId {
    type Error = Error;

    fn try_from(id: &str) -> Result<Self> {
        Self::new(id)
    }
}

/// Tuning of store interactions
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EnsembleOptions {
    /// Number of events fetched from the store per round-trip during reads
    pub read_batch_size: usize,
}
//
impl EnsembleOptions {
    /// Options with a given read batch size (at least 1)
    pub fn with_read_batch_size(read_batch_size: usize) -> Self {
        Self {
            read_batch_size: read_batch_size.max(1),
        }
    }
}
//
impl Default for EnsembleOptions {
    fn default() -> Self {
        Self::with_read_batch_size(DEFAULT_BATCH_SIZE)
    }
}

/// Persistence state of an ensemble handle
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EnsembleState {
    /// Some events or metadata changes are waiting for the next commit
    Open,

    /// Everything is durably stored
    Committed,
}

/// Handle to a persistent ensemble of events
pub struct Ensemble<S: ObjectStore> {
    /// Backing store
    store: S,

    /// Identifier within the store
    id: EnsembleId,

    /// Tuning of store interactions
    options: EnsembleOptions,

    /// Number of events which this handle knows to be committed
    committed: usize,

    /// Events appended since the last commit
    pending: Vec<Event>,

    /// Ensemble-level attributes
    metadata: BTreeMap<String, Scalar>,

    /// Truth that the metadata changed since the last commit
    metadata_dirty: bool,

    /// Creation time
    created: OffsetDateTime,

    /// Time of the last successful commit
    updated: OffsetDateTime,
}
//
impl<S: ObjectStore> Ensemble<S> {
    // ### CONSTRUCTION ###

    /// Create a new, empty ensemble in a store
    ///
    /// Fails with `Error::Conflict` if the identifier is already in use.
    ///
    pub fn create(store: S, id: &str) -> Result<Self> {
        Self::create_with(store, id, EnsembleOptions::default())
    }

    /// Create a new, empty ensemble with explicit options
    pub fn create_with(store: S, id: &str, options: EnsembleOptions) -> Result<Self> {
        let id = EnsembleId::new(id)?;
        let now = OffsetDateTime::now_utc();
        let timestamp = record::format_timestamp(now)?;
        let manifest = EnsembleRecord {
            format_version: FORMAT_VERSION,
            len: 0,
            metadata: BTreeMap::new(),
            created: timestamp.clone(),
            updated: timestamp,
        };
        {
            let key = keys::manifest(id.as_str());
            let mut txn = store.begin()?;
            if txn.get(&key)?.is_some() {
                return Err(Error::Conflict(format!("ensemble {} already exists", id)));
            }
            txn.put(&key, record::encode("ensemble manifest", &manifest)?)?;
            txn.commit()?;
        }
        info!("Created ensemble {}", id);
        Ok(Self {
            store,
            id,
            options,
            committed: 0,
            pending: Vec::new(),
            metadata: BTreeMap::new(),
            metadata_dirty: false,
            created: now,
            updated: now,
        })
    }

    /// Create a new ensemble from an existing collection of events
    ///
    /// The events are pending until the first commit.
    ///
    pub fn from_events(store: S, id: &str, events: impl IntoIterator<Item = Event>) -> Result<Self> {
        let mut ensemble = Self::create(store, id)?;
        ensemble.extend(events)?;
        Ok(ensemble)
    }

    /// Load an existing ensemble from a store
    ///
    /// Every stored event is decoded once to check that it is valid, but
    /// events are not kept in memory.
    ///
    pub fn load(store: S, id: &str) -> Result<Self> {
        Self::load_with(store, id, EnsembleOptions::default())
    }

    /// Load an existing ensemble with explicit options
    pub fn load_with(store: S, id: &str, options: EnsembleOptions) -> Result<Self> {
        let id = EnsembleId::new(id)?;
        let (manifest, len) = {
            let snapshot = store.snapshot()?;
            let manifest = read_manifest(&*snapshot, &id)?;
            let len = usize::try_from(manifest.len).map_err(|_| {
                Error::CorruptData(format!("ensemble {} has an absurd length", id))
            })?;

            // Check every event, one batch at a time
            let mut start = 0;
            while start < len {
                let end = (start + options.read_batch_size).min(len);
                fetch_batch(&*snapshot, &id, start..end)?;
                start = end;
            }
            if snapshot.get(&keys::event(id.as_str(), len))?.is_some() {
                return Err(Error::CorruptData(format!(
                    "ensemble {} stores more events than its manifest says ({})",
                    id, len
                )));
            }
            (manifest, len)
        };
        info!("Loaded ensemble {} with {} events", id, len);
        Ok(Self {
            store,
            id,
            options,
            committed: len,
            pending: Vec::new(),
            metadata: manifest.metadata,
            metadata_dirty: false,
            created: record::parse_timestamp(&manifest.created)?,
            updated: record::parse_timestamp(&manifest.updated)?,
        })
    }

    // ### MUTATION ###

    /// Append an event to the working set
    ///
    /// Events whose weight, tags, charges or isolations are not finite are
    /// rejected with `InvalidKinematics`, as they could not be stored.
    ///
    pub fn append(&mut self, event: Event) -> Result<()> {
        record::check_event(&event)?;
        self.pending.push(event);
        Ok(())
    }

    /// Append several events to the working set
    ///
    /// If any event is rejected, none of them is appended.
    ///
    pub fn extend(&mut self, events: impl IntoIterator<Item = Event>) -> Result<()> {
        let events = events.into_iter().collect::<Vec<_>>();
        for (offset, event) in events.iter().enumerate() {
            record::check_event(event).map_err(|e| match e {
                Error::InvalidKinematics(msg) => {
                    Error::InvalidKinematics(format!("event #{} of batch: {}", offset, msg))
                }
                other => other,
            })?;
        }
        self.pending.extend(events);
        Ok(())
    }

    /// Set an ensemble-level attribute, effective at the next commit
    ///
    /// Non-finite float values are rejected with `InvalidKinematics`.
    ///
    pub fn set_attribute(&mut self, name: impl Into<String>, value: impl Into<Scalar>) -> Result<()> {
        let (name, value) = (name.into(), value.into());
        record::check_tag(&name, &value)?;
        self.metadata.insert(name, value);
        self.metadata_dirty = true;
        Ok(())
    }

    /// Durably store the pending events and metadata in a single transaction
    ///
    /// Returns the number of newly committed events. On failure, nothing is
    /// written to the store and this handle is left exactly as it was, so the
    /// commit may be retried. A commit is not idempotent: once it succeeds,
    /// the pending events are gone from the working set, and appending them
    /// again would store them twice.
    ///
    pub fn commit(&mut self) -> Result<usize> {
        let num_new = self.pending.len();
        if num_new == 0 && !self.metadata_dirty {
            debug!("Nothing to commit in ensemble {}", self.id);
            return Ok(0);
        }
        let now = OffsetDateTime::now_utc();
        match self.write_pending(now) {
            Ok(version) => {
                self.committed += num_new;
                self.pending.clear();
                self.metadata_dirty = false;
                self.updated = now;
                info!(
                    "Committed {} events to ensemble {} (now {} events, store version {})",
                    num_new, self.id, self.committed, version
                );
                Ok(num_new)
            }
            Err(e) => {
                warn!(
                    "Failed to commit {} events to ensemble {}: {}",
                    num_new, self.id, e
                );
                Err(e)
            }
        }
    }

    /// Write the working set within a store transaction
    fn write_pending(&self, now: OffsetDateTime) -> Result<Version> {
        let id = self.id.as_str();
        let manifest_key = keys::manifest(id);
        let mut txn = self.store.begin()?;

        record::check_tags(&self.metadata)?;

        // Make sure nobody committed to this ensemble behind our back
        let mut manifest: EnsembleRecord = match txn.get(&manifest_key)? {
            Some(bytes) => record::decode("ensemble manifest", &bytes)?,
            None => return Err(Error::NotFound(format!("ensemble {}", self.id))),
        };
        manifest.validate()?;
        if manifest.len != self.committed as u64 {
            return Err(Error::Conflict(format!(
                "ensemble {} has {} committed events, but this handle expected {}",
                self.id, manifest.len, self.committed
            )));
        }

        // Write the events, collecting run/event number index entries
        let mut index = BTreeMap::<(u64, u64), Vec<u64>>::new();
        for (offset, event) in self.pending.iter().enumerate() {
            let position = self.committed + offset;
            let bytes = record::encode("event", &EventRecord::try_from(event)?)?;
            txn.put(&keys::event(id, position), bytes)?;
            let attrs = event.attributes();
            if let (Some(run), Some(number)) = (attrs.run_number, attrs.event_number) {
                index.entry((run, number)).or_default().push(position as u64);
            }
        }

        // Update the index
        for ((run, number), positions) in index {
            let key = keys::index(id, run, number);
            let mut entry = match txn.get(&key)? {
                Some(bytes) => record::decode::<IndexRecord>("event index", &bytes)?,
                None => IndexRecord::default(),
            };
            entry.positions.extend(positions);
            txn.put(&key, record::encode("event index", &entry)?)?;
        }

        // Publish the new manifest
        manifest.len = (self.committed + self.pending.len()) as u64;
        manifest.metadata = self.metadata.clone();
        manifest.updated = record::format_timestamp(now)?;
        txn.put(&manifest_key, record::encode("ensemble manifest", &manifest)?)?;
        txn.commit()
    }

    // ### QUERIES ###

    /// Identifier of the ensemble
    pub fn id(&self) -> &EnsembleId {
        &self.id
    }

    /// Options in use
    pub fn options(&self) -> &EnsembleOptions {
        &self.options
    }

    /// Backing store
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Persistence state
    pub fn state(&self) -> EnsembleState {
        if self.pending.is_empty() && !self.metadata_dirty {
            EnsembleState::Committed
        } else {
            EnsembleState::Open
        }
    }

    /// Total number of events, committed or pending
    pub fn len(&self) -> usize {
        self.committed + self.pending.len()
    }

    /// Number of committed events
    pub fn committed_len(&self) -> usize {
        self.committed
    }

    /// Number of pending events
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Truth that the ensemble has no event at all
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Event at some position (committed events come first)
    ///
    /// Committed events are read from the store, pending events are borrowed.
    ///
    pub fn get(&self, position: usize) -> Result<Cow<'_, Event>> {
        if position < self.committed {
            let snapshot = self.store.snapshot()?;
            let mut events = fetch_batch(&*snapshot, &self.id, position..position + 1)?;
            events
                .pop()
                .map(Cow::Owned)
                .ok_or_else(|| Error::CorruptData(format!("event #{} is missing", position)))
        } else if let Some(event) = self.pending.get(position - self.committed) {
            Ok(Cow::Borrowed(event))
        } else {
            Err(Error::NotFound(format!(
                "event #{} of ensemble {}, which has {} events",
                position,
                self.id,
                self.len()
            )))
        }
    }

    /// Events with a given run and event number, in position order
    pub fn find(&self, run_number: u64, event_number: u64) -> Result<Vec<Event>> {
        let snapshot = self.store.snapshot()?;
        let mut found = Vec::new();
        if let Some(bytes) = snapshot.get(&keys::index(self.id.as_str(), run_number, event_number))? {
            let index = record::decode::<IndexRecord>("event index", &bytes)?;
            for position in index.positions {
                let position = position as usize;
                if position >= self.committed {
                    continue;
                }
                found.extend(fetch_batch(&*snapshot, &self.id, position..position + 1)?);
            }
        }
        found.extend(
            self.pending
                .iter()
                .filter(|event| {
                    let attrs = event.attributes();
                    attrs.run_number == Some(run_number) && attrs.event_number == Some(event_number)
                })
                .cloned(),
        );
        trace!(
            "Found {} events {}:{} in ensemble {}",
            found.len(),
            run_number,
            event_number,
            self.id
        );
        Ok(found)
    }

    /// Stream every event: committed ones from a single store snapshot, then
    /// pending ones
    pub fn iter(&self) -> Result<EventStream<'_>> {
        Ok(EventStream {
            snapshot: self.store.snapshot()?,
            id: &self.id,
            range: 0..self.committed,
            batch_size: self.options.read_batch_size,
            buffer: Vec::new().into_iter(),
            pending: self.pending.iter(),
            failed: false,
        })
    }

    /// Lazily select the events which satisfy a predicate
    pub fn select<P>(&self, predicate: P) -> EnsembleSelection<'_, S, P>
    where
        P: Fn(&Event) -> bool,
    {
        EnsembleSelection {
            ensemble: self,
            predicate,
        }
    }

    /// Number of events which satisfy a predicate
    pub fn count_matching(&self, predicate: impl Fn(&Event) -> bool) -> Result<usize> {
        self.select(predicate).count()
    }

    /// Ensemble-level attribute
    pub fn attribute(&self, name: &str) -> Result<&Scalar> {
        self.metadata
            .get(name)
            .ok_or_else(|| Error::AttributeNotFound(format!("{} of ensemble {}", name, self.id)))
    }

    /// Every ensemble-level attribute
    pub fn attributes(&self) -> &BTreeMap<String, Scalar> {
        &self.metadata
    }

    /// Creation time
    pub fn created(&self) -> OffsetDateTime {
        self.created
    }

    /// Time of the last successful commit (or creation)
    pub fn updated(&self) -> OffsetDateTime {
        self.updated
    }

    /// Summarize the contents of the ensemble
    pub fn summary(&self) -> Result<EnsembleSummary> {
        let mut summary = EnsembleSummary {
            id: self.id.to_string(),
            committed: self.committed,
            pending: self.pending.len(),
            ..EnsembleSummary::default()
        };
        for event in self.iter()? {
            summary.record(&event?);
        }
        Ok(summary)
    }
}

/// Read and validate the manifest of an ensemble
fn read_manifest(snapshot: &dyn Snapshot, id: &EnsembleId) -> Result<EnsembleRecord> {
    let bytes = snapshot
        .get(&keys::manifest(id.as_str()))?
        .ok_or_else(|| Error::NotFound(format!("ensemble {}", id)))?;
    let manifest: EnsembleRecord = record::decode("ensemble manifest", &bytes)?;
    manifest.validate()?;
    Ok(manifest)
}

/// Fetch and decode a contiguous range of committed events
fn fetch_batch(snapshot: &dyn Snapshot, id: &EnsembleId, positions: Range<usize>) -> Result<Vec<Event>> {
    let first = positions.start;
    let raw = positions
        .map(|position| {
            snapshot.get(&keys::event(id.as_str(), position))?.ok_or_else(|| {
                Error::CorruptData(format!(
                    "event #{} of ensemble {} is missing from the store",
                    position, id
                ))
            })
        })
        .collect::<Result<Vec<_>>>()?;
    trace!(
        "Fetched events {}..{} of ensemble {}",
        first,
        first + raw.len(),
        id
    );
    scheduling::decode_batch(&raw, first)
}

/// Stream of the events of an ensemble
///
/// Committed events are fetched in batches from a single store snapshot, so
/// concurrent commits are not observed. If fetching fails, the error is
/// yielded once and the stream ends.
///
pub struct EventStream<'a> {
    snapshot: Box<dyn Snapshot + 'a>,
    id: &'a EnsembleId,
    range: Range<usize>,
    batch_size: usize,
    buffer: std::vec::IntoIter<Event>,
    pending: std::slice::Iter<'a, Event>,
    failed: bool,
}
//
impl Iterator for EventStream<'_> {
    type Item = Result<Event>;

    fn next(&mut self) -> Option<Result<Event>> {
        if self.failed {
            return None;
        }
        if let Some(event) = self.buffer.next() {
            return Some(Ok(event));
        }
        if !self.range.is_empty() {
            let start = self.range.start;
            let end = (start + self.batch_size).min(self.range.end);
            match fetch_batch(&*self.snapshot, self.id, start..end) {
                Ok(batch) => {
                    self.range.start = end;
                    self.buffer = batch.into_iter();
                    return self.buffer.next().map(Ok);
                }
                Err(e) => {
                    self.failed = true;
                    return Some(Err(e));
                }
            }
        }
        self.pending.next().cloned().map(Ok)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        if self.failed {
            return (0, Some(0));
        }
        let remaining = self.buffer.len() + self.range.len() + self.pending.len();
        (0, Some(remaining))
    }
}

/// Lazy, re-iterable filtered view of an ensemble
pub struct EnsembleSelection<'e, S: ObjectStore, P> {
    ensemble: &'e Ensemble<S>,
    predicate: P,
}
//
impl<'e, S: ObjectStore, P> EnsembleSelection<'e, S, P>
where
    P: Fn(&Event) -> bool,
{
    /// Stream the selected events. Errors are passed through.
    pub fn iter(&self) -> Result<impl Iterator<Item = Result<Event>> + '_> {
        let predicate = &self.predicate;
        Ok(self
            .ensemble
            .iter()?
            .filter(move |item| item.as_ref().map_or(true, |event| predicate(event))))
    }

    /// Number of selected events
    pub fn count(&self) -> Result<usize> {
        self.iter()?.try_fold(0, |count, item| item.map(|_| count + 1))
    }

    /// Collect the selected events
    pub fn to_vec(&self) -> Result<Vec<Event>> {
        self.iter()?.collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{fourvec::FourVector, particle::Particle, pdg, store::MemoryStore};

    fn event(n: u64) -> Event {
        let energy = 10. + n as f64;
        Event::from_particles(vec![
            Particle::new(FourVector::from_cartesian(energy, 1., 2., 3.).unwrap())
                .with_species(pdg::MUON),
            Particle::new(FourVector::from_cartesian(energy, -1., -2., -3.).unwrap())
                .with_species(-pdg::MUON),
        ])
        .with_numbers(1, n)
        .with_weight(0.5)
    }

    #[test]
    fn identifiers() {
        assert!(EnsembleId::new("zmumu-2012_v1.0").is_ok());
        for bad in ["", "a/b", "with space", "ünïcode"] {
            assert!(EnsembleId::new(bad).is_err(), "{:?} was accepted", bad);
        }
    }

    #[test]
    fn state_machine() {
        let store = MemoryStore::new();
        let mut ensemble = Ensemble::create(&store, "states").unwrap();
        assert_eq!(ensemble.state(), EnsembleState::Committed);
        assert!(ensemble.is_empty());

        ensemble.append(event(0)).unwrap();
        assert_eq!(ensemble.state(), EnsembleState::Open);
        assert_eq!(ensemble.commit().unwrap(), 1);
        assert_eq!(ensemble.state(), EnsembleState::Committed);
        assert_eq!(ensemble.commit().unwrap(), 0);

        ensemble.set_attribute("generator", "pythia").unwrap();
        assert_eq!(ensemble.state(), EnsembleState::Open);
        assert_eq!(ensemble.commit().unwrap(), 0);
        assert_eq!(ensemble.state(), EnsembleState::Committed);
    }

    #[test]
    fn duplicate_creation_conflicts() {
        let store = MemoryStore::new();
        Ensemble::create(&store, "dup").unwrap();
        assert!(matches!(
            Ensemble::create(&store, "dup"),
            Err(Error::Conflict(_))
        ));
    }

    #[test]
    fn get_spans_committed_and_pending() {
        let store = MemoryStore::new();
        let mut ensemble =
            Ensemble::from_events(&store, "positions", (0..3).map(event)).unwrap();
        ensemble.commit().unwrap();
        ensemble.append(event(3)).unwrap();

        assert!(matches!(ensemble.get(1).unwrap(), Cow::Owned(_)));
        assert!(matches!(ensemble.get(3).unwrap(), Cow::Borrowed(_)));
        assert_eq!(ensemble.get(1).unwrap().event_number().unwrap(), 1);
        assert_eq!(ensemble.get(3).unwrap().event_number().unwrap(), 3);
        assert!(matches!(ensemble.get(4), Err(Error::NotFound(_))));
    }

    #[test]
    fn streaming_in_small_batches() {
        let store = MemoryStore::new();
        let options = EnsembleOptions::with_read_batch_size(2);
        let mut ensemble = Ensemble::create_with(&store, "stream", options).unwrap();
        ensemble.extend((0..7).map(event)).unwrap();
        ensemble.commit().unwrap();
        ensemble.append(event(7)).unwrap();

        let numbers = ensemble
            .iter()
            .unwrap()
            .map(|e| e.unwrap().event_number().unwrap())
            .collect::<Vec<_>>();
        assert_eq!(numbers, (0..8).collect::<Vec<_>>());

        let odd = ensemble.select(|e| e.event_number().map_or(false, |n| n % 2 == 1));
        assert_eq!(odd.count().unwrap(), 4);
        assert_eq!(odd.count().unwrap(), 4);
        assert_eq!(odd.to_vec().unwrap()[0].event_number().unwrap(), 1);
        assert_eq!(ensemble.count_matching(|e| e.len() == 2).unwrap(), 8);
    }

    #[test]
    fn attributes() {
        let store = MemoryStore::new();
        let mut ensemble = Ensemble::create(&store, "attrs").unwrap();
        assert!(matches!(
            ensemble.attribute("lumi"),
            Err(Error::AttributeNotFound(_))
        ));
        ensemble.set_attribute("lumi", 20.3).unwrap();
        ensemble.commit().unwrap();

        let loaded = Ensemble::load(&store, "attrs").unwrap();
        assert_eq!(loaded.attribute("lumi").unwrap(), &Scalar::Float(20.3));
        assert!(loaded.updated() >= loaded.created());
    }

    #[test]
    fn summary_counts() {
        let store = MemoryStore::new();
        let mut ensemble = Ensemble::from_events(&store, "summary", (0..3).map(event)).unwrap();
        ensemble.commit().unwrap();
        ensemble.append(Event::new()).unwrap();
        let summary = ensemble.summary().unwrap();
        assert_eq!(summary.events, 4);
        assert_eq!(summary.committed, 3);
        assert_eq!(summary.pending, 1);
        assert_eq!(summary.particles, 6);
        assert_eq!(summary.unweighted, 1);
        assert_eq!(summary.sum_of_weights, 1.5);
    }
}
