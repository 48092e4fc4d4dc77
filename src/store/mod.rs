//! Contract with the transactional object store which ensembles persist into
//!
//! A store maps string keys to opaque byte values. It offers point-in-time
//! snapshots for reading and optimistic transactions for writing: a commit
//! fails with `Error::Conflict` if any key which the transaction has read was
//! modified by another transaction committed in the meantime.
//!
//! Available backends:
//! - `MemoryStore`: volatile, with fault injection for tests
//! - `FileStore`: append-only transaction log on disk

mod file;
mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

use crate::error::{Error, Result};
use std::{
    collections::{BTreeMap, HashMap},
    sync::Arc,
};

/// Commit sequence number. Version 0 means "never written".
pub type Version = u64;

/// Transactional key-value object store
pub trait ObjectStore {
    /// Consistent read-only view of the last committed state
    fn snapshot(&self) -> Result<Box<dyn Snapshot + '_>>;

    /// Start a read-write transaction
    ///
    /// Dropping the transaction without committing it discards its writes.
    ///
    fn begin(&self) -> Result<Box<dyn Transaction + '_>>;
}

/// Point-in-time view of an object store
pub trait Snapshot {
    /// Version of the last commit visible in this snapshot
    fn version(&self) -> Version;

    /// Read a value
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;
}

/// Read-write transaction on an object store
pub trait Transaction {
    /// Read a value, observing this transaction's own writes
    ///
    /// Reading a key adds it to the set of keys whose concurrent
    /// modification makes the commit fail.
    ///
    fn get(&mut self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Write a value, visible to others only after commit
    fn put(&mut self, key: &str, value: Vec<u8>) -> Result<()>;

    /// Atomically publish every write, returning the new store version
    fn commit(self: Box<Self>) -> Result<Version>;
}

impl<T: ObjectStore + ?Sized> ObjectStore for &T {
    fn snapshot(&self) -> Result<Box<dyn Snapshot + '_>> {
        (**self).snapshot()
    }

    fn begin(&self) -> Result<Box<dyn Transaction + '_>> {
        (**self).begin()
    }
}

impl<T: ObjectStore + ?Sized> ObjectStore for Arc<T> {
    fn snapshot(&self) -> Result<Box<dyn Snapshot + '_>> {
        (**self).snapshot()
    }

    fn begin(&self) -> Result<Box<dyn Transaction + '_>> {
        (**self).begin()
    }
}

/// Key layout of persisted ensembles
pub mod keys {
    /// Manifest of an ensemble
    pub fn manifest(ensemble: &str) -> String {
        format!("ensemble/{}", ensemble)
    }

    /// Event at some position of an ensemble
    pub fn event(ensemble: &str, position: usize) -> String {
        format!("ensemble/{}/event/{:012}", ensemble, position)
    }

    /// Positions of the events with some run and event number
    pub fn index(ensemble: &str, run_number: u64, event_number: u64) -> String {
        format!("ensemble/{}/index/{}/{}", ensemble, run_number, event_number)
    }
}

/// Bookkeeping shared by the transactions of every backend
#[derive(Debug, Default)]
pub(crate) struct TxnState {
    /// Version at which each key was observed
    reads: HashMap<String, Version>,

    /// Pending writes, in key order
    writes: BTreeMap<String, Vec<u8>>,
}
//
impl TxnState {
    /// Value written earlier by this transaction, if any
    pub fn written(&self, key: &str) -> Option<&Vec<u8>> {
        self.writes.get(key)
    }

    /// Remember that a key was observed at a given version
    ///
    /// Only the first observation matters, since later reads go through the
    /// same base snapshot.
    ///
    pub fn record_read(&mut self, key: &str, version: Version) {
        self.reads.entry(key.to_owned()).or_insert(version);
    }

    /// Record a write
    pub fn record_write(&mut self, key: &str, value: Vec<u8>) {
        self.writes.insert(key.to_owned(), value);
    }

    /// Check that no key read by this transaction changed since it was read,
    /// given the current version of each key
    pub fn check_conflicts(&self, current: impl Fn(&str) -> Version) -> Result<()> {
        for (key, &seen) in &self.reads {
            let now = current(key);
            if now != seen {
                return Err(Error::Conflict(format!(
                    "key {:?} was modified by a concurrent transaction (version {} -> {})",
                    key, seen, now
                )));
            }
        }
        Ok(())
    }

    /// Pending writes
    pub fn writes(&self) -> &BTreeMap<String, Vec<u8>> {
        &self.writes
    }

    /// Pending writes, by value
    pub fn into_writes(self) -> BTreeMap<String, Vec<u8>> {
        self.writes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_layout() {
        assert_eq!(keys::manifest("zmumu"), "ensemble/zmumu");
        assert_eq!(keys::event("zmumu", 42), "ensemble/zmumu/event/000000000042");
        assert_eq!(keys::index("zmumu", 1, 2), "ensemble/zmumu/index/1/2");
    }

    #[test]
    fn conflict_detection() {
        let mut txn = TxnState::default();
        txn.record_read("a", 3);
        txn.record_read("a", 4);
        txn.record_read("b", 0);
        txn.check_conflicts(|key| if key == "a" { 3 } else { 0 })
            .unwrap();
        assert!(matches!(
            txn.check_conflicts(|key| if key == "b" { 5 } else { 3 }),
            Err(Error::Conflict(_))
        ));
    }
}
