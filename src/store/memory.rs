//! In-memory object store
//!
//! Fast, but volatile (data is lost when the store is dropped). Committed
//! states are immutable and shared between snapshots, a commit publishes a
//! new state. Faults can be injected to exercise failure handling.

use super::{ObjectStore, Snapshot, Transaction, TxnState, Version};
use crate::error::{Error, Result};
use log::{debug, trace};
use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, MutexGuard,
    },
};

/// In-memory object store
#[derive(Debug, Default)]
pub struct MemoryStore {
    /// Last committed state
    state: Mutex<Arc<State>>,

    /// Number of puts which may still succeed before an injected failure
    puts_before_failure: Mutex<Option<usize>>,

    /// Truth that the next commit should fail
    fail_next_commit: AtomicBool,
}

/// Committed state of the store
#[derive(Clone, Debug, Default)]
struct State {
    /// Version of the last commit
    version: Version,

    /// Stored values
    entries: HashMap<String, Entry>,
}

/// Stored value
#[derive(Clone, Debug)]
struct Entry {
    /// Version of the commit which wrote this value
    version: Version,

    /// Value bytes
    value: Arc<[u8]>,
}
//
impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Make a put fail after `puts` more puts have succeeded, simulating a
    /// store which becomes unavailable in the middle of a transaction
    pub fn fail_after_puts(&self, puts: usize) -> Result<()> {
        *lock(&self.puts_before_failure)? = Some(puts);
        Ok(())
    }

    /// Make the next commit fail
    pub fn fail_next_commit(&self) {
        self.fail_next_commit.store(true, Ordering::Relaxed);
    }

    /// Version of the last commit
    pub fn version(&self) -> Result<Version> {
        Ok(lock(&self.state)?.version)
    }

    /// Number of stored keys
    pub fn len(&self) -> Result<usize> {
        Ok(lock(&self.state)?.entries.len())
    }

    /// Truth that nothing was ever committed
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Consume one put from the injected failure budget, if armed
    fn check_put_fault(&self) -> Result<()> {
        let mut budget = lock(&self.puts_before_failure)?;
        match *budget {
            Some(0) => {
                *budget = None;
                Err(Error::persistence_msg("injected failure: store unavailable"))
            }
            Some(ref mut remaining) => {
                *remaining -= 1;
                Ok(())
            }
            None => Ok(()),
        }
    }

    /// Current committed state
    fn current(&self) -> Result<Arc<State>> {
        Ok(lock(&self.state)?.clone())
    }
}
//
impl ObjectStore for MemoryStore {
    fn snapshot(&self) -> Result<Box<dyn Snapshot + '_>> {
        Ok(Box::new(MemorySnapshot {
            state: self.current()?,
        }))
    }

    fn begin(&self) -> Result<Box<dyn Transaction + '_>> {
        let base = self.current()?;
        debug!("Beginning memory transaction at version {}", base.version);
        Ok(Box::new(MemoryTransaction {
            store: self,
            base,
            txn: TxnState::default(),
        }))
    }
}

/// Lock a mutex, reporting poisoning as a store failure
fn lock<T>(mutex: &Mutex<T>) -> Result<MutexGuard<'_, T>> {
    mutex
        .lock()
        .map_err(|_| Error::persistence_msg("memory store lock was poisoned"))
}

/// Read-only view of the memory store
struct MemorySnapshot {
    state: Arc<State>,
}
//
impl Snapshot for MemorySnapshot {
    fn version(&self) -> Version {
        self.state.version
    }

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.state.entries.get(key).map(|entry| entry.value.to_vec()))
    }
}

/// Transaction on the memory store
struct MemoryTransaction<'store> {
    store: &'store MemoryStore,
    base: Arc<State>,
    txn: TxnState,
}
//
impl Transaction for MemoryTransaction<'_> {
    fn get(&mut self, key: &str) -> Result<Option<Vec<u8>>> {
        if let Some(value) = self.txn.written(key) {
            return Ok(Some(value.clone()));
        }
        let entry = self.base.entries.get(key);
        self.txn
            .record_read(key, entry.map_or(0, |entry| entry.version));
        Ok(entry.map(|entry| entry.value.to_vec()))
    }

    fn put(&mut self, key: &str, value: Vec<u8>) -> Result<()> {
        self.store.check_put_fault()?;
        trace!("Memory transaction writes {} ({} bytes)", key, value.len());
        self.txn.record_write(key, value);
        Ok(())
    }

    fn commit(self: Box<Self>) -> Result<Version> {
        let Self { store, txn, .. } = *self;
        if store.fail_next_commit.swap(false, Ordering::Relaxed) {
            return Err(Error::persistence_msg("injected failure: commit rejected"));
        }

        let mut state = lock(&store.state)?;
        txn.check_conflicts(|key| {
            state.entries.get(key).map_or(0, |entry| entry.version)
        })?;

        let mut next = State::clone(&state);
        next.version += 1;
        let version = next.version;
        for (key, value) in txn.into_writes() {
            next.entries.insert(
                key,
                Entry {
                    version,
                    value: value.into(),
                },
            );
        }
        *state = Arc::new(next);
        debug!("Committed memory transaction as version {}", version);
        Ok(version)
    }
}
