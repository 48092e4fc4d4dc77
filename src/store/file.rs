//! Object store backed by an append-only transaction log on disk
//!
//! The log is a sequence of records. Each record starts with a JSON header
//! line. A put header is followed by the raw value bytes and a newline, a
//! commit header closes the transaction which the preceding puts belong to:
//!
//! ```text
//! {"op":"put","key":"ensemble/zmumu","len":123}
//! <123 bytes of value>
//! {"op":"commit","version":1}
//! ```
//!
//! Only the positions of values are kept in memory, values are read back from
//! disk on demand. On open, a transaction torn by a crash at the end of the
//! log is discarded. Damage followed by further commit records cannot come
//! from a crash, and is reported as corrupt data without touching the file.
//!
//! A store holds an exclusive advisory lock on its log for as long as it is
//! open, so two stores cannot append to the same file.

use super::{ObjectStore, Snapshot, Transaction, TxnState, Version};
use crate::error::{Error, Result};
use fs4::fs_std::FileExt;
use log::{debug, info, trace, warn};
use serde::{Deserialize, Serialize};
use std::{
    collections::HashMap,
    fs::{File, OpenOptions},
    io::{self, BufRead, BufReader, Read, Seek, SeekFrom, Write},
    path::{Path, PathBuf},
    sync::{Arc, Mutex, MutexGuard},
};

/// Header of a log record
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
enum LogHeader {
    /// A value of `len` bytes follows
    Put { key: String, len: u64 },

    /// Every put since the previous commit is now committed
    Commit { version: Version },
}

/// Location of a committed value in the log
#[derive(Clone, Copy, Debug)]
struct Slot {
    offset: u64,
    len: u64,
    version: Version,
}

/// Committed state of the store
#[derive(Clone, Debug, Default)]
struct State {
    version: Version,
    slots: HashMap<String, Slot>,
}

/// Writer side of the store
#[derive(Debug)]
struct Writer {
    file: File,
    /// Length of the log up to the last commit record
    len: u64,
    state: Arc<State>,
}

/// Object store persisted in an append-only log file
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    writer: Mutex<Writer>,
    reader: Mutex<File>,
}
//
impl FileStore {
    /// Open a log file, creating it if it does not exist
    ///
    /// Fails with `Persistence` if another store has the log open, and with
    /// `CorruptData` if the log is damaged anywhere but in its last
    /// transaction.
    ///
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_owned();
        let io_error = |what: &str, e| Error::persistence(format!("{} {}", what, path.display()), e);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&path)
            .map_err(|e| io_error("opening", e))?;

        file.try_lock_exclusive().map_err(|e| {
            Error::persistence(
                format!("locking {} (is another store using it?)", path.display()),
                e,
            )
        })?;

        let Replay {
            state,
            committed_len,
            damage,
        } = replay(&file).map_err(|e| io_error("replaying", e))?;
        if let Some(offset) = damage {
            return Err(Error::CorruptData(format!(
                "{} is damaged at offset {}, but committed transactions follow",
                path.display(),
                offset
            )));
        }
        let file_len = file
            .metadata()
            .map_err(|e| io_error("inspecting", e))?
            .len();
        if file_len > committed_len {
            warn!(
                "Discarding {} bytes of incomplete transaction at the end of {}",
                file_len - committed_len,
                path.display()
            );
            file.set_len(committed_len)
                .and_then(|()| file.sync_all())
                .map_err(|e| io_error("truncating", e))?;
        }
        info!(
            "Opened object store {} at version {} ({} keys)",
            path.display(),
            state.version,
            state.slots.len()
        );

        let reader = File::open(&path).map_err(|e| io_error("opening", e))?;
        Ok(Self {
            writer: Mutex::new(Writer {
                file,
                len: committed_len,
                state: Arc::new(state),
            }),
            reader: Mutex::new(reader),
            path,
        })
    }

    /// Location of the log file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Version of the last commit
    pub fn version(&self) -> Result<Version> {
        Ok(lock(&self.writer)?.state.version)
    }

    /// Current committed state
    fn current(&self) -> Result<Arc<State>> {
        Ok(lock(&self.writer)?.state.clone())
    }

    /// Read a committed value
    fn read_slot(&self, slot: Slot) -> Result<Vec<u8>> {
        let mut reader = lock(&self.reader)?;
        let mut value = vec![0; slot.len as usize];
        reader
            .seek(SeekFrom::Start(slot.offset))
            .and_then(|_| reader.read_exact(&mut value))
            .map_err(|e| {
                Error::persistence(format!("reading from {}", self.path.display()), e)
            })?;
        Ok(value)
    }
}
//
impl ObjectStore for FileStore {
    fn snapshot(&self) -> Result<Box<dyn Snapshot + '_>> {
        Ok(Box::new(FileSnapshot {
            store: self,
            state: self.current()?,
        }))
    }

    fn begin(&self) -> Result<Box<dyn Transaction + '_>> {
        let base = self.current()?;
        debug!("Beginning file transaction at version {}", base.version);
        Ok(Box::new(FileTransaction {
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
        .map_err(|_| Error::persistence_msg("file store lock was poisoned"))
}

/// Committed state recovered from the log
struct Replay {
    state: State,

    /// Length of the log up to its last complete commit record
    committed_len: u64,

    /// Offset of an unreadable record that commit records follow
    damage: Option<u64>,
}

/// Rebuild the committed state from the log
fn replay(file: &File) -> io::Result<Replay> {
    let file_len = file.metadata()?.len();
    let mut reader = BufReader::new(file);
    reader.seek(SeekFrom::Start(0))?;

    let mut state = State::default();
    let mut pending = Vec::new();
    let mut pos = 0;
    let mut committed_len = 0;
    let mut line = Vec::new();
    loop {
        let record_start = pos;
        line.clear();
        let header_len = reader.read_until(b'\n', &mut line)? as u64;
        if header_len == 0 {
            break;
        }
        let header = match line.last() {
            Some(b'\n') => serde_json::from_slice::<LogHeader>(&line),
            _ => {
                debug!("Unterminated log record at offset {}", record_start);
                break;
            }
        };
        let header = match header {
            Ok(header) => header,
            Err(e) => {
                warn!("Unreadable log record at offset {} ({})", record_start, e);
                break;
            }
        };
        pos += header_len;
        match header {
            LogHeader::Put { key, len } => {
                // The value and its newline must fit in what is left
                let remaining = file_len.saturating_sub(pos);
                let value_len = match usize::try_from(len) {
                    Ok(value_len) if len < remaining => value_len,
                    _ => {
                        warn!(
                            "Log record at offset {} claims {} bytes, only {} remain",
                            record_start, len, remaining
                        );
                        pos = record_start;
                        break;
                    }
                };
                let mut value = vec![0; value_len + 1];
                reader.read_exact(&mut value)?;
                if value[value_len] != b'\n' {
                    warn!("Log record at offset {} is not terminated", record_start);
                    pos = record_start;
                    break;
                }
                pending.push((key, Slot { offset: pos, len, version: 0 }));
                pos += len + 1;
            }
            LogHeader::Commit { version } => {
                for (key, mut slot) in pending.drain(..) {
                    slot.version = version;
                    state.slots.insert(key, slot);
                }
                state.version = version;
                committed_len = pos;
                trace!("Replayed commit {} ending at offset {}", version, pos);
            }
        }
    }

    // A crash can only tear the last transaction, so nothing that follows the
    // point where replay stopped may be a complete commit record
    let mut damage = None;
    if pos < file_len {
        let mut rest = Vec::new();
        reader.seek(SeekFrom::Start(pos))?;
        reader.read_to_end(&mut rest)?;
        let mut lines = rest.split(|&b| b == b'\n');
        lines.next_back();
        let is_commit = |l: &[u8]| {
            matches!(serde_json::from_slice::<LogHeader>(l), Ok(LogHeader::Commit { .. }))
        };
        if lines.any(is_commit) {
            damage = Some(pos);
        }
    }
    Ok(Replay {
        state,
        committed_len,
        damage,
    })
}

/// Read-only view of the file store
struct FileSnapshot<'store> {
    store: &'store FileStore,
    state: Arc<State>,
}
//
impl Snapshot for FileSnapshot<'_> {
    fn version(&self) -> Version {
        self.state.version
    }

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.state
            .slots
            .get(key)
            .map(|&slot| self.store.read_slot(slot))
            .transpose()
    }
}

/// Transaction on the file store
struct FileTransaction<'store> {
    store: &'store FileStore,
    base: Arc<State>,
    txn: TxnState,
}
//
impl Transaction for FileTransaction<'_> {
    fn get(&mut self, key: &str) -> Result<Option<Vec<u8>>> {
        if let Some(value) = self.txn.written(key) {
            return Ok(Some(value.clone()));
        }
        let slot = self.base.slots.get(key).copied();
        self.txn.record_read(key, slot.map_or(0, |slot| slot.version));
        slot.map(|slot| self.store.read_slot(slot)).transpose()
    }

    fn put(&mut self, key: &str, value: Vec<u8>) -> Result<()> {
        trace!("File transaction writes {} ({} bytes)", key, value.len());
        self.txn.record_write(key, value);
        Ok(())
    }

    fn commit(self: Box<Self>) -> Result<Version> {
        let Self { store, txn, .. } = *self;
        let mut writer = lock(&store.writer)?;
        txn.check_conflicts(|key| writer.state.slots.get(key).map_or(0, |slot| slot.version))?;

        // Nobody else may have appended to the log behind our back
        let file_len = writer
            .file
            .metadata()
            .map_err(|e| Error::persistence(format!("inspecting {}", store.path.display()), e))?
            .len();
        if file_len != writer.len {
            return Err(Error::Conflict(format!(
                "{} is {} bytes long, but this store wrote {} bytes",
                store.path.display(),
                file_len,
                writer.len
            )));
        }

        // Lay out the transaction's records
        let version = writer.state.version + 1;
        let start = writer.len;
        let mut buffer = Vec::new();
        let mut slots = Vec::with_capacity(txn.writes().len());
        for (key, value) in txn.into_writes() {
            let len = value.len() as u64;
            let header = LogHeader::Put {
                key: key.clone(),
                len,
            };
            serde_json::to_writer(&mut buffer, &header)
                .map_err(|e| Error::persistence("encoding log record", e))?;
            buffer.push(b'\n');
            let offset = start + buffer.len() as u64;
            slots.push((key, Slot { offset, len, version }));
            buffer.extend_from_slice(&value);
            buffer.push(b'\n');
        }
        serde_json::to_writer(&mut buffer, &LogHeader::Commit { version })
            .map_err(|e| Error::persistence("encoding log record", e))?;
        buffer.push(b'\n');

        // Append them, rolling the log back if anything goes wrong
        let write_result = (&writer.file)
            .seek(SeekFrom::Start(start))
            .and_then(|_| (&writer.file).write_all(&buffer))
            .and_then(|()| writer.file.sync_data());
        if let Err(e) = write_result {
            warn!(
                "Failed to append transaction to {}, rolling back ({})",
                store.path.display(),
                e
            );
            if let Err(e) = writer.file.set_len(start) {
                warn!("Could not truncate {} ({})", store.path.display(), e);
            }
            return Err(Error::persistence(
                format!("writing to {}", store.path.display()),
                e,
            ));
        }

        // Publish the new state
        let mut next = State::clone(&writer.state);
        next.version = version;
        next.slots.extend(slots);
        writer.state = Arc::new(next);
        writer.len = start + buffer.len() as u64;
        debug!(
            "Committed file transaction as version {} ({} bytes)",
            version,
            buffer.len()
        );
        Ok(version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn put_and_commit(store: &FileStore, entries: &[(&str, &str)]) -> Version {
        let mut txn = store.begin().unwrap();
        for (key, value) in entries {
            txn.put(key, value.as_bytes().to_vec()).unwrap();
        }
        txn.commit().unwrap()
    }

    #[test]
    fn values_survive_reopening() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.log");
        {
            let store = FileStore::open(&path).unwrap();
            assert_eq!(put_and_commit(&store, &[("a", "first"), ("b", "line\nbreak")]), 1);
            assert_eq!(put_and_commit(&store, &[("a", "second")]), 2);
        }
        let store = FileStore::open(&path).unwrap();
        assert_eq!(store.version().unwrap(), 2);
        let snapshot = store.snapshot().unwrap();
        assert_eq!(snapshot.get("a").unwrap(), Some(b"second".to_vec()));
        assert_eq!(snapshot.get("b").unwrap(), Some(b"line\nbreak".to_vec()));
        assert_eq!(snapshot.get("c").unwrap(), None);
    }

    #[test]
    fn torn_transaction_is_discarded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.log");
        {
            let store = FileStore::open(&path).unwrap();
            put_and_commit(&store, &[("a", "committed")]);
        }
        let committed_len = fs::metadata(&path).unwrap().len();

        // Simulate a crash in the middle of the next transaction
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(b"{\"op\":\"put\",\"key\":\"a\",\"len\":100}\nshort")
            .unwrap();
        drop(file);

        let store = FileStore::open(&path).unwrap();
        assert_eq!(fs::metadata(&path).unwrap().len(), committed_len);
        assert_eq!(
            store.snapshot().unwrap().get("a").unwrap(),
            Some(b"committed".to_vec())
        );

        // The log remains usable after recovery
        assert_eq!(put_and_commit(&store, &[("a", "again")]), 2);
        drop(store);
        let store = FileStore::open(&path).unwrap();
        assert_eq!(
            store.snapshot().unwrap().get("a").unwrap(),
            Some(b"again".to_vec())
        );
    }

    #[test]
    fn uncommitted_puts_are_discarded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.log");
        {
            let store = FileStore::open(&path).unwrap();
            put_and_commit(&store, &[("a", "1")]);
        }
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(b"{\"op\":\"put\",\"key\":\"b\",\"len\":1}\n2\n")
            .unwrap();
        drop(file);

        let store = FileStore::open(&path).unwrap();
        assert_eq!(store.snapshot().unwrap().get("b").unwrap(), None);
        assert_eq!(store.version().unwrap(), 1);
    }

    #[test]
    fn oversized_tail_record_is_discarded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.log");
        {
            let store = FileStore::open(&path).unwrap();
            put_and_commit(&store, &[("a", "1")]);
        }
        let committed_len = fs::metadata(&path).unwrap().len();
        for len in [u64::MAX, u64::MAX / 2, 1 << 40] {
            let mut file = OpenOptions::new().append(true).open(&path).unwrap();
            writeln!(file, "{{\"op\":\"put\",\"key\":\"b\",\"len\":{}}}", len).unwrap();
            file.write_all(b"xyz").unwrap();
            drop(file);

            let store = FileStore::open(&path).unwrap();
            assert_eq!(store.version().unwrap(), 1);
            assert_eq!(fs::metadata(&path).unwrap().len(), committed_len);
        }
    }

    #[test]
    fn oversized_record_before_commit_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.log");
        {
            let store = FileStore::open(&path).unwrap();
            put_and_commit(&store, &[("a", "1")]);
        }
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(
            b"{\"op\":\"put\",\"key\":\"b\",\"len\":18446744073709551615}\n2\n\
              {\"op\":\"commit\",\"version\":2}\n",
        )
        .unwrap();
        drop(file);
        let damaged_len = fs::metadata(&path).unwrap().len();

        assert!(matches!(FileStore::open(&path), Err(Error::CorruptData(_))));
        assert_eq!(fs::metadata(&path).unwrap().len(), damaged_len);
    }

    #[test]
    fn damage_in_the_middle_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.log");
        {
            let store = FileStore::open(&path).unwrap();
            put_and_commit(&store, &[("a", "first")]);
            put_and_commit(&store, &[("b", "second")]);
            put_and_commit(&store, &[("c", "third")]);
        }

        // Scribble over the header of the second transaction
        let mut bytes = fs::read(&path).unwrap();
        let second = bytes
            .windows(9)
            .position(|w| w == b"\"key\":\"b\"")
            .unwrap();
        bytes[second] = b'#';
        fs::write(&path, &bytes).unwrap();

        assert!(matches!(FileStore::open(&path), Err(Error::CorruptData(_))));
        assert_eq!(fs::read(&path).unwrap(), bytes);
    }

    #[test]
    fn log_is_locked_while_open() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.log");
        let store = FileStore::open(&path).unwrap();
        assert!(matches!(
            FileStore::open(&path),
            Err(Error::Persistence { .. })
        ));
        drop(store);
        FileStore::open(&path).unwrap();
    }

    #[test]
    fn foreign_appends_conflict() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.log");
        let store = FileStore::open(&path).unwrap();
        put_and_commit(&store, &[("a", "1")]);

        // Advisory locks do not stop uncooperative writers
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(b"{\"op\":\"commit\",\"version\":7}\n")
            .unwrap();
        drop(file);
        let len = fs::metadata(&path).unwrap().len();

        let mut txn = store.begin().unwrap();
        txn.put("b", b"2".to_vec()).unwrap();
        assert!(matches!(txn.commit(), Err(Error::Conflict(_))));
        assert_eq!(fs::metadata(&path).unwrap().len(), len);
        assert_eq!(store.version().unwrap(), 1);
    }

    #[test]
    fn snapshots_are_stable() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path().join("store.log")).unwrap();
        put_and_commit(&store, &[("a", "1")]);
        let snapshot = store.snapshot().unwrap();
        put_and_commit(&store, &[("a", "2")]);
        assert_eq!(snapshot.get("a").unwrap(), Some(b"1".to_vec()));
        assert_eq!(snapshot.version(), 1);
    }

    #[test]
    fn conflicting_commit_leaves_log_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.log");
        let store = FileStore::open(&path).unwrap();
        let mut first = store.begin().unwrap();
        let mut second = store.begin().unwrap();
        first.get("k").unwrap();
        second.get("k").unwrap();
        first.put("k", b"1".to_vec()).unwrap();
        second.put("k", b"2".to_vec()).unwrap();
        first.commit().unwrap();
        let len = fs::metadata(&path).unwrap().len();
        assert!(matches!(second.commit(), Err(Error::Conflict(_))));
        assert_eq!(fs::metadata(&path).unwrap().len(), len);
    }
}
