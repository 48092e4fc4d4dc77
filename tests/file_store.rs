//! Ensemble persistence through the append-only log file store

use hep_ensemble::{Ensemble, Error, Event, FileStore, FourVector, Particle};
use std::{fs::OpenOptions, io::Write, sync::Arc};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Electron-positron pair event
fn ee_event(number: u64) -> Event {
    let energy = 45.6 + number as f64;
    let pz = (energy * energy - 0.000_511 * 0.000_511).sqrt();
    Event::from_particles(vec![
        Particle::electron(FourVector::from_cartesian(energy, 0., 0., pz).unwrap(), -1.).unwrap(),
        Particle::electron(FourVector::from_cartesian(energy, 0., 0., -pz).unwrap(), 1.).unwrap(),
    ])
    .with_numbers(1, number)
    .with_weight(1.)
}

#[test]
fn ensembles_survive_reopening() {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("events.log");
    let events = (0..5).map(ee_event).collect::<Vec<_>>();
    {
        let store = FileStore::open(&path).unwrap();
        let mut ensemble = Ensemble::from_events(store, "lep", events.clone()).unwrap();
        ensemble.set_attribute("sqrt_s", 91.2).unwrap();
        assert_eq!(ensemble.commit().unwrap(), 5);
    }

    let ensemble = Ensemble::load(FileStore::open(&path).unwrap(), "lep").unwrap();
    assert_eq!(ensemble.len(), 5);
    assert_eq!(ensemble.attribute("sqrt_s").unwrap().to_string(), "91.2");
    let stored = ensemble.iter().unwrap().collect::<Result<Vec<_>, _>>().unwrap();
    assert_eq!(stored, events);
    assert_eq!(ensemble.find(1, 3).unwrap(), vec![ee_event(3)]);
}

#[test]
fn torn_commit_is_discarded_on_reopen() {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("events.log");
    {
        let store = FileStore::open(&path).unwrap();
        let mut ensemble = Ensemble::from_events(store, "crashy", (0..3).map(ee_event)).unwrap();
        ensemble.commit().unwrap();
    }
    let committed_len = std::fs::metadata(&path).unwrap().len();

    // Simulate a crash in the middle of the next commit
    {
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        writeln!(
            file,
            "{{\"op\":\"put\",\"key\":\"ensemble/crashy/event/000000000003\",\"len\":1000}}"
        )
        .unwrap();
        file.write_all(b"{\"particles\":[").unwrap();
    }

    let store = Arc::new(FileStore::open(&path).unwrap());
    assert_eq!(std::fs::metadata(&path).unwrap().len(), committed_len);
    let mut ensemble = Ensemble::load(store.clone(), "crashy").unwrap();
    assert_eq!(ensemble.len(), 3);

    // The store remains usable after recovery
    ensemble.append(ee_event(3)).unwrap();
    assert_eq!(ensemble.commit().unwrap(), 1);
    drop(ensemble);
    drop(store);
    let reopened = Ensemble::load(FileStore::open(&path).unwrap(), "crashy").unwrap();
    assert_eq!(reopened.len(), 4);
    assert_eq!(reopened.get(3).unwrap().event_number().unwrap(), 3);
}

#[test]
fn shared_store_detects_conflicts() {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(FileStore::open(dir.path().join("events.log")).unwrap());
    Ensemble::create(store.clone(), "shared").unwrap();

    let mut first = Ensemble::load(store.clone(), "shared").unwrap();
    let mut second = Ensemble::load(store.clone(), "shared").unwrap();
    first.append(ee_event(0)).unwrap();
    second.append(ee_event(1)).unwrap();
    first.commit().unwrap();
    assert!(matches!(second.commit(), Err(Error::Conflict(_))));

    // Several ensembles can live in the same store
    let mut other = Ensemble::create(store.clone(), "other").unwrap();
    other.extend((0..2).map(ee_event)).unwrap();
    other.commit().unwrap();
    assert_eq!(Ensemble::load(store.clone(), "shared").unwrap().len(), 1);
    assert_eq!(Ensemble::load(store, "other").unwrap().len(), 2);
}

#[test]
fn second_store_on_the_same_log_is_refused() {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("events.log");
    let first = FileStore::open(&path).unwrap();
    let mut ensemble = Ensemble::from_events(&first, "owned", (0..2).map(ee_event)).unwrap();
    ensemble.commit().unwrap();

    // Another store would append to the log behind the first one's back
    assert!(matches!(
        FileStore::open(&path),
        Err(Error::Persistence { .. })
    ));
    ensemble.append(ee_event(2)).unwrap();
    assert_eq!(ensemble.commit().unwrap(), 1);
    drop(ensemble);
    drop(first);

    let second = FileStore::open(&path).unwrap();
    let reopened = Ensemble::load(&second, "owned").unwrap();
    assert_eq!(reopened.len(), 3);
    assert_eq!(reopened.get(2).unwrap().event_number().unwrap(), 2);
}

#[test]
fn damage_before_later_commits_is_not_truncated() {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("events.log");
    {
        let store = FileStore::open(&path).unwrap();
        let mut ensemble = Ensemble::from_events(&store, "damaged", (0..2).map(ee_event)).unwrap();
        ensemble.commit().unwrap();
        ensemble.append(ee_event(2)).unwrap();
        ensemble.commit().unwrap();
        ensemble.append(ee_event(3)).unwrap();
        ensemble.commit().unwrap();
    }

    // Break a record of the second transaction
    let mut bytes = std::fs::read(&path).unwrap();
    let key = b"ensemble/damaged/event/000000000002";
    let header = bytes.windows(key.len()).position(|w| w == key).unwrap();
    bytes[header] = b'\xff';
    std::fs::write(&path, &bytes).unwrap();

    assert!(matches!(FileStore::open(&path), Err(Error::CorruptData(_))));
    assert_eq!(std::fs::read(&path).unwrap(), bytes);
}
