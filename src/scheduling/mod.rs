//! This module takes care of scheduling the decoding of stored events,
//! encapsulating use of multiple threads

#[cfg(not(feature = "multi-threading"))]
mod sequential;
#[cfg(feature = "multi-threading")]
mod multi_threading;

use crate::{
    error::{Error, Result},
    event::Event,
    record,
};

/// Default number of events fetched from the store per round-trip
///
/// Streamed reads hold at most one batch of decoded events in memory. The
/// value is a compromise between store round-trips and memory footprint.
///
pub const DEFAULT_BATCH_SIZE: usize = 10_000;

/// Decode a batch of serialized events in the manner that was configured at
/// build time
///
/// `first_position` is the position of the first event of the batch within
/// its ensemble, it is only used for error reporting. Decoded events are
/// returned in input order. If several events are invalid, the error of the
/// first one is reported.
///
pub fn decode_batch(raw: &[Vec<u8>], first_position: usize) -> Result<Vec<Event>> {
    // ...in sequential mode
    #[cfg(not(feature = "multi-threading"))]
    {
        sequential::decode_batch_impl(raw, first_position)
    }

    // ...in multi-threaded mode
    #[cfg(feature = "multi-threading")]
    {
        multi_threading::decode_batch_impl(raw, first_position)
    }
}

/// Decode one stored event, tagging errors with its position
fn decode_one(bytes: &[u8], position: usize) -> Result<Event> {
    record::decode_event(bytes).map_err(|e| match e {
        Error::CorruptData(msg) => Error::CorruptData(format!("event #{}: {}", position, msg)),
        other => other,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        fourvec::FourVector,
        particle::Particle,
        record::{encode, EventRecord},
    };

    fn raw_event(energy: f64) -> Vec<u8> {
        let event = Event::from_particles(vec![Particle::new(
            FourVector::from_cartesian(energy, 0., 0., 1.).unwrap(),
        )]);
        encode("event", &EventRecord::try_from(&event).unwrap()).unwrap()
    }

    #[test]
    fn decodes_in_order() {
        let raw: Vec<_> = (0..1000).map(|i| raw_event(2. + i as f64)).collect();
        let events = decode_batch(&raw, 0).unwrap();
        assert_eq!(events.len(), 1000);
        for (i, event) in events.iter().enumerate() {
            assert_eq!(event.particles()[0].e(), 2. + i as f64);
        }
    }

    #[test]
    fn reports_first_corrupt_event() {
        let mut raw: Vec<_> = (0..600).map(|i| raw_event(2. + i as f64)).collect();
        raw[500] = b"{}".to_vec();
        raw[550] = b"garbage".to_vec();
        match decode_batch(&raw, 1000) {
            Err(Error::CorruptData(msg)) => assert!(msg.starts_with("event #1500:"), "{}", msg),
            other => panic!("unexpected decoding result {:?}", other.map(|v| v.len())),
        }
    }

    #[test]
    fn empty_batch() {
        assert!(decode_batch(&[], 0).unwrap().is_empty());
    }
}
