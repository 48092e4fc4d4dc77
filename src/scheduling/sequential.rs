//! Sequential back-end of event decoding

use super::decode_one;
use crate::{error::Result, event::Event};

/// Decode events in sequential mode, stopping at the first invalid one
pub fn decode_batch_impl(raw: &[Vec<u8>], first_position: usize) -> Result<Vec<Event>> {
    raw.iter()
        .enumerate()
        .map(|(idx, bytes)| decode_one(bytes, first_position + idx))
        .collect()
}
