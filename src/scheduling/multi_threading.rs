//! Multi-threaded back-end of event decoding

use super::decode_one;
use crate::{error::Result, event::Event};
use std::sync::Mutex;

/// Number of events decoded by each parallel task
///
/// Decoding one event only takes a few microseconds, so tasks must be large
/// enough to amortize the scheduling overhead.
///
const TASK_SIZE: usize = 256;

/// Decode events in multi-threaded mode
///
/// Each task decodes a contiguous chunk of the batch. Results are merged in
/// chunk order, so the output and the reported error do not depend on thread
/// scheduling.
///
pub fn decode_batch_impl(raw: &[Vec<u8>], first_position: usize) -> Result<Vec<Event>> {
    // Small batches are not worth the synchronization
    if raw.len() <= TASK_SIZE {
        return decode_chunk(raw, first_position);
    }

    let num_tasks = (raw.len() + TASK_SIZE - 1) / TASK_SIZE;
    let chunks = OrderedResults::new(num_tasks);

    // This function is a synchronization scope: it will only return
    // once all inner tasks have been executed
    rayon::scope(|scope| {
        for (chunk_id, chunk) in raw.chunks(TASK_SIZE).enumerate() {
            let chunks_ref = &chunks;
            scope.spawn(move |_| {
                let result = decode_chunk(chunk, first_position + chunk_id * TASK_SIZE);
                chunks_ref.set_task_result(chunk_id, result);
            });
        }
    });

    chunks.into_merged_result(raw.len())
}

/// Decode a contiguous chunk of events
fn decode_chunk(raw: &[Vec<u8>], first_position: usize) -> Result<Vec<Event>> {
    raw.iter()
        .enumerate()
        .map(|(idx, bytes)| decode_one(bytes, first_position + idx))
        .collect()
}

/// Storage for the results of parallel tasks, merged in task order
struct OrderedResults {
    results: Box<[Mutex<Option<Result<Vec<Event>>>>]>,
}
//
impl OrderedResults {
    /// Set up results storage for N parallel tasks
    fn new(num_tasks: usize) -> Self {
        assert!(num_tasks > 0, "There should be at least one task");
        Self {
            results: (0..num_tasks)
                .map(|_| Mutex::new(None))
                .collect::<Vec<_>>()
                .into_boxed_slice(),
        }
    }

    /// Record the result of the n-th task
    fn set_task_result(&self, task_id: usize, result: Result<Vec<Event>>) {
        let mut lock = self.results[task_id]
            .lock()
            .expect("Mutex data should be valid");
        assert!(lock.is_none(), "Tasks should not report results twice");
        *lock = Some(result);
    }

    /// Concatenate the task results in order, or report the first error
    fn into_merged_result(self, capacity: usize) -> Result<Vec<Event>> {
        let mut events = Vec::with_capacity(capacity);
        for entry in self.results.into_vec() {
            let result = entry
                .into_inner()
                .expect("Mutex data should be valid")
                .expect("Result should be ready");
            events.extend(result?);
        }
        Ok(events)
    }
}
