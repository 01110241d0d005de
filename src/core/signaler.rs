//! Scheduled wake-up signals for the dispatch agent.
//!
//! A signal is a cancellable one-shot or repeating deadline tied to a
//! stream; when it fires the agent invokes the stream's handler. Cancelling
//! after the final firing is a no-op.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::time::{Duration, Instant};

struct SignalEntry {
    stream_id: u64,
    repeat: Option<Duration>,
}

#[derive(Default)]
pub struct SignalQueue {
    heap: BinaryHeap<Reverse<(Instant, u64)>>,
    entries: HashMap<u64, SignalEntry>,
    next_id: u64,
}

impl SignalQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedules a wake-up for `stream_id` after `delay`; `repeat` makes it
    /// periodic. Returns the signal id used for cancellation.
    pub fn schedule(&mut self, stream_id: u64, delay: Duration, repeat: Option<Duration>) -> u64 {
        self.next_id += 1;
        let id = self.next_id;
        self.entries.insert(id, SignalEntry { stream_id, repeat });
        self.heap.push(Reverse((Instant::now() + delay, id)));
        id
    }

    /// Cancels a pending signal. Returns false (a no-op) when the signal
    /// already fired its final time or never existed.
    pub fn cancel(&mut self, signal_id: u64) -> bool {
        self.entries.remove(&signal_id).is_some()
    }

    /// Pops the next due signal, rescheduling repeating ones. Returns
    /// `(signal_id, stream_id)`.
    pub fn pop_due(&mut self, now: Instant) -> Option<(u64, u64)> {
        while let Some(Reverse((deadline, id))) = self.heap.peek().copied() {
            if deadline > now {
                return None;
            }
            self.heap.pop();

            // Cancelled entries stay in the heap until their deadline;
            // skip them here.
            let Some(entry) = self.entries.get(&id) else {
                continue;
            };
            let stream_id = entry.stream_id;
            match entry.repeat {
                Some(period) => {
                    self.heap.push(Reverse((now + period, id)));
                }
                None => {
                    self.entries.remove(&id);
                }
            }
            return Some((id, stream_id));
        }
        None
    }

    pub fn pending(&self) -> usize {
        self.entries.len()
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.heap.peek().map(|Reverse((deadline, _))| *deadline)
    }
}
