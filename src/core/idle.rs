//! Bounded backoff idle strategy for the dispatch-agent event loop.
//!
//! Escalates busy-spin → yield → bounded park after the configured counts,
//! bounding CPU use under light load while keeping latency low under heavy
//! load. Any completed work resets the escalation.

use std::time::Duration;

pub struct IdleStrategy {
    spin_limit: u32,
    yield_limit: u32,
    park_timeout: Duration,
    count: u32,
}

impl IdleStrategy {
    pub fn new(spin_limit: u32, yield_limit: u32, park_timeout: Duration) -> Self {
        Self {
            spin_limit,
            yield_limit,
            park_timeout,
            count: 0,
        }
    }

    /// Called when an event-loop iteration found no work.
    pub fn idle(&mut self) {
        if self.count < self.spin_limit {
            self.count += 1;
            std::hint::spin_loop();
        } else if self.count < self.spin_limit + self.yield_limit {
            self.count += 1;
            std::thread::yield_now();
        } else {
            std::thread::sleep(self.park_timeout);
        }
    }

    /// Called when an iteration performed work.
    pub fn reset(&mut self) {
        self.count = 0;
    }

    /// Current escalation phase, for tests and introspection.
    pub fn phase(&self) -> IdlePhase {
        if self.count < self.spin_limit {
            IdlePhase::Spinning
        } else if self.count < self.spin_limit + self.yield_limit {
            IdlePhase::Yielding
        } else {
            IdlePhase::Parking
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdlePhase {
    Spinning,
    Yielding,
    Parking,
}
