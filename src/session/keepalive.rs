//! Keepalive scheduling for the receive loop

use std::time::Duration;
use tokio::time::Instant;

/// When a keepalive becomes due
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeepaliveCadence {
    /// After this many loop iterations. Only as accurate as the poll bound.
    Iterations(u32),
    /// Once this much wall-clock time has passed since the last send attempt
    Interval(Duration),
}

/// Counts loop iterations since the last keepalive send attempt.
///
/// Lives on the receive loop's stack; never shared.
#[derive(Debug)]
pub struct KeepaliveScheduler {
    cadence: KeepaliveCadence,
    count: u32,
    last_reset: Instant,
    lead: Duration,
}

impl KeepaliveScheduler {
    pub fn new(cadence: KeepaliveCadence) -> Self {
        Self {
            cadence,
            count: 0,
            last_reset: Instant::now(),
            lead: Duration::ZERO,
        }
    }

    /// Fire this much before the interval runs out.
    ///
    /// Set to the poll bound so the next tick cannot land past the deadline.
    pub fn with_lead(mut self, lead: Duration) -> Self {
        self.lead = lead;
        self
    }

    /// Measure the first interval from `epoch` instead of from construction
    pub fn since(mut self, epoch: Instant) -> Self {
        self.last_reset = epoch;
        self
    }

    /// Advance one iteration; true exactly when a keepalive is due
    pub fn tick(&mut self) -> bool {
        self.count = self.count.saturating_add(1);
        match self.cadence {
            KeepaliveCadence::Iterations(threshold) => self.count >= threshold,
            KeepaliveCadence::Interval(interval) => {
                self.last_reset.elapsed() + self.lead >= interval
            }
        }
    }

    /// Zero the counter after a send attempt, successful or not
    pub fn reset(&mut self) {
        self.count = 0;
        self.last_reset = Instant::now();
    }

    /// Iterations since the last reset
    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn cadence(&self) -> KeepaliveCadence {
        self.cadence
    }
}
