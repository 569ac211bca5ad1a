use std::collections::VecDeque;
use std::time::Duration;

use serde::{Serialize, Serializer};

/// What happened in one streaming cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CycleReport {
    /// Cycle number, starting at 1. A stop flush reuses the last number.
    pub cycle: u64,
    /// Distinct coordinates the engine reported missing.
    pub missing: usize,
    /// Missing chunks installed from a stored blob.
    pub loaded: usize,
    /// Missing chunks generated fresh.
    pub generated: usize,
    /// Store reads that errored or timed out.
    pub read_failures: usize,
    /// Loads or generations the engine rejected.
    pub resolve_failures: usize,
    /// Distinct coordinates the engine reported resident.
    pub resident: usize,
    /// Chunks the engine reported unchanged (no write issued).
    pub unchanged: usize,
    /// Writes that completed successfully.
    pub saved: usize,
    /// Writes that errored or timed out.
    pub write_failures: usize,
    /// Saves the engine could not produce.
    pub save_failures: usize,
    /// Distinct coordinates the engine reported droppable.
    pub droppable: usize,
    /// Chunks evicted.
    pub dropped: usize,
    /// Droppable chunks kept resident this cycle.
    pub retained: usize,
    /// Repeated coordinates removed from engine snapshots.
    pub duplicates: usize,
    /// Set when a stop request cut the cycle short.
    pub interrupted: bool,
    #[serde(rename = "elapsed_us", serialize_with = "serialize_micros")]
    pub elapsed: Duration,
}

impl CycleReport {
    /// Total failed operations of any kind.
    pub fn failures(&self) -> usize {
        self.read_failures + self.resolve_failures + self.write_failures + self.save_failures
    }

    /// True when the cycle issued no engine or store command at all.
    pub fn is_idle(&self) -> bool {
        self.loaded + self.generated + self.saved + self.dropped + self.failures() == 0
    }
}

fn serialize_micros<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u64(u64::try_from(value.as_micros()).unwrap_or(u64::MAX))
}

/// Running totals over the coordinator's lifetime.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StreamTotals {
    pub cycles: u64,
    pub loaded: u64,
    pub generated: u64,
    pub saved: u64,
    pub dropped: u64,
    pub failures: u64,
}

impl StreamTotals {
    pub fn record(&mut self, report: &CycleReport) {
        self.loaded += report.loaded as u64;
        self.generated += report.generated as u64;
        self.saved += report.saved as u64;
        self.dropped += report.dropped as u64;
        self.failures += report.failures() as u64;
    }
}

/// Durations of the most recent cycles, oldest first.
#[derive(Debug)]
pub struct CycleTimer {
    window: VecDeque<Duration>,
    capacity: usize,
}

impl CycleTimer {
    /// A window holding the last `capacity` cycles (at least one).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            window: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn record(&mut self, elapsed: Duration) {
        if self.window.len() == self.capacity {
            self.window.pop_front();
        }
        self.window.push_back(elapsed);
    }

    /// Mean over the window, zero before the first cycle.
    pub fn average(&self) -> Duration {
        match u32::try_from(self.window.len()) {
            Ok(0) | Err(_) => Duration::ZERO,
            Ok(n) => self.window.iter().sum::<Duration>() / n,
        }
    }

    pub fn max(&self) -> Duration {
        self.window.iter().max().copied().unwrap_or_default()
    }

    /// Most recent cycle duration.
    pub fn last(&self) -> Option<Duration> {
        self.window.back().copied()
    }

    pub fn count(&self) -> usize {
        self.window.len()
    }
}
