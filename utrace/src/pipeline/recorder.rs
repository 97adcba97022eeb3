//! Diagnostics sink for the host pipeline, and per-outcome tallies
//!
//! [`OutcomeCounts`] is also what the kernel `OUTCOMES` counters are summed
//! into, so both sides print the same summary.

use log::{debug, warn};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use utrace_common::pipeline::Diagnostics;
use utrace_common::{Identity, Outcome, OUTCOME_COUNT};

/// How many interceptions ended in each [`Outcome`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OutcomeCounts([u64; OUTCOME_COUNT as usize]);

impl OutcomeCounts {
    #[must_use]
    pub fn get(&self, outcome: Outcome) -> u64 {
        self.0[outcome.index() as usize]
    }

    pub fn add(&mut self, outcome: Outcome, n: u64) {
        self.0[outcome.index() as usize] += n;
    }

    /// Total interceptions
    #[must_use]
    pub fn total(&self) -> u64 {
        self.0.iter().sum()
    }
}

impl fmt::Display for OutcomeCounts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> =
            Outcome::ALL.iter().map(|o| format!("{}: {}", o.label(), self.get(*o))).collect();
        write!(f, "{}", parts.join(", "))
    }
}

/// Counts every decision and writes a log line for it; never blocks
#[derive(Debug, Default)]
pub struct Recorder {
    counts: [AtomicU64; OUTCOME_COUNT as usize],
}

impl Recorder {
    fn record(&self, outcome: Outcome) {
        self.counts[outcome.index() as usize].fetch_add(1, Ordering::Relaxed);
    }

    #[must_use]
    pub fn counts(&self) -> OutcomeCounts {
        let mut counts = OutcomeCounts::default();
        for outcome in Outcome::ALL {
            counts.add(outcome, self.counts[outcome.index() as usize].load(Ordering::Relaxed));
        }
        counts
    }
}

impl Diagnostics for &Recorder {
    fn unknown_identity(&self, ip: u64) {
        self.record(Outcome::UnknownIdentity);
        debug!("no function at ip 0x{ip:x}, dropped");
    }

    fn duplicate_suppressed(&self, identity: Identity<'_>) {
        self.record(Outcome::DuplicateSuppressed);
        debug!("{identity} already reported, skipping");
    }

    fn buffer_full(&self, identity: Identity<'_>) {
        self.record(Outcome::BufferFull);
        warn!("ring buffer full, dropped {identity}");
    }

    fn committed(&self, identity: Identity<'_>) {
        self.record(Outcome::Committed);
        debug!("committed {identity}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counts_by_outcome() {
        let recorder = Recorder::default();
        let sink = &recorder;
        sink.unknown_identity(0x2000);
        sink.committed(Identity::Cookie(1));
        sink.committed(Identity::Cookie(1));
        sink.buffer_full(Identity::Cookie(2));

        let counts = recorder.counts();
        assert_eq!(counts.get(Outcome::Committed), 2);
        assert_eq!(counts.get(Outcome::UnknownIdentity), 1);
        assert_eq!(counts.get(Outcome::BufferFull), 1);
        assert_eq!(counts.get(Outcome::DuplicateSuppressed), 0);
        assert_eq!(counts.total(), 4);
    }

    #[test]
    fn test_summary_line() {
        let mut counts = OutcomeCounts::default();
        counts.add(Outcome::Committed, 3);
        assert_eq!(
            counts.to_string(),
            "committed: 3, unknown identity: 0, duplicate suppressed: 0, buffer full: 0"
        );
    }
}
