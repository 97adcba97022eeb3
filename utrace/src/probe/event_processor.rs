//! # Event Processing
//!
//! Decodes records drained from the `EVENTS` ring buffer and acknowledges the
//! function each one names.
//!
//! ## Records
//!
//! - **Name lookup**: 64-byte zero-padded name
//! - **Cookie policies**: 8-byte little-endian cookie, an index into the
//!   traced function list
//!
//! Each function is printed the first time it is acknowledged; later events
//! for it only bump the counters.
//!
//! Draining is bounded per call so a ring that producers refill as fast as it
//! empties still hands control back to the caller.

use aya::maps::{MapData, RingBuf};
use log::{debug, warn};
use std::collections::{BTreeSet, HashMap};
use utrace_common::{CookieEvent, EventRecord, FuncName, Policy};

use crate::pipeline::HostRingBuf;
use crate::symbolization::BinaryImage;

/// Records taken per drain pass before the consumer loop checks its exit
/// conditions again
pub const DRAIN_BATCH: usize = 65_536;

/// A queue of committed records, read one at a time
pub trait RecordSource {
    /// Pass the next record to `f`. Returns `false` when nothing is queued.
    fn pop<F: FnOnce(&[u8])>(&mut self, f: F) -> bool;
}

impl RecordSource for RingBuf<MapData> {
    fn pop<F: FnOnce(&[u8])>(&mut self, f: F) -> bool {
        match self.next() {
            Some(item) => {
                f(&*item);
                true
            }
            None => false,
        }
    }
}

impl RecordSource for &HostRingBuf {
    fn pop<F: FnOnce(&[u8])>(&mut self, f: F) -> bool {
        match self.next() {
            Some(record) => {
                f(record.bytes.as_slice());
                true
            }
            None => false,
        }
    }
}

/// Outcome of processing one record
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Processed {
    /// First event for this function
    NewlyAcked(String),
    /// Function already acknowledged
    Repeat,
    /// Record did not decode or named no traced function
    Rejected,
}

pub struct EventProcessor<'a> {
    policy: Policy,
    image: &'a BinaryImage,
    /// Name record → index into `image.functions` (name lookup policy)
    by_name: HashMap<FuncName, usize>,
    /// Indices of acknowledged functions
    acked: BTreeSet<usize>,

    pub event_count: u64,
    pub malformed: u64,
    pub unknown: u64,
}

impl<'a> EventProcessor<'a> {
    #[must_use]
    pub fn new(policy: Policy, image: &'a BinaryImage) -> Self {
        let mut by_name = HashMap::new();
        if !policy.uses_cookies() {
            for (i, func) in image.functions.iter().enumerate() {
                // Names equal in their first 64 bytes share a record; first wins
                by_name.entry(FuncName::new(&func.name)).or_insert(i);
            }
        }

        Self {
            policy,
            image,
            by_name,
            acked: BTreeSet::new(),
            event_count: 0,
            malformed: 0,
            unknown: 0,
        }
    }

    fn function_index(&mut self, bytes: &[u8]) -> Option<usize> {
        if bytes.len() != self.policy.record_size() {
            warn!("Received {}-byte record, expected {}", bytes.len(), self.policy.record_size());
            self.malformed += 1;
            return None;
        }

        let index = if self.policy.uses_cookies() {
            let event = CookieEvent::decode(bytes)?;
            self.image.by_cookie(event.cookie).map(|_| event.cookie as usize)
        } else {
            let name = FuncName::decode(bytes)?;
            self.by_name.get(&name).copied()
        };

        if index.is_none() {
            debug!("Record names no traced function: {bytes:02x?}");
            self.unknown += 1;
        }
        index
    }

    /// Process one raw record from the ring buffer
    pub fn process(&mut self, bytes: &[u8]) -> Processed {
        self.event_count += 1;
        let Some(index) = self.function_index(bytes) else {
            return Processed::Rejected;
        };
        if self.acked.insert(index) {
            Processed::NewlyAcked(self.image.functions[index].name.clone())
        } else {
            Processed::Repeat
        }
    }

    /// Process up to `limit` records from `source`, calling `on_ack` with
    /// each newly acknowledged function. Returns how many were taken; a
    /// return of `limit` means more may be waiting.
    pub fn drain<S: RecordSource>(&mut self, source: &mut S, limit: usize, mut on_ack: impl FnMut(&str)) -> usize {
        let mut taken = 0;
        while taken < limit {
            let mut processed = None;
            if !source.pop(|bytes| processed = Some(self.process(bytes))) {
                break;
            }
            taken += 1;
            if let Some(Processed::NewlyAcked(name)) = processed {
                on_ack(&name);
            }
        }
        taken
    }

    #[must_use]
    pub fn acked_count(&self) -> usize {
        self.acked.len()
    }

    #[must_use]
    pub fn traced_count(&self) -> usize {
        self.image.functions.len()
    }

    /// Acknowledged fraction of traced functions, 0.0 to 1.0
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn coverage(&self) -> f64 {
        if self.image.functions.is_empty() {
            return 0.0;
        }
        self.acked.len() as f64 / self.image.functions.len() as f64
    }

    /// Names of acknowledged functions, in address order
    #[must_use]
    pub fn acked_names(&self) -> Vec<String> {
        self.acked.iter().map(|&i| self.image.functions[i].name.clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Cookie;
    use crate::symbolization::TracedFunction;
    use utrace_common::pipeline::{CookieResolver, Pipeline, ReportAll};
    use crate::pipeline::{HostHit, Recorder};

    fn image() -> BinaryImage {
        let functions = ["main", "app::run", "app::stop"]
            .iter()
            .enumerate()
            .map(|(i, name)| TracedFunction {
                name: (*name).to_string(),
                symbol: (*name).to_string(),
                address: 0x1000 + i as u64,
                file_offset: 0x1000 + i as u64,
                cookie: Cookie(i as u64),
            })
            .collect();
        BinaryImage { path: "/bin/app".into(), is_pie: false, functions }
    }

    fn cookie(c: u64) -> Vec<u8> {
        c.to_le_bytes().to_vec()
    }

    #[test]
    fn test_cookie_records_ack_once() {
        let image = image();
        let mut processor = EventProcessor::new(Policy::CookieAll, &image);

        assert_eq!(processor.process(&cookie(1)), Processed::NewlyAcked("app::run".into()));
        assert_eq!(processor.process(&cookie(1)), Processed::Repeat);
        assert_eq!(processor.process(&cookie(0)), Processed::NewlyAcked("main".into()));

        assert_eq!(processor.event_count, 3);
        assert_eq!(processor.acked_names(), ["main", "app::run"]);
    }

    #[test]
    fn test_name_records() {
        let image = image();
        let mut processor = EventProcessor::new(Policy::NameLookup, &image);
        let record = FuncName::new("app::stop");

        assert_eq!(processor.process(&record.name), Processed::NewlyAcked("app::stop".into()));
        assert!((processor.coverage() - 1.0 / 3.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_unknown_and_malformed_records() {
        let image = image();
        let mut processor = EventProcessor::new(Policy::CookieDedup, &image);

        assert_eq!(processor.process(&cookie(99)), Processed::Rejected);
        assert_eq!(processor.process(&[0u8; 3]), Processed::Rejected);
        // A name record under a cookie policy has the wrong size
        assert_eq!(processor.process(&FuncName::new("main").name), Processed::Rejected);

        assert_eq!(processor.unknown, 1);
        assert_eq!(processor.malformed, 2);
        assert_eq!(processor.acked_count(), 0);
    }

    /// Never runs dry, like a ring refilled faster than it is read
    struct Endless(u64);

    impl RecordSource for Endless {
        fn pop<F: FnOnce(&[u8])>(&mut self, f: F) -> bool {
            self.0 += 1;
            f(cookie(self.0 % 3).as_slice());
            true
        }
    }

    #[test]
    fn test_drain_stops_at_limit_on_endless_source() {
        let image = image();
        let mut processor = EventProcessor::new(Policy::CookieAll, &image);
        let mut source = Endless(0);
        let mut acked = Vec::new();

        let taken = processor.drain(&mut source, 1000, |name| acked.push(name.to_string()));

        assert_eq!(taken, 1000);
        assert_eq!(processor.event_count, 1000);
        assert_eq!(acked.len(), 3);
    }

    #[test]
    fn test_drain_leaves_rest_of_ring_queued() {
        let image = image();
        let ring = HostRingBuf::with_byte_size(1 << 16);
        let recorder = Recorder::default();
        let pipeline = Pipeline { resolver: CookieResolver, dedup: ReportAll, buffer: &ring, diagnostics: &recorder };
        for c in [0, 1, 2, 0, 1, 2] {
            pipeline.capture(&HostHit::cookie(c), 0).unwrap();
        }

        let mut processor = EventProcessor::new(Policy::CookieAll, &image);
        let mut source = &ring;
        let mut acked = Vec::new();

        assert_eq!(processor.drain(&mut source, 4, |name| acked.push(name.to_string())), 4);
        assert_eq!(acked, ["main", "app::run", "app::stop"]);
        assert_eq!(processor.drain(&mut source, 4, |_| {}), 2);
        assert_eq!(processor.drain(&mut source, 4, |_| {}), 0);
    }
}
