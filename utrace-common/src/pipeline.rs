//! Capture pipeline: resolve → dedup → reserve → write → commit
//!
//! Every stage is a trait so the same [`Pipeline::capture`] runs inside the
//! uprobe programs (backed by BPF maps) and in userspace (backed by the host
//! models in `utrace::pipeline`). No stage blocks, retries or loops; each one
//! can end the interception early with a [`Dropped`] outcome, which the probe
//! swallows so the traced function never observes it.

use crate::{CookieEvent, EventRecord, FuncName, Identity, Outcome};

// ============================================================================
// Seams
// ============================================================================

/// Raw context of one interception
pub trait Interception {
    /// Address the probe fired at
    fn instruction_pointer(&self) -> u64;
    /// Cookie bound to the probe at attach time (0 if none was bound)
    fn attach_cookie(&self) -> u64;
}

/// Read-only instruction pointer → name table
pub trait IdentityTable {
    fn lookup(&self, ip: u64) -> Option<FuncName>;
}

/// Result of an atomic test-and-set on the seen set
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Mark {
    /// Inserted by this call
    New,
    /// Already present
    AlreadySeen,
    /// Set is at capacity; nothing was inserted
    Untracked,
}

/// Concurrent set of reported cookies
pub trait SeenSet {
    /// Insert `cookie` if absent. Must be atomic: of N concurrent callers with
    /// the same cookie, at most one observes [`Mark::New`].
    fn mark(&self, cookie: u64) -> Mark;

    /// Remove a marker previously returned as [`Mark::New`].
    fn unmark(&self, cookie: u64);
}

/// Slot handed out by a successful reservation
pub trait ReservedSlot<T: EventRecord> {
    /// Fill the whole slot with `record`.
    fn write(&mut self, record: &T);

    /// Make the slot visible to the consumer.
    fn commit(self, flags: u64);
}

/// Bounded multi-producer buffer with non-blocking reservation
pub trait EventBuffer {
    type Slot<T: EventRecord>: ReservedSlot<T>;

    /// Reserve room for exactly one `T`, or `None` when the buffer is full.
    fn try_reserve<T: EventRecord>(&self) -> Option<Self::Slot<T>>;
}

/// Best-effort trace of each decision point. Must never fail or block.
pub trait Diagnostics {
    fn unknown_identity(&self, ip: u64);
    fn duplicate_suppressed(&self, identity: Identity<'_>);
    fn buffer_full(&self, identity: Identity<'_>);
    fn committed(&self, identity: Identity<'_>);
}

// ============================================================================
// Identity Resolution
// ============================================================================

/// Lookup miss at `ip`
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Unresolved {
    pub ip: u64,
}

pub trait Resolver<C: Interception> {
    type Record: EventRecord;

    fn resolve(&self, ctx: &C) -> Result<Self::Record, Unresolved>;
}

/// Scheme A: name from the instruction pointer table
pub struct TableResolver<'t, T>(pub &'t T);

impl<C: Interception, T: IdentityTable> Resolver<C> for TableResolver<'_, T> {
    type Record = FuncName;

    fn resolve(&self, ctx: &C) -> Result<FuncName, Unresolved> {
        let ip = ctx.instruction_pointer();
        self.0.lookup(ip).ok_or(Unresolved { ip })
    }
}

/// Scheme B: the attach cookie. Never misses.
pub struct CookieResolver;

impl<C: Interception> Resolver<C> for CookieResolver {
    type Record = CookieEvent;

    fn resolve(&self, ctx: &C) -> Result<CookieEvent, Unresolved> {
        Ok(CookieEvent { cookie: ctx.attach_cookie() })
    }
}

// ============================================================================
// Deduplication
// ============================================================================

pub trait Dedup<R: EventRecord> {
    /// Claim `record` for reporting. [`Mark::AlreadySeen`] suppresses it.
    fn check(&self, record: &R) -> Mark;

    /// Give back a [`Mark::New`] claim whose event was never committed.
    fn release(&self, record: &R);
}

/// Full fidelity: every call is reported
pub struct ReportAll;

impl<R: EventRecord> Dedup<R> for ReportAll {
    fn check(&self, _record: &R) -> Mark {
        Mark::Untracked
    }

    fn release(&self, _record: &R) {}
}

/// At most one report per cookie for the lifetime of the seen set
///
/// A full seen set degrades to reporting: losing dedup is preferred over
/// losing the first sighting of a function.
pub struct SeenTracker<'s, S>(pub &'s S);

impl<S: SeenSet> Dedup<CookieEvent> for SeenTracker<'_, S> {
    fn check(&self, record: &CookieEvent) -> Mark {
        self.0.mark(record.cookie)
    }

    fn release(&self, record: &CookieEvent) {
        self.0.unmark(record.cookie);
    }
}

// ============================================================================
// Pipeline
// ============================================================================

/// Why an interception produced no event
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Dropped {
    UnknownIdentity { ip: u64 },
    DuplicateSuppressed,
    BufferFull,
}

impl Dropped {
    #[must_use]
    pub const fn outcome(self) -> Outcome {
        match self {
            Dropped::UnknownIdentity { .. } => Outcome::UnknownIdentity,
            Dropped::DuplicateSuppressed => Outcome::DuplicateSuppressed,
            Dropped::BufferFull => Outcome::BufferFull,
        }
    }
}

/// One capture policy, assembled from its stages
pub struct Pipeline<R, D, B, G> {
    pub resolver: R,
    pub dedup: D,
    pub buffer: B,
    pub diagnostics: G,
}

impl<R, D, B, G> Pipeline<R, D, B, G> {
    /// Run one interception through the pipeline.
    ///
    /// # Errors
    ///
    /// Returns the terminal [`Dropped`] state when no event was committed.
    /// Callers on the probe path discard it.
    pub fn capture<C>(&self, ctx: &C, commit_flags: u64) -> Result<(), Dropped>
    where
        C: Interception,
        R: Resolver<C>,
        D: Dedup<R::Record>,
        B: EventBuffer,
        G: Diagnostics,
    {
        let record = match self.resolver.resolve(ctx) {
            Ok(record) => record,
            Err(Unresolved { ip }) => {
                self.diagnostics.unknown_identity(ip);
                return Err(Dropped::UnknownIdentity { ip });
            }
        };

        let mark = self.dedup.check(&record);
        if mark == Mark::AlreadySeen {
            self.diagnostics.duplicate_suppressed(record.identity());
            return Err(Dropped::DuplicateSuppressed);
        }

        let Some(mut slot) = self.buffer.try_reserve::<R::Record>() else {
            // Unreported, so a later call may claim it again
            if mark == Mark::New {
                self.dedup.release(&record);
            }
            self.diagnostics.buffer_full(record.identity());
            return Err(Dropped::BufferFull);
        };

        slot.write(&record);
        slot.commit(commit_flags);
        self.diagnostics.committed(record.identity());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::{Cell, RefCell};
    use std::collections::{HashMap, HashSet};

    struct Hit {
        ip: u64,
        cookie: u64,
    }

    impl Interception for Hit {
        fn instruction_pointer(&self) -> u64 {
            self.ip
        }
        fn attach_cookie(&self) -> u64 {
            self.cookie
        }
    }

    impl IdentityTable for HashMap<u64, FuncName> {
        fn lookup(&self, ip: u64) -> Option<FuncName> {
            self.get(&ip).copied()
        }
    }

    #[derive(Default)]
    struct Seen(RefCell<HashSet<u64>>);

    impl SeenSet for Seen {
        fn mark(&self, cookie: u64) -> Mark {
            if self.0.borrow_mut().insert(cookie) {
                Mark::New
            } else {
                Mark::AlreadySeen
            }
        }
        fn unmark(&self, cookie: u64) {
            self.0.borrow_mut().remove(&cookie);
        }
    }

    /// Holds `room` records, then refuses reservations
    struct Vec8 {
        room: Cell<usize>,
        out: RefCell<Vec<Vec<u8>>>,
    }

    struct Slot<'a, T> {
        buf: &'a Vec8,
        record: Option<T>,
    }

    impl<T: EventRecord> ReservedSlot<T> for Slot<'_, T> {
        fn write(&mut self, record: &T) {
            self.record = Some(*record);
        }
        fn commit(self, _flags: u64) {
            let mut bytes = vec![0u8; T::WIRE_SIZE];
            if let Some(r) = self.record {
                r.encode(&mut bytes);
            }
            self.buf.out.borrow_mut().push(bytes);
        }
    }

    struct LeakedBuf(&'static Vec8);

    impl EventBuffer for LeakedBuf {
        type Slot<T: EventRecord> = Slot<'static, T>;
        fn try_reserve<T: EventRecord>(&self) -> Option<Self::Slot<T>> {
            let left = self.0.room.get();
            if left == 0 {
                return None;
            }
            self.0.room.set(left - 1);
            Some(Slot { buf: self.0, record: None })
        }
    }

    #[derive(Default)]
    struct Log(RefCell<Vec<Outcome>>);

    impl Diagnostics for Log {
        fn unknown_identity(&self, _ip: u64) {
            self.0.borrow_mut().push(Outcome::UnknownIdentity);
        }
        fn duplicate_suppressed(&self, _identity: Identity<'_>) {
            self.0.borrow_mut().push(Outcome::DuplicateSuppressed);
        }
        fn buffer_full(&self, _identity: Identity<'_>) {
            self.0.borrow_mut().push(Outcome::BufferFull);
        }
        fn committed(&self, _identity: Identity<'_>) {
            self.0.borrow_mut().push(Outcome::Committed);
        }
    }

    fn buffer(room: usize) -> LeakedBuf {
        LeakedBuf(Box::leak(Box::new(Vec8 {
            room: Cell::new(room),
            out: RefCell::new(Vec::new()),
        })))
    }

    #[test]
    fn test_lookup_miss_never_reserves() {
        let table = HashMap::from([(0x1000, FuncName::new("foo"))]);
        let pipeline = Pipeline {
            resolver: TableResolver(&table),
            dedup: ReportAll,
            buffer: buffer(0),
            diagnostics: Log::default(),
        };

        // A zero-room buffer would report BufferFull if a reservation happened
        let result = pipeline.capture(&Hit { ip: 0x2000, cookie: 0 }, 0);
        assert_eq!(result, Err(Dropped::UnknownIdentity { ip: 0x2000 }));
        assert_eq!(*pipeline.diagnostics.0.borrow(), [Outcome::UnknownIdentity]);
    }

    #[test]
    fn test_buffer_full_releases_claim() {
        let seen = Seen::default();
        let pipeline = Pipeline {
            resolver: CookieResolver,
            dedup: SeenTracker(&seen),
            buffer: buffer(0),
            diagnostics: Log::default(),
        };

        let hit = Hit { ip: 0, cookie: 42 };
        assert_eq!(pipeline.capture(&hit, 0), Err(Dropped::BufferFull));
        assert!(seen.0.borrow().is_empty());

        pipeline.buffer.0.room.set(1);
        assert_eq!(pipeline.capture(&hit, 0), Ok(()));
        assert_eq!(pipeline.capture(&hit, 0), Err(Dropped::DuplicateSuppressed));
        assert_eq!(pipeline.buffer.0.out.borrow().len(), 1);
    }

    #[test]
    fn test_name_lookup_never_suppresses() {
        let table = HashMap::from([(0x1000, FuncName::new("foo"))]);
        let pipeline = Pipeline {
            resolver: TableResolver(&table),
            dedup: ReportAll,
            buffer: buffer(3),
            diagnostics: Log::default(),
        };

        for _ in 0..3 {
            assert_eq!(pipeline.capture(&Hit { ip: 0x1000, cookie: 0 }, 0), Ok(()));
        }
        assert!(!pipeline.diagnostics.0.borrow().contains(&Outcome::DuplicateSuppressed));
    }

    #[test]
    fn test_dropped_maps_to_outcome() {
        assert_eq!(Dropped::BufferFull.outcome(), Outcome::BufferFull);
        assert_eq!(Dropped::DuplicateSuppressed.outcome(), Outcome::DuplicateSuppressed);
        assert_eq!(Dropped::UnknownIdentity { ip: 1 }.outcome(), Outcome::UnknownIdentity);
    }
}
