//! Host model of the BPF ring buffer
//!
//! Capacity is accounted in bytes exactly like `BPF_MAP_TYPE_RINGBUF`: each
//! record costs an 8-byte header plus its payload rounded up to 8. A
//! reservation claims its bytes with a compare-and-swap and fails immediately
//! when they don't fit. Committed records travel over an unbounded channel,
//! so producers never wait on each other or on the consumer; bytes are given
//! back when the consumer takes a record or a slot is dropped uncommitted.

use crossbeam_channel::{unbounded, Receiver, Sender};
use std::marker::PhantomData;
use std::sync::atomic::{AtomicUsize, Ordering};
use utrace_common::pipeline::{EventBuffer, ReservedSlot};
use utrace_common::{ringbuf_slot_size, EventRecord};

/// A committed record as the consumer sees it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostRecord {
    pub bytes: Vec<u8>,
    /// Commit flags the producer passed
    pub flags: u64,
}

pub struct HostRingBuf {
    capacity: usize,
    used: AtomicUsize,
    tx: Sender<HostRecord>,
    rx: Receiver<HostRecord>,
}

impl HostRingBuf {
    #[must_use]
    pub fn with_byte_size(capacity: usize) -> Self {
        let (tx, rx) = unbounded();
        Self { capacity, used: AtomicUsize::new(0), tx, rx }
    }

    /// Bytes held by reserved or unconsumed records
    #[must_use]
    pub fn used(&self) -> usize {
        self.used.load(Ordering::Acquire)
    }

    fn claim(&self, bytes: usize) -> bool {
        self.used
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |used| {
                used.checked_add(bytes).filter(|&total| total <= self.capacity)
            })
            .is_ok()
    }

    fn release(&self, bytes: usize) {
        self.used.fetch_sub(bytes, Ordering::AcqRel);
    }

    /// Take the next committed record, freeing its space.
    pub fn next(&self) -> Option<HostRecord> {
        let record = self.rx.try_recv().ok()?;
        self.release(ringbuf_slot_size(record.bytes.len()));
        Some(record)
    }

    /// Take every committed record currently visible.
    pub fn drain(&self) -> Vec<HostRecord> {
        std::iter::from_fn(|| self.next()).collect()
    }
}

/// A reservation: space is held until commit hands it to the consumer
pub struct HostSlot<'a, T> {
    ring: &'a HostRingBuf,
    bytes: Vec<u8>,
    committed: bool,
    _record: PhantomData<T>,
}

impl<T: EventRecord> ReservedSlot<T> for HostSlot<'_, T> {
    fn write(&mut self, record: &T) {
        record.encode(&mut self.bytes);
    }

    fn commit(mut self, flags: u64) {
        let bytes = std::mem::take(&mut self.bytes);
        self.committed = true;
        // Both ends live in `ring`, so the channel can't be disconnected
        let _ = self.ring.tx.send(HostRecord { bytes, flags });
    }
}

impl<T> Drop for HostSlot<'_, T> {
    fn drop(&mut self) {
        if !self.committed {
            self.ring.release(ringbuf_slot_size(self.bytes.len()));
        }
    }
}

impl<'a> EventBuffer for &'a HostRingBuf {
    type Slot<T: EventRecord> = HostSlot<'a, T>;

    fn try_reserve<T: EventRecord>(&self) -> Option<HostSlot<'a, T>> {
        let ring: &'a HostRingBuf = *self;
        if !ring.claim(ringbuf_slot_size(T::WIRE_SIZE)) {
            return None;
        }
        Some(HostSlot { ring, bytes: vec![0u8; T::WIRE_SIZE], committed: false, _record: PhantomData })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use utrace_common::{CookieEvent, FuncName};

    #[test]
    fn test_reservation_accounts_header_and_padding() {
        let ring = HostRingBuf::with_byte_size(4096);
        let slot = (&ring).try_reserve::<FuncName>().unwrap();
        assert_eq!(ring.used(), 72);
        drop(slot);
        assert_eq!(ring.used(), 0);
    }

    #[test]
    fn test_full_buffer_fails_fast() {
        let ring = HostRingBuf::with_byte_size(32);
        let a = (&ring).try_reserve::<CookieEvent>();
        let b = (&ring).try_reserve::<CookieEvent>();
        let c = (&ring).try_reserve::<CookieEvent>();
        assert!(a.is_some() && b.is_some());
        assert!(c.is_none());
    }

    #[test]
    fn test_commit_is_visible_and_consumption_frees_space() {
        let ring = HostRingBuf::with_byte_size(16);
        let mut slot = (&ring).try_reserve::<CookieEvent>().unwrap();
        assert!(ring.next().is_none());

        slot.write(&CookieEvent { cookie: 7 });
        slot.commit(2);
        assert!((&ring).try_reserve::<CookieEvent>().is_none());

        let record = ring.next().unwrap();
        assert_eq!(record, HostRecord { bytes: 7u64.to_le_bytes().to_vec(), flags: 2 });
        assert_eq!(ring.used(), 0);
        assert!((&ring).try_reserve::<CookieEvent>().is_some());
    }
}
