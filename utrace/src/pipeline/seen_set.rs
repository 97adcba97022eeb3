//! Host seen set: sharded mutex-guarded sets with a global capacity
//!
//! Test-and-set happens under the shard lock, so of N racing callers with the
//! same cookie exactly one observes `Mark::New`. Shards keep unrelated cookies
//! from contending.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use utrace_common::pipeline::{Mark, SeenSet};
use utrace_common::SEEN_MAX_ENTRIES;

const SHARDS: usize = 16;

pub struct HostSeenSet {
    shards: [Mutex<HashSet<u64>>; SHARDS],
    len: AtomicUsize,
    capacity: usize,
}

impl HostSeenSet {
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            shards: std::array::from_fn(|_| Mutex::new(HashSet::new())),
            len: AtomicUsize::new(0),
            capacity,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.len.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn contains(&self, cookie: u64) -> bool {
        self.shard(cookie).lock().unwrap_or_else(PoisonError::into_inner).contains(&cookie)
    }

    fn shard(&self, cookie: u64) -> &Mutex<HashSet<u64>> {
        // Cookies are dense indices; the low bits spread them evenly
        &self.shards[(cookie % SHARDS as u64) as usize]
    }
}

impl Default for HostSeenSet {
    fn default() -> Self {
        Self::with_capacity(SEEN_MAX_ENTRIES as usize)
    }
}

impl SeenSet for HostSeenSet {
    fn mark(&self, cookie: u64) -> Mark {
        let mut shard = self.shard(cookie).lock().unwrap_or_else(PoisonError::into_inner);
        if shard.contains(&cookie) {
            return Mark::AlreadySeen;
        }
        let reserved = self
            .len
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| (n < self.capacity).then_some(n + 1));
        if reserved.is_err() {
            return Mark::Untracked;
        }
        shard.insert(cookie);
        Mark::New
    }

    fn unmark(&self, cookie: u64) {
        let mut shard = self.shard(cookie).lock().unwrap_or_else(PoisonError::into_inner);
        if shard.remove(&cookie) {
            self.len.fetch_sub(1, Ordering::AcqRel);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mark_is_test_and_set() {
        let seen = HostSeenSet::default();
        assert_eq!(seen.mark(42), Mark::New);
        assert_eq!(seen.mark(42), Mark::AlreadySeen);
        assert!(seen.contains(42));
        assert_eq!(seen.len(), 1);
    }

    #[test]
    fn test_full_set_reports_untracked() {
        let seen = HostSeenSet::with_capacity(2);
        assert_eq!(seen.mark(1), Mark::New);
        assert_eq!(seen.mark(2), Mark::New);
        assert_eq!(seen.mark(3), Mark::Untracked);
        // Present entries still dedup
        assert_eq!(seen.mark(1), Mark::AlreadySeen);
        assert!(!seen.contains(3));
    }

    #[test]
    fn test_unmark_frees_capacity() {
        let seen = HostSeenSet::with_capacity(1);
        assert_eq!(seen.mark(1), Mark::New);
        seen.unmark(1);
        seen.unmark(1);
        assert!(seen.is_empty());
        assert_eq!(seen.mark(2), Mark::New);
    }

    #[test]
    fn test_concurrent_marks_of_one_cookie() {
        let seen = HostSeenSet::default();
        let winners = AtomicUsize::new(0);
        std::thread::scope(|s| {
            for _ in 0..16 {
                s.spawn(|| {
                    if seen.mark(9) == Mark::New {
                        winners.fetch_add(1, Ordering::Relaxed);
                    }
                });
            }
        });
        assert_eq!(winners.load(Ordering::Relaxed), 1);
    }
}
