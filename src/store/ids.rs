//! Record identifier allocation.
//!
//! Identifiers are issued by an [`IdAllocator`] that the caller creates and
//! shares (behind an [`Arc`](std::sync::Arc)) between every write handle
//! that must agree on one increasing sequence.  Identifier `0` is never
//! issued.

use std::time::{SystemTime, UNIX_EPOCH};

use crossbeam::atomic::AtomicCell;

/// Lock-free, monotonically increasing identifier source.
#[derive(Debug)]
pub struct IdAllocator {
    last: AtomicCell<u64>,
}

impl IdAllocator {
    /// Allocator whose first identifier is `1`.
    pub fn new() -> Self {
        Self::starting_after(0)
    }

    /// Allocator whose first identifier is `last + 1`.
    pub fn starting_after(last: u64) -> Self {
        Self {
            last: AtomicCell::new(last),
        }
    }

    /// Allocator seeded with the current time in microseconds, so identifiers
    /// keep increasing across process restarts without any persisted state.
    pub fn seeded_from_clock() -> Self {
        let micros = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| u64::try_from(d.as_micros()).unwrap_or(u64::MAX))
            .unwrap_or(0);
        Self::starting_after(micros)
    }

    /// Issues the next identifier.
    pub fn allocate(&self) -> u64 {
        let mut current = self.last.load();
        loop {
            let next = current.saturating_add(1);
            match self.last.compare_exchange(current, next) {
                Ok(_) => return next,
                Err(actual) => current = actual,
            }
        }
    }

    /// Records that `id` is in use, so later allocations exceed it.
    pub fn observe(&self, id: u64) {
        let mut current = self.last.load();
        while id > current {
            match self.last.compare_exchange(current, id) {
                Ok(_) => return,
                Err(actual) => current = actual,
            }
        }
    }

    /// The most recently issued or observed identifier.
    pub fn last_issued(&self) -> u64 {
        self.last.load()
    }
}

impl Default for IdAllocator {
    fn default() -> Self {
        Self::new()
    }
}
