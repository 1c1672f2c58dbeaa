//! Transaction-ID allocation.
//!
//! IDs are monotonic per session, start at 1, never take the value 0, and
//! wrap back past `u32::MAX`. Allocation happens in reserved blocks so a
//! command builder that burns several IDs internally cannot collide with a
//! concurrent builder.

use std::sync::atomic::{AtomicU32, Ordering};

pub const DEFAULT_RESERVE_BLOCK: u32 = 32;

#[derive(Debug)]
pub struct TransactionAllocator {
    next: AtomicU32,
    block_size: u32,
}

impl TransactionAllocator {
    pub fn new(block_size: u32) -> Self {
        Self::with_start(1, block_size)
    }

    pub(crate) fn with_start(start: u32, block_size: u32) -> Self {
        assert!(block_size > 0);
        Self {
            next: AtomicU32::new(start),
            block_size,
        }
    }

    /// Reserve the next `block_size` IDs for one caller.
    pub fn reserve(&self) -> TxBlock {
        let start = self.next.fetch_add(self.block_size, Ordering::Relaxed);
        TxBlock {
            next: start,
            remaining: self.block_size,
        }
    }
}

impl Default for TransactionAllocator {
    fn default() -> Self {
        Self::new(DEFAULT_RESERVE_BLOCK)
    }
}

/// A reserved run of transaction IDs. `take` consumes them in order,
/// silently stepping over 0 when the counter wraps.
#[derive(Debug)]
pub struct TxBlock {
    next: u32,
    remaining: u32,
}

impl TxBlock {
    pub fn take(&mut self) -> u32 {
        loop {
            assert!(self.remaining > 0, "transaction block exhausted");
            let id = self.next;
            self.next = self.next.wrapping_add(1);
            self.remaining -= 1;
            if id != 0 {
                return id;
            }
        }
    }
}
