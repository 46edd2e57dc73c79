// src/core/refcount.rs

//! An explicit, single-threaded ownership count.
//!
//! A client connection is shared between the registry, its bound request
//! engine and any line batch currently iterating its input. Tearing a
//! connection down (`destroy`) and releasing its storage (`free`) are separate
//! events: the latter only happens once the last holder calls `release`.

use std::cell::Cell;

#[derive(Debug)]
pub struct RefCount {
    count: Cell<u32>,
}

impl RefCount {
    /// Starts at one, the implicit hold of whoever created the object.
    pub fn new() -> Self {
        Self {
            count: Cell::new(1),
        }
    }

    pub fn acquire(&self) {
        self.count.set(self.count.get() + 1);
    }

    /// Drops one reference. Returns `true` if this was the last one and the
    /// caller is now responsible for freeing the object.
    ///
    /// Releasing an already-zero count is a bug; it is reported and ignored
    /// rather than wrapping around.
    pub fn release(&self) -> bool {
        let current = self.count.get();
        debug_assert!(current > 0, "reference count underflow");
        if current == 0 {
            tracing::error!("BUG: reference count released below zero");
            return false;
        }
        self.count.set(current - 1);
        current == 1
    }

    pub fn get(&self) -> u32 {
        self.count.get()
    }
}

impl Default for RefCount {
    fn default() -> Self {
        Self::new()
    }
}
