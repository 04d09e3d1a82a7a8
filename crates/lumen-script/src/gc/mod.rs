//! Garbage-collected heap.
//!
//! The heap is a slot arena of [`HeapObject`]s addressed by [`GcRef`]
//! handles. Collection is a stop-the-world mark and sweep driven by the VM:
//! the VM gathers roots from every thread's stack and registers, the globals
//! and the pin set, and the heap marks and sweeps.
//!
//! ```text
//! ┌──────┬──────┬──────┬──────┬──────┐
//! │ Str  │ free │Array │Struct│ free │   slots
//! │ g=0  │ g=3  │ g=1  │ g=0  │ g=1  │   generation per slot
//! └──────┴──────┴──────┴──────┴──────┘
//!            ↑                    ↑
//!            └──── free list ─────┘
//! ```
//!
//! A freed slot bumps its generation, so a stale handle never resolves to
//! the slot's next occupant.

mod heap;
mod object;

pub use heap::{Heap, HeapError, HeapStats};
pub use object::HeapObject;

use std::fmt;

/// A handle to a heap object.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct GcRef {
    index: u32,
    generation: u32,
}

impl GcRef {
    /// Creates a handle.
    pub fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }

    /// Slot index.
    #[inline]
    pub fn index(&self) -> u32 {
        self.index
    }

    /// Generation of the slot when the handle was issued.
    #[inline]
    pub fn generation(&self) -> u32 {
        self.generation
    }
}

impl fmt::Debug for GcRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "@{}.{}", self.index, self.generation)
    }
}
