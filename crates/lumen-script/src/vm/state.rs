//! Shared VM state and the stop-the-world collector.
//!
//! # Locking
//!
//! Locks are always taken in this order:
//!
//! 1. the heap
//! 2. the thread table
//! 3. thread contexts
//! 4. the globals
//!
//! A running interpreter holds its own context and never blocks on the heap
//! while holding it: it either gets the heap with `try_lock` or releases its
//! context while it waits. It yields its context every
//! `safepoint_interval` instructions so a collecting thread can scan it.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::{Mutex, RwLock};
use tracing::{error, info};

use super::program::Program;
use super::thread::{ThreadContext, ThreadSlot};
use crate::config::VmConfig;
use crate::gc::{GcRef, Heap, HeapError, HeapObject};
use crate::runtime::Value;

/// Id of the main execution thread.
pub(crate) const MAIN_THREAD: usize = 0;

/// Everything the execution threads of one script share.
pub(crate) struct VmState {
    pub(crate) config: VmConfig,
    pub(crate) program: Program,
    pub(crate) heap: Mutex<Heap>,
    pub(crate) threads: RwLock<Vec<Option<Arc<ThreadSlot>>>>,
    /// One global table per chunk
    pub(crate) globals: RwLock<Vec<Vec<Value>>>,
    /// Serializes host calls on the main thread
    pub(crate) main_entry: Mutex<()>,
    good: AtomicBool,
}

impl VmState {
    pub(crate) fn new(program: Program, config: VmConfig) -> Self {
        let chunks = program.chunks().len();
        Self {
            heap: Mutex::new(Heap::new(config.gc_threshold, config.heap_limit)),
            threads: RwLock::new(vec![Some(Arc::new(ThreadSlot::new(MAIN_THREAD)))]),
            globals: RwLock::new(vec![Vec::new(); chunks]),
            main_entry: Mutex::new(()),
            good: AtomicBool::new(true),
            config,
            program,
        }
    }

    /// Returns false once anything fatal happened or the main thread halted.
    pub(crate) fn is_good(&self) -> bool {
        self.good.load(Ordering::Acquire)
    }

    pub(crate) fn set_bad(&self, reason: &str) {
        if self.good.swap(false, Ordering::AcqRel) {
            error!(reason, "vm is no longer good");
        }
    }

    pub(crate) fn thread(&self, id: usize) -> Option<Arc<ThreadSlot>> {
        self.threads.read().get(id).cloned().flatten()
    }

    pub(crate) fn main(&self) -> Option<Arc<ThreadSlot>> {
        self.thread(MAIN_THREAD)
    }

    /// Collects with roots from every thread, the globals and the pins.
    ///
    /// `current` is the calling thread's context when the caller already
    /// holds it; every other context is locked here.
    pub(crate) fn collect(&self, heap: &mut Heap, current: Option<(usize, &ThreadContext)>) -> usize {
        let threads = self.threads.read();
        let current_id = current.map(|(id, _)| id);
        let others: Vec<_> = threads
            .iter()
            .flatten()
            .filter(|slot| Some(slot.id) != current_id)
            .map(|slot| slot.context.lock())
            .collect();
        let globals = self.globals.read();

        let roots = current
            .map(|(_, context)| context)
            .into_iter()
            .chain(others.iter().map(|guard| &**guard))
            .flat_map(ThreadContext::roots)
            .chain(globals.iter().flatten().copied());
        heap.collect(roots)
    }

    /// Allocates with the heap already locked, collecting first when the
    /// threshold is reached. Overflow makes the VM bad.
    pub(crate) fn allocate_in(
        &self,
        heap: &mut Heap,
        current: Option<(usize, &ThreadContext)>,
        object: HeapObject,
    ) -> Result<GcRef, HeapError> {
        if heap.needs_collection() {
            self.collect(heap, current);
        }
        heap.insert(object).inspect_err(|err| self.set_bad(&err.to_string()))
    }

    /// Allocates from outside any thread context and pins the result.
    pub(crate) fn allocate_pinned(&self, object: HeapObject) -> Result<GcRef, HeapError> {
        let mut heap = self.heap.lock();
        let r = self.allocate_in(&mut heap, None, object)?;
        heap.pin(r);
        Ok(r)
    }

    /// Purges the heap, every thread and the globals, and makes the VM good.
    pub(crate) fn reset(&self) {
        let mut heap = self.heap.lock();
        let mut threads = self.threads.write();
        heap.clear();
        threads.truncate(1);
        for slot in threads.iter().flatten() {
            slot.context.lock().clear();
        }
        let mut globals = self.globals.write();
        for table in globals.iter_mut() {
            table.clear();
        }
        self.good.store(true, Ordering::Release);
        info!("vm reset");
    }

    /// Number of spawned threads still in the table.
    pub(crate) fn spawned_threads(&self) -> usize {
        self.threads
            .read()
            .iter()
            .skip(1)
            .filter(|slot| slot.is_some())
            .count()
    }
}
