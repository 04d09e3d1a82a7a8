//! Slot arena with mark bits and a free list.

use rustc_hash::FxHashMap;
use thiserror::Error;
use tracing::debug;

use super::{GcRef, HeapObject};
use crate::runtime::Value;

/// Heap failures. Every variant is fatal to the VM.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HeapError {
    /// The live object count reached the hard ceiling after a collection
    #[error("heap overflow: {live} live objects at a limit of {limit}")]
    Overflow {
        /// Objects alive when allocation failed
        live: usize,
        /// The configured ceiling
        limit: usize,
    },
}

/// A snapshot of heap occupancy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HeapStats {
    /// Objects currently alive
    pub live: usize,
    /// Slots allocated, free or not
    pub slots: usize,
    /// Live count that triggers the next collection
    pub threshold: usize,
    /// Collections run so far
    pub collections: u64,
}

struct Slot {
    generation: u32,
    marked: bool,
    object: Option<HeapObject>,
}

/// The object heap.
pub struct Heap {
    slots: Vec<Slot>,
    free: Vec<u32>,
    live: usize,
    threshold: usize,
    limit: usize,
    pins: FxHashMap<GcRef, u32>,
    collections: u64,
}

impl Heap {
    /// Creates an empty heap that collects once `threshold` objects are
    /// alive and never holds more than `limit`.
    pub fn new(threshold: usize, limit: usize) -> Self {
        let limit = limit.max(1);
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            live: 0,
            threshold: threshold.clamp(1, limit),
            limit,
            pins: FxHashMap::default(),
            collections: 0,
        }
    }

    /// Returns true when the next allocation should collect first.
    #[inline]
    pub fn needs_collection(&self) -> bool {
        self.live >= self.threshold
    }

    /// Stores an object. Fails only at the hard ceiling; the caller decides
    /// when to collect.
    pub fn insert(&mut self, object: HeapObject) -> Result<GcRef, HeapError> {
        if self.live >= self.limit {
            return Err(HeapError::Overflow {
                live: self.live,
                limit: self.limit,
            });
        }
        self.live += 1;
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.object = Some(object);
            slot.marked = false;
            return Ok(GcRef::new(index, slot.generation));
        }
        let index = self.slots.len() as u32;
        self.slots.push(Slot {
            generation: 0,
            marked: false,
            object: Some(object),
        });
        Ok(GcRef::new(index, 0))
    }

    fn slot(&self, r: GcRef) -> Option<&Slot> {
        self.slots
            .get(r.index() as usize)
            .filter(|slot| slot.generation == r.generation())
    }

    /// Resolves a handle. Stale handles resolve to `None`.
    #[inline]
    pub fn get(&self, r: GcRef) -> Option<&HeapObject> {
        self.slot(r)?.object.as_ref()
    }

    /// Resolves a handle for mutation.
    #[inline]
    pub fn get_mut(&mut self, r: GcRef) -> Option<&mut HeapObject> {
        self.slots
            .get_mut(r.index() as usize)
            .filter(|slot| slot.generation == r.generation())?
            .object
            .as_mut()
    }

    /// Resolves a string handle.
    pub fn string(&self, r: GcRef) -> Option<&str> {
        self.get(r)?.as_str()
    }

    /// Keeps an object alive across collections until a matching
    /// [`Heap::unpin`].
    pub fn pin(&mut self, r: GcRef) {
        *self.pins.entry(r).or_insert(0) += 1;
    }

    /// Releases one pin.
    pub fn unpin(&mut self, r: GcRef) {
        if let Some(count) = self.pins.get_mut(&r) {
            *count -= 1;
            if *count == 0 {
                self.pins.remove(&r);
            }
        }
    }

    /// Marks everything reachable from `roots` and the pins, then frees the
    /// rest. Returns the number of objects freed.
    ///
    /// When the heap is still at or above its threshold afterwards, the
    /// threshold doubles, capped at the hard ceiling.
    pub fn collect(&mut self, roots: impl IntoIterator<Item = Value>) -> usize {
        let before = self.live;

        let mut worklist: Vec<GcRef> = roots.into_iter().filter_map(|v| v.as_ref()).collect();
        worklist.extend(self.pins.keys().copied());
        while let Some(r) = worklist.pop() {
            let Some(slot) = self
                .slots
                .get_mut(r.index() as usize)
                .filter(|slot| slot.generation == r.generation())
            else {
                continue;
            };
            if slot.marked {
                continue;
            }
            slot.marked = true;
            if let Some(object) = &slot.object {
                object.trace(|child| worklist.push(child));
            }
        }

        for (index, slot) in self.slots.iter_mut().enumerate() {
            if slot.object.is_none() {
                continue;
            }
            if slot.marked {
                slot.marked = false;
            } else {
                slot.object = None;
                slot.generation = slot.generation.wrapping_add(1);
                self.free.push(index as u32);
                self.live -= 1;
            }
        }

        self.collections += 1;
        if self.live >= self.threshold {
            self.threshold = self.threshold.saturating_mul(2).min(self.limit);
        }
        let freed = before - self.live;
        debug!(
            before,
            after = self.live,
            freed,
            threshold = self.threshold,
            "garbage collection"
        );
        freed
    }

    /// Frees every object and pin.
    pub fn clear(&mut self) {
        for (index, slot) in self.slots.iter_mut().enumerate() {
            if slot.object.take().is_some() {
                slot.generation = slot.generation.wrapping_add(1);
                self.free.push(index as u32);
            }
        }
        self.live = 0;
        self.pins.clear();
    }

    /// Current occupancy.
    pub fn stats(&self) -> HeapStats {
        HeapStats {
            live: self.live,
            slots: self.slots.len(),
            threshold: self.threshold,
            collections: self.collections,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn string(heap: &mut Heap, s: &str) -> GcRef {
        heap.insert(HeapObject::Str(s.into())).unwrap()
    }

    #[test]
    fn test_unreachable_objects_are_freed() {
        let mut heap = Heap::new(16, 64);
        let kept = string(&mut heap, "kept");
        string(&mut heap, "garbage");
        let freed = heap.collect([Value::Ref(kept)]);
        assert_eq!(freed, 1);
        assert_eq!(heap.string(kept), Some("kept"));
        assert_eq!(heap.stats().live, 1);
    }

    #[test]
    fn test_reachability_is_transitive() {
        let mut heap = Heap::new(16, 64);
        let inner = string(&mut heap, "inner");
        let array = heap.insert(HeapObject::Array(vec![Value::Ref(inner)])).unwrap();
        let outer = heap
            .insert(HeapObject::Struct {
                chunk: 0,
                descriptor: 0,
                fields: vec![Value::Ref(array)],
            })
            .unwrap();
        assert_eq!(heap.collect([Value::Ref(outer), Value::I32(7)]), 0);
        assert_eq!(heap.string(inner), Some("inner"));
    }

    #[test]
    fn test_cycles_are_collected() {
        let mut heap = Heap::new(16, 64);
        let a = heap.insert(HeapObject::Array(vec![Value::None])).unwrap();
        let b = heap.insert(HeapObject::Array(vec![Value::Ref(a)])).unwrap();
        heap.get_mut(a).unwrap().values_mut().unwrap()[0] = Value::Ref(b);
        assert_eq!(heap.collect([]), 2);
    }

    #[test]
    fn test_stale_handles_do_not_resolve() {
        let mut heap = Heap::new(16, 64);
        let old = string(&mut heap, "old");
        heap.collect([]);
        let new = string(&mut heap, "new");
        assert_eq!(new.index(), old.index());
        assert_eq!(heap.get(old), None);
        assert_eq!(heap.string(new), Some("new"));
    }

    #[test]
    fn test_pins_are_roots() {
        let mut heap = Heap::new(16, 64);
        let pinned = string(&mut heap, "pinned");
        heap.pin(pinned);
        heap.pin(pinned);
        heap.collect([]);
        heap.unpin(pinned);
        heap.collect([]);
        assert!(heap.get(pinned).is_some());
        heap.unpin(pinned);
        heap.collect([]);
        assert!(heap.get(pinned).is_none());
    }

    #[test]
    fn test_threshold_grows_to_the_ceiling() {
        let mut heap = Heap::new(2, 5);
        let roots: Vec<_> = (0..2).map(|i| Value::Ref(string(&mut heap, &i.to_string()))).collect();
        assert!(heap.needs_collection());
        heap.collect(roots.iter().copied());
        assert_eq!(heap.stats().threshold, 4);
        let mut roots = roots;
        roots.extend((0..2).map(|i| Value::Ref(string(&mut heap, &i.to_string()))));
        heap.collect(roots.iter().copied());
        assert_eq!(heap.stats().threshold, 5);
    }

    #[test]
    fn test_overflow_at_the_ceiling() {
        let mut heap = Heap::new(1, 2);
        string(&mut heap, "a");
        string(&mut heap, "b");
        assert_eq!(
            heap.insert(HeapObject::Str("c".into())),
            Err(HeapError::Overflow { live: 2, limit: 2 })
        );
    }
}
