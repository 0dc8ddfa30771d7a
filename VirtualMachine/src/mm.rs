// The memory manager: a slot arena of tracked heap allocations with
// pin-rooted mark-and-sweep collection and byte-budget accounting through an
// injected allocator.
//
// Allocation slots are addressed by stable indices wrapped into typed
// `Gc<T>` handles, and freed slots are kept as tombstones for reuse. The
// collector roots are exactly the pinned allocations: the `Pinned<T>` handle
// increments the pin counter of its target on creation and decrements it on
// drop, which is what keeps temporarily-held allocations alive across
// allocation sites that may trigger a collection.

use std::cell::Cell;
use std::collections::VecDeque;
use std::marker::PhantomData;
use std::rc::Rc;

use tracing::debug;

use crate::objects::{Heap, HeapVariant};

/// Raised when the allocator cannot satisfy a reservation, even after a
/// collection cycle.
#[derive(Debug, Clone, Copy)]
pub struct OutOfMemoryError;

/// Byte accounting for the heap of one VM instance. Every tracked
/// allocation reserves its size here and releases it when destroyed.
pub trait Allocator {
    fn reserve(&mut self, size: usize) -> Result<(), OutOfMemoryError>;
    fn release(&mut self, size: usize);
}

/// The default allocator: a plain byte budget.
pub struct DefaultAllocator {
    limit: usize,
    used: usize,
}

impl DefaultAllocator {
    pub fn new(limit: usize) -> DefaultAllocator {
        DefaultAllocator { limit, used: 0 }
    }

    pub fn unlimited() -> DefaultAllocator {
        DefaultAllocator::new(usize::MAX)
    }
}

impl Allocator for DefaultAllocator {
    fn reserve(&mut self, size: usize) -> Result<(), OutOfMemoryError> {
        if self.limit - self.used < size {
            return Err(OutOfMemoryError);
        }
        self.used += size;
        Ok(())
    }

    fn release(&mut self, size: usize) {
        self.used -= size;
    }
}

/// A typed handle to a tracked heap allocation.
pub struct Gc<T> {
    index: usize,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Gc<T> {
    pub(crate) fn from_index(index: usize) -> Gc<T> {
        Gc { index, _marker: PhantomData }
    }

    /// The slot index of the allocation; the untyped form of the handle.
    pub fn index(&self) -> usize {
        self.index
    }
}

impl<T> Clone for Gc<T> {
    fn clone(&self) -> Gc<T> {
        *self
    }
}

impl<T> Copy for Gc<T> {}

impl<T> PartialEq for Gc<T> {
    fn eq(&self, other: &Gc<T>) -> bool {
        self.index == other.index
    }
}

impl<T> Eq for Gc<T> {}

impl<T> std::fmt::Debug for Gc<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Gc({})", self.index)
    }
}

/// A move-only handle that pins an allocation for its own lifetime.
///
/// Construction pins, drop unpins; assignment transfers the pin. The pin
/// counter cell is shared with the slot, so unpinning needs no access to the
/// memory manager.
pub struct Pinned<T> {
    target: Gc<T>,
    pins: Rc<Cell<usize>>,
}

impl<T> Pinned<T> {
    /// The raw handle of the pinned allocation.
    pub fn get(&self) -> Gc<T> {
        self.target
    }
}

impl<T> Drop for Pinned<T> {
    fn drop(&mut self) {
        self.pins.set(self.pins.get() - 1);
    }
}

/// One tracked allocation.
struct Slot {
    obj: Heap,
    /// Accounted size, released back to the allocator on destruction.
    size: usize,
    /// Nonzero while any `Pinned` handle points here.
    pins: Rc<Cell<usize>>,
    /// Maintained only during a collection cycle.
    marked: bool,
}

/// The tracked-allocation arena of one VM instance.
pub struct MemoryManager {
    allocator: Box<dyn Allocator>,
    slots: Vec<Option<Slot>>,
    tombstones: Vec<usize>,
}

impl MemoryManager {
    pub fn new(allocator: Box<dyn Allocator>) -> MemoryManager {
        MemoryManager { allocator, slots: Vec::new(), tombstones: Vec::new() }
    }

    /// Reserves bytes with the allocator, running a collection cycle and
    /// retrying exactly once on failure.
    fn reserve(&mut self, size: usize) -> Result<(), OutOfMemoryError> {
        if self.allocator.reserve(size).is_ok() {
            return Ok(());
        }
        self.gc_cycle();
        self.allocator.reserve(size)
    }

    /// Constructs a new tracked allocation and pins it once, so that it
    /// survives the window between creation and being referenced by some
    /// reachable holder.
    pub fn gc_new<T: HeapVariant>(&mut self, obj: T) -> Result<Pinned<T>, OutOfMemoryError> {
        let heap = obj.into_heap();
        let size = heap.heap_size();
        self.reserve(size)?;
        let pins = Rc::new(Cell::new(1));
        let slot = Slot { obj: heap, size, pins: pins.clone(), marked: false };
        let index = match self.tombstones.pop() {
            Some(index) => {
                self.slots[index] = Some(slot);
                index
            }
            None => {
                self.slots.push(Some(slot));
                self.slots.len() - 1
            }
        };
        Ok(Pinned { target: Gc::from_index(index), pins })
    }

    /// Charges the allocator for the in-place growth of an allocation.
    pub fn grow<T>(&mut self, handle: Gc<T>, delta: usize) -> Result<(), OutOfMemoryError> {
        self.reserve(delta)?;
        self.slots[handle.index()].as_mut().expect("grow of a freed allocation").size += delta;
        Ok(())
    }

    /// Pins an allocation, keeping it alive for the lifetime of the handle.
    pub fn pin<T>(&self, handle: Gc<T>) -> Pinned<T> {
        let slot = self.slots[handle.index()].as_ref().expect("pin of a freed allocation");
        slot.pins.set(slot.pins.get() + 1);
        Pinned { target: handle, pins: slot.pins.clone() }
    }

    pub fn get<T: HeapVariant>(&self, handle: Gc<T>) -> &T {
        let slot = self.slots[handle.index()].as_ref().expect("access to a freed allocation");
        match T::from_heap(&slot.obj) {
            Some(obj) => obj,
            None => panic!("unexpected {} allocation behind a typed handle", slot.obj.kind_name()),
        }
    }

    pub fn get_mut<T: HeapVariant>(&mut self, handle: Gc<T>) -> &mut T {
        let slot = self.slots[handle.index()].as_mut().expect("access to a freed allocation");
        let kind = slot.obj.kind_name();
        match T::from_heap_mut(&mut slot.obj) {
            Some(obj) => obj,
            None => panic!("unexpected {kind} allocation behind a typed handle"),
        }
    }

    /// The untyped heap object at a slot, if the slot is live.
    pub fn heap(&self, index: usize) -> Option<&Heap> {
        self.slots.get(index)?.as_ref().map(|slot| &slot.obj)
    }

    /// Number of currently tracked allocations.
    pub fn tracked_count(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }

    pub fn is_live(&self, index: usize) -> bool {
        matches!(self.slots.get(index), Some(Some(_)))
    }

    /// Looks for unreachable tracked allocations and destroys them.
    ///
    /// Collection is two-phase: reset every mark and enqueue the pinned
    /// allocations, then breadth-first mark everything reachable from them;
    /// whatever is left unmarked is destroyed and its bytes are returned to
    /// the allocator.
    pub fn gc_cycle(&mut self) {
        let mut queue: VecDeque<usize> = VecDeque::new();
        for (index, slot) in self.slots.iter_mut().enumerate() {
            if let Some(slot) = slot {
                slot.marked = false;
                if slot.pins.get() > 0 {
                    queue.push_back(index);
                }
            }
        }

        let mut refs: Vec<usize> = Vec::new();
        while let Some(index) = queue.pop_front() {
            let Some(slot) = self.slots[index].as_mut() else { continue };
            if slot.marked {
                continue;
            }
            slot.marked = true;
            refs.clear();
            slot.obj.trace(&mut |target| refs.push(target));
            queue.extend(refs.iter().copied());
        }

        let mut freed = 0usize;
        let mut freed_bytes = 0usize;
        for (index, entry) in self.slots.iter_mut().enumerate() {
            let destroy = matches!(entry, Some(slot) if !slot.marked);
            if destroy {
                let slot = entry.take().unwrap();
                self.allocator.release(slot.size);
                self.tombstones.push(index);
                freed += 1;
                freed_bytes += slot.size;
            }
        }
        debug!(freed, freed_bytes, live = self.tracked_count(), "collection cycle");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::objects::{ArrObj, StrObj};
    use crate::value::Value;

    fn manager(limit: usize) -> MemoryManager {
        MemoryManager::new(Box::new(DefaultAllocator::new(limit)))
    }

    #[test]
    fn pinned_allocations_survive_collection() {
        let mut mem = manager(usize::MAX);
        let str = mem.gc_new(StrObj { bytes: "kept".to_string() }).unwrap();
        mem.gc_cycle();
        assert_eq!(mem.get(str.get()).bytes, "kept");
    }

    #[test]
    fn unpinned_unreachable_allocations_are_destroyed() {
        let mut mem = manager(usize::MAX);
        let index = {
            let str = mem.gc_new(StrObj { bytes: "dropped".to_string() }).unwrap();
            str.get().index()
        };
        assert!(mem.is_live(index));
        mem.gc_cycle();
        assert!(!mem.is_live(index));
    }

    #[test]
    fn reachable_allocations_are_kept_through_references() {
        let mut mem = manager(usize::MAX);
        let str = mem.gc_new(StrObj { bytes: "element".to_string() }).unwrap();
        let arr = mem.gc_new(ArrObj { values: vec![Value::Str(str.get())] }).unwrap();
        let str_index = str.get().index();
        drop(str); // Only the array keeps the string alive now.
        mem.gc_cycle();
        assert!(mem.is_live(str_index));

        let arr_index = arr.get().index();
        drop(arr);
        mem.gc_cycle();
        assert!(!mem.is_live(arr_index));
        assert!(!mem.is_live(str_index));
    }

    #[test]
    fn cycles_are_collected() {
        let mut mem = manager(usize::MAX);
        let arr = mem.gc_new(ArrObj { values: Vec::new() }).unwrap();
        let handle = arr.get();
        mem.get_mut(handle).values.push(Value::Arr(handle)); // Self-reference
        let index = handle.index();
        mem.gc_cycle();
        assert!(mem.is_live(index));
        drop(arr);
        mem.gc_cycle();
        assert!(!mem.is_live(index));
    }

    #[test]
    fn slots_are_reused_through_tombstones() {
        let mut mem = manager(usize::MAX);
        let first = mem.gc_new(StrObj { bytes: "a".to_string() }).unwrap();
        let index = first.get().index();
        drop(first);
        mem.gc_cycle();
        let second = mem.gc_new(StrObj { bytes: "b".to_string() }).unwrap();
        assert_eq!(second.get().index(), index);
    }

    #[test]
    fn allocation_retries_after_a_collection_cycle() {
        let mut mem = manager(1024);
        let big = mem.gc_new(StrObj { bytes: "x".repeat(600) }).unwrap();
        drop(big); // Unreachable, but only a collection can free it.
        assert!(mem.gc_new(StrObj { bytes: "y".repeat(600) }).is_ok());
    }

    #[test]
    fn exhausted_budget_surfaces_out_of_memory() {
        let mut mem = manager(1024);
        let _kept = mem.gc_new(StrObj { bytes: "x".repeat(600) }).unwrap();
        assert!(mem.gc_new(StrObj { bytes: "y".repeat(600) }).is_err());
    }
}
