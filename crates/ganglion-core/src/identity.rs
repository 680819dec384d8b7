//! Identity types and the slot arena that allocates them
//!
//! Every handle is a `(slot, generation)` pair. Slots are recycled after
//! deletion, but the generation is bumped first, so a handle that outlived its
//! slot never aliases the new occupant.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Raw `(slot, generation)` pair shared by all handle types
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
pub struct RawHandle {
    pub slot: u32,
    pub generation: u32,
}

/// Identifier of an element (a vec of one or more instances)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Id(RawHandle);

impl Id {
    /// The root element always occupies slot 0 of a fresh graph
    pub const ROOT: Id = Id(RawHandle {
        slot: 0,
        generation: 0,
    });

    pub(crate) fn from_raw(raw: RawHandle) -> Self {
        Self(raw)
    }

    pub(crate) fn raw(&self) -> RawHandle {
        self.0
    }

    /// Slot index in the arena
    pub fn slot(&self) -> u32 {
        self.0.slot
    }

    /// Generation of the slot at the time this handle was issued
    pub fn generation(&self) -> u32 {
        self.0.generation
    }

    /// Address instance `index` of this element
    pub fn at(self, index: usize) -> ObjId {
        ObjId::new(self, index)
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "id:{}.{}", self.0.slot, self.0.generation)
    }
}

/// Identifier of a message edge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MsgId(RawHandle);

impl MsgId {
    pub(crate) fn from_raw(raw: RawHandle) -> Self {
        Self(raw)
    }

    pub(crate) fn raw(&self) -> RawHandle {
        self.0
    }

    pub fn slot(&self) -> u32 {
        self.0.slot
    }

    pub fn generation(&self) -> u32 {
        self.0.generation
    }
}

impl fmt::Display for MsgId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "msg:{}.{}", self.0.slot, self.0.generation)
    }
}

/// Address of a single instance inside an element's vec
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjId {
    pub id: Id,
    pub index: usize,
}

impl ObjId {
    pub fn new(id: Id, index: usize) -> Self {
        Self { id, index }
    }
}

impl From<Id> for ObjId {
    fn from(id: Id) -> Self {
        Self { id, index: 0 }
    }
}

impl fmt::Display for ObjId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.id, self.index)
    }
}

#[derive(Debug, Clone)]
struct Slot<T> {
    generation: u32,
    value: Option<T>,
}

/// Generational slot arena
///
/// Iteration order is slot order, which keeps every walk over the arena
/// deterministic regardless of the deletion history.
#[derive(Debug, Clone)]
pub struct Arena<T> {
    slots: Vec<Slot<T>>,
    free: Vec<u32>,
    len: usize,
}

impl<T> Arena<T> {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            len: 0,
        }
    }

    /// Store a value and return its handle
    pub fn insert(&mut self, value: T) -> RawHandle {
        self.len += 1;
        if let Some(slot) = self.free.pop() {
            let entry = &mut self.slots[slot as usize];
            entry.value = Some(value);
            return RawHandle {
                slot,
                generation: entry.generation,
            };
        }
        let slot = self.slots.len() as u32;
        self.slots.push(Slot {
            generation: 0,
            value: Some(value),
        });
        RawHandle {
            slot,
            generation: 0,
        }
    }

    pub fn get(&self, handle: RawHandle) -> Option<&T> {
        self.slots
            .get(handle.slot as usize)
            .filter(|s| s.generation == handle.generation)
            .and_then(|s| s.value.as_ref())
    }

    pub fn get_mut(&mut self, handle: RawHandle) -> Option<&mut T> {
        self.slots
            .get_mut(handle.slot as usize)
            .filter(|s| s.generation == handle.generation)
            .and_then(|s| s.value.as_mut())
    }

    pub fn contains(&self, handle: RawHandle) -> bool {
        self.get(handle).is_some()
    }

    /// Remove a value, retiring its handle
    pub fn remove(&mut self, handle: RawHandle) -> Option<T> {
        let entry = self.slots.get_mut(handle.slot as usize)?;
        if entry.generation != handle.generation {
            return None;
        }
        let value = entry.value.take()?;
        entry.generation = entry.generation.wrapping_add(1);
        self.free.push(handle.slot);
        self.len -= 1;
        Some(value)
    }

    /// Whether the slot is occupied by a newer generation (or freed)
    pub fn is_stale(&self, handle: RawHandle) -> bool {
        match self.slots.get(handle.slot as usize) {
            Some(slot) => slot.generation != handle.generation || slot.value.is_none(),
            None => false,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (RawHandle, &T)> {
        self.slots.iter().enumerate().filter_map(|(i, s)| {
            s.value.as_ref().map(|v| {
                (
                    RawHandle {
                        slot: i as u32,
                        generation: s.generation,
                    },
                    v,
                )
            })
        })
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl<T> Default for Arena<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_arena_reuses_slot_with_new_generation() {
        let mut arena = Arena::new();
        let a = arena.insert("a");
        assert_eq!(arena.remove(a), Some("a"));

        let b = arena.insert("b");
        assert_eq!(a.slot, b.slot);
        assert_ne!(a.generation, b.generation);
        assert!(arena.get(a).is_none());
        assert!(arena.is_stale(a));
        assert_eq!(arena.get(b), Some(&"b"));
    }

    #[test]
    fn test_arena_double_remove() {
        let mut arena = Arena::new();
        let a = arena.insert(1);
        assert!(arena.remove(a).is_some());
        assert!(arena.remove(a).is_none());
        assert!(arena.is_empty());
    }

    #[test]
    fn test_arena_iter_in_slot_order() {
        let mut arena = Arena::new();
        let a = arena.insert(10);
        let _b = arena.insert(20);
        arena.remove(a);
        let _c = arena.insert(30);
        let values: Vec<_> = arena.iter().map(|(_, v)| *v).collect();
        assert_eq!(values, vec![30, 20]);
    }

    #[test]
    fn test_display() {
        let id = Id::ROOT;
        assert_eq!(format!("{}", id), "id:0.0");
        assert_eq!(format!("{}", id.at(3)), "id:0.0[3]");
    }
}
