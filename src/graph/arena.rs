//! Generational slot arena backing the graph stores.
//!
//! Ports, operators, units and extenders each live in their own `Arena`,
//! addressed by the id newtypes from [`super::id`]. Removing a value bumps
//! the slot's generation, so handles held across a removal miss instead of
//! reading whatever was inserted next. Cross-references between stores are
//! always ids, never owning pointers.

use crate::graph::id::ArenaKey;
use std::marker::PhantomData;

struct Slot<T> {
    generation: u32,
    value: Option<T>,
}

/// Flat slot storage with a free list and per-slot generations.
pub(crate) struct Arena<I, T> {
    slots: Vec<Slot<T>>,
    free: Vec<u32>,
    len: usize,
    _key: PhantomData<I>,
}

impl<I: ArenaKey, T> Arena<I, T> {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            len: 0,
            _key: PhantomData,
        }
    }

    /// Number of live values.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn insert(&mut self, value: T) -> I {
        self.len += 1;
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.value = Some(value);
            I::from_parts(index, slot.generation)
        } else {
            let index = self.slots.len() as u32;
            self.slots.push(Slot {
                generation: 0,
                value: Some(value),
            });
            I::from_parts(index, 0)
        }
    }

    /// Remove a value, bumping the slot generation so the id goes stale.
    pub fn remove(&mut self, id: I) -> Option<T> {
        let slot = self.slot_mut(id)?;
        let value = slot.value.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(id.index() as u32);
        self.len -= 1;
        Some(value)
    }

    #[inline]
    pub fn get(&self, id: I) -> Option<&T> {
        self.slot(id)?.value.as_ref()
    }

    #[inline]
    pub fn get_mut(&mut self, id: I) -> Option<&mut T> {
        self.slot_mut(id)?.value.as_mut()
    }

    #[inline]
    pub fn contains(&self, id: I) -> bool {
        self.get(id).is_some()
    }

    /// Iterate over live values with their ids.
    pub fn iter(&self) -> impl Iterator<Item = (I, &T)> {
        self.slots.iter().enumerate().filter_map(|(index, slot)| {
            slot.value
                .as_ref()
                .map(|value| (I::from_parts(index as u32, slot.generation), value))
        })
    }

    /// Ids of all live values.
    pub fn ids(&self) -> impl Iterator<Item = I> + '_ {
        self.slots.iter().enumerate().filter_map(|(index, slot)| {
            slot.value
                .as_ref()
                .map(|_| I::from_parts(index as u32, slot.generation))
        })
    }

    fn slot(&self, id: I) -> Option<&Slot<T>> {
        if !id.is_valid() {
            return None;
        }
        let slot = self.slots.get(id.index())?;
        (slot.generation == id.generation()).then_some(slot)
    }

    fn slot_mut(&mut self, id: I) -> Option<&mut Slot<T>> {
        if !id.is_valid() {
            return None;
        }
        let slot = self.slots.get_mut(id.index())?;
        (slot.generation == id.generation()).then_some(slot)
    }
}

impl<I: ArenaKey, T> Default for Arena<I, T> {
    fn default() -> Self {
        Self::new()
    }
}
