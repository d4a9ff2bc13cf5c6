//! Generational arena.
//!
//! Slots are reused after removal; every reuse bumps the slot's generation so
//! an `IndexSlot` held across a removal no longer resolves.

use std::num::NonZeroU64;

use crate::profiling::profile_function;

/// A generational index into a [`SparseSet`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct IndexSlot(NonZeroU64);

impl IndexSlot {
    pub fn new(generation: u32, idx: u32) -> Self {
        debug_assert!(idx < u32::MAX, "index space exhausted");
        let raw = ((generation as u64) << 32) | (idx as u64 + 1);
        match NonZeroU64::new(raw) {
            Some(raw) => Self(raw),
            None => unreachable!("low half is always at least one"),
        }
    }

    pub fn generation(&self) -> u32 {
        (self.0.get() >> 32) as u32
    }

    pub fn index(&self) -> u32 {
        (self.0.get() & u32::MAX as u64) as u32 - 1
    }
}

struct Entry<T> {
    generation: u32,
    data: Option<T>,
}

pub struct SparseSet<T> {
    vec: Vec<Entry<T>>,
    free: Vec<u32>,
    len: usize,
}

impl<T> Default for SparseSet<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> SparseSet<T> {
    pub const fn new() -> Self {
        Self {
            vec: Vec::new(),
            free: Vec::new(),
            len: 0,
        }
    }

    pub fn push(&mut self, data: T) -> IndexSlot {
        profile_function!();
        self.len += 1;
        if let Some(idx) = self.free.pop() {
            let entry = &mut self.vec[idx as usize];
            entry.data = Some(data);
            IndexSlot::new(entry.generation, idx)
        } else {
            let idx = self.vec.len() as u32;
            self.vec.push(Entry {
                generation: 0,
                data: Some(data),
            });
            IndexSlot::new(0, idx)
        }
    }

    fn entry(&self, slot: IndexSlot) -> Option<&Entry<T>> {
        self.vec
            .get(slot.index() as usize)
            .filter(|entry| entry.generation == slot.generation())
    }

    /// Returns `None` for removed slots and for slots from an older generation.
    pub fn get(&self, slot: IndexSlot) -> Option<&T> {
        self.entry(slot).and_then(|entry| entry.data.as_ref())
    }

    pub fn get_mut(&mut self, slot: IndexSlot) -> Option<&mut T> {
        self.vec
            .get_mut(slot.index() as usize)
            .filter(|entry| entry.generation == slot.generation())
            .and_then(|entry| entry.data.as_mut())
    }

    pub fn contains(&self, slot: IndexSlot) -> bool {
        self.get(slot).is_some()
    }

    pub fn remove(&mut self, slot: IndexSlot) -> Option<T> {
        profile_function!();
        let index = slot.index();
        let entry = self
            .vec
            .get_mut(index as usize)
            .filter(|entry| entry.generation == slot.generation())?;
        let data = entry.data.take()?;
        entry.generation = entry.generation.wrapping_add(1);
        self.free.push(index);
        self.len -= 1;
        Some(data)
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Iterate live entries in slot order.
    pub fn iter(&self) -> impl Iterator<Item = (IndexSlot, &T)> + '_ {
        self.vec.iter().enumerate().filter_map(|(idx, entry)| {
            entry
                .data
                .as_ref()
                .map(|data| (IndexSlot::new(entry.generation, idx as u32), data))
        })
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (IndexSlot, &mut T)> + '_ {
        self.vec.iter_mut().enumerate().filter_map(|(idx, entry)| {
            let generation = entry.generation;
            entry
                .data
                .as_mut()
                .map(|data| (IndexSlot::new(generation, idx as u32), data))
        })
    }

    /// Snapshot of the live slots, for callers that mutate while walking.
    pub fn slots(&self) -> Vec<IndexSlot> {
        self.iter().map(|(slot, _)| slot).collect()
    }
}

static_assertions::assert_eq_size!(IndexSlot, Option<IndexSlot>);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sparse_set_push() {
        let mut set = SparseSet::<u8>::new();
        let idx = set.push(15);
        assert_eq!(idx.generation(), 0);
        assert_eq!(idx.index(), 0);
        assert_eq!(set.get(idx), Some(&15));
    }

    #[test]
    fn test_sparse_set_stale_slot() {
        let mut set = SparseSet::<u8>::new();
        let _ = set.push(15);
        let idx = IndexSlot::new(1, 0);
        assert_eq!(set.get(idx), None);
    }

    #[test]
    fn test_sparse_set_remove_bumps_generation() {
        let mut set = SparseSet::<u8>::new();
        let idx = set.push(15);
        assert_eq!(set.remove(idx), Some(15));
        let new_idx = set.push(45);
        assert_eq!(idx.index(), new_idx.index());
        assert_ne!(idx.generation(), new_idx.generation());
        assert_eq!(set.get(idx), None);
        assert_eq!(set.remove(idx), None);
    }

    #[test]
    fn test_sparse_set_iter_skips_free() {
        let mut set = SparseSet::<u8>::new();
        for i in 0..100 {
            set.push(i);
        }
        set.remove(IndexSlot::new(0, 0));
        set.remove(IndexSlot::new(0, 1));
        let values: Vec<_> = set.iter().map(|(_, v)| *v).collect();
        assert_eq!(values.len(), 98);
        assert_eq!(set.len(), 98);
        assert_eq!(values[0], 2);
    }
}
