//! Growable slot arrays
//!
//! The backing store of both the descriptor table and the process table:
//! a vector of optional entries addressed by index. Capacity grows by
//! doubling until a requested index fits and never shrinks.

use super::error::{KResult, KernelError};

#[derive(Debug)]
pub struct SlotVec<T> {
    slots: Vec<Option<T>>,
}

impl<T> SlotVec<T> {
    pub fn new() -> Self {
        Self { slots: Vec::new() }
    }

    pub fn with_capacity(capacity: usize) -> KResult<Self> {
        let mut slots = Vec::new();
        slots.try_reserve_exact(capacity)?;
        slots.resize_with(capacity, || None);
        Ok(Self { slots })
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn get(&self, index: usize) -> Option<&T> {
        self.slots.get(index).and_then(Option::as_ref)
    }

    pub fn is_occupied(&self, index: usize) -> bool {
        self.get(index).is_some()
    }

    /// Clear a slot, returning what was in it
    pub fn take(&mut self, index: usize) -> Option<T> {
        self.slots.get_mut(index).and_then(Option::take)
    }

    /// Install `value` at `index`, growing first if needed. Returns the
    /// previous occupant. On allocation failure nothing changes.
    pub fn set(&mut self, index: usize, value: T) -> KResult<Option<T>> {
        self.grow_to_fit(index)?;
        Ok(self.slots[index].replace(value))
    }

    /// First empty slot at or after `start`, or `capacity()` if there is
    /// none
    pub fn first_free_from(&self, start: usize) -> usize {
        self.slots
            .iter()
            .enumerate()
            .skip(start)
            .find(|(_, slot)| slot.is_none())
            .map(|(index, _)| index)
            .unwrap_or_else(|| self.capacity().max(start))
    }

    pub fn iter_occupied(&self) -> impl Iterator<Item = (usize, &T)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(index, slot)| slot.as_ref().map(|value| (index, value)))
    }

    pub fn occupied(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }

    /// Empty every slot, handing the entries to the caller in index order
    pub fn drain(&mut self) -> Vec<T> {
        self.slots.iter_mut().filter_map(Option::take).collect()
    }

    /// Double the capacity (starting from 1) until `index` fits
    fn grow_to_fit(&mut self, index: usize) -> KResult<()> {
        let capacity = self.capacity();
        if index < capacity {
            return Ok(());
        }

        let mut new_capacity = capacity.max(1);
        while new_capacity <= index {
            new_capacity = new_capacity
                .checked_mul(2)
                .ok_or(KernelError::OutOfMemory)?;
        }
        self.slots.try_reserve_exact(new_capacity - capacity)?;
        self.slots.resize_with(new_capacity, || None);
        log::trace!("slot array grew {} -> {}", capacity, new_capacity);
        Ok(())
    }
}

impl<T: Clone> SlotVec<T> {
    /// Copy with the same capacity and a clone of every occupied slot
    pub fn try_clone(&self) -> KResult<Self> {
        let mut slots = Vec::new();
        slots.try_reserve_exact(self.slots.len())?;
        slots.extend(self.slots.iter().cloned());
        Ok(Self { slots })
    }
}

impl<T> Default for SlotVec<T> {
    fn default() -> Self {
        Self::new()
    }
}
