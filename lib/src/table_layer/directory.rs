use std::collections::HashMap;

use super::super::storage_layer::page_range::{RangeIndex, Rid, TailLocation};

use bincode::{Decode, Encode};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
pub struct TailSlot {
    pub list: usize,
    pub offset: usize,
}

/// Tail rid -> physical location, plus reclaimed slots waiting for reuse
///
/// Only merged tails are reclaimed. The chains of deleted records are never merged, so
/// their entries and slots stay allocated for the life of the table.
#[derive(Debug, Default, Encode, Decode)]
pub struct TailDirectory {
    locations: HashMap<Rid, TailLocation>,
    free_slots: HashMap<RangeIndex, Vec<TailSlot>>,
}

impl TailDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, rid: Rid, location: TailLocation) {
        self.locations.insert(rid, location);
    }

    pub fn get(&self, rid: Rid) -> Option<TailLocation> {
        self.locations.get(&rid).copied()
    }

    /// Drops the entry and makes its slot reusable
    pub fn reclaim(&mut self, rid: Rid) -> Option<TailLocation> {
        let location = self.locations.remove(&rid)?;
        self.free_slots
            .entry(location.range)
            .or_default()
            .push(TailSlot {
                list: location.list,
                offset: location.offset,
            });
        Some(location)
    }

    pub fn take_free_slot(&mut self, range: RangeIndex) -> Option<TailSlot> {
        let slots = self.free_slots.get_mut(&range)?;
        let slot = slots.pop();
        if slots.is_empty() {
            self.free_slots.remove(&range);
        }
        slot
    }

    pub fn len(&self) -> usize {
        self.locations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locations.is_empty()
    }

    pub fn free_slot_count(&self) -> usize {
        self.free_slots.values().map(Vec::len).sum()
    }
}
