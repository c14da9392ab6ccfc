use super::error::StorageError;
use super::page_range::{PageRange, RangeIndex};
use super::storage::Storage;

use parking_lot::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// In-memory image of a cached page range
#[derive(Debug)]
struct Frame {
    range: RwLock<PageRange>,
    // only set while the range write lock is held, only cleared under the read lock
    dirty: AtomicBool,
}

impl Frame {
    fn new(range: PageRange, dirty: bool) -> Self {
        Self {
            range: RwLock::new(range),
            dirty: AtomicBool::new(dirty),
        }
    }

    fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    /// Persist the range if it is dirty, returns whether a write happened
    fn persist(&self, storage: &Storage) -> Result<bool, StorageError> {
        let range = self.range.read();
        if !self.is_dirty() {
            return Ok(false);
        }
        storage.write_range(&range)?;
        self.dirty.store(false, Ordering::Release);
        Ok(true)
    }
}

#[derive(Debug, Default)]
struct BufferSlot {
    index: Option<RangeIndex>,
    pin: usize,
    frame: Option<Arc<Frame>>,
}

impl BufferSlot {
    fn is_empty(&self) -> bool {
        self.index.is_none()
    }

    fn is_dirty(&self) -> bool {
        self.frame.as_ref().is_some_and(|frame| frame.is_dirty())
    }

    /// No operation holds this range
    fn is_available(&self) -> bool {
        self.pin == 0
    }

    fn clear(&mut self) {
        self.index = None;
        self.pin = 0;
        self.frame = None;
    }
}

/// Fixed number of page range slots with pin counts and dirty tracking
#[derive(Debug)]
pub struct BufferPool {
    storage: Storage,
    slots: Mutex<Vec<BufferSlot>>,
}

/// A pinned page range, the pin is released on drop
///
/// Never pin another range while holding a guard returned by `read` or `write`.
#[derive(Debug)]
pub struct PinnedRange<'a> {
    pool: &'a BufferPool,
    slot: usize,
    index: RangeIndex,
    frame: Arc<Frame>,
}

impl PinnedRange<'_> {
    pub fn index(&self) -> RangeIndex {
        self.index
    }

    pub fn read(&self) -> RwLockReadGuard<'_, PageRange> {
        self.frame.range.read()
    }

    /// Locks the range for writing, the range stays clean until `mark_dirty`
    pub fn write(&self) -> RwLockWriteGuard<'_, PageRange> {
        self.frame.range.write()
    }

    /// Call while holding the guard from `write`, once the range is about to change
    pub fn mark_dirty(&self) {
        self.frame.dirty.store(true, Ordering::Release);
    }
}

impl Drop for PinnedRange<'_> {
    fn drop(&mut self) {
        self.pool.unpin(self.slot, self.index);
    }
}

impl BufferPool {
    pub fn new(storage: Storage, capacity: usize) -> Result<Self, StorageError> {
        if capacity == 0 {
            return Err(StorageError::InvalidConfig("buffer_pool_size"));
        }

        Ok(Self {
            storage,
            slots: Mutex::new((0..capacity).map(|_| BufferSlot::default()).collect()),
        })
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    pub fn capacity(&self) -> usize {
        self.slots.lock().len()
    }

    fn find(slots: &[BufferSlot], index: RangeIndex) -> Option<usize> {
        slots.iter().position(|slot| slot.index == Some(index))
    }

    fn pin_slot<'a>(&'a self, slots: &mut [BufferSlot], slot: usize) -> Option<PinnedRange<'a>> {
        let entry = &mut slots[slot];
        let index = entry.index?;
        let frame = entry.frame.clone()?;
        entry.pin += 1;

        Some(PinnedRange {
            pool: self,
            slot,
            index,
            frame,
        })
    }

    fn unpin(&self, slot: usize, index: RangeIndex) {
        let mut slots = self.slots.lock();
        let entry = &mut slots[slot];
        debug_assert_eq!(entry.index, Some(index));
        entry.pin = entry.pin.saturating_sub(1);
    }

    /// First slot without a pin in scan order, persisted first when dirty
    fn evict_locked(&self, slots: &mut [BufferSlot]) -> Result<usize, StorageError> {
        let victim = slots
            .iter()
            .position(|slot| !slot.is_empty() && slot.is_available())
            .ok_or(StorageError::ResourceExhausted)?;

        if let Some(frame) = slots[victim].frame.as_ref() {
            frame.persist(&self.storage)?;
        }

        tracing::debug!(range = ?slots[victim].index, slot = victim, "evicted page range");
        slots[victim].clear();
        Ok(victim)
    }

    fn get_empty_page_locked(&self, slots: &mut [BufferSlot]) -> Result<usize, StorageError> {
        match slots.iter().position(BufferSlot::is_empty) {
            Some(slot) => Ok(slot),
            None => self.evict_locked(slots),
        }
    }

    fn install(
        &self,
        slots: &mut [BufferSlot],
        range: PageRange,
        dirty: bool,
    ) -> Result<usize, StorageError> {
        let index = range.index;
        if Self::find(slots, index).is_some() {
            return Err(StorageError::AlreadyCached(index));
        }

        let slot = self.get_empty_page_locked(slots)?;
        slots[slot].index = Some(index);
        slots[slot].pin = 0;
        slots[slot].frame = Some(Arc::new(Frame::new(range, dirty)));
        Ok(slot)
    }

    fn load_locked(
        &self,
        slots: &mut [BufferSlot],
        index: RangeIndex,
    ) -> Result<usize, StorageError> {
        if Self::find(slots, index).is_some() {
            return Err(StorageError::AlreadyCached(index));
        }

        // a missing or corrupt image must not cost a cached range its slot
        let range = self.storage.read_range(index)?;
        let slot = self.install(slots, range, false)?;
        tracing::debug!(range = index, slot, "loaded page range");
        Ok(slot)
    }

    /// Bring a persisted range into the pool without pinning it
    pub fn load(&self, index: RangeIndex) -> Result<(), StorageError> {
        let mut slots = self.slots.lock();
        self.load_locked(&mut slots, index)?;
        Ok(())
    }

    /// Pin a range, loading it from storage on a miss
    pub fn get_page_range(&self, index: RangeIndex) -> Result<PinnedRange<'_>, StorageError> {
        let mut slots = self.slots.lock();

        let slot = match Self::find(&slots, index) {
            Some(slot) => slot,
            None => self.load_locked(&mut slots, index)?,
        };

        self.pin_slot(&mut slots, slot)
            .ok_or(StorageError::StorageNotFound(index))
    }

    /// Pin a range only if nobody else holds it
    pub fn try_pin_idle(&self, index: RangeIndex) -> Result<Option<PinnedRange<'_>>, StorageError> {
        let mut slots = self.slots.lock();

        let slot = match Self::find(&slots, index) {
            Some(slot) if !slots[slot].is_available() => return Ok(None),
            Some(slot) => slot,
            None => self.load_locked(&mut slots, index)?,
        };

        Ok(self.pin_slot(&mut slots, slot))
    }

    /// Cache a freshly created range, it stays dirty until first persisted
    pub fn create_page_range(&self, range: PageRange) -> Result<PinnedRange<'_>, StorageError> {
        let index = range.index;
        let mut slots = self.slots.lock();
        let slot = self.install(&mut slots, range, true)?;
        tracing::debug!(range = index, slot, "created page range");

        self.pin_slot(&mut slots, slot)
            .ok_or(StorageError::StorageNotFound(index))
    }

    /// Evict the first unpinned range, returns the freed slot
    pub fn evict(&self) -> Result<usize, StorageError> {
        let mut slots = self.slots.lock();
        self.evict_locked(&mut slots)
    }

    /// Persist every dirty range without evicting anything, returns the number written
    pub fn flush_dirty(&self) -> Result<usize, StorageError> {
        let slots = self.slots.lock();

        let mut written = 0usize;
        for frame in slots.iter().filter_map(|slot| slot.frame.as_ref()) {
            if frame.persist(&self.storage)? {
                written += 1;
            }
        }

        tracing::debug!(written, "flushed dirty page ranges");
        Ok(written)
    }

    /// Range index held by every slot, in scan order
    pub fn cached_indices(&self) -> Vec<Option<RangeIndex>> {
        self.slots.lock().iter().map(|slot| slot.index).collect()
    }

    pub fn pin_count(&self, index: RangeIndex) -> Option<usize> {
        let slots = self.slots.lock();
        Self::find(&slots, index).map(|slot| slots[slot].pin)
    }

    pub fn is_dirty(&self, index: RangeIndex) -> Option<bool> {
        let slots = self.slots.lock();
        Self::find(&slots, index).map(|slot| slots[slot].is_dirty())
    }
}
