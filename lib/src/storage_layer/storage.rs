use marble::Marble;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use super::config::Geometry;
use super::error::StorageError;
use super::indices::{ObjectId, range_object};
use super::page_range::{PageRange, RangeImage, RangeIndex};

use super::utils::{load, save};

use bincode::{Decode, Encode};
use parking_lot::Mutex;

/// Backing store for one table, every page range is persisted as one marble object
///
/// `Marble` is not `Sync`, all access goes through the lock.
pub struct Storage {
    pub(crate) marble: Mutex<Marble>,
    num_columns: usize,
    geometry: Geometry,
    range_writes: AtomicU64,
}

impl std::fmt::Debug for Storage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Storage")
            .field("num_columns", &self.num_columns)
            .field("geometry", &self.geometry)
            .finish()
    }
}

impl Storage {
    pub fn new<P: AsRef<Path>>(
        path: P,
        num_columns: usize,
        geometry: Geometry,
    ) -> Result<Self, StorageError> {
        let marble = marble::open(path)?;

        Ok(Self {
            marble: Mutex::new(marble),
            num_columns,
            geometry,
            range_writes: AtomicU64::new(0),
        })
    }

    pub fn num_columns(&self) -> usize {
        self.num_columns
    }

    pub fn geometry(&self) -> Geometry {
        self.geometry
    }

    /// Persist the full image of a page range
    pub fn write_range(&self, range: &PageRange) -> Result<(), StorageError> {
        let image = range.to_image();
        save(&self.marble.lock(), &image, range_object(range.index))?;
        self.range_writes.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(range = range.index, "persisted page range");
        Ok(())
    }

    /// Read a page range image, decode failures make the range unavailable
    pub fn read_range(&self, index: RangeIndex) -> Result<PageRange, StorageError> {
        match load::<RangeImage>(&self.marble.lock(), range_object(index))? {
            Some(image) => {
                if image.header.range_index != index {
                    return Err(bincode::error::DecodeError::Other(
                        "range image stored under a foreign index",
                    )
                    .into());
                }
                PageRange::from_image(image, self.num_columns, self.geometry)
            }
            None => Err(StorageError::StorageNotFound(index)),
        }
    }

    pub fn has_range(&self, index: RangeIndex) -> Result<bool, StorageError> {
        Ok(self.marble.lock().read(range_object(index))?.is_some())
    }

    /// Number of range images written since this storage was opened
    pub fn range_writes(&self) -> u64 {
        self.range_writes.load(Ordering::Relaxed)
    }

    pub fn save_object<T: Encode>(&self, item: &T, id: ObjectId) -> Result<(), StorageError> {
        save(&self.marble.lock(), item, id)
    }

    pub fn load_object<T: Decode<()>>(&self, id: ObjectId) -> Result<Option<T>, StorageError> {
        load(&self.marble.lock(), id)
    }

    /// Run maintenance to garbage collect and defragment storage
    pub fn maintenance(&self) -> Result<usize, StorageError> {
        let objects_defragmented = self.marble.lock().maintenance()?;
        Ok(objects_defragmented)
    }
}
