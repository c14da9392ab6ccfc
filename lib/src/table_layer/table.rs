use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use super::super::storage_layer::{
    buffer_pool::{BufferPool, PinnedRange},
    config::{
        Geometry, INDIRECTION_COLUMN, INTERNAL_COL_NUM, MAX_USER_COLUMNS, RID_COLUMN,
        SCHEMA_ENCODING_COLUMN, StoreConfig,
    },
    error::StorageError,
    indices::{TABLE_STATE_INDEX, TAIL_DIRECTORY_INDEX},
    page_range::{
        BaseLocation, NULL_RID, PageRange, RangeIndex, Rid, TailLocation, locate_base,
    },
    storage::Storage,
};
use super::directory::TailDirectory;
use super::error::TableError;
use super::merge::{self, MergeStats};
use super::observer::RecordObserver;
use super::record::{Record, decode_value, encode_value};

use bincode::{Decode, Encode};
use parking_lot::{Mutex, RwLock};

/// Counters and schema, persisted next to the range images
#[derive(Debug, Clone, Encode, Decode)]
pub struct TableState {
    pub name: String,
    pub num_columns: usize,
    pub key_column: usize,
    pub geometry: Geometry,
    pub next_base_rid: Rid,
    pub next_tail_rid: Rid,
    pub num_ranges: u64,
}

/// Latest version of a base record resolved through its tail chain
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ResolvedVersion {
    pub values: Vec<u64>,
    /// Tail rids visited, newest first
    pub chain: Vec<Rid>,
}

pub struct Table {
    config: StoreConfig,
    num_columns: usize,
    key_column: usize,
    pool: BufferPool,
    // serializes rid allocation and record writes; lock order is state, pool, range, directory
    state: Mutex<TableState>,
    directory: Mutex<TailDirectory>,
    observers: RwLock<Vec<Arc<dyn RecordObserver>>>,
}

impl std::fmt::Debug for Table {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Table")
            .field("state", &*self.state.lock())
            .field("config", &self.config)
            .finish()
    }
}

impl Table {
    /// Open the table stored at `path` with the default configuration, creating it if needed
    pub fn new<P: AsRef<Path>>(
        path: P,
        name: &str,
        num_columns: usize,
        key_column: usize,
    ) -> Result<Self, TableError> {
        Self::open(path, name, num_columns, key_column, StoreConfig::default())
    }

    pub fn open<P: AsRef<Path>>(
        path: P,
        name: &str,
        num_columns: usize,
        key_column: usize,
        config: StoreConfig,
    ) -> Result<Self, TableError> {
        config.validate()?;

        if num_columns == 0 || num_columns > MAX_USER_COLUMNS {
            return Err(TableError::TooManyColumns {
                max: MAX_USER_COLUMNS,
                got: num_columns,
            });
        }
        if key_column >= num_columns {
            return Err(TableError::ColumnOutOfRange(key_column));
        }

        let geometry = config.geometry();
        let storage = Storage::new(path, num_columns, geometry)?;
        let stored = storage.load_object::<TableState>(TABLE_STATE_INDEX)?;

        if let Some(state) = stored {
            if state.geometry != geometry {
                return Err(TableError::ConfigMismatch {
                    stored: state.geometry,
                    requested: geometry,
                });
            }
            if state.num_columns != num_columns || state.key_column != key_column {
                return Err(TableError::SchemaMismatch {
                    stored: state.num_columns,
                    stored_key: state.key_column,
                });
            }

            let directory = storage
                .load_object::<TailDirectory>(TAIL_DIRECTORY_INDEX)?
                .unwrap_or_default();

            tracing::debug!(
                table = %state.name,
                ranges = state.num_ranges,
                next_base_rid = state.next_base_rid,
                "reopened table"
            );

            return Ok(Self::assemble(config, storage, state, directory)?);
        }

        let state = TableState {
            name: name.to_owned(),
            num_columns,
            key_column,
            geometry,
            next_base_rid: 1,
            next_tail_rid: 1,
            num_ranges: 1,
        };

        let table = Self::assemble(config, storage, state, TailDirectory::new())?;
        drop(
            table
                .pool
                .create_page_range(PageRange::new(0, num_columns, geometry))?,
        );
        table.flush()?;

        tracing::debug!(table = name, num_columns, key_column, "created table");
        Ok(table)
    }

    fn assemble(
        config: StoreConfig,
        storage: Storage,
        state: TableState,
        directory: TailDirectory,
    ) -> Result<Self, StorageError> {
        Ok(Self {
            config,
            num_columns: state.num_columns,
            key_column: state.key_column,
            pool: BufferPool::new(storage, config.buffer_pool_size)?,
            state: Mutex::new(state),
            directory: Mutex::new(directory),
            observers: RwLock::new(vec![]),
        })
    }

    pub fn name(&self) -> String {
        self.state.lock().name.clone()
    }

    pub fn num_columns(&self) -> usize {
        self.num_columns
    }

    pub fn key_column(&self) -> usize {
        self.key_column
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn geometry(&self) -> Geometry {
        self.config.geometry()
    }

    pub fn buffer_pool(&self) -> &BufferPool {
        &self.pool
    }

    pub fn num_ranges(&self) -> u64 {
        self.state.lock().num_ranges
    }

    pub fn next_base_rid(&self) -> Rid {
        self.state.lock().next_base_rid
    }

    pub fn next_tail_rid(&self) -> Rid {
        self.state.lock().next_tail_rid
    }

    pub fn tail_directory_len(&self) -> usize {
        self.directory.lock().len()
    }

    pub fn free_tail_slots(&self) -> usize {
        self.directory.lock().free_slot_count()
    }

    pub fn subscribe(&self, observer: Arc<dyn RecordObserver>) {
        self.observers.write().push(observer);
    }

    fn width(&self) -> usize {
        INTERNAL_COL_NUM + self.num_columns
    }

    fn check_column(&self, column: usize) -> Result<(), TableError> {
        if column >= self.width() {
            return Err(TableError::ColumnOutOfRange(column));
        }
        Ok(())
    }

    fn check_arity(&self, got: usize) -> Result<(), TableError> {
        if got != self.num_columns {
            return Err(TableError::ColumnCountMismatch {
                expected: self.num_columns,
                got,
            });
        }
        Ok(())
    }

    fn locate_allocated(&self, rid: Rid, next_base_rid: Rid) -> Result<BaseLocation, TableError> {
        if rid >= next_base_rid {
            return Err(TableError::RecordNotFound(rid));
        }
        locate_base(&self.geometry(), rid).ok_or(TableError::RecordNotFound(rid))
    }

    fn locate(&self, rid: Rid) -> Result<BaseLocation, TableError> {
        let next_base_rid = self.state.lock().next_base_rid;
        self.locate_allocated(rid, next_base_rid)
    }

    fn locate_tail(&self, rid: Rid) -> Result<TailLocation, TableError> {
        self.directory
            .lock()
            .get(rid)
            .ok_or(TableError::TailNotFound(rid))
    }

    /// Retries while every slot is pinned, backing off between attempts
    fn with_backoff<'a, F>(
        &'a self,
        index: RangeIndex,
        mut acquire: F,
    ) -> Result<PinnedRange<'a>, TableError>
    where
        F: FnMut() -> Result<PinnedRange<'a>, StorageError>,
    {
        let mut attempt = 0usize;
        loop {
            match acquire() {
                Err(StorageError::ResourceExhausted) if attempt < self.config.pin_retry_limit => {
                    attempt += 1;
                    tracing::trace!(range = index, attempt, "buffer pool exhausted, backing off");
                    std::thread::sleep(Duration::from_micros(50u64 << attempt.min(10)));
                }
                Err(StorageError::ResourceExhausted) => {
                    tracing::warn!(range = index, attempt, "buffer pool stayed exhausted");
                    return Err(StorageError::ResourceExhausted.into());
                }
                result => return Ok(result?),
            }
        }
    }

    fn pin(&self, index: RangeIndex) -> Result<PinnedRange<'_>, TableError> {
        self.with_backoff(index, || self.pool.get_page_range(index))
    }

    fn create_range(&self, index: RangeIndex) -> Result<PinnedRange<'_>, TableError> {
        let geometry = self.geometry();
        let num_columns = self.num_columns;
        self.with_backoff(index, || {
            self.pool
                .create_page_range(PageRange::new(index, num_columns, geometry))
        })
    }

    /// Raw read of any physical column of a base record
    pub fn read_base(&self, rid: Rid, column: usize) -> Result<u64, TableError> {
        self.check_column(column)?;
        let location = self.locate(rid)?;

        let pinned = self.pin(location.range)?;
        let range = pinned.read();
        let value = range.base_list(location.list)?.read(column, location.offset)?;
        Ok(value)
    }

    /// Raw overwrite of any physical column of a base record
    pub fn write_base(&self, rid: Rid, column: usize, value: u64) -> Result<(), TableError> {
        self.check_column(column)?;
        let location = self.locate(rid)?;

        let pinned = self.pin(location.range)?;
        let mut range = pinned.write();
        range
            .base_list_mut(location.list)?
            .write(column, location.offset, value)?;
        pinned.mark_dirty();
        Ok(())
    }

    pub fn read_tail(&self, rid: Rid, column: usize) -> Result<u64, TableError> {
        self.check_column(column)?;
        let location = self.locate_tail(rid)?;

        let pinned = self.pin(location.range)?;
        let range = pinned.read();
        let value = range.tail_list(location.list)?.read(column, location.offset)?;
        Ok(value)
    }

    pub fn write_tail(&self, rid: Rid, column: usize, value: u64) -> Result<(), TableError> {
        self.check_column(column)?;
        let location = self.locate_tail(rid)?;

        let pinned = self.pin(location.range)?;
        let mut range = pinned.write();
        range
            .tail_list_mut(location.list)?
            .write(column, location.offset, value)?;
        pinned.mark_dirty();
        Ok(())
    }

    /// Writes a new base record, opening a new page range when the current one is full
    pub fn insert(&self, key: i64, columns: &[i64]) -> Result<Rid, TableError> {
        self.check_arity(columns.len())?;
        let key_value = columns[self.key_column];
        if key_value != key {
            return Err(TableError::KeyMismatch {
                key,
                value: key_value,
            });
        }

        let mut state = self.state.lock();
        let rid = state.next_base_rid;
        let location = locate_base(&self.geometry(), rid).ok_or(TableError::RecordNotFound(rid))?;

        let pinned = if location.range >= state.num_ranges {
            let pinned = self.create_range(location.range)?;
            state.num_ranges = location.range + 1;
            pinned
        } else {
            self.pin(location.range)?
        };

        let mut row = Vec::with_capacity(self.width());
        row.extend([NULL_RID, rid, 0]);
        row.extend(columns.iter().copied().map(encode_value));

        {
            let mut range = pinned.write();
            pinned.mark_dirty();
            range
                .ensure_base_list(location.list)?
                .write_row(location.offset, &row)?;
        }

        state.next_base_rid += 1;
        drop(pinned);
        drop(state);

        tracing::trace!(rid, range = location.range, "inserted base record");

        let record = Record::new(rid, key, columns.to_vec());
        for observer in self.observers.read().iter() {
            observer.on_insert(&record);
        }

        Ok(rid)
    }

    /// Appends a tail record holding the given columns and makes it the head of the chain
    pub fn update(&self, base_rid: Rid, columns: &[Option<i64>]) -> Result<Rid, TableError> {
        self.check_arity(columns.len())?;

        let mut state = self.state.lock();
        let location = self.locate_allocated(base_rid, state.next_base_rid)?;
        let tail_rid = state.next_tail_rid;

        let pinned = self.pin(location.range)?;
        let resolved = {
            let mut range = pinned.write();
            let base = range.base_list(location.list)?.read_row(location.offset)?;
            if base[RID_COLUMN] == NULL_RID {
                return Err(TableError::RecordDeleted(base_rid));
            }
            pinned.mark_dirty();

            let mut mask = 0u64;
            let mut row = vec![0u64; self.width()];
            row[INDIRECTION_COLUMN] = base[INDIRECTION_COLUMN];
            row[RID_COLUMN] = tail_rid;
            for (column, value) in columns.iter().enumerate() {
                if let Some(value) = value {
                    mask |= 1u64 << column;
                    row[INTERNAL_COL_NUM + column] = encode_value(*value);
                }
            }
            row[SCHEMA_ENCODING_COLUMN] = mask;

            self.append_tail(&mut range, tail_rid, &row)?;

            let base_list = range.base_list_mut(location.list)?;
            base_list.write(INDIRECTION_COLUMN, location.offset, tail_rid)?;
            base_list.write(
                SCHEMA_ENCODING_COLUMN,
                location.offset,
                base[SCHEMA_ENCODING_COLUMN] | mask,
            )?;

            let mut head = base;
            head[INDIRECTION_COLUMN] = tail_rid;
            self.resolve_chain(&range, &head, false)?
        };

        state.next_tail_rid += 1;
        drop(pinned);
        drop(state);

        tracing::trace!(base_rid, tail_rid, "appended tail record");

        let record = self.to_record(base_rid, &resolved.values);
        for observer in self.observers.read().iter() {
            observer.on_update(&record, tail_rid);
        }

        Ok(tail_rid)
    }

    /// Places a tail row in a reclaimed slot of the range or at the tail tip, and records it
    fn append_tail(
        &self,
        range: &mut PageRange,
        tail_rid: Rid,
        row: &[u64],
    ) -> Result<TailLocation, TableError> {
        let reused = self.directory.lock().take_free_slot(range.index);
        let (list, offset) = match reused {
            Some(slot) => {
                range.tail_list_mut(slot.list)?.write_row(slot.offset, row)?;
                (slot.list, slot.offset)
            }
            None => range.append_tail(row)?,
        };

        let location = TailLocation {
            range: range.index,
            list,
            offset,
        };
        self.directory.lock().insert(tail_rid, location);
        Ok(location)
    }

    /// Clears the logical rid, scans and merges skip the record from now on
    pub fn delete(&self, base_rid: Rid) -> Result<(), TableError> {
        let state = self.state.lock();
        let location = self.locate_allocated(base_rid, state.next_base_rid)?;

        let pinned = self.pin(location.range)?;
        {
            let mut range = pinned.write();
            let base_list = range.base_list_mut(location.list)?;
            if base_list.read(RID_COLUMN, location.offset)? == NULL_RID {
                return Err(TableError::RecordDeleted(base_rid));
            }
            pinned.mark_dirty();
            base_list.write(RID_COLUMN, location.offset, NULL_RID)?;
        }
        drop(pinned);
        drop(state);

        tracing::trace!(base_rid, "deleted base record");

        for observer in self.observers.read().iter() {
            observer.on_delete(base_rid);
        }
        Ok(())
    }

    /// Latest visible version of a base record
    pub fn read_record(&self, base_rid: Rid) -> Result<Record, TableError> {
        let location = self.locate(base_rid)?;

        let pinned = self.pin(location.range)?;
        let range = pinned.read();
        let base = range.base_list(location.list)?.read_row(location.offset)?;
        if base[RID_COLUMN] == NULL_RID {
            return Err(TableError::RecordDeleted(base_rid));
        }

        let resolved = self.resolve_chain(&range, &base, false)?;
        Ok(self.to_record(base_rid, &resolved.values))
    }

    /// Latest visible value of one user column
    pub fn read_column(&self, base_rid: Rid, column: usize) -> Result<i64, TableError> {
        if column >= self.num_columns {
            return Err(TableError::ColumnOutOfRange(column));
        }
        Ok(self.read_record(base_rid)?.columns[column])
    }

    /// Allocated base rids that are not deleted, in rid order
    pub fn base_rids(&self) -> Result<Vec<Rid>, TableError> {
        let (next_base_rid, num_ranges) = {
            let state = self.state.lock();
            (state.next_base_rid, state.num_ranges)
        };

        let mut rids = vec![];
        for index in 0..num_ranges {
            let pinned = self.pin(index)?;
            let range = pinned.read();
            for list in 0..range.num_base_lists() {
                let base_list = range.base_list(list)?;
                for offset in 0..base_list.num_records() {
                    let rid = base_list.read(RID_COLUMN, offset)?;
                    if rid != NULL_RID && rid < next_base_rid {
                        rids.push(rid);
                    }
                }
            }
        }

        Ok(rids)
    }

    fn to_record(&self, rid: Rid, values: &[u64]) -> Record {
        let columns: Vec<i64> = values.iter().copied().map(decode_value).collect();
        Record::new(rid, columns[self.key_column], columns)
    }

    /// Walks the tail chain of a base row newest first, the first tail setting a column wins
    ///
    /// With `full_chain` the walk continues past the point where every column is known so
    /// that the returned chain lists all unmerged tails.
    pub(crate) fn resolve_chain(
        &self,
        range: &PageRange,
        base_row: &[u64],
        full_chain: bool,
    ) -> Result<ResolvedVersion, TableError> {
        let mut values: Vec<Option<u64>> = vec![None; self.num_columns];
        let mut unresolved = self.num_columns;
        let mut chain = vec![];

        let directory = self.directory.lock();
        let mut next = base_row[INDIRECTION_COLUMN];

        while next != NULL_RID && (full_chain || unresolved > 0) {
            let location = directory
                .get(next)
                .filter(|location| location.range == range.index)
                .ok_or(TableError::TailNotFound(next))?;
            let tail = range.tail_list(location.list)?.read_row(location.offset)?;
            chain.push(next);

            let mask = tail[SCHEMA_ENCODING_COLUMN];
            for (column, value) in values.iter_mut().enumerate() {
                if value.is_none() && mask & (1u64 << column) != 0 {
                    *value = Some(tail[INTERNAL_COL_NUM + column]);
                    unresolved -= 1;
                }
            }

            // older tails always carry smaller rids
            let previous = tail[INDIRECTION_COLUMN];
            if previous >= next {
                return Err(TableError::TailNotFound(previous));
            }
            next = previous;
        }

        let values = values
            .into_iter()
            .enumerate()
            .map(|(column, value)| value.unwrap_or(base_row[INTERNAL_COL_NUM + column]))
            .collect();

        Ok(ResolvedVersion { values, chain })
    }

    pub(crate) fn release_tails(&self, tails: &[Rid]) -> usize {
        let mut directory = self.directory.lock();
        tails
            .iter()
            .filter(|rid| directory.reclaim(**rid).is_some())
            .count()
    }

    /// Run one synchronous merge round over every page range
    pub fn merge(&self) -> Result<MergeStats, TableError> {
        merge::run_round(self)
    }

    /// Persist dirty ranges, counters and the tail directory
    pub fn flush(&self) -> Result<usize, TableError> {
        let state = self.state.lock();
        let written = self.pool.flush_dirty()?;
        self.pool.storage().save_object(&*state, TABLE_STATE_INDEX)?;
        self.pool
            .storage()
            .save_object(&*self.directory.lock(), TAIL_DIRECTORY_INDEX)?;
        Ok(written)
    }

    pub fn close(self) -> Result<(), TableError> {
        self.flush()?;
        Ok(())
    }

    /// Defragment the backing store
    pub fn maintenance(&self) -> Result<usize, TableError> {
        Ok(self.pool.storage().maintenance()?)
    }
}

impl Drop for Table {
    fn drop(&mut self) {
        if let Err(error) = self.flush() {
            tracing::warn!(%error, "failed to flush table on drop");
        }
    }
}
