use super::column_page::ColumnPage;
use super::config::INTERNAL_COL_NUM;
use super::error::StorageError;

use bincode::{Decode, Encode};

/// Kind of page list, base lists hold original records and tail lists hold updates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
pub enum ListKind {
    Base,
    Tail,
}

/// One column page per internal column followed by one per user column
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub struct PageList {
    pub kind: ListKind,
    columns: Vec<ColumnPage>,
    num_records: usize,
}

impl PageList {
    pub fn new(kind: ListKind, num_columns: usize, capacity: usize) -> Self {
        Self {
            kind,
            columns: (0..INTERNAL_COL_NUM + num_columns)
                .map(|_| ColumnPage::new(capacity))
                .collect(),
            num_records: 0,
        }
    }

    pub fn width(&self) -> usize {
        self.columns.len()
    }

    pub fn capacity(&self) -> usize {
        self.columns.first().map_or(0, ColumnPage::capacity)
    }

    pub fn num_records(&self) -> usize {
        self.num_records
    }

    pub fn is_full(&self) -> bool {
        self.num_records >= self.capacity()
    }

    fn column(&self, column: usize) -> Result<&ColumnPage, StorageError> {
        let width = self.width();
        self.columns.get(column).ok_or(StorageError::OutOfRange {
            offset: column,
            capacity: width,
        })
    }

    fn column_mut(&mut self, column: usize) -> Result<&mut ColumnPage, StorageError> {
        let width = self.width();
        self.columns.get_mut(column).ok_or(StorageError::CapacityExceeded {
            offset: column,
            capacity: width,
        })
    }

    pub fn read(&self, column: usize, offset: usize) -> Result<u64, StorageError> {
        self.column(column)?.read(offset)
    }

    pub fn write(&mut self, column: usize, offset: usize, value: u64) -> Result<(), StorageError> {
        self.column_mut(column)?.write(offset, value)?;
        // slots written past the tip count as occupied
        if offset >= self.num_records {
            self.num_records = offset + 1;
        }
        Ok(())
    }

    /// Every column at `offset`, internal columns first
    pub fn read_row(&self, offset: usize) -> Result<Vec<u64>, StorageError> {
        self.columns.iter().map(|page| page.read(offset)).collect()
    }

    pub fn write_row(&mut self, offset: usize, values: &[u64]) -> Result<(), StorageError> {
        if values.len() != self.width() {
            return Err(StorageError::CapacityExceeded {
                offset: values.len(),
                capacity: self.width(),
            });
        }

        for (column, value) in values.iter().enumerate() {
            self.write(column, offset, *value)?;
        }
        Ok(())
    }

    /// Appends a row at the tip and returns its offset
    pub fn push_row(&mut self, values: &[u64]) -> Result<usize, StorageError> {
        let offset = self.num_records;
        self.write_row(offset, values)?;
        Ok(offset)
    }
}
