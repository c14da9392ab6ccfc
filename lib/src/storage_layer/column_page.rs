use super::config::INT_SIZE;
use super::error::StorageError;

use bincode::{Decode, Encode};

/// Fixed number of big-endian 8 byte slots for one column
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub struct ColumnPage {
    data: Vec<u8>,
}

impl ColumnPage {
    pub fn new(capacity: usize) -> Self {
        Self {
            data: vec![0u8; capacity * INT_SIZE],
        }
    }

    pub fn capacity(&self) -> usize {
        self.data.len() / INT_SIZE
    }

    pub fn read(&self, offset: usize) -> Result<u64, StorageError> {
        let capacity = self.capacity();
        if offset >= capacity {
            return Err(StorageError::OutOfRange { offset, capacity });
        }

        let start = offset * INT_SIZE;
        let mut bytes = [0u8; INT_SIZE];
        bytes.copy_from_slice(&self.data[start..start + INT_SIZE]);

        Ok(u64::from_be_bytes(bytes))
    }

    /// Overwrites the whole slot
    pub fn write(&mut self, offset: usize, value: u64) -> Result<(), StorageError> {
        let capacity = self.capacity();
        if offset >= capacity {
            return Err(StorageError::CapacityExceeded { offset, capacity });
        }

        let start = offset * INT_SIZE;
        self.data[start..start + INT_SIZE].copy_from_slice(&value.to_be_bytes());

        Ok(())
    }
}
