use super::error::StorageError;

use bincode::{Decode, Encode};

/// Width of one stored integer in bytes
pub const INT_SIZE: usize = 8;

/// Records held by one column page
pub const MAX_NUM_RECORD: usize = 512;

/// Base page lists a single page range may hold
pub const BASE_PAGE_PER_PAGE_RANGE: usize = 16;

/// Page ranges cached in memory at the same time
pub const BUFFER_POOL_SIZE: usize = 3;

pub const INDIRECTION_COLUMN: usize = 0;
pub const RID_COLUMN: usize = 1;
pub const SCHEMA_ENCODING_COLUMN: usize = 2;
pub const INTERNAL_COL_NUM: usize = 3;

/// Schema encoding is a u64 bitmask, one bit per user column
pub const MAX_USER_COLUMNS: usize = 64;

pub const MERGE_CHANNEL_CAPACITY: usize = 64;
pub const MERGE_RETRY_BUDGET: usize = 8;
pub const PIN_RETRY_LIMIT: usize = 16;

/// Only the addressing parameters are persisted, the rest may change between runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
pub struct Geometry {
    pub max_records_per_page: usize,
    pub base_lists_per_range: usize,
}

impl Geometry {
    pub fn records_per_range(&self) -> usize {
        self.max_records_per_page * self.base_lists_per_range
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreConfig {
    pub max_records_per_page: usize,
    pub base_lists_per_range: usize,
    pub buffer_pool_size: usize,
    /// Bound of the scan -> apply -> reclaim channels
    pub merge_channel_capacity: usize,
    /// Pin conflicts tolerated per merge job before it is dropped until the next round
    pub merge_retry_budget: usize,
    /// Attempts at finding an evictable slot before surfacing ResourceExhausted
    pub pin_retry_limit: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            max_records_per_page: MAX_NUM_RECORD,
            base_lists_per_range: BASE_PAGE_PER_PAGE_RANGE,
            buffer_pool_size: BUFFER_POOL_SIZE,
            merge_channel_capacity: MERGE_CHANNEL_CAPACITY,
            merge_retry_budget: MERGE_RETRY_BUDGET,
            pin_retry_limit: PIN_RETRY_LIMIT,
        }
    }
}

impl StoreConfig {
    pub fn validate(&self) -> Result<(), StorageError> {
        let fields = [
            ("max_records_per_page", self.max_records_per_page),
            ("base_lists_per_range", self.base_lists_per_range),
            ("buffer_pool_size", self.buffer_pool_size),
            ("merge_channel_capacity", self.merge_channel_capacity),
        ];

        for (name, value) in fields {
            if value == 0 {
                return Err(StorageError::InvalidConfig(name));
            }
        }

        Ok(())
    }

    pub fn geometry(&self) -> Geometry {
        Geometry {
            max_records_per_page: self.max_records_per_page,
            base_lists_per_range: self.base_lists_per_range,
        }
    }
}
