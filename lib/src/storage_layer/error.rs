use super::page_range::RangeIndex;

use bincode::error::{DecodeError, EncodeError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Serialization error: {0}")]
    EncodeError(#[from] EncodeError),

    #[error("Deserialization error: {0}")]
    DecodeError(#[from] DecodeError),

    #[error("Offset {offset} out of range, page holds {capacity} records")]
    OutOfRange { offset: usize, capacity: usize },

    #[error("Write at offset {offset} exceeds page capacity {capacity}")]
    CapacityExceeded { offset: usize, capacity: usize },

    #[error("No persisted image for page range {0}")]
    StorageNotFound(RangeIndex),

    #[error("Every buffer pool slot is pinned")]
    ResourceExhausted,

    #[error("Page range {0} is already cached")]
    AlreadyCached(RangeIndex),

    #[error("Invalid configuration: {0} must not be zero")]
    InvalidConfig(&'static str),

    #[error("IO error")]
    IOError(#[from] std::io::Error),
}
