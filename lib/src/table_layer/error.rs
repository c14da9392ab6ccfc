use super::super::storage_layer::config::Geometry;
use super::super::storage_layer::error::StorageError;
use super::super::storage_layer::page_range::Rid;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum TableError {
    #[error("Record not found: {0}")]
    RecordNotFound(Rid),

    #[error("Record deleted: {0}")]
    RecordDeleted(Rid),

    #[error("Tail record not found: {0}")]
    TailNotFound(Rid),

    #[error("Expected {expected} columns, got {got}")]
    ColumnCountMismatch { expected: usize, got: usize },

    #[error("Column out of range: {0}")]
    ColumnOutOfRange(usize),

    #[error("Key {key} does not match key column value {value}")]
    KeyMismatch { key: i64, value: i64 },

    #[error("Table supports at most {max} columns, got {got}")]
    TooManyColumns { max: usize, got: usize },

    #[error("Table was created with {stored:?}, opened with {requested:?}")]
    ConfigMismatch { stored: Geometry, requested: Geometry },

    #[error("Table was created with {stored} columns and key {stored_key}")]
    SchemaMismatch { stored: usize, stored_key: usize },

    #[error("Underlying storage error: {0}")]
    Storage(#[from] StorageError),
}
