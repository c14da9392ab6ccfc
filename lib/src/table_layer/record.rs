use super::super::storage_layer::page_range::Rid;

/// Latest visible version of a base record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub rid: Rid,
    pub key: i64,
    pub columns: Vec<i64>,
}

impl Record {
    pub fn new(rid: Rid, key: i64, columns: Vec<i64>) -> Self {
        Self { rid, key, columns }
    }

    pub fn columns(&self) -> &[i64] {
        &self.columns
    }
}

/// User values are stored as the raw bits of the signed integer
pub fn encode_value(value: i64) -> u64 {
    value as u64
}

pub fn decode_value(stored: u64) -> i64 {
    stored as i64
}
