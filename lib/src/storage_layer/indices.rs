use super::page_range::RangeIndex;

pub type ObjectId = u64;

pub const TABLE_STATE_INDEX: ObjectId = 1;
pub const TAIL_DIRECTORY_INDEX: ObjectId = 2;

/// Range images live at RANGE_IMAGE_BASE + range index
pub const RANGE_IMAGE_BASE: ObjectId = 100;

pub fn range_object(index: RangeIndex) -> ObjectId {
    RANGE_IMAGE_BASE + index
}
