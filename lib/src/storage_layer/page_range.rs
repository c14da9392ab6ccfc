use super::config::{Geometry, INTERNAL_COL_NUM};
use super::error::StorageError;
use super::page_list::{ListKind, PageList};

use bincode::error::DecodeError;
use bincode::{Decode, Encode};

pub type RangeIndex = u64;

/// Record identifier, 0 means "no record"
pub type Rid = u64;

pub const NULL_RID: Rid = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BaseLocation {
    pub range: RangeIndex,
    pub list: usize,
    pub offset: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Encode, Decode)]
pub struct TailLocation {
    pub range: RangeIndex,
    pub list: usize,
    pub offset: usize,
}

/// Physical location of a base record, a pure function of the rid and the geometry
pub fn locate_base(geometry: &Geometry, rid: Rid) -> Option<BaseLocation> {
    if rid == NULL_RID {
        return None;
    }

    let per_page = geometry.max_records_per_page as u64;
    let per_range = geometry.records_per_range() as u64;
    let zero_based = rid - 1;

    Some(BaseLocation {
        range: zero_based / per_range,
        list: ((zero_based % per_range) / per_page) as usize,
        offset: (zero_based % per_page) as usize,
    })
}

/// Inverse of `locate_base`
pub fn base_rid(geometry: &Geometry, location: &BaseLocation) -> Rid {
    let per_page = geometry.max_records_per_page as u64;
    let per_range = geometry.records_per_range() as u64;

    location.range * per_range + location.list as u64 * per_page + location.offset as u64 + 1
}

/// Leading block of a persisted range image
#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
pub struct RangeHeader {
    pub range_index: RangeIndex,
    pub num_base_lists: u32,
    pub num_tail_lists: u32,
}

/// On-disk form of a page range: header, then base lists, then tail lists
#[derive(Debug, Encode, Decode)]
pub struct RangeImage {
    pub header: RangeHeader,
    pub lists: Vec<PageList>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRange {
    pub index: RangeIndex,
    num_columns: usize,
    geometry: Geometry,
    base_lists: Vec<PageList>,
    tail_lists: Vec<PageList>,
}

impl PageRange {
    pub fn new(index: RangeIndex, num_columns: usize, geometry: Geometry) -> Self {
        Self {
            index,
            num_columns,
            geometry,
            base_lists: vec![],
            tail_lists: vec![],
        }
    }

    pub fn num_base_lists(&self) -> usize {
        self.base_lists.len()
    }

    pub fn num_tail_lists(&self) -> usize {
        self.tail_lists.len()
    }

    pub fn base_list(&self, list: usize) -> Result<&PageList, StorageError> {
        let capacity = self.base_lists.len();
        self.base_lists
            .get(list)
            .ok_or(StorageError::OutOfRange { offset: list, capacity })
    }

    pub fn base_list_mut(&mut self, list: usize) -> Result<&mut PageList, StorageError> {
        let capacity = self.base_lists.len();
        self.base_lists
            .get_mut(list)
            .ok_or(StorageError::OutOfRange { offset: list, capacity })
    }

    /// Base lists are created in order, the next missing one may be opened
    pub fn ensure_base_list(&mut self, list: usize) -> Result<&mut PageList, StorageError> {
        if list >= self.geometry.base_lists_per_range {
            return Err(StorageError::CapacityExceeded {
                offset: list,
                capacity: self.geometry.base_lists_per_range,
            });
        }

        if list == self.base_lists.len() {
            self.base_lists.push(PageList::new(
                ListKind::Base,
                self.num_columns,
                self.geometry.max_records_per_page,
            ));
        }

        self.base_list_mut(list)
    }

    pub fn tail_list(&self, list: usize) -> Result<&PageList, StorageError> {
        let capacity = self.tail_lists.len();
        self.tail_lists
            .get(list)
            .ok_or(StorageError::OutOfRange { offset: list, capacity })
    }

    pub fn tail_list_mut(&mut self, list: usize) -> Result<&mut PageList, StorageError> {
        let capacity = self.tail_lists.len();
        self.tail_lists
            .get_mut(list)
            .ok_or(StorageError::OutOfRange { offset: list, capacity })
    }

    /// Writes a tail row into the current tail list, opening a new one when it is full
    pub fn append_tail(&mut self, values: &[u64]) -> Result<(usize, usize), StorageError> {
        let needs_list = self.tail_lists.last().is_none_or(PageList::is_full);
        if needs_list {
            self.tail_lists.push(PageList::new(
                ListKind::Tail,
                self.num_columns,
                self.geometry.max_records_per_page,
            ));
        }

        let list = self.tail_lists.len() - 1;
        let offset = self.tail_lists[list].push_row(values)?;
        Ok((list, offset))
    }

    pub fn to_image(&self) -> RangeImage {
        RangeImage {
            header: RangeHeader {
                range_index: self.index,
                num_base_lists: self.base_lists.len() as u32,
                num_tail_lists: self.tail_lists.len() as u32,
            },
            lists: self
                .base_lists
                .iter()
                .chain(self.tail_lists.iter())
                .cloned()
                .collect(),
        }
    }

    pub fn from_image(
        image: RangeImage,
        num_columns: usize,
        geometry: Geometry,
    ) -> Result<Self, StorageError> {
        let RangeImage { header, mut lists } = image;
        let num_base = header.num_base_lists as usize;

        if lists.len() != num_base + header.num_tail_lists as usize {
            return Err(DecodeError::Other("range image list count does not match header").into());
        }

        let tail_lists = lists.split_off(num_base);
        let base_lists = lists;

        let well_formed = base_lists
            .iter()
            .all(|list| list.kind == ListKind::Base)
            && tail_lists.iter().all(|list| list.kind == ListKind::Tail)
            && base_lists.iter().chain(tail_lists.iter()).all(|list| {
                list.width() == INTERNAL_COL_NUM + num_columns
                    && list.capacity() == geometry.max_records_per_page
            });

        if !well_formed {
            return Err(DecodeError::Other("range image does not match table layout").into());
        }

        Ok(Self {
            index: header.range_index,
            num_columns,
            geometry,
            base_lists,
            tail_lists,
        })
    }
}
