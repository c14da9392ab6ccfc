use super::super::storage_layer::page_range::Rid;
use super::record::Record;

/// Notified after a record change has been written, used by index layers
pub trait RecordObserver: Send + Sync {
    fn on_insert(&self, record: &Record);

    /// `record` is the resolved version after the update
    fn on_update(&self, record: &Record, tail_rid: Rid);

    fn on_delete(&self, rid: Rid);
}
