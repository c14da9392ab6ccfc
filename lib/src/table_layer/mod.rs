pub mod directory;
pub mod error;
pub mod merge;
pub mod observer;
pub mod record;
pub mod table;

#[cfg(test)]
mod tests {
    use super::super::storage_layer::config::{
        INDIRECTION_COLUMN, INTERNAL_COL_NUM, RID_COLUMN, SCHEMA_ENCODING_COLUMN, StoreConfig,
    };
    use super::super::storage_layer::page_range::Rid;
    use super::error::TableError;
    use super::merge::{self, ApplyOutcome, MergeHandle};
    use super::observer::RecordObserver;
    use super::record::Record;
    use super::table::Table;

    use parking_lot::Mutex;

    use std::path::Path;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::{Duration, Instant};

    /// 4 records per page, 2 base lists per range: 8 base records per range
    fn small_config(buffer_pool_size: usize) -> StoreConfig {
        StoreConfig {
            max_records_per_page: 4,
            base_lists_per_range: 2,
            buffer_pool_size,
            ..StoreConfig::default()
        }
    }

    fn open_table(path: &Path, num_columns: usize, buffer_pool_size: usize) -> Table {
        Table::open(path, "grades", num_columns, 0, small_config(buffer_pool_size)).unwrap()
    }

    fn snapshot(table: &Table) -> Vec<Record> {
        table
            .base_rids()
            .unwrap()
            .into_iter()
            .map(|rid| table.read_record(rid).unwrap())
            .collect()
    }

    #[test]
    fn update_is_visible_through_the_chain() {
        let dir = tempfile::tempdir().unwrap();
        let table = Table::new(dir.path().join("table"), "grades", 2, 0).unwrap();

        let rid = table.insert(5, &[5, 10]).unwrap();
        assert_eq!(rid, 1);

        let tail = table.update(rid, &[Some(5), Some(99)]).unwrap();
        assert_eq!(tail, 1);

        assert_eq!(table.read_column(rid, 1).unwrap(), 99);
        assert_eq!(table.read_record(rid).unwrap(), Record::new(1, 5, vec![5, 99]));

        // the base keeps its original value until merged
        assert_eq!(table.read_base(rid, INTERNAL_COL_NUM + 1).unwrap(), 10);
        assert_eq!(table.read_base(rid, INDIRECTION_COLUMN).unwrap(), tail);
        assert_eq!(table.read_tail(tail, INTERNAL_COL_NUM + 1).unwrap(), 99);
        assert_eq!(table.read_tail(tail, INDIRECTION_COLUMN).unwrap(), 0);
    }

    #[test]
    fn newest_tail_wins_per_column() {
        let dir = tempfile::tempdir().unwrap();
        let table = open_table(&dir.path().join("table"), 3, 2);

        let rid = table.insert(1, &[1, 10, 100]).unwrap();
        let first = table.update(rid, &[None, Some(11), None]).unwrap();
        let second = table.update(rid, &[None, None, Some(101)]).unwrap();
        let third = table.update(rid, &[None, Some(12), None]).unwrap();

        assert_eq!(table.read_record(rid).unwrap().columns, vec![1, 12, 101]);

        // chain is newest first
        assert_eq!(table.read_base(rid, INDIRECTION_COLUMN).unwrap(), third);
        assert_eq!(table.read_tail(third, INDIRECTION_COLUMN).unwrap(), second);
        assert_eq!(table.read_tail(second, INDIRECTION_COLUMN).unwrap(), first);
        assert_eq!(table.read_tail(third, SCHEMA_ENCODING_COLUMN).unwrap(), 0b010);
        assert_eq!(table.read_base(rid, SCHEMA_ENCODING_COLUMN).unwrap(), 0b110);
    }

    #[test]
    fn full_ranges_open_new_ones() {
        let dir = tempfile::tempdir().unwrap();
        let table = open_table(&dir.path().join("table"), 2, 2);

        for key in 1..=20i64 {
            assert_eq!(table.insert(key, &[key, key * 2]).unwrap(), key as Rid);
        }

        assert_eq!(table.num_ranges(), 3);
        assert_eq!(table.next_base_rid(), 21);
        for key in 1..=20i64 {
            assert_eq!(table.read_column(key as Rid, 1).unwrap(), key * 2);
        }
    }

    #[test]
    fn written_value_survives_eviction() {
        let dir = tempfile::tempdir().unwrap();
        let table = open_table(&dir.path().join("table"), 2, 1);

        for key in 1..=10i64 {
            table.insert(key, &[key, 0]).unwrap();
        }
        table.write_base(1, INTERNAL_COL_NUM + 1, 77).unwrap();
        assert_eq!(table.buffer_pool().cached_indices(), vec![Some(0)]);

        // loading range 1 pushes range 0 out of the only slot
        assert_eq!(table.read_base(9, INTERNAL_COL_NUM).unwrap(), 9);
        assert_eq!(table.buffer_pool().cached_indices(), vec![Some(1)]);

        assert_eq!(table.read_base(1, INTERNAL_COL_NUM + 1).unwrap(), 77);
        assert_eq!(table.read_column(1, 1).unwrap(), 77);
    }

    #[test]
    fn merge_keeps_visible_values() {
        let dir = tempfile::tempdir().unwrap();
        let table = open_table(&dir.path().join("table"), 3, 2);

        for key in 1..=12i64 {
            table.insert(key, &[key, key * 10, key * 100]).unwrap();
        }
        for rid in (2..=12).step_by(2) {
            table.update(rid, &[None, Some(1), None]).unwrap();
            table.update(rid, &[None, None, Some(2)]).unwrap();
            table.update(rid, &[None, Some(3), None]).unwrap();
        }

        let before = snapshot(&table);
        let stats = table.merge().unwrap();

        assert_eq!(stats.scanned_ranges, 2);
        assert_eq!(stats.jobs, 6);
        assert_eq!(stats.applied, 6);
        assert_eq!(stats.reclaimed, 18);
        assert_eq!(snapshot(&table), before);

        for rid in (2..=12).step_by(2) {
            assert_eq!(table.read_base(rid, INDIRECTION_COLUMN).unwrap(), 0);
            assert_eq!(table.read_base(rid, SCHEMA_ENCODING_COLUMN).unwrap(), 0);
            assert_eq!(table.read_base(rid, INTERNAL_COL_NUM + 1).unwrap(), 3);
            assert_eq!(table.read_base(rid, INTERNAL_COL_NUM + 2).unwrap(), 2);
        }

        assert_eq!(table.tail_directory_len(), 0);
        assert_eq!(table.free_tail_slots(), 18);
        assert!(matches!(
            table.read_tail(1, INTERNAL_COL_NUM),
            Err(TableError::TailNotFound(1))
        ));

        // nothing left to fold
        assert_eq!(table.merge().unwrap().jobs, 0);

        // reclaimed slots are handed to new tails of the same range
        table.update(2, &[None, Some(4), None]).unwrap();
        assert_eq!(table.free_tail_slots(), 17);
        assert_eq!(table.read_column(2, 1).unwrap(), 4);
        assert_eq!(table.read_column(2, 2).unwrap(), 2);
    }

    #[test]
    fn deleted_records_are_excluded() {
        let dir = tempfile::tempdir().unwrap();
        let table = open_table(&dir.path().join("table"), 2, 2);

        for key in 1..=3i64 {
            table.insert(key, &[key, 0]).unwrap();
        }
        table.update(2, &[None, Some(5)]).unwrap();
        table.update(3, &[None, Some(6)]).unwrap();
        table.delete(2).unwrap();

        assert_eq!(table.read_base(2, RID_COLUMN).unwrap(), 0);
        assert!(matches!(table.read_record(2), Err(TableError::RecordDeleted(2))));
        assert!(matches!(table.delete(2), Err(TableError::RecordDeleted(2))));
        assert!(matches!(
            table.update(2, &[None, Some(1)]),
            Err(TableError::RecordDeleted(2))
        ));
        assert_eq!(table.base_rids().unwrap(), vec![1, 3]);

        let stats = table.merge().unwrap();
        assert_eq!(stats.jobs, 1);
        assert_eq!(stats.applied, 1);
        assert_eq!(table.read_column(3, 1).unwrap(), 6);
        // the deleted record was not merged
        assert_eq!(table.read_base(2, INDIRECTION_COLUMN).unwrap(), 1);
    }

    #[test]
    fn scan_skips_pinned_ranges() {
        let dir = tempfile::tempdir().unwrap();
        let table = open_table(&dir.path().join("table"), 2, 2);

        table.insert(1, &[1, 1]).unwrap();
        table.update(1, &[None, Some(2)]).unwrap();

        let (tx, rx) = crossbeam_channel::unbounded();
        {
            let _held = table.buffer_pool().get_page_range(0).unwrap();
            let report = merge::scan(&table, &tx).unwrap();
            assert_eq!(report.skipped_ranges, 1);
            assert_eq!(report.jobs, 0);
        }

        let report = merge::scan(&table, &tx).unwrap();
        assert_eq!(report.scanned_ranges, 1);
        assert_eq!(report.jobs, 1);
        let job = rx.try_recv().unwrap();
        assert_eq!(job.base_rid, 1);
        assert_eq!(job.values, vec![1, 2]);
    }

    #[test]
    fn busy_range_is_retried() {
        let dir = tempfile::tempdir().unwrap();
        let table = open_table(&dir.path().join("table"), 2, 2);

        table.insert(1, &[1, 1]).unwrap();
        let tail = table.update(1, &[None, Some(2)]).unwrap();

        let (tx, rx) = crossbeam_channel::unbounded();
        merge::scan(&table, &tx).unwrap();
        let job = rx.try_recv().unwrap();

        let held = table.buffer_pool().get_page_range(0).unwrap();
        assert_eq!(merge::apply(&table, &job).unwrap(), ApplyOutcome::Busy);
        drop(held);

        assert_eq!(
            merge::apply(&table, &job).unwrap(),
            ApplyOutcome::Applied(vec![tail])
        );
        assert_eq!(merge::reclaim(&table, &[tail]), 1);
        assert_eq!(table.read_column(1, 1).unwrap(), 2);
        assert_eq!(table.buffer_pool().is_dirty(0), Some(true));
    }

    #[test]
    fn stale_job_is_not_applied() {
        let dir = tempfile::tempdir().unwrap();
        let table = open_table(&dir.path().join("table"), 2, 2);

        table.insert(1, &[1, 1]).unwrap();
        table.update(1, &[None, Some(2)]).unwrap();

        let (tx, rx) = crossbeam_channel::unbounded();
        merge::scan(&table, &tx).unwrap();
        let job = rx.try_recv().unwrap();

        table.update(1, &[None, Some(3)]).unwrap();
        assert_eq!(merge::apply(&table, &job).unwrap(), ApplyOutcome::Stale);
        assert_eq!(table.read_column(1, 1).unwrap(), 3);

        let stats = table.merge().unwrap();
        assert_eq!(stats.applied, 1);
        assert_eq!(stats.reclaimed, 2);
        assert_eq!(table.read_base(1, INTERNAL_COL_NUM + 1).unwrap(), 3);
    }

    #[test]
    fn rejected_changes_leave_range_clean() {
        let dir = tempfile::tempdir().unwrap();
        let table = open_table(&dir.path().join("table"), 2, 2);

        table.insert(1, &[1, 1]).unwrap();
        table.insert(2, &[2, 2]).unwrap();
        table.update(2, &[None, Some(5)]).unwrap();

        let (tx, rx) = crossbeam_channel::unbounded();
        merge::scan(&table, &tx).unwrap();
        let job = rx.try_recv().unwrap();
        assert_eq!(job.base_rid, 2);

        table.update(2, &[None, Some(6)]).unwrap();
        table.delete(1).unwrap();
        table.flush().unwrap();
        let writes = table.buffer_pool().storage().range_writes();

        assert!(matches!(table.delete(1), Err(TableError::RecordDeleted(1))));
        assert_eq!(table.buffer_pool().is_dirty(0), Some(false));

        assert!(matches!(
            table.update(1, &[None, Some(9)]),
            Err(TableError::RecordDeleted(1))
        ));
        assert_eq!(table.buffer_pool().is_dirty(0), Some(false));

        assert_eq!(merge::apply(&table, &job).unwrap(), ApplyOutcome::Stale);
        assert_eq!(table.buffer_pool().is_dirty(0), Some(false));

        assert_eq!(table.flush().unwrap(), 0);
        assert_eq!(table.buffer_pool().storage().range_writes(), writes);
        assert_eq!(table.read_column(2, 1).unwrap(), 6);
    }

    #[test]
    fn table_is_shareable_across_threads() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Table>();
        assert_send_sync::<Arc<Table>>();
    }

    #[test]
    fn table_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("table");

        let before = {
            let table = open_table(&path, 2, 1);
            for key in 1..=10i64 {
                table.insert(key, &[key, key]).unwrap();
            }
            table.update(3, &[None, Some(30)]).unwrap();
            table.update(9, &[None, Some(90)]).unwrap();
            let before = snapshot(&table);
            table.close().unwrap();
            before
        };

        {
            // two slots so the merge scan never has to evict under the apply stage
            let table = open_table(&path, 2, 2);
            assert_eq!(snapshot(&table), before);
            assert_eq!(table.next_base_rid(), 11);
            assert_eq!(table.next_tail_rid(), 3);
            assert_eq!(table.num_ranges(), 2);

            assert_eq!(table.insert(11, &[11, 11]).unwrap(), 11);
            assert_eq!(table.merge().unwrap().applied, 2);
            assert_eq!(table.read_column(9, 1).unwrap(), 90);
        }

        assert!(matches!(
            Table::open(&path, "grades", 2, 0, StoreConfig::default()),
            Err(TableError::ConfigMismatch { .. })
        ));
        assert!(matches!(
            Table::open(&path, "grades", 3, 0, small_config(1)),
            Err(TableError::SchemaMismatch { .. })
        ));
    }

    #[test]
    fn invalid_requests_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let table = open_table(&dir.path().join("table"), 2, 2);
        table.insert(1, &[1, 2]).unwrap();

        assert!(matches!(table.read_record(0), Err(TableError::RecordNotFound(0))));
        assert!(matches!(table.read_record(2), Err(TableError::RecordNotFound(2))));
        assert!(matches!(
            table.read_tail(1, INTERNAL_COL_NUM),
            Err(TableError::TailNotFound(1))
        ));
        assert!(matches!(
            table.write_tail(4, INTERNAL_COL_NUM, 1),
            Err(TableError::TailNotFound(4))
        ));
        assert!(matches!(
            table.insert(3, &[3]),
            Err(TableError::ColumnCountMismatch {
                expected: 2,
                got: 1
            })
        ));
        assert!(matches!(
            table.insert(4, &[3, 3]),
            Err(TableError::KeyMismatch { key: 4, value: 3 })
        ));
        assert!(matches!(
            table.read_base(1, INTERNAL_COL_NUM + 2),
            Err(TableError::ColumnOutOfRange(_))
        ));
        assert!(matches!(
            table.read_column(1, 2),
            Err(TableError::ColumnOutOfRange(2))
        ));
        assert!(matches!(
            Table::open(dir.path().join("other"), "t", 2, 2, small_config(1)),
            Err(TableError::ColumnOutOfRange(2))
        ));
        assert!(matches!(
            Table::open(dir.path().join("wide"), "t", 65, 0, small_config(1)),
            Err(TableError::TooManyColumns { .. })
        ));
    }

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<String>>,
    }

    impl RecordObserver for Recorder {
        fn on_insert(&self, record: &Record) {
            self.events
                .lock()
                .push(format!("insert {} {:?}", record.rid, record.columns));
        }

        fn on_update(&self, record: &Record, tail_rid: Rid) {
            self.events.lock().push(format!(
                "update {} tail {} {:?}",
                record.rid, tail_rid, record.columns
            ));
        }

        fn on_delete(&self, rid: Rid) {
            self.events.lock().push(format!("delete {}", rid));
        }
    }

    #[test]
    fn observers_follow_changes() {
        let dir = tempfile::tempdir().unwrap();
        let table = open_table(&dir.path().join("table"), 2, 2);
        let recorder = Arc::new(Recorder::default());
        table.subscribe(recorder.clone());

        let rid = table.insert(5, &[5, 10]).unwrap();
        table.update(rid, &[None, Some(99)]).unwrap();
        table.delete(rid).unwrap();
        assert!(table.delete(rid).is_err());

        assert_eq!(
            *recorder.events.lock(),
            vec![
                "insert 1 [5, 10]".to_owned(),
                "update 1 tail 1 [5, 99]".to_owned(),
                "delete 1".to_owned(),
            ]
        );
    }

    #[test]
    fn background_merge_folds_updates() {
        let dir = tempfile::tempdir().unwrap();
        let table = Arc::new(open_table(&dir.path().join("table"), 2, 2));

        for key in 1..=4i64 {
            table.insert(key, &[key, 0]).unwrap();
            table.update(key as Rid, &[None, Some(key * 7)]).unwrap();
        }

        let handle = MergeHandle::spawn(table.clone(), Duration::from_millis(5));
        let deadline = Instant::now() + Duration::from_secs(5);
        let merged = |table: &Table| {
            (1..=4).all(|rid| table.read_base(rid, INDIRECTION_COLUMN).unwrap() == 0)
        };
        while !merged(&*table) && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        handle.stop();

        assert!(merged(&*table));
        for key in 1..=4i64 {
            assert_eq!(table.read_column(key as Rid, 1).unwrap(), key * 7);
        }
    }

    #[test]
    fn concurrent_updates_and_merges_keep_latest_value() {
        let dir = tempfile::tempdir().unwrap();
        let table = Arc::new(open_table(&dir.path().join("table"), 2, 3));

        for key in 1..=16i64 {
            table.insert(key, &[key, -1]).unwrap();
        }

        let done = Arc::new(AtomicBool::new(false));
        let merger = {
            let table = table.clone();
            let done = done.clone();
            std::thread::spawn(move || {
                while !done.load(Ordering::Acquire) {
                    table.merge().unwrap();
                }
            })
        };

        let writers: Vec<_> = (0..4u64)
            .map(|worker| {
                let table = table.clone();
                std::thread::spawn(move || {
                    for round in 0..40i64 {
                        for rid in (1..=16u64).filter(|rid| rid % 4 == worker) {
                            table.update(rid, &[None, Some(round)]).unwrap();
                            assert_eq!(table.read_column(rid, 1).unwrap(), round);
                        }
                    }
                })
            })
            .collect();

        for writer in writers {
            writer.join().unwrap();
        }
        done.store(true, Ordering::Release);
        merger.join().unwrap();

        table.merge().unwrap();
        for rid in 1..=16u64 {
            assert_eq!(table.read_column(rid, 1).unwrap(), 39);
            assert_eq!(table.read_base(rid, INDIRECTION_COLUMN).unwrap(), 0);
        }
        assert_eq!(table.tail_directory_len(), 0);
    }
}
