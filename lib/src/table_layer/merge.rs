use std::any::Any;
use std::collections::VecDeque;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use super::super::storage_layer::{
    buffer_pool::PinnedRange,
    config::{INDIRECTION_COLUMN, INTERNAL_COL_NUM, RID_COLUMN, SCHEMA_ENCODING_COLUMN},
    error::StorageError,
    page_range::{BaseLocation, NULL_RID, RangeIndex, Rid, base_rid},
};
use super::error::TableError;
use super::table::Table;

use crossbeam_channel as xchan;

/// Delay before a job that hit a pinned range is tried again
const RETRY_DELAY: Duration = Duration::from_millis(2);

/// Consolidated values for one base record, produced by `scan`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeJob {
    pub base_rid: Rid,
    pub location: BaseLocation,
    /// Chain head seen by the scan, the job is stale if the base points elsewhere on apply
    pub head: Rid,
    pub values: Vec<u64>,
    /// Tail rids folded into `values`, reclaimed once applied
    pub chain: Vec<Rid>,
    attempts: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyOutcome {
    Applied(Vec<Rid>),
    /// Someone holds the range
    Busy,
    /// The record changed since the scan, the next round picks it up again
    Stale,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MergeStats {
    pub scanned_ranges: usize,
    pub skipped_ranges: usize,
    pub jobs: usize,
    pub applied: usize,
    pub stale: usize,
    /// Jobs that ran out of retries on a busy range
    pub dropped: usize,
    pub reclaimed: usize,
}

fn collect_jobs(table: &Table, pinned: &PinnedRange<'_>) -> Result<Vec<MergeJob>, TableError> {
    let geometry = table.geometry();
    let range = pinned.read();
    let mut jobs = vec![];

    for list in 0..range.num_base_lists() {
        let base_list = range.base_list(list)?;
        for offset in 0..base_list.num_records() {
            let row = base_list.read_row(offset)?;
            // deleted records keep their tails, see `TailDirectory`
            if row[RID_COLUMN] == NULL_RID || row[INDIRECTION_COLUMN] == NULL_RID {
                continue;
            }

            let location = BaseLocation {
                range: range.index,
                list,
                offset,
            };
            let resolved = table.resolve_chain(&range, &row, true)?;

            jobs.push(MergeJob {
                base_rid: base_rid(&geometry, &location),
                location,
                head: row[INDIRECTION_COLUMN],
                values: resolved.values,
                chain: resolved.chain,
                attempts: 0,
            });
        }
    }

    Ok(jobs)
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ScanReport {
    pub scanned_ranges: usize,
    pub skipped_ranges: usize,
    pub jobs: usize,
}

/// Consolidate every unpinned range and send one job per base record with unmerged tails
///
/// Pins are released before the jobs of a range are sent.
pub fn scan(table: &Table, jobs: &xchan::Sender<MergeJob>) -> Result<ScanReport, TableError> {
    let mut report = ScanReport::default();

    for index in 0..table.num_ranges() {
        let batch = match table.buffer_pool().try_pin_idle(index) {
            Ok(Some(pinned)) => collect_jobs(table, &pinned)?,
            Ok(None) => {
                tracing::trace!(range = index, "range pinned, skipped by merge scan");
                report.skipped_ranges += 1;
                continue;
            }
            Err(StorageError::ResourceExhausted) => {
                tracing::debug!(range = index, "no free slot for merge scan");
                report.skipped_ranges += 1;
                continue;
            }
            Err(error) => return Err(error.into()),
        };

        report.scanned_ranges += 1;
        for job in batch {
            if jobs.send(job).is_err() {
                return Ok(report);
            }
            report.jobs += 1;
        }
    }

    Ok(report)
}

/// Fold a job into its base record, never waits for a busy range
pub fn apply(table: &Table, job: &MergeJob) -> Result<ApplyOutcome, TableError> {
    let pinned = match try_pin(table, job.location.range)? {
        Some(pinned) => pinned,
        None => return Ok(ApplyOutcome::Busy),
    };

    let mut range = pinned.write();
    let base_list = range.base_list_mut(job.location.list)?;
    let offset = job.location.offset;

    if base_list.read(RID_COLUMN, offset)? == NULL_RID
        || base_list.read(INDIRECTION_COLUMN, offset)? != job.head
    {
        return Ok(ApplyOutcome::Stale);
    }
    pinned.mark_dirty();

    for (column, value) in job.values.iter().enumerate() {
        base_list.write(INTERNAL_COL_NUM + column, offset, *value)?;
    }
    base_list.write(INDIRECTION_COLUMN, offset, NULL_RID)?;
    base_list.write(SCHEMA_ENCODING_COLUMN, offset, 0)?;

    Ok(ApplyOutcome::Applied(job.chain.clone()))
}

fn try_pin(table: &Table, index: RangeIndex) -> Result<Option<PinnedRange<'_>>, TableError> {
    match table.buffer_pool().try_pin_idle(index) {
        Err(StorageError::ResourceExhausted) => Ok(None),
        result => Ok(result?),
    }
}

/// Free the slots of merged tails and drop their directory entries
pub fn reclaim(table: &Table, tails: &[Rid]) -> usize {
    table.release_tails(tails)
}

#[derive(Debug, Default)]
struct ApplyReport {
    applied: usize,
    stale: usize,
    dropped: usize,
}

fn apply_stage(
    table: &Table,
    jobs: xchan::Receiver<MergeJob>,
    reclaim_tx: xchan::Sender<Vec<Rid>>,
) -> Result<ApplyReport, TableError> {
    let budget = table.config().merge_retry_budget;
    let mut deferred = VecDeque::<MergeJob>::new();
    let mut report = ApplyReport::default();
    let mut open = true;

    loop {
        let mut job = match (open, deferred.is_empty()) {
            (false, true) => break,
            (true, true) => match jobs.recv() {
                Ok(job) => job,
                Err(_) => {
                    open = false;
                    continue;
                }
            },
            (true, false) => match jobs.recv_timeout(RETRY_DELAY) {
                Ok(job) => job,
                Err(xchan::RecvTimeoutError::Timeout) => match deferred.pop_front() {
                    Some(job) => job,
                    None => continue,
                },
                Err(xchan::RecvTimeoutError::Disconnected) => {
                    open = false;
                    continue;
                }
            },
            (false, false) => {
                std::thread::sleep(RETRY_DELAY);
                match deferred.pop_front() {
                    Some(job) => job,
                    None => continue,
                }
            }
        };

        match apply(table, &job)? {
            ApplyOutcome::Applied(chain) => {
                report.applied += 1;
                if reclaim_tx.send(chain).is_err() {
                    break;
                }
            }
            ApplyOutcome::Stale => {
                tracing::trace!(base_rid = job.base_rid, "stale merge job skipped");
                report.stale += 1;
            }
            ApplyOutcome::Busy => {
                job.attempts += 1;
                if job.attempts > budget {
                    tracing::warn!(
                        base_rid = job.base_rid,
                        range = job.location.range,
                        attempts = job.attempts,
                        "merge job exceeded retry budget, left for the next round"
                    );
                    report.dropped += 1;
                } else {
                    deferred.push_back(job);
                }
            }
        }
    }

    Ok(report)
}

fn reclaim_stage(table: &Table, batches: xchan::Receiver<Vec<Rid>>) -> usize {
    batches
        .iter()
        .map(|tails| reclaim(table, &tails))
        .sum()
}

fn rethrow<T>(payload: Box<dyn Any + Send + 'static>) -> T {
    std::panic::resume_unwind(payload)
}

/// One merge round: scan, apply and reclaim connected by bounded channels
pub fn run_round(table: &Table) -> Result<MergeStats, TableError> {
    let capacity = table.config().merge_channel_capacity;
    let (job_tx, job_rx) = xchan::bounded::<MergeJob>(capacity);
    let (reclaim_tx, reclaim_rx) = xchan::bounded::<Vec<Rid>>(capacity);

    let (scanned, applied, reclaimed) = std::thread::scope(|scope| {
        let scanner = scope.spawn(move || scan(table, &job_tx));
        let applier = scope.spawn(move || apply_stage(table, job_rx, reclaim_tx));
        let reclaimer = scope.spawn(move || reclaim_stage(table, reclaim_rx));

        (
            scanner.join().unwrap_or_else(rethrow),
            applier.join().unwrap_or_else(rethrow),
            reclaimer.join().unwrap_or_else(rethrow),
        )
    });

    let applied = applied?;
    let scanned = scanned?;

    let stats = MergeStats {
        scanned_ranges: scanned.scanned_ranges,
        skipped_ranges: scanned.skipped_ranges,
        jobs: scanned.jobs,
        applied: applied.applied,
        stale: applied.stale,
        dropped: applied.dropped,
        reclaimed,
    };

    tracing::debug!(?stats, "merge round finished");
    Ok(stats)
}

/// Background thread running merge rounds at a fixed interval
#[derive(Debug)]
pub struct MergeHandle {
    stop_tx: xchan::Sender<()>,
    worker: Option<JoinHandle<()>>,
}

impl MergeHandle {
    pub fn spawn(table: Arc<Table>, interval: Duration) -> Self {
        let (stop_tx, stop_rx) = xchan::bounded::<()>(1);

        let worker = std::thread::spawn(move || {
            loop {
                match stop_rx.recv_timeout(interval) {
                    Err(xchan::RecvTimeoutError::Timeout) => {
                        if let Err(error) = run_round(&table) {
                            tracing::warn!(%error, "background merge round failed");
                        }
                    }
                    _ => break,
                }
            }
        });

        Self {
            stop_tx,
            worker: Some(worker),
        }
    }

    /// Signal the worker and wait for the current round to finish
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        let _ = self.stop_tx.try_send(());
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                tracing::warn!("merge worker panicked");
            }
        }
    }
}

impl Drop for MergeHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}
