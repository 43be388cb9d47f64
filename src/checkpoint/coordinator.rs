//! Checkpoint coordination
//!
//! One checkpoint, in order:
//!
//! 1. Note the log horizon (`start_horizon`) and pin every open table
//! 2. Snapshot the active transactions
//! 3. Flush dirty pages as the level asks
//! 4. Collect dirty pages and table bindings
//! 5. Log the checkpoint record and flush the log to it
//! 6. Replace the control file with the new checkpoint LSN
//! 7. Raise the purge floor and, with immediate purge, delete old log files
//!
//! Transactions are snapshot before dirty pages are collected. A record
//! logged before `start_horizon` then belongs to a transaction that is
//! still active in the snapshot, or to one that committed, and commit
//! happens only after its pages were dirtied.
//!
//! A crash anywhere before step 6 leaves the previous control file in
//! place, so recovery starts from the previous checkpoint.

use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::Mutex;

use super::errors::CheckpointResult;
use crate::config::{CheckpointLevel, LogPurge};
use crate::control::ControlFile;
use crate::crash_point::{maybe_crash, points};
use crate::lsn::Lsn;
use crate::observability::{log_event_with_fields, Event, Logger, MetricsRegistry};
use crate::pagecache::PageCache;
use crate::table::{Share, TableRegistry};
use crate::trn::{TrnId, TrnManager};
use crate::wal::{CheckpointRecord, DirtyPageEntry, RecordType, Wal};

#[derive(Debug)]
struct CheckpointState {
    control: ControlFile,
    /// Horizon at the start of the previous checkpoint; `Medium` flushes
    /// pages dirty since before it
    previous_start: Lsn,
}

/// Releases table pins when a checkpoint ends, however it ends
struct Pins(Vec<Arc<Share>>);

impl Drop for Pins {
    fn drop(&mut self) {
        for share in &self.0 {
            share.unpin();
        }
    }
}

/// What one checkpoint did
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckpointOutcome {
    /// Where the checkpoint record was written
    pub record_lsn: Lsn,
    /// Oldest LSN recovery needs from now on
    pub checkpoint_lsn: Lsn,
    pub pages_flushed: usize,
    pub dirty_pages: usize,
    pub active_trns: usize,
    pub files_purged: usize,
}

pub struct CheckpointManager {
    data_dir: PathBuf,
    wal: Arc<Wal>,
    cache: Arc<PageCache>,
    trns: Arc<TrnManager>,
    tables: Arc<TableRegistry>,
    metrics: Arc<MetricsRegistry>,
    purge: LogPurge,
    state: Mutex<CheckpointState>,
    #[cfg(test)]
    after_trn_snapshot: Mutex<Option<Box<dyn FnOnce() + Send>>>,
}

impl CheckpointManager {
    /// `control` is the control file as read at startup (or a fresh one)
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        data_dir: impl Into<PathBuf>,
        wal: Arc<Wal>,
        cache: Arc<PageCache>,
        trns: Arc<TrnManager>,
        tables: Arc<TableRegistry>,
        metrics: Arc<MetricsRegistry>,
        purge: LogPurge,
        control: ControlFile,
    ) -> Self {
        let previous_start = control.checkpoint_lsn;
        if !control.checkpoint_lsn.is_impossible() {
            wal.set_purge_floor(control.checkpoint_lsn);
        }
        Self {
            data_dir: data_dir.into(),
            wal,
            cache,
            trns,
            tables,
            metrics,
            purge,
            state: Mutex::new(CheckpointState {
                control,
                previous_start,
            }),
            #[cfg(test)]
            after_trn_snapshot: Mutex::new(None),
        }
    }

    /// LSN the last completed checkpoint made the recovery start point
    pub fn checkpoint_lsn(&self) -> Lsn {
        self.state.lock().control.checkpoint_lsn
    }

    pub fn control(&self) -> ControlFile {
        self.state.lock().control.clone()
    }

    /// Take a checkpoint; returns the new checkpoint LSN.
    ///
    /// Checkpoints are serialized. Failures are logged and counted before
    /// they are returned.
    pub fn checkpoint(&self, level: CheckpointLevel) -> CheckpointResult<Lsn> {
        self.checkpoint_detailed(level).map(|o| o.checkpoint_lsn)
    }

    pub fn checkpoint_detailed(&self, level: CheckpointLevel) -> CheckpointResult<CheckpointOutcome> {
        let mut state = self.state.lock();
        log_event_with_fields(Event::CheckpointStart, &[("level", level.name())]);
        maybe_crash(points::CHECKPOINT_START);

        match self.run(&mut state, level) {
            Ok(outcome) => {
                self.metrics.increment_checkpoints();
                log_event_with_fields(
                    Event::CheckpointComplete,
                    &[
                        ("level", level.name()),
                        ("record_lsn", &outcome.record_lsn.to_string()),
                        ("checkpoint_lsn", &outcome.checkpoint_lsn.to_string()),
                        ("pages_flushed", &outcome.pages_flushed.to_string()),
                        ("dirty_pages", &outcome.dirty_pages.to_string()),
                        ("active_trns", &outcome.active_trns.to_string()),
                        ("files_purged", &outcome.files_purged.to_string()),
                    ],
                );
                Ok(outcome)
            }
            Err(e) => {
                self.metrics.increment_checkpoint_failures();
                log_event_with_fields(
                    Event::CheckpointFailed,
                    &[("level", level.name()), ("code", e.code().code()), ("reason", e.message())],
                );
                Err(e)
            }
        }
    }

    fn run(&self, state: &mut CheckpointState, level: CheckpointLevel) -> CheckpointResult<CheckpointOutcome> {
        let start_horizon = self.wal.horizon();
        let _pins = Pins(
            self.tables
                .open_shares()
                .into_iter()
                .filter(|s| s.pin())
                .collect(),
        );
        let trns = self.trns.snapshot();
        #[cfg(test)]
        {
            let hook = self.after_trn_snapshot.lock().take();
            if let Some(hook) = hook {
                hook();
            }
        }

        let pages_flushed = match level {
            CheckpointLevel::Indirect => 0,
            CheckpointLevel::Medium => self.cache.flush_older_than(state.previous_start)?,
            CheckpointLevel::Full => self.cache.flush_all()?,
        };

        let dirty_pages: Vec<DirtyPageEntry> = self
            .cache
            .dirty_pages()
            .into_iter()
            .filter(|p| !p.rec_lsn.is_impossible())
            .filter_map(|p| {
                self.tables.table_for_file(p.file).map(|table| DirtyPageEntry {
                    table,
                    page: p.page,
                    rec_lsn: p.rec_lsn,
                })
            })
            .collect();
        let record = CheckpointRecord {
            start_horizon,
            trns,
            dirty_pages,
            tables: self.tables.bindings(),
            max_trid: self.trns.max_trid(),
            max_table_id: self.tables.max_table_id(),
        };

        let record_lsn = self
            .wal
            .write_record(RecordType::Checkpoint, TrnId::NONE, &[&record.serialize()])?;
        self.wal.flush(record_lsn)?;
        maybe_crash(points::CHECKPOINT_AFTER_RECORD);

        let checkpoint_lsn = record.min_needed_lsn().max(state.control.checkpoint_lsn);
        let mut control = state.control.clone();
        control.checkpoint_record_lsn = record_lsn;
        control.checkpoint_lsn = checkpoint_lsn;
        control.last_log_file_no = self.wal.current_file_no();
        control.max_trid = record.max_trid;
        maybe_crash(points::CHECKPOINT_BEFORE_CONTROL);
        control.store(&self.data_dir)?;
        maybe_crash(points::CHECKPOINT_AFTER_CONTROL);
        state.control = control;
        state.previous_start = start_horizon;

        self.wal.set_purge_floor(checkpoint_lsn);
        let files_purged = match self.purge {
            LogPurge::Immediate => match self.wal.purge(checkpoint_lsn) {
                Ok(n) => n,
                Err(e) => {
                    Logger::warn(
                        "LOG_PURGE_FAILED",
                        &[("code", e.code().code()), ("reason", e.message())],
                    );
                    0
                }
            },
            LogPurge::External => 0,
        };

        Ok(CheckpointOutcome {
            record_lsn,
            checkpoint_lsn,
            pages_flushed,
            dirty_pages: record.dirty_pages.len(),
            active_trns: record.trns.len(),
            files_purged,
        })
    }
}

impl std::fmt::Debug for CheckpointManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CheckpointManager")
            .field("data_dir", &self.data_dir)
            .field("checkpoint_lsn", &self.checkpoint_lsn())
            .finish()
    }
}
