//! Recovery manager
//!
//! Phases, in strict order:
//!
//! 1. SCAN_FROM_CHECKPOINT: read the checkpoint record named by the control
//!    file, take over its table bindings and transaction table, and pick
//!    the first LSN recovery needs. Without a usable checkpoint the scan
//!    starts at the first record on disk.
//! 2. REDO: replay every page change from there to the end of the log.
//! 3. UNDO: roll back transactions with neither commit nor abort.
//! 4. DONE: rebuild derived state of every touched table, check it and
//!    mark the tables clean.
//!
//! The caller takes a checkpoint afterwards; recovery itself never moves
//! the control file.

use std::fmt;
use std::sync::Arc;

use super::errors::{RecoveryError, RecoveryResult};
use super::replay::{RecoveryTables, RedoPass, TrnTable};
use super::undo::UndoPass;
use super::verifier::{TableCheck, TableVerifier};
use crate::control::ControlFile;
use crate::crash_point::{maybe_crash, points};
use crate::lsn::Lsn;
use crate::observability::{log_error, log_event_with_fields, Event, MetricsRegistry};
use crate::table::TableRegistry;
use crate::trn::TrnId;
use crate::wal::{CheckpointRecord, RecordType, Wal};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum RecoveryPhase {
    ScanFromCheckpoint,
    Redo,
    Undo,
    Done,
}

impl RecoveryPhase {
    pub fn name(self) -> &'static str {
        match self {
            RecoveryPhase::ScanFromCheckpoint => "SCAN_FROM_CHECKPOINT",
            RecoveryPhase::Redo => "REDO_PHASE",
            RecoveryPhase::Undo => "UNDO_PHASE",
            RecoveryPhase::Done => "DONE",
        }
    }
}

impl fmt::Display for RecoveryPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecoveryOptions {
    /// Turn per-page redo errors and damaged records into warnings
    pub best_effort: bool,
    /// Start here instead of at the checkpoint
    pub start_lsn: Option<Lsn>,
    /// Stop redo before this LSN
    pub end_lsn: Option<Lsn>,
    /// Roll back incomplete transactions after redo
    pub undo: bool,
}

impl Default for RecoveryOptions {
    fn default() -> Self {
        Self {
            best_effort: false,
            start_lsn: None,
            end_lsn: None,
            undo: true,
        }
    }
}

/// What a recovery run did
#[derive(Debug, Clone)]
pub struct RecoveryReport {
    /// Last phase reached
    pub phase: RecoveryPhase,
    pub start_lsn: Lsn,
    /// Whether the scan started from a checkpoint record
    pub from_checkpoint: bool,
    pub records_scanned: u64,
    pub redo_applied: u64,
    pub redo_skipped: u64,
    pub undo_applied: u64,
    pub trns_undone: u64,
    /// Largest transaction id seen; new ids continue after it
    pub max_trid: TrnId,
    pub tables: Vec<TableCheck>,
    pub warnings: Vec<String>,
}

impl RecoveryReport {
    fn new() -> Self {
        Self {
            phase: RecoveryPhase::ScanFromCheckpoint,
            start_lsn: Lsn::IMPOSSIBLE,
            from_checkpoint: false,
            records_scanned: 0,
            redo_applied: 0,
            redo_skipped: 0,
            undo_applied: 0,
            trns_undone: 0,
            max_trid: TrnId::NONE,
            tables: Vec::new(),
            warnings: Vec::new(),
        }
    }

    /// Record and log a warning
    pub fn warn(&mut self, message: String) {
        log_event_with_fields(
            Event::RecoveryWarning,
            &[("phase", self.phase.name()), ("message", &message)],
        );
        self.warnings.push(message);
    }

    pub fn warning_count(&self) -> usize {
        self.warnings.len()
    }
}

pub struct RecoveryManager {
    wal: Arc<Wal>,
    registry: Arc<TableRegistry>,
    metrics: Arc<MetricsRegistry>,
    options: RecoveryOptions,
}

impl RecoveryManager {
    pub fn new(
        wal: Arc<Wal>,
        registry: Arc<TableRegistry>,
        metrics: Arc<MetricsRegistry>,
        options: RecoveryOptions,
    ) -> Self {
        Self {
            wal,
            registry,
            metrics,
            options,
        }
    }

    pub fn options(&self) -> &RecoveryOptions {
        &self.options
    }

    /// Run every phase. Failure is logged with the phase and LSN reached;
    /// tables that failed are left marked crashed.
    pub fn run(&self, control: &ControlFile) -> RecoveryResult<RecoveryReport> {
        let mut report = RecoveryReport::new();
        log_event_with_fields(
            Event::RecoveryStart,
            &[
                ("checkpoint_lsn", &control.checkpoint_lsn.to_string()),
                ("best_effort", if self.options.best_effort { "true" } else { "false" }),
            ],
        );
        match self.run_phases(control, &mut report) {
            Ok(()) => {
                log_event_with_fields(
                    Event::RecoveryComplete,
                    &[
                        ("records_scanned", &report.records_scanned.to_string()),
                        ("redo_applied", &report.redo_applied.to_string()),
                        ("redo_skipped", &report.redo_skipped.to_string()),
                        ("trns_undone", &report.trns_undone.to_string()),
                        ("warnings", &report.warning_count().to_string()),
                    ],
                );
                Ok(report)
            }
            Err(e) => {
                let lsn = e.lsn().map(|l| l.to_string()).unwrap_or_default();
                log_error(
                    "recovery",
                    e.code().code(),
                    e.message(),
                    &[("phase", report.phase.name()), ("lsn", &lsn)],
                );
                log_event_with_fields(Event::RecoveryFailed, &[("phase", report.phase.name())]);
                Err(e)
            }
        }
    }

    fn run_phases(&self, control: &ControlFile, report: &mut RecoveryReport) -> RecoveryResult<()> {
        let mut trns = TrnTable::default();
        let start = self.find_start(control, &mut trns, report);
        report.start_lsn = start;
        log_event_with_fields(
            Event::RecoveryScan,
            &[
                ("start_lsn", &start.to_string()),
                ("from_checkpoint", if report.from_checkpoint { "true" } else { "false" }),
            ],
        );

        let mut tables = RecoveryTables::new(&self.registry);

        report.phase = RecoveryPhase::Redo;
        log_event_with_fields(Event::RecoveryRedoBegin, &[("start_lsn", &start.to_string())]);
        RedoPass {
            wal: &self.wal,
            registry: &self.registry,
            tables: &mut tables,
            trns: &mut trns,
            metrics: &self.metrics,
            options: &self.options,
        }
        .run(start, report)?;
        log_event_with_fields(
            Event::RecoveryRedoComplete,
            &[
                ("applied", &report.redo_applied.to_string()),
                ("skipped", &report.redo_skipped.to_string()),
            ],
        );
        maybe_crash(points::RECOVERY_AFTER_REDO);

        if self.options.undo {
            report.phase = RecoveryPhase::Undo;
            let incomplete = trns.incomplete().len();
            log_event_with_fields(Event::RecoveryUndoBegin, &[("trns", &incomplete.to_string())]);
            UndoPass {
                wal: &self.wal,
                tables: &mut tables,
                metrics: &self.metrics,
                options: &self.options,
            }
            .run(&trns, report)?;
            log_event_with_fields(
                Event::RecoveryUndoComplete,
                &[("trns_undone", &report.trns_undone.to_string())],
            );
            maybe_crash(points::RECOVERY_AFTER_UNDO);
        }

        let touched = tables.touched();
        let verifier = TableVerifier {
            registry: &self.registry,
            options: &self.options,
        };
        report.tables = verifier.finish(&touched, self.wal.horizon(), report)?;
        self.wal.flush_all()?;

        report.max_trid = trns.max_trid().max(control.max_trid);
        report.phase = RecoveryPhase::Done;
        Ok(())
    }

    /// First LSN to scan. Loads the checkpoint record's bindings and
    /// transactions on the way; a checkpoint that cannot be read is a
    /// warning and the scan falls back to the log start.
    fn find_start(&self, control: &ControlFile, trns: &mut TrnTable, report: &mut RecoveryReport) -> Lsn {
        if let Some(start) = self.options.start_lsn {
            return start;
        }
        if !control.has_checkpoint() {
            return Lsn::IMPOSSIBLE;
        }
        match self.load_checkpoint(control.checkpoint_record_lsn) {
            Ok(checkpoint) => {
                for table in &checkpoint.tables {
                    self.registry.bind_recovered(table.table, &table.path);
                }
                self.registry.reserve_ids(checkpoint.max_table_id);
                trns.seed(&checkpoint);
                report.from_checkpoint = true;
                checkpoint.min_needed_lsn().min(control.checkpoint_lsn)
            }
            Err(e) => {
                report.warn(format!(
                    "checkpoint at {} unusable ({}); scanning from the log start",
                    control.checkpoint_record_lsn,
                    e.message()
                ));
                Lsn::IMPOSSIBLE
            }
        }
    }

    fn load_checkpoint(&self, lsn: Lsn) -> RecoveryResult<CheckpointRecord> {
        let record = self.wal.read_record(lsn)?;
        if record.record_type != RecordType::Checkpoint {
            return Err(RecoveryError::failed(format!(
                "control file points at a {} record",
                record.record_type
            )));
        }
        CheckpointRecord::deserialize(&record.payload)
            .map_err(|e| RecoveryError::parse_error(lsn, RecordType::Checkpoint, e))
    }
}

impl fmt::Debug for RecoveryManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecoveryManager")
            .field("options", &self.options)
            .finish()
    }
}
