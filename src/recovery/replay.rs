//! Redo pass
//!
//! Reads the log forward from the recovery start and replays every page
//! change. A page whose stamped LSN is at or past a record's LSN already
//! holds that change, so the record is skipped for that page; replaying a
//! log twice converges to the same pages.
//!
//! The pass also rebuilds the transaction table: every transaction that
//! wrote undoable records and has no commit or abort by the end of the
//! log is handed to the undo pass.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use super::errors::{RecoveryError, RecoveryResult};
use super::startup::{RecoveryOptions, RecoveryReport};
use crate::lsn::Lsn;
use crate::observability::MetricsRegistry;
use crate::table::{ApplyMode, Share, TableRegistry};
use crate::trn::TrnId;
use crate::wal::{
    CheckpointRecord, ClrRecord, FileIdRecord, PageOp, RecordType, RowRecord, TableId, Wal,
    WalRecord,
};

/// Transaction state rebuilt from the log
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecoveredTrn {
    /// Next record to undo; `IMPOSSIBLE` once everything is compensated
    pub undo_next: Lsn,
    pub first_undo: Lsn,
}

#[derive(Debug, Default)]
pub struct TrnTable {
    trns: BTreeMap<TrnId, RecoveredTrn>,
    max_trid: TrnId,
}

impl TrnTable {
    /// Start from the transactions a checkpoint saw active
    pub fn seed(&mut self, checkpoint: &CheckpointRecord) {
        for trn in &checkpoint.trns {
            self.trns.insert(
                trn.id,
                RecoveredTrn {
                    undo_next: trn.undo_lsn,
                    first_undo: trn.first_undo_lsn,
                },
            );
        }
        self.max_trid = self.max_trid.max(checkpoint.max_trid);
    }

    fn note_id(&mut self, trn: TrnId) {
        self.max_trid = self.max_trid.max(trn);
    }

    fn note_row(&mut self, trn: TrnId, lsn: Lsn) {
        let entry = self.trns.entry(trn).or_insert(RecoveredTrn {
            undo_next: Lsn::IMPOSSIBLE,
            first_undo: lsn,
        });
        if entry.first_undo.is_impossible() {
            entry.first_undo = lsn;
        }
        entry.undo_next = lsn;
    }

    fn note_clr(&mut self, trn: TrnId, undo_next: Lsn, lsn: Lsn) {
        let entry = self.trns.entry(trn).or_insert(RecoveredTrn {
            undo_next,
            first_undo: lsn,
        });
        entry.undo_next = undo_next;
    }

    fn end(&mut self, trn: TrnId) {
        self.trns.remove(&trn);
    }

    /// Transactions that must be rolled back; ones that never logged an
    /// undoable record are left out
    pub fn incomplete(&self) -> Vec<(TrnId, RecoveredTrn)> {
        self.trns
            .iter()
            .filter(|(_, t)| !t.first_undo.is_impossible())
            .map(|(id, t)| (*id, *t))
            .collect()
    }

    pub fn max_trid(&self) -> TrnId {
        self.max_trid
    }
}

/// Resolves table ids named by the log to shares opened for recovery
pub struct RecoveryTables<'a> {
    registry: &'a TableRegistry,
    resolved: HashMap<TableId, Option<Arc<Share>>>,
}

impl<'a> RecoveryTables<'a> {
    pub fn new(registry: &'a TableRegistry) -> Self {
        Self {
            registry,
            resolved: HashMap::new(),
        }
    }

    /// A `FileId` record may rebind an id; forget what it resolved to
    fn forget(&mut self, id: TableId) {
        self.resolved.remove(&id);
    }

    /// The share that a record at `lsn` for table `id` applies to.
    ///
    /// `None` when the table is gone (a warning is recorded once per id)
    /// or when the record predates the table's creation.
    pub fn share_for(
        &mut self,
        id: TableId,
        lsn: Lsn,
        options: &RecoveryOptions,
        report: &mut RecoveryReport,
    ) -> RecoveryResult<Option<Arc<Share>>> {
        if !self.resolved.contains_key(&id) {
            let share = self.resolve(id, options, report)?;
            self.resolved.insert(id, share);
        }
        let share = match self.resolved.get(&id) {
            Some(Some(share)) => Arc::clone(share),
            _ => return Ok(None),
        };
        if lsn < share.header().create_lsn {
            return Ok(None);
        }
        Ok(Some(share))
    }

    fn resolve(
        &self,
        id: TableId,
        options: &RecoveryOptions,
        report: &mut RecoveryReport,
    ) -> RecoveryResult<Option<Arc<Share>>> {
        let Some(name) = self.registry.name_for(id) else {
            report.warn(format!("log names table id {} which was never bound; its records are skipped", id));
            return Ok(None);
        };
        let share = match self.registry.open_for_recovery(&name) {
            Ok(Some(share)) => share,
            Ok(None) => {
                report.warn(format!("table {} is missing; its log records are skipped", name));
                return Ok(None);
            }
            Err(e) if options.best_effort => {
                report.warn(format!("table {} cannot be opened: {}", name, e));
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };
        if !share.is_transactional() || share.data_file().is_none() {
            report.warn(format!(
                "table {} is not transactional but the log has changes for it; they are skipped",
                name
            ));
            return Ok(None);
        }
        Ok(Some(share))
    }

    /// Every table a record was applied to
    pub fn touched(&self) -> Vec<Arc<Share>> {
        let mut shares: Vec<Arc<Share>> = self.resolved.values().flatten().cloned().collect();
        shares.sort_by(|a, b| a.name().cmp(b.name()));
        shares.dedup_by(|a, b| Arc::ptr_eq(a, b));
        shares
    }
}

/// The forward pass over the log
pub struct RedoPass<'a, 'b> {
    pub wal: &'a Wal,
    pub registry: &'a TableRegistry,
    pub tables: &'b mut RecoveryTables<'a>,
    pub trns: &'b mut TrnTable,
    pub metrics: &'a MetricsRegistry,
    pub options: &'b RecoveryOptions,
}

impl RedoPass<'_, '_> {
    /// Replay everything from `start` to the end of the log
    pub fn run(&mut self, start: Lsn, report: &mut RecoveryReport) -> RecoveryResult<()> {
        let mut scanner = self.wal.scan_from(start)?;
        if let Some(end) = self.options.end_lsn {
            scanner = scanner.with_end(end.min(self.wal.horizon()));
        }
        loop {
            let record = match scanner.next_record() {
                Ok(Some(record)) => record,
                Ok(None) => break,
                Err(e) if self.options.best_effort => {
                    let at = scanner.position();
                    if !scanner.skip_damaged()? {
                        report.warn(format!("log unreadable from {}: {}; redo stops there", at, e.message()));
                        break;
                    }
                    report.warn(format!("skipped damaged record at {}: {}", at, e.message()));
                    continue;
                }
                Err(e) => return Err(e.into()),
            };
            report.records_scanned += 1;
            match self.redo_record(&record, report) {
                Ok(()) => {}
                Err(e) if self.options.best_effort => {
                    report.warn(format!("record at {} not replayed: {}", record.lsn, e.message()));
                }
                Err(e) => return Err(e),
            }
        }
        if let Some((lsn, reason)) = scanner.torn_tail() {
            report.warn(format!("log ends in a damaged record at {}: {}", lsn, reason));
        }
        Ok(())
    }

    fn redo_record(&mut self, record: &WalRecord, report: &mut RecoveryReport) -> RecoveryResult<()> {
        if !record.trn.is_none() {
            self.trns.note_id(record.trn);
        }
        match record.record_type {
            RecordType::FileId => {
                let bound = FileIdRecord::deserialize(&record.payload)
                    .map_err(|e| RecoveryError::parse_error(record.lsn, record.record_type, e))?;
                self.registry.bind_recovered(bound.table, &bound.path);
                self.tables.forget(bound.table);
            }
            t if t.is_undoable() => {
                let row = RowRecord::deserialize(&record.payload)
                    .map_err(|e| RecoveryError::parse_error(record.lsn, t, e))?;
                self.trns.note_row(record.trn, record.lsn);
                self.replay(record, row.table, &row.redo, report)?;
            }
            RecordType::Clr => {
                let clr = ClrRecord::deserialize(&record.payload)
                    .map_err(|e| RecoveryError::parse_error(record.lsn, record.record_type, e))?;
                self.trns.note_clr(record.trn, clr.undo_next_lsn, record.lsn);
                self.replay(record, clr.table, &clr.ops, report)?;
            }
            RecordType::Commit | RecordType::Abort => self.trns.end(record.trn),
            _ => {}
        }
        Ok(())
    }

    fn replay(
        &mut self,
        record: &WalRecord,
        table: TableId,
        ops: &[PageOp],
        report: &mut RecoveryReport,
    ) -> RecoveryResult<()> {
        let Some(share) = self.tables.share_for(table, record.lsn, self.options, report)? else {
            report.redo_skipped += 1;
            self.metrics.increment_redo_skipped();
            return Ok(());
        };
        let applied = {
            let _rows = share.write_rows();
            share
                .block_file()
                .and_then(|file| file.apply(ops, record.lsn, ApplyMode::Redo))
        };
        match applied {
            Ok(pages) => {
                for op in ops {
                    share.note_data_page(op.page());
                }
                if pages.is_empty() {
                    report.redo_skipped += 1;
                    self.metrics.increment_redo_skipped();
                } else {
                    report.redo_applied += 1;
                    self.metrics.increment_redo_applied();
                }
                Ok(())
            }
            Err(e) => {
                if !self.options.best_effort {
                    share.mark_crashed(&e);
                }
                Err(RecoveryError::redo_failed(record.lsn, record.record_type, e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wal::CheckpointTrn;

    #[test]
    fn test_trn_table_follows_the_log() {
        let mut trns = TrnTable::default();
        let a = TrnId::new(7);
        let b = TrnId::new(9);
        trns.note_id(a);
        trns.note_row(a, Lsn::new(1, 100));
        trns.note_row(a, Lsn::new(1, 200));
        trns.note_id(b);
        trns.note_row(b, Lsn::new(1, 300));
        trns.end(b);

        let incomplete = trns.incomplete();
        assert_eq!(incomplete.len(), 1);
        assert_eq!(incomplete[0].0, a);
        assert_eq!(incomplete[0].1.first_undo, Lsn::new(1, 100));
        assert_eq!(incomplete[0].1.undo_next, Lsn::new(1, 200));
        assert_eq!(trns.max_trid(), b);

        // A CLR moves the undo position back past the compensated record
        trns.note_clr(a, Lsn::new(1, 100), Lsn::new(1, 400));
        assert_eq!(trns.incomplete()[0].1.undo_next, Lsn::new(1, 100));
    }

    #[test]
    fn test_seed_skips_transactions_without_writes() {
        let checkpoint = CheckpointRecord {
            start_horizon: Lsn::new(1, 64),
            trns: vec![
                CheckpointTrn {
                    id: TrnId::new(3),
                    first_undo_lsn: Lsn::IMPOSSIBLE,
                    undo_lsn: Lsn::IMPOSSIBLE,
                },
                CheckpointTrn {
                    id: TrnId::new(4),
                    first_undo_lsn: Lsn::new(1, 80),
                    undo_lsn: Lsn::new(1, 120),
                },
            ],
            dirty_pages: Vec::new(),
            tables: Vec::new(),
            max_trid: TrnId::new(11),
            max_table_id: 0,
        };
        let mut trns = TrnTable::default();
        trns.seed(&checkpoint);
        let incomplete = trns.incomplete();
        assert_eq!(incomplete.len(), 1);
        assert_eq!(incomplete[0].0, TrnId::new(4));
        assert_eq!(trns.max_trid(), TrnId::new(11));
    }
}
