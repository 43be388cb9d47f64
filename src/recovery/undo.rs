//! Undo pass
//!
//! Rolls back every transaction the redo pass left incomplete. Chains are
//! processed together, always undoing the record with the highest LSN
//! next, so the log is read backwards once. Each compensation is logged as
//! a CLR; a crash in the middle of this pass resumes from the CLRs.

use std::collections::BinaryHeap;

use super::errors::{RecoveryError, RecoveryResult};
use super::replay::{RecoveryTables, TrnTable};
use super::startup::{RecoveryOptions, RecoveryReport};
use crate::crash_point::{maybe_crash, points};
use crate::lsn::Lsn;
use crate::observability::{Logger, MetricsRegistry};
use crate::table::{undo_row_record, UndoMode};
use crate::trn::TrnId;
use crate::wal::{ClrRecord, RecordType, RowRecord, Wal};

pub struct UndoPass<'a, 'b> {
    pub wal: &'a Wal,
    pub tables: &'b mut RecoveryTables<'a>,
    pub metrics: &'a MetricsRegistry,
    pub options: &'b RecoveryOptions,
}

impl UndoPass<'_, '_> {
    pub fn run(&mut self, trns: &TrnTable, report: &mut RecoveryReport) -> RecoveryResult<()> {
        let mut pending: BinaryHeap<(Lsn, TrnId)> = BinaryHeap::new();
        for (id, trn) in trns.incomplete() {
            if trn.undo_next.is_impossible() {
                // Fully compensated before the crash; only the abort is missing
                self.abort(id, report)?;
            } else {
                pending.push((trn.undo_next, id));
            }
        }

        while let Some((lsn, trn)) = pending.pop() {
            let next = match self.undo_one(lsn, trn, report) {
                Ok(next) => next,
                Err(e) if self.options.best_effort => {
                    report.warn(format!(
                        "transaction {} left partly rolled back at {}: {}",
                        trn,
                        lsn,
                        e.message()
                    ));
                    continue;
                }
                Err(e) => return Err(e),
            };
            if next.is_impossible() {
                self.abort(trn, report)?;
            } else {
                pending.push((next, trn));
            }
        }
        self.wal.flush_all()?;
        Ok(())
    }

    /// Undo the record at `lsn`; returns where the chain continues
    fn undo_one(&mut self, lsn: Lsn, trn: TrnId, report: &mut RecoveryReport) -> RecoveryResult<Lsn> {
        let record = self.wal.read_record(lsn)?;
        if record.trn != trn {
            return Err(RecoveryError::failed(format!(
                "undo chain of transaction {} reaches a record of transaction {} at {}",
                trn, record.trn, lsn
            )));
        }
        match record.record_type {
            t if t.is_undoable() => {
                let row = RowRecord::deserialize(&record.payload)
                    .map_err(|e| RecoveryError::parse_error(lsn, t, e))?;
                if let Some(share) = self.tables.share_for(row.table, lsn, self.options, report)? {
                    undo_row_record(&share, &record, &row, UndoMode::Recovery)
                        .map_err(|e| RecoveryError::undo_failed(lsn, e))?;
                    report.undo_applied += 1;
                    self.metrics.increment_undo_applied();
                    maybe_crash(points::RECOVERY_DURING_UNDO);
                }
                Ok(row.prev_undo_lsn)
            }
            RecordType::Clr => {
                let clr = ClrRecord::deserialize(&record.payload)
                    .map_err(|e| RecoveryError::parse_error(lsn, RecordType::Clr, e))?;
                Ok(clr.undo_next_lsn)
            }
            other => Err(RecoveryError::failed(format!(
                "undo chain of transaction {} reaches a {} record at {}",
                trn, other, lsn
            ))),
        }
    }

    fn abort(&mut self, trn: TrnId, report: &mut RecoveryReport) -> RecoveryResult<()> {
        let lsn = self.wal.write_record(RecordType::Abort, trn, &[])?;
        report.trns_undone += 1;
        Logger::info(
            "RECOVERY_TRN_ROLLED_BACK",
            &[("trn", &trn.to_string()), ("abort_lsn", &lsn.to_string())],
        );
        Ok(())
    }
}
