//! Undo of row records
//!
//! Undoing a row record applies its stored inverse page operations and
//! logs them as a CLR whose `undo_next_lsn` skips past the undone record.
//! A CLR is redo-only: redo replays it, undo never reverses it, so an
//! interrupted rollback resumes where it stopped.

use super::block_record::ApplyMode;
use super::errors::{TableError, TableResult};
use super::header::TableHeader;
use super::Share;
use crate::lsn::Lsn;
use crate::trn::{Trn, TrnManager};
use crate::wal::{ClrRecord, RecordType, RowRecord, Wal, WalRecord};

/// Who is undoing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UndoMode {
    /// Rollback of a live transaction; the index and row count follow
    Runtime,
    /// Recovery; derived state is rebuilt once recovery is done
    Recovery,
}

/// Compensate one row record. Returns the CLR's LSN.
pub fn undo_row_record(
    share: &Share,
    record: &WalRecord,
    row: &RowRecord,
    mode: UndoMode,
) -> TableResult<Lsn> {
    let _rows = share.write_rows();
    let result = compensate(share, record, row, mode);
    share.guard(result)
}

fn compensate(share: &Share, record: &WalRecord, row: &RowRecord, mode: UndoMode) -> TableResult<Lsn> {
    let clr = ClrRecord {
        table: row.table,
        rowid: row.rowid,
        undone_lsn: record.lsn,
        undone_type: record.record_type,
        undo_next_lsn: row.prev_undo_lsn,
        ops: row.undo.clone(),
    };
    let lsn = share
        .wal()
        .write_record(RecordType::Clr, record.trn, &[&clr.serialize()])?;
    let file = share.block_file()?;
    file.apply(&row.undo, lsn, ApplyMode::Runtime)?;

    let mut header = share.header_mut();
    if let Some(top) = row.undo.iter().map(|op| op.page()).max() {
        header.data_pages = header.data_pages.max(top + 1);
    }
    if mode == UndoMode::Runtime {
        fix_derived(share, &mut header, record.record_type, row, lsn)?;
    }
    Ok(lsn)
}

fn fix_derived(
    share: &Share,
    header: &mut TableHeader,
    record_type: RecordType,
    row: &RowRecord,
    lsn: Lsn,
) -> TableResult<()> {
    match record_type {
        RecordType::RowInsert => header.row_count = header.row_count.saturating_sub(1),
        RecordType::RowDelete => header.row_count += 1,
        _ => {}
    }
    if row.key_before == row.key_after {
        return Ok(());
    }
    let Some(tree) = share.btree(header) else {
        return Ok(());
    };
    let mut tree = tree.with_lsn(lsn);
    if let Some(key) = &row.key_after {
        tree.delete(key, row.rowid)?;
    }
    if let Some(key) = &row.key_before {
        tree.insert(key, row.rowid)?;
    }
    header.index_root = tree.root();
    header.index_pages = tree.next_page();
    Ok(())
}

/// Roll back a live transaction: walk its undo chain backwards, compensate
/// every row record and write the abort record
pub fn rollback(trns: &TrnManager, wal: &Wal, trn: &Trn) -> TableResult<()> {
    if !trn.is_active() {
        return Err(TableError::unsupported(format!("transaction {} is not active", trn.id())));
    }
    let tables = trn.tables();
    let mut lsn = trn.undo_lsn();
    while !lsn.is_impossible() {
        let record = wal.read_record(lsn)?;
        match record.record_type {
            t if t.is_undoable() => {
                let row = RowRecord::deserialize(&record.payload).map_err(|e| {
                    TableError::corrupt(format!("row record at {} is unreadable: {}", lsn, e))
                })?;
                let share = tables
                    .iter()
                    .find(|s| s.table_id() == row.table)
                    .ok_or_else(|| {
                        TableError::corrupt(format!(
                            "row record at {} names table {} which the transaction never opened",
                            lsn, row.table
                        ))
                    })?;
                undo_row_record(share, &record, &row, UndoMode::Runtime)?;
                trn.set_undo_lsn(row.prev_undo_lsn);
                lsn = row.prev_undo_lsn;
            }
            RecordType::Clr => {
                let clr = ClrRecord::deserialize(&record.payload).map_err(|e| {
                    TableError::corrupt(format!("CLR at {} is unreadable: {}", lsn, e))
                })?;
                lsn = clr.undo_next_lsn;
            }
            other => {
                return Err(TableError::corrupt(format!(
                    "undo chain of transaction {} reaches a {} record at {}",
                    trn.id(),
                    other,
                    lsn
                )))
            }
        }
    }
    trns.finish_rollback(trn)?;
    Ok(())
}
