//! Output formatting for the CLI
//!
//! Log records print as one text line each; reports print as a single
//! JSON object.

use std::io::{self, Write};

use serde_json::Value;

use super::errors::CliResult;
use crate::wal::{CheckpointRecord, ClrRecord, FileIdRecord, RecordType, RowRecord, WalRecord};

/// One display line for `record`. A payload that does not decode is
/// reported as the error text; the caller counts it as a warning.
pub fn format_record(record: &WalRecord) -> Result<String, String> {
    let head = format!(
        "{} {:<10} trn={} len={}",
        record.lsn,
        record.record_type.name(),
        record.trn,
        record.payload.len()
    );
    let detail = match record.record_type {
        RecordType::FileId => {
            let r = FileIdRecord::deserialize(&record.payload).map_err(|e| e.to_string())?;
            format!("table={} path={}", r.table, r.path)
        }
        t if t.is_undoable() => {
            let r = RowRecord::deserialize(&record.payload).map_err(|e| e.to_string())?;
            format!(
                "table={} rowid={} redo_ops={} undo_ops={} prev_undo={}",
                r.table,
                r.rowid,
                r.redo.len(),
                r.undo.len(),
                r.prev_undo_lsn
            )
        }
        RecordType::Clr => {
            let r = ClrRecord::deserialize(&record.payload).map_err(|e| e.to_string())?;
            format!(
                "table={} rowid={} undone={} ({}) undo_next={} ops={}",
                r.table,
                r.rowid,
                r.undone_lsn,
                r.undone_type,
                r.undo_next_lsn,
                r.ops.len()
            )
        }
        RecordType::Checkpoint => {
            let r = CheckpointRecord::deserialize(&record.payload).map_err(|e| e.to_string())?;
            format!(
                "start_horizon={} trns={} dirty_pages={} tables={} max_trid={} min_needed={}",
                r.start_horizon,
                r.trns.len(),
                r.dirty_pages.len(),
                r.tables.len(),
                r.max_trid,
                r.min_needed_lsn()
            )
        }
        _ => String::new(),
    };
    if detail.is_empty() {
        Ok(head)
    } else {
        Ok(format!("{} {}", head, detail))
    }
}

pub fn write_line(line: &str) -> CliResult<()> {
    let mut stdout = io::stdout().lock();
    writeln!(stdout, "{}", line)?;
    Ok(())
}

/// The summary line every read-log run ends with
pub fn write_warning_count(warnings: usize) -> CliResult<()> {
    write_line(&format!("{} warning(s)", warnings))
}

/// Write a report object to stdout
pub fn write_report(data: Value) -> CliResult<()> {
    let mut stdout = io::stdout();
    serde_json::to_writer(&mut stdout, &data)?;
    writeln!(stdout)?;
    stdout.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lsn::Lsn;
    use crate::trn::TrnId;
    use crate::wal::TableId;

    #[test]
    fn test_format_file_id_record() {
        let payload = FileIdRecord {
            table: TableId(3),
            path: "db/t1".to_string(),
        }
        .serialize();
        let record = WalRecord {
            lsn: Lsn::new(1, 0x40),
            record_type: RecordType::FileId,
            flags: 0,
            trn: TrnId::NONE,
            payload,
        };
        let line = format_record(&record).unwrap();
        assert!(line.contains("FILE_ID"), "{}", line);
        assert!(line.ends_with("table=t3 path=db/t1"), "{}", line);
    }

    #[test]
    fn test_damaged_payload_is_an_error() {
        let record = WalRecord {
            lsn: Lsn::new(1, 0x40),
            record_type: RecordType::RowInsert,
            flags: 0,
            trn: TrnId::new(7),
            payload: vec![1, 2],
        };
        assert!(format_record(&record).is_err());
    }
}
