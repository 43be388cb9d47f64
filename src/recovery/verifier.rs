//! Post-recovery table check
//!
//! Once redo and undo are through, everything derived from the data pages
//! of a recovered table is rebuilt: row count, bitmaps and the index. The
//! rebuilt state is then checked against the pages before the table is
//! declared clean.

use std::sync::Arc;

use super::errors::{RecoveryError, RecoveryResult};
use super::startup::{RecoveryOptions, RecoveryReport};
use crate::lsn::Lsn;
use crate::table::{RebuildReport, Share, TableError, TableRegistry};

/// What the check found for one table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableCheck {
    pub table: String,
    pub rows: u64,
    pub index_entries: usize,
    /// Data pages whose bitmap entry did not match their fill after the rebuild
    pub bitmap_mismatches: usize,
}

pub struct TableVerifier<'a> {
    pub registry: &'a TableRegistry,
    pub options: &'a RecoveryOptions,
}

impl TableVerifier<'_> {
    /// Rebuild and check every table in `shares`, stamping rebuilt pages
    /// with `lsn`
    pub fn finish(
        &self,
        shares: &[Arc<Share>],
        lsn: Lsn,
        report: &mut RecoveryReport,
    ) -> RecoveryResult<Vec<TableCheck>> {
        let mut checks = Vec::with_capacity(shares.len());
        for share in shares {
            match self.finish_one(share, lsn) {
                Ok(check) => {
                    if check.bitmap_mismatches > 0 {
                        report.warn(format!(
                            "table {} has {} bitmap entries out of date after rebuild",
                            check.table, check.bitmap_mismatches
                        ));
                    }
                    checks.push(check);
                }
                Err(e) => {
                    share.mark_crashed(&e);
                    if !self.options.best_effort {
                        return Err(RecoveryError::from(e));
                    }
                    report.warn(format!("table {} left crashed: {}", share.name(), e.message()));
                }
            }
        }
        Ok(checks)
    }

    fn finish_one(&self, share: &Share, lsn: Lsn) -> Result<TableCheck, TableError> {
        let rebuilt: RebuildReport = share.rebuild_derived(lsn)?;
        if let Some(key) = share.header().key {
            if rebuilt.index_entries as u64 != rebuilt.rows {
                return Err(TableError::corrupt(format!(
                    "index of {} bytes at offset {} has {} entries for {} rows",
                    key.len, key.offset, rebuilt.index_entries, rebuilt.rows
                ))
                .with_table(share.name()));
            }
        }
        let mismatches = {
            let _rows = share.read_rows();
            share.block_file()?.check_bitmaps(rebuilt.data_pages)?.len()
        };
        self.registry.finish_recovery(share)?;
        Ok(TableCheck {
            table: share.name().to_string(),
            rows: rebuilt.rows,
            index_entries: rebuilt.index_entries,
            bitmap_mismatches: mismatches,
        })
    }
}
