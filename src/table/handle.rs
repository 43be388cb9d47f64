//! Caller handles on open tables
//!
//! A [`TableHandle`] keeps its share open. Row changes on transactional
//! tables are logged as one record per row before any page changes, and
//! the table stays claimed by the writing transaction until it ends.
//! FIXED, DYNAMIC and non-transactional BLOCK_RECORD tables change their
//! files directly; a rollback leaves those changes in place.

use std::sync::Arc;

use super::block_record::ApplyMode;
use super::errors::{TableError, TableResult};
use super::header::TableHeader;
use super::share::DataFile;
use super::{RowId, RowPlacement, Share};
use crate::crash_point::{maybe_crash, points};
use crate::lsn::Lsn;
use crate::trn::Trn;
use crate::wal::{RecordType, RowRecord};

pub struct TableHandle {
    share: Arc<Share>,
}

impl TableHandle {
    pub(crate) fn new(share: Arc<Share>) -> Self {
        share.add_handle();
        Self { share }
    }

    pub fn share(&self) -> &Arc<Share> {
        &self.share
    }

    pub fn name(&self) -> &str {
        self.share.name()
    }

    pub fn row_count(&self) -> u64 {
        self.share.header().row_count
    }

    /// Drop the handle; the table closes once nothing else holds it
    pub fn close(self) {}

    pub fn insert(&self, trn: &Trn, row: &[u8]) -> TableResult<RowId> {
        self.share.check_writable()?;
        let _rows = self.share.write_rows();
        self.claim(trn)?;
        let result = self.insert_locked(trn, row);
        self.share.guard(result)
    }

    /// Replace a row. The returned id differs from `rowid` only for
    /// DYNAMIC rows that had to move.
    pub fn update(&self, trn: &Trn, rowid: RowId, row: &[u8]) -> TableResult<RowId> {
        self.share.check_writable()?;
        let _rows = self.share.write_rows();
        self.claim(trn)?;
        let result = self.update_locked(trn, rowid, row);
        self.share.guard(result)
    }

    pub fn delete(&self, trn: &Trn, rowid: RowId) -> TableResult<()> {
        self.share.check_writable()?;
        let _rows = self.share.write_rows();
        self.claim(trn)?;
        let result = self.delete_locked(trn, rowid);
        self.share.guard(result)
    }

    pub fn read(&self, rowid: RowId) -> TableResult<Vec<u8>> {
        self.share.check_readable()?;
        let _rows = self.share.read_rows();
        let header = self.share.header();
        let result = self.share.read_row(&header, rowid);
        self.share.guard(result)
    }

    /// Every row in row id order
    pub fn scan(&self) -> TableResult<Vec<(RowId, Vec<u8>)>> {
        self.share.check_readable()?;
        let _rows = self.share.read_rows();
        let header = self.share.header();
        let result = self.share.scan_rows(&header);
        self.share.guard(result)
    }

    /// Rows whose key equals `key`
    pub fn lookup(&self, key: &[u8]) -> TableResult<Vec<(RowId, Vec<u8>)>> {
        self.share.check_readable()?;
        let _rows = self.share.read_rows();
        let header = self.share.header();
        let tree = self
            .share
            .btree(&header)
            .ok_or_else(|| TableError::unsupported("table has no key").with_table(self.name()))?;
        let result = tree.lookup(key).and_then(|ids| {
            ids.into_iter()
                .map(|id| Ok((id, self.share.read_row(&header, id)?)))
                .collect()
        });
        self.share.guard(result)
    }

    fn claim(&self, trn: &Trn) -> TableResult<()> {
        if !self.share.is_transactional() {
            return Ok(());
        }
        if !trn.is_active() {
            return Err(TableError::unsupported(format!("transaction {} is not active", trn.id())));
        }
        if self.share.claim_writer(trn.id())? {
            trn.attach_table(&self.share);
        }
        Ok(())
    }

    fn key_of(header: &TableHeader, row: &[u8]) -> TableResult<Option<Vec<u8>>> {
        match header.key {
            Some(key) => Ok(Some(key.extract(row)?.to_vec())),
            None => Ok(None),
        }
    }

    fn check_unique(&self, header: &TableHeader, key: Option<&[u8]>) -> TableResult<()> {
        let (Some(def), Some(key)) = (header.key, key) else {
            return Ok(());
        };
        if !def.unique {
            return Ok(());
        }
        if let Some(tree) = self.share.btree(header) {
            if tree.contains_key(key)? {
                return Err(TableError::duplicate_key().with_table(self.name()));
            }
        }
        Ok(())
    }

    /// Apply index changes stamped with `lsn`, keeping the header's tree
    /// shape current
    fn change_index(
        &self,
        header: &mut TableHeader,
        lsn: Lsn,
        remove: Option<(&[u8], RowId)>,
        add: Option<(&[u8], RowId)>,
    ) -> TableResult<()> {
        let Some(tree) = self.share.btree(header) else {
            return Ok(());
        };
        let mut tree = tree.with_lsn(lsn);
        if let Some((key, rowid)) = remove {
            tree.delete(key, rowid)?;
        }
        if let Some((key, rowid)) = add {
            tree.insert(key, rowid)?;
        }
        header.index_root = tree.root();
        header.index_pages = tree.next_page();
        Ok(())
    }

    /// Log a row record on the transaction's undo chain
    fn log_row(
        &self,
        trn: &Trn,
        record_type: RecordType,
        rowid: RowId,
        placement: &RowPlacement,
        key_before: Option<Vec<u8>>,
        key_after: Option<Vec<u8>>,
    ) -> TableResult<Lsn> {
        let wal = self.share.wal();
        trn.log_undoable(|prev_undo_lsn| {
            let record = RowRecord {
                table: self.share.table_id(),
                rowid,
                prev_undo_lsn,
                redo: placement.redo.clone(),
                undo: placement.undo.clone(),
                key_before,
                key_after,
            };
            let lsn = wal
                .write_record(record_type, trn.id(), &[&record.serialize()])
                .map_err(TableError::from)?;
            maybe_crash(points::TABLE_AFTER_ROW_LOGGED);
            Ok(lsn)
        })
    }

    fn insert_locked(&self, trn: &Trn, row: &[u8]) -> TableResult<RowId> {
        let mut header = self.share.header_mut();
        let key = Self::key_of(&header, row)?;
        self.check_unique(&header, key.as_deref())?;

        let (rowid, lsn) = match self.share.data() {
            DataFile::Paged(_) => {
                let file = self.share.block_file()?;
                let mut data_pages = header.data_pages;
                let placement = file.plan_insert(row, &mut data_pages)?;
                let rowid = RowId::from_ptr(placement.head);
                let lsn = if header.transactional {
                    self.log_row(
                        trn,
                        RecordType::RowInsert,
                        rowid,
                        &placement,
                        None,
                        key.clone(),
                    )?
                } else {
                    Lsn::IMPOSSIBLE
                };
                file.apply(&placement.redo, lsn, ApplyMode::Runtime)?;
                header.data_pages = data_pages;
                header.row_count += 1;
                (rowid, lsn)
            }
            DataFile::Fixed(f) => (f.insert(&mut header, row)?, Lsn::IMPOSSIBLE),
            DataFile::Dynamic(f) => (f.insert(&mut header, row)?, Lsn::IMPOSSIBLE),
        };
        self.change_index(&mut header, lsn, None, key.as_deref().map(|k| (k, rowid)))?;
        Ok(rowid)
    }

    fn update_locked(&self, trn: &Trn, rowid: RowId, row: &[u8]) -> TableResult<RowId> {
        let mut header = self.share.header_mut();
        let key_after = Self::key_of(&header, row)?;

        let (new_id, key_before, lsn) = match self.share.data() {
            DataFile::Paged(_) => {
                let file = self.share.block_file()?;
                let mut data_pages = header.data_pages;
                let (placement, old) = file.plan_update(rowid, row, &mut data_pages)?;
                let key_before = Self::key_of(&header, &old)?;
                if key_before != key_after {
                    self.check_unique(&header, key_after.as_deref())?;
                }
                let lsn = if header.transactional {
                    self.log_row(
                        trn,
                        RecordType::RowUpdate,
                        rowid,
                        &placement,
                        key_before.clone(),
                        key_after.clone(),
                    )?
                } else {
                    Lsn::IMPOSSIBLE
                };
                file.apply(&placement.redo, lsn, ApplyMode::Runtime)?;
                header.data_pages = data_pages;
                (rowid, key_before, lsn)
            }
            DataFile::Fixed(f) => {
                let key_before = Self::key_of(&header, &f.read(&header, rowid)?)?;
                if key_before != key_after {
                    self.check_unique(&header, key_after.as_deref())?;
                }
                f.update(&header, rowid, row)?;
                (rowid, key_before, Lsn::IMPOSSIBLE)
            }
            DataFile::Dynamic(f) => {
                let key_before = Self::key_of(&header, &f.read(&header, rowid)?)?;
                if key_before != key_after {
                    self.check_unique(&header, key_after.as_deref())?;
                }
                let (new_id, _) = f.update(&mut header, rowid, row)?;
                (new_id, key_before, Lsn::IMPOSSIBLE)
            }
        };
        if key_before != key_after || new_id != rowid {
            self.change_index(
                &mut header,
                lsn,
                key_before.as_deref().map(|k| (k, rowid)),
                key_after.as_deref().map(|k| (k, new_id)),
            )?;
        }
        Ok(new_id)
    }

    fn delete_locked(&self, trn: &Trn, rowid: RowId) -> TableResult<()> {
        let mut header = self.share.header_mut();
        let (old, lsn) = match self.share.data() {
            DataFile::Paged(_) => {
                let file = self.share.block_file()?;
                let (placement, old) = file.plan_delete(rowid)?;
                let key_before = Self::key_of(&header, &old)?;
                let lsn = if header.transactional {
                    self.log_row(
                        trn,
                        RecordType::RowDelete,
                        rowid,
                        &placement,
                        key_before,
                        None,
                    )?
                } else {
                    Lsn::IMPOSSIBLE
                };
                file.apply(&placement.redo, lsn, ApplyMode::Runtime)?;
                header.row_count = header.row_count.saturating_sub(1);
                (old, lsn)
            }
            DataFile::Fixed(f) => (f.delete(&mut header, rowid)?, Lsn::IMPOSSIBLE),
            DataFile::Dynamic(f) => (f.delete(&mut header, rowid)?, Lsn::IMPOSSIBLE),
        };
        let key = Self::key_of(&header, &old)?;
        self.change_index(&mut header, lsn, key.as_deref().map(|k| (k, rowid)), None)
    }
}

impl Drop for TableHandle {
    fn drop(&mut self) {
        self.share.release_handle();
    }
}

impl std::fmt::Debug for TableHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TableHandle")
            .field("table", &self.share.name())
            .finish()
    }
}
