//! Per-table shared state
//!
//! One [`Share`] exists for each open table and is shared by every handle,
//! every transaction writing the table and every checkpoint that pinned
//! it. The share closes itself (flush with release, header rewrite) when
//! the last of those references goes away.
//!
//! Lock order: `rows`, then `header`, then `state`. Page latches are taken
//! one at a time while `rows` is held.

use std::fmt;
use std::fs::File;
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

use super::block_record::BlockRecordFile;
use super::btree::BTree;
use super::dynamic::DynamicFile;
use super::errors::{TableError, TableResult};
use super::fixed::FixedFile;
use super::header::TableHeader;
use super::{RowFormat, RowId};
use crate::crash_point::{maybe_crash, points};
use crate::lsn::Lsn;
use crate::observability::{log_error, log_event_with_fields, Event};
use crate::page::PageNo;
use crate::pagecache::{FileId, FlushMode, PageCache};
use crate::trn::TrnId;
use crate::wal::{TableId, Wal};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableState {
    Opening,
    Open,
    /// Being rebuilt by recovery; not open to callers
    Recovery,
    /// A storage error or an unclean shutdown; refuses work until repaired
    Crashed,
    Closing,
    Closed,
}

impl TableState {
    pub fn name(self) -> &'static str {
        match self {
            TableState::Opening => "OPENING",
            TableState::Open => "OPEN",
            TableState::Recovery => "RECOVERY",
            TableState::Crashed => "CRASHED",
            TableState::Closing => "CLOSING",
            TableState::Closed => "CLOSED",
        }
    }
}

impl fmt::Display for TableState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Where a table's rows live
#[derive(Debug)]
pub(crate) enum DataFile {
    /// BLOCK_RECORD pages in the page cache
    Paged(FileId),
    Fixed(FixedFile),
    Dynamic(DynamicFile),
}

#[derive(Debug)]
struct Refs {
    handles: usize,
    writer: Option<TrnId>,
    pins: usize,
    status: TableState,
}

/// Everything a share is built from
#[derive(Debug)]
pub(crate) struct ShareParts {
    pub name: String,
    pub table_id: TableId,
    pub cache: Arc<PageCache>,
    pub wal: Arc<Wal>,
    /// Index file for header writes; `None` for read-only remote tables
    pub header_file: Option<File>,
    pub header: TableHeader,
    pub index: FileId,
    pub data: DataFile,
    pub status: TableState,
}

/// What `repair` and `rebuild_derived` recomputed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RebuildReport {
    pub rows: u64,
    pub index_entries: usize,
    pub data_pages: PageNo,
}

pub struct Share {
    name: String,
    table_id: TableId,
    cache: Arc<PageCache>,
    wal: Arc<Wal>,
    header_file: Option<File>,
    index: FileId,
    data: DataFile,
    rows: RwLock<()>,
    header: Mutex<TableHeader>,
    refs: Mutex<Refs>,
}

impl Share {
    pub(crate) fn new(parts: ShareParts) -> Self {
        Self {
            name: parts.name,
            table_id: parts.table_id,
            cache: parts.cache,
            wal: parts.wal,
            header_file: parts.header_file,
            index: parts.index,
            data: parts.data,
            rows: RwLock::new(()),
            header: Mutex::new(parts.header),
            refs: Mutex::new(Refs {
                handles: 0,
                writer: None,
                pins: 0,
                status: parts.status,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn table_id(&self) -> TableId {
        self.table_id
    }

    pub fn cache(&self) -> &PageCache {
        &self.cache
    }

    pub(crate) fn wal(&self) -> &Wal {
        &self.wal
    }

    pub fn index_file(&self) -> FileId {
        self.index
    }

    /// The page cache file of a BLOCK_RECORD table
    pub fn data_file(&self) -> Option<FileId> {
        match self.data {
            DataFile::Paged(file) => Some(file),
            _ => None,
        }
    }

    pub(crate) fn data(&self) -> &DataFile {
        &self.data
    }

    pub fn header(&self) -> TableHeader {
        self.header.lock().clone()
    }

    pub(crate) fn header_mut(&self) -> MutexGuard<'_, TableHeader> {
        self.header.lock()
    }

    pub fn is_transactional(&self) -> bool {
        self.header.lock().transactional
    }

    pub fn row_format(&self) -> RowFormat {
        self.header.lock().row_format
    }

    pub fn is_read_only(&self) -> bool {
        self.header_file.is_none()
    }

    pub fn state(&self) -> TableState {
        self.refs.lock().status
    }

    pub(crate) fn set_state(&self, status: TableState) {
        self.refs.lock().status = status;
    }

    pub(crate) fn read_rows(&self) -> RwLockReadGuard<'_, ()> {
        self.rows.read()
    }

    pub(crate) fn write_rows(&self) -> RwLockWriteGuard<'_, ()> {
        self.rows.write()
    }

    pub(crate) fn block_file(&self) -> TableResult<BlockRecordFile<'_>> {
        match self.data {
            DataFile::Paged(file) => Ok(BlockRecordFile::new(
                &self.cache,
                file,
                self.cache.block_size(file)?,
            )),
            _ => Err(TableError::unsupported("not a BLOCK_RECORD table").with_table(&self.name)),
        }
    }

    /// The table's B-tree, `None` for tables without a key
    pub(crate) fn btree(&self, header: &TableHeader) -> Option<BTree<'_>> {
        header.key.map(|key| {
            BTree::new(
                &self.cache,
                self.index,
                key.len as usize,
                header.index_root,
                header.index_pages,
            )
        })
    }

    /// Fail unless the table accepts reads
    pub fn check_readable(&self) -> TableResult<()> {
        match self.state() {
            TableState::Open => Ok(()),
            TableState::Crashed => Err(TableError::crashed(&self.name)),
            other => Err(TableError::unsupported(format!("table is {}", other)).with_table(&self.name)),
        }
    }

    pub fn check_writable(&self) -> TableResult<()> {
        self.check_readable()?;
        if self.is_read_only() {
            return Err(TableError::read_only(&self.name));
        }
        Ok(())
    }

    pub(crate) fn add_handle(&self) {
        self.refs.lock().handles += 1;
    }

    pub(crate) fn release_handle(&self) {
        let mut refs = self.refs.lock();
        refs.handles = refs.handles.saturating_sub(1);
        self.close_if_unused(refs);
    }

    /// Make `trn` the table's writer. Returns true the first time, so the
    /// caller attaches the table to the transaction once.
    pub(crate) fn claim_writer(&self, trn: TrnId) -> TableResult<bool> {
        let mut refs = self.refs.lock();
        match refs.writer {
            None => {
                refs.writer = Some(trn);
                Ok(true)
            }
            Some(owner) if owner == trn => Ok(false),
            Some(owner) => Err(TableError::locked(&self.name, owner)),
        }
    }

    pub fn writer(&self) -> Option<TrnId> {
        self.refs.lock().writer
    }

    /// Called when a transaction that wrote the table ends
    pub fn release_trn(&self, trn: TrnId) {
        let mut refs = self.refs.lock();
        if refs.writer == Some(trn) {
            refs.writer = None;
        }
        self.close_if_unused(refs);
    }

    /// Keep the share open while a checkpoint looks at it; false when it
    /// is already closing
    pub fn pin(&self) -> bool {
        let mut refs = self.refs.lock();
        if matches!(refs.status, TableState::Closing | TableState::Closed) {
            return false;
        }
        refs.pins += 1;
        true
    }

    pub fn unpin(&self) {
        let mut refs = self.refs.lock();
        refs.pins = refs.pins.saturating_sub(1);
        self.close_if_unused(refs);
    }

    pub fn is_unused(&self) -> bool {
        let refs = self.refs.lock();
        refs.handles == 0 && refs.writer.is_none() && refs.pins == 0
    }

    fn close_if_unused(&self, mut refs: MutexGuard<'_, Refs>) {
        let unused = refs.handles == 0 && refs.writer.is_none() && refs.pins == 0;
        if !unused || !matches!(refs.status, TableState::Open | TableState::Crashed) {
            return;
        }
        let was = refs.status;
        refs.status = TableState::Closing;
        drop(refs);
        if let Err(e) = self.close_files(was == TableState::Crashed) {
            log_error(
                "table",
                e.code_str(),
                e.message(),
                &[("table", &self.name), ("phase", "close")],
            );
        }
        self.refs.lock().status = TableState::Closed;
    }

    /// Flush and drop cached pages, then record the clean close in the
    /// header. A crashed table keeps its crashed flag and open count.
    fn close_files(&self, crashed: bool) -> TableResult<()> {
        let _rows = self.rows.write();
        let flushed = match self.data {
            DataFile::Paged(file) => self.cache.flush_file(file, FlushMode::Release),
            _ => Ok(()),
        }
        .and_then(|_| self.cache.flush_file(self.index, FlushMode::Release));
        let sync = match &self.data {
            DataFile::Fixed(f) if !self.is_read_only() => f.sync(),
            DataFile::Dynamic(f) if !self.is_read_only() => f.sync(),
            _ => Ok(()),
        };
        if let DataFile::Paged(file) = self.data {
            self.cache.unregister_file(file);
        }
        self.cache.unregister_file(self.index);
        flushed?;
        sync?;

        if !crashed {
            let mut header = self.header.lock();
            header.open_count = header.open_count.saturating_sub(1);
            self.write_header_locked(&header)?;
        }
        log_event_with_fields(Event::TableClose, &[("table", &self.name)]);
        Ok(())
    }

    pub(crate) fn write_header_locked(&self, header: &TableHeader) -> TableResult<()> {
        match &self.header_file {
            Some(file) => {
                maybe_crash(points::TABLE_BEFORE_HEADER_WRITE);
                header.write_to(file).map_err(|e| e.with_table(&self.name))
            }
            None => Ok(()),
        }
    }

    /// Refuse further work until the table is repaired or recovered
    pub fn mark_crashed(&self, cause: &TableError) {
        {
            let mut header = self.header.lock();
            header.crashed = true;
            if let Err(e) = self.write_header_locked(&header) {
                log_error("table", e.code_str(), e.message(), &[("table", &self.name)]);
            }
        }
        self.set_state(TableState::Crashed);
        log_event_with_fields(
            Event::TableCrashed,
            &[
                ("table", &self.name),
                ("code", cause.code_str()),
                ("reason", cause.message()),
            ],
        );
    }

    /// Pass `result` through, marking the table crashed on storage errors
    pub(crate) fn guard<T>(&self, result: TableResult<T>) -> TableResult<T> {
        if let Err(ref e) = result {
            if e.is_storage_failure() {
                self.mark_crashed(e);
            }
        }
        result.map_err(|e| {
            if e.table().is_none() {
                e.with_table(&self.name)
            } else {
                e
            }
        })
    }

    /// Every live row, in row id order
    pub(crate) fn scan_rows(&self, header: &TableHeader) -> TableResult<Vec<(RowId, Vec<u8>)>> {
        match &self.data {
            DataFile::Paged(_) => self.block_file()?.scan(header.data_pages),
            DataFile::Fixed(f) => f.scan(header),
            DataFile::Dynamic(f) => f.scan(header),
        }
    }

    pub(crate) fn read_row(&self, header: &TableHeader, rowid: RowId) -> TableResult<Vec<u8>> {
        match &self.data {
            DataFile::Paged(_) => self.block_file()?.read_row(rowid),
            DataFile::Fixed(f) => f.read(header, rowid),
            DataFile::Dynamic(f) => f.read(header, rowid),
        }
    }

    /// Recompute everything derived from the rows: row count, bitmaps and
    /// the index. Index and bitmap pages are stamped with `lsn`.
    pub(crate) fn rebuild_derived(&self, lsn: Lsn) -> TableResult<RebuildReport> {
        let _rows = self.rows.write();
        let mut header = self.header.lock();
        if let DataFile::Paged(file) = self.data {
            let stored = self.cache.stored_block_count(file)?;
            header.data_pages = header.data_pages.max(stored);
            self.block_file()?.rebuild_bitmaps(header.data_pages, lsn)?;
        }
        let rows = self.scan_rows(&header)?;
        header.row_count = rows.len() as u64;

        let mut index_entries = 0;
        if let Some(key) = header.key {
            self.cache.truncate_file(self.index, 1)?;
            let mut entries = Vec::with_capacity(rows.len());
            for (rowid, row) in &rows {
                entries.push((key.extract(row)?.to_vec(), *rowid));
            }
            index_entries = entries.len();
            let mut tree = BTree::new(&self.cache, self.index, key.len as usize, 0, 1).with_lsn(lsn);
            tree.bulk_load(entries)?;
            header.index_root = tree.root();
            header.index_pages = tree.next_page();
        }
        Ok(RebuildReport {
            rows: header.row_count,
            index_entries,
            data_pages: header.data_pages,
        })
    }

    /// Bring a table marked crashed back into service
    pub fn repair(&self) -> TableResult<RebuildReport> {
        if self.is_read_only() {
            return Err(TableError::read_only(&self.name));
        }
        {
            let _rows = self.rows.write();
            let mut header = self.header.lock();
            match &self.data {
                DataFile::Fixed(f) => {
                    f.repair(&mut header)?;
                }
                DataFile::Dynamic(f) => {
                    f.repair(&mut header)?;
                }
                DataFile::Paged(_) => {}
            }
        }
        let lsn = if self.is_transactional() {
            self.wal.horizon()
        } else {
            Lsn::IMPOSSIBLE
        };
        let report = self.rebuild_derived(lsn)?;
        if let DataFile::Paged(file) = self.data {
            self.cache.flush_file(file, FlushMode::Keep)?;
        }
        self.cache.flush_file(self.index, FlushMode::Keep)?;
        {
            let mut header = self.header.lock();
            header.crashed = false;
            header.open_count = 1;
            self.write_header_locked(&header)?;
        }
        self.set_state(TableState::Open);
        log_event_with_fields(
            Event::TableRepair,
            &[
                ("table", &self.name),
                ("rows", &report.rows.to_string()),
                ("index_entries", &report.index_entries.to_string()),
            ],
        );
        Ok(report)
    }

    /// Remember that redo touched `page` of the data file
    pub(crate) fn note_data_page(&self, page: PageNo) {
        let mut header = self.header.lock();
        header.data_pages = header.data_pages.max(page + 1);
    }

    /// Close now regardless of references; used at engine shutdown
    pub(crate) fn force_close(&self) -> TableResult<()> {
        let was = {
            let mut refs = self.refs.lock();
            if matches!(refs.status, TableState::Closing | TableState::Closed) {
                return Ok(());
            }
            let was = refs.status;
            refs.status = TableState::Closing;
            was
        };
        let result = self.close_files(was == TableState::Crashed);
        self.refs.lock().status = TableState::Closed;
        result
    }

    /// Drop cached pages without writing them; the files stay as they are
    /// on disk. Used to simulate a crash.
    pub(crate) fn abandon(&self) {
        if let DataFile::Paged(file) = self.data {
            self.cache.unregister_file(file);
        }
        self.cache.unregister_file(self.index);
        self.refs.lock().status = TableState::Closed;
    }
}

impl fmt::Debug for Share {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let refs = self.refs.lock();
        f.debug_struct("Share")
            .field("name", &self.name)
            .field("table_id", &self.table_id)
            .field("status", &refs.status)
            .field("handles", &refs.handles)
            .field("writer", &refs.writer)
            .field("pins", &refs.pins)
            .finish()
    }
}
