//! BLOCK_RECORD row storage
//!
//! A row starts with a head fragment in a directory slot of a head page;
//! the head's address is the row id. The head fragment is
//! `[flags u8][total length u32 LE][next RowPtr]` followed by the bytes
//! stored inline. Rows that do not fit inline continue in a chain of full
//! pages (blob pages for long extents) and may end with a tail fragment in
//! a tail page. Each full page names the next piece in its header.
//!
//! Every change is planned first as a list of [`PageOp`]s with their
//! inverses, then applied. Planning only reads pages, so a plan can be
//! logged before anything changes; applying is also what redo and undo
//! run. Bitmap pages are kept in step after every apply.

use std::collections::{BTreeSet, HashSet};

use super::errors::{TableError, TableResult};
use super::RowId;
use crate::lsn::Lsn;
use crate::page::{
    bitmap_for, format_page, full_capacity, is_bitmap_page, max_fragment_len, page_lsn,
    page_type, pages_per_bitmap, BitmapPage, DirectoryPage, FullPage, Fullness, PageNo, PageType,
    RowPtr,
};
use crate::pagecache::{FileId, PageCache};
use crate::wal::PageOp;

pub const HEAD_HEADER_SIZE: usize = 11;

const FLAG_CHAINED: u8 = 0x01;

/// Rows needing this many full pages get a contiguous blob extent
const BLOB_EXTENT_PAGES: usize = 4;

/// A planned change: where the row's head lives, the page operations that
/// make the change and the operations that revert it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowPlacement {
    pub head: RowPtr,
    pub redo: Vec<PageOp>,
    pub undo: Vec<PageOp>,
}

impl RowPlacement {
    fn from_pairs(head: RowPtr, pairs: Vec<(PageOp, PageOp)>) -> Self {
        let mut redo = Vec::with_capacity(pairs.len());
        let mut undo = Vec::with_capacity(pairs.len());
        for (forward, inverse) in pairs {
            redo.push(forward);
            undo.push(inverse);
        }
        undo.reverse();
        Self { head, redo, undo }
    }
}

/// How applied operations are filtered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyMode {
    /// Apply everything
    Runtime,
    /// Skip pages whose LSN shows the change is already there
    Redo,
}

#[derive(Debug, Clone)]
enum Piece {
    Fragment {
        page: PageNo,
        slot: u16,
        kind: PageType,
        bytes: Vec<u8>,
    },
    Full {
        page: PageNo,
        kind: PageType,
        next: RowPtr,
        bytes: Vec<u8>,
    },
}

impl Piece {
    fn page(&self) -> PageNo {
        match self {
            Piece::Fragment { page, .. } | Piece::Full { page, .. } => *page,
        }
    }

    fn removal(&self) -> (PageOp, PageOp) {
        match self.clone() {
            Piece::Fragment {
                page,
                slot,
                kind,
                bytes,
            } => (
                PageOp::DeleteFragment { page, slot },
                PageOp::InsertFragment {
                    page,
                    slot,
                    kind,
                    init: false,
                    bytes,
                },
            ),
            Piece::Full {
                page,
                kind,
                next,
                bytes,
            } => (
                PageOp::FreePage { page },
                PageOp::WriteFullPage {
                    page,
                    kind,
                    next,
                    bytes,
                },
            ),
        }
    }
}

#[derive(Debug)]
struct Chain {
    pieces: Vec<Piece>,
    row: Vec<u8>,
}

/// Where the planner may put a head fragment
#[derive(Debug, Clone, Copy)]
enum HeadTarget {
    Anywhere,
    /// Keep the row id; `avail` bytes are free there once the old head is gone
    At { ptr: RowPtr, avail: usize },
}

fn encode_head(total: usize, next: RowPtr, inline: &[u8]) -> Vec<u8> {
    let mut out = vec![0u8; HEAD_HEADER_SIZE];
    out[0] = if next.is_none() { 0 } else { FLAG_CHAINED };
    out[1..5].copy_from_slice(&(total as u32).to_le_bytes());
    next.write_at(&mut out, 5);
    out.extend_from_slice(inline);
    out
}

fn decode_head(fragment: &[u8]) -> TableResult<(usize, RowPtr, &[u8])> {
    if fragment.len() < HEAD_HEADER_SIZE {
        return Err(TableError::corrupt("head fragment shorter than its header"));
    }
    let total = u32::from_le_bytes([fragment[1], fragment[2], fragment[3], fragment[4]]) as usize;
    let next = RowPtr::read_at(fragment, 5);
    Ok((total, next, &fragment[HEAD_HEADER_SIZE..]))
}

/// One BLOCK_RECORD data file, seen through the page cache
#[derive(Debug, Clone, Copy)]
pub struct BlockRecordFile<'a> {
    cache: &'a PageCache,
    file: FileId,
    block_size: usize,
}

impl<'a> BlockRecordFile<'a> {
    pub fn new(cache: &'a PageCache, file: FileId, block_size: usize) -> Self {
        Self {
            cache,
            file,
            block_size,
        }
    }

    fn max_fragment(&self) -> usize {
        max_fragment_len(self.block_size)
    }

    /// Inline bytes a long row keeps in its head
    fn long_row_inline(&self) -> usize {
        (self.block_size / 8).min(self.max_fragment() - HEAD_HEADER_SIZE)
    }

    fn next_free_page(&self, data_pages: &mut PageNo) -> PageNo {
        let mut page = *data_pages;
        while is_bitmap_page(page, self.block_size) {
            page += 1;
        }
        *data_pages = page + 1;
        page
    }

    /// Candidate pages the bitmaps say could take a fragment of `kind`
    fn candidates(&self, kind: PageType, data_pages: PageNo) -> TableResult<Vec<PageNo>> {
        let span = pages_per_bitmap(self.block_size) + 1;
        let mut out = Vec::new();
        let mut bitmap = 0;
        while bitmap < data_pages {
            let guard = self.cache.read(self.file, bitmap)?;
            if page_type(&guard) == Some(PageType::Bitmap) {
                let view = BitmapPage::new(&guard[..]);
                out.extend(
                    view.entries(bitmap, data_pages)
                        .into_iter()
                        .filter(|(_, code)| code.accepts(kind))
                        .map(|(page, _)| page),
                );
            }
            bitmap += span;
        }
        Ok(out)
    }

    /// A slot for a `len`-byte fragment of `kind`: `(page, slot, init)`
    fn find_slot(
        &self,
        kind: PageType,
        len: usize,
        claimed: &mut HashSet<PageNo>,
        data_pages: &mut PageNo,
    ) -> TableResult<(PageNo, u16, bool)> {
        for page in self.candidates(kind, *data_pages)? {
            if claimed.contains(&page) {
                continue;
            }
            let guard = self.cache.read(self.file, page)?;
            let found = match page_type(&guard) {
                Some(t) if t == kind => {
                    let dir = DirectoryPage::new(&guard[..]);
                    let slot = dir.first_free_slot();
                    if dir.can_insert(slot, len) {
                        Some((slot, false))
                    } else if dir.live_count() == 0 {
                        Some((0, true))
                    } else {
                        None
                    }
                }
                Some(PageType::Head) | Some(PageType::Tail) => {
                    (DirectoryPage::new(&guard[..]).live_count() == 0).then_some((0, true))
                }
                Some(PageType::Unallocated) | None => Some((0, true)),
                Some(_) => None,
            };
            if let Some((slot, init)) = found {
                claimed.insert(page);
                return Ok((page, slot, init));
            }
        }
        let page = self.next_free_page(data_pages);
        claimed.insert(page);
        Ok((page, 0, true))
    }

    /// An empty page for a full page of row data
    fn find_empty_page(
        &self,
        claimed: &mut HashSet<PageNo>,
        data_pages: &mut PageNo,
    ) -> TableResult<PageNo> {
        for page in self.candidates(PageType::Full, *data_pages)? {
            if claimed.contains(&page) {
                continue;
            }
            let guard = self.cache.read(self.file, page)?;
            let empty = match page_type(&guard) {
                Some(PageType::Unallocated) | None => true,
                Some(PageType::Head) | Some(PageType::Tail) => {
                    DirectoryPage::new(&guard[..]).live_count() == 0
                }
                Some(_) => false,
            };
            if empty {
                claimed.insert(page);
                return Ok(page);
            }
        }
        let page = self.next_free_page(data_pages);
        claimed.insert(page);
        Ok(page)
    }

    /// Place the non-inline part of a row; returns the chain's first piece
    fn place_rest(
        &self,
        rest: &[u8],
        claimed: &mut HashSet<PageNo>,
        data_pages: &mut PageNo,
        pairs: &mut Vec<(PageOp, PageOp)>,
    ) -> TableResult<RowPtr> {
        if rest.is_empty() {
            return Ok(RowPtr::NONE);
        }
        let full_cap = full_capacity(self.block_size);
        let mut tail_len = rest.len() % full_cap;
        if tail_len > self.max_fragment() {
            tail_len = 0;
        }
        let (body, tail) = rest.split_at(rest.len() - tail_len);
        let chunks: Vec<&[u8]> = body.chunks(full_cap).collect();

        let (kind, pages) = if chunks.len() >= BLOB_EXTENT_PAGES {
            let pages: Vec<PageNo> = (0..chunks.len())
                .map(|_| {
                    let page = self.next_free_page(data_pages);
                    claimed.insert(page);
                    page
                })
                .collect();
            (PageType::Blob, pages)
        } else {
            let mut pages = Vec::with_capacity(chunks.len());
            for _ in 0..chunks.len() {
                pages.push(self.find_empty_page(claimed, data_pages)?);
            }
            (PageType::Full, pages)
        };

        let tail_ptr = if tail.is_empty() {
            RowPtr::NONE
        } else {
            let (page, slot, init) = self.find_slot(PageType::Tail, tail.len(), claimed, data_pages)?;
            pairs.push((
                PageOp::InsertFragment {
                    page,
                    slot,
                    kind: PageType::Tail,
                    init,
                    bytes: tail.to_vec(),
                },
                PageOp::DeleteFragment { page, slot },
            ));
            RowPtr::new(page, slot)
        };

        for (i, chunk) in chunks.iter().enumerate().rev() {
            let next = match pages.get(i + 1) {
                Some(page) => RowPtr::new(*page, 0),
                None => tail_ptr,
            };
            pairs.push((
                PageOp::WriteFullPage {
                    page: pages[i],
                    kind,
                    next,
                    bytes: chunk.to_vec(),
                },
                PageOp::FreePage { page: pages[i] },
            ));
        }
        Ok(match pages.first() {
            Some(page) => RowPtr::new(*page, 0),
            None => tail_ptr,
        })
    }

    fn place_row(
        &self,
        row: &[u8],
        target: HeadTarget,
        claimed: &mut HashSet<PageNo>,
        data_pages: &mut PageNo,
        pairs: &mut Vec<(PageOp, PageOp)>,
    ) -> TableResult<RowPtr> {
        let max_inline = match target {
            HeadTarget::Anywhere => self.max_fragment() - HEAD_HEADER_SIZE,
            HeadTarget::At { avail, .. } => {
                avail.min(self.max_fragment()).saturating_sub(HEAD_HEADER_SIZE)
            }
        };
        let inline = if row.len() <= max_inline {
            row.len()
        } else {
            self.long_row_inline().min(max_inline)
        };
        let next = self.place_rest(&row[inline..], claimed, data_pages, pairs)?;
        let fragment = encode_head(row.len(), next, &row[..inline]);
        let (page, slot, init) = match target {
            HeadTarget::Anywhere => {
                self.find_slot(PageType::Head, fragment.len(), claimed, data_pages)?
            }
            HeadTarget::At { ptr, .. } => (ptr.page, ptr.slot, false),
        };
        pairs.push((
            PageOp::InsertFragment {
                page,
                slot,
                kind: PageType::Head,
                init,
                bytes: fragment,
            },
            PageOp::DeleteFragment { page, slot },
        ));
        Ok(RowPtr::new(page, slot))
    }

    pub fn plan_insert(&self, row: &[u8], data_pages: &mut PageNo) -> TableResult<RowPlacement> {
        let mut claimed = HashSet::new();
        let mut pairs = Vec::new();
        let head = self.place_row(row, HeadTarget::Anywhere, &mut claimed, data_pages, &mut pairs)?;
        Ok(RowPlacement::from_pairs(head, pairs))
    }

    /// Replace a row in place; the row id does not change. Also returns
    /// the old row.
    pub fn plan_update(
        &self,
        rowid: RowId,
        row: &[u8],
        data_pages: &mut PageNo,
    ) -> TableResult<(RowPlacement, Vec<u8>)> {
        let chain = self.chain(rowid)?;
        let ptr = rowid.ptr();
        let old_head_len = match chain.pieces.first() {
            Some(Piece::Fragment { bytes, .. }) => bytes.len(),
            _ => return Err(TableError::corrupt(format!("row {} has no head", rowid))),
        };
        let free = {
            let guard = self.cache.read(self.file, ptr.page)?;
            DirectoryPage::new(&guard[..]).free_space()
        };

        let mut claimed: HashSet<PageNo> = chain.pieces.iter().map(Piece::page).collect();
        let mut pairs: Vec<(PageOp, PageOp)> = chain.pieces.iter().map(Piece::removal).collect();
        self.place_row(
            row,
            HeadTarget::At {
                ptr,
                avail: free + old_head_len,
            },
            &mut claimed,
            data_pages,
            &mut pairs,
        )?;
        Ok((RowPlacement::from_pairs(ptr, pairs), chain.row))
    }

    /// Remove a row; also returns the old row
    pub fn plan_delete(&self, rowid: RowId) -> TableResult<(RowPlacement, Vec<u8>)> {
        let chain = self.chain(rowid)?;
        let pairs = chain.pieces.iter().map(Piece::removal).collect();
        Ok((RowPlacement::from_pairs(rowid.ptr(), pairs), chain.row))
    }

    fn chain(&self, rowid: RowId) -> TableResult<Chain> {
        let ptr = rowid.ptr();
        if ptr.is_none() || is_bitmap_page(ptr.page, self.block_size) {
            return Err(TableError::row_not_found(rowid));
        }
        let (total, mut next, mut row, head) = {
            let guard = self.cache.read(self.file, ptr.page)?;
            if page_type(&guard) != Some(PageType::Head) {
                return Err(TableError::row_not_found(rowid));
            }
            let dir = DirectoryPage::new(&guard[..]);
            let fragment = dir
                .fragment(ptr.slot)
                .ok_or_else(|| TableError::row_not_found(rowid))?;
            let (total, next, inline) = decode_head(fragment)?;
            let head = Piece::Fragment {
                page: ptr.page,
                slot: ptr.slot,
                kind: PageType::Head,
                bytes: fragment.to_vec(),
            };
            (total, next, inline.to_vec(), head)
        };
        let mut pieces = vec![head];

        while !next.is_none() {
            if row.len() >= total {
                return Err(TableError::corrupt(format!("row {} chain runs past its length", rowid)));
            }
            let guard = self.cache.read(self.file, next.page)?;
            match page_type(&guard) {
                Some(kind @ (PageType::Full | PageType::Blob)) => {
                    let full = FullPage::new(&guard[..]);
                    if full.used() == 0 {
                        return Err(TableError::corrupt(format!(
                            "row {} continues into empty page {}",
                            rowid, next.page
                        )));
                    }
                    row.extend_from_slice(full.data());
                    pieces.push(Piece::Full {
                        page: next.page,
                        kind,
                        next: full.next(),
                        bytes: full.data().to_vec(),
                    });
                    next = full.next();
                }
                Some(PageType::Tail) => {
                    let dir = DirectoryPage::new(&guard[..]);
                    let fragment = dir.fragment(next.slot).ok_or_else(|| {
                        TableError::corrupt(format!("row {} tail {} is missing", rowid, next))
                    })?;
                    row.extend_from_slice(fragment);
                    pieces.push(Piece::Fragment {
                        page: next.page,
                        slot: next.slot,
                        kind: PageType::Tail,
                        bytes: fragment.to_vec(),
                    });
                    next = RowPtr::NONE;
                }
                other => {
                    return Err(TableError::corrupt(format!(
                        "row {} continues into page {} of type {:?}",
                        rowid, next.page, other
                    )))
                }
            }
        }
        if row.len() != total {
            return Err(TableError::corrupt(format!(
                "row {} has {} bytes, header says {}",
                rowid,
                row.len(),
                total
            )));
        }
        Ok(Chain { pieces, row })
    }

    pub fn read_row(&self, rowid: RowId) -> TableResult<Vec<u8>> {
        Ok(self.chain(rowid)?.row)
    }

    /// Row ids of every head fragment, in page and slot order
    pub fn row_ids(&self, data_pages: PageNo) -> TableResult<Vec<RowId>> {
        let mut ids = Vec::new();
        for page in 1..data_pages {
            if is_bitmap_page(page, self.block_size) {
                continue;
            }
            let guard = self.cache.read(self.file, page)?;
            if page_type(&guard) == Some(PageType::Head) {
                let dir = DirectoryPage::new(&guard[..]);
                ids.extend(
                    dir.live_slots()
                        .into_iter()
                        .map(|slot| RowId::from_ptr(RowPtr::new(page, slot))),
                );
            }
        }
        Ok(ids)
    }

    pub fn scan(&self, data_pages: PageNo) -> TableResult<Vec<(RowId, Vec<u8>)>> {
        self.row_ids(data_pages)?
            .into_iter()
            .map(|id| Ok((id, self.read_row(id)?)))
            .collect()
    }

    /// Apply `ops` logged at `lsn`. Returns the pages that changed.
    ///
    /// In redo mode the decision is made once per page, before the first
    /// op on it stamps the page with `lsn`.
    pub fn apply(&self, ops: &[PageOp], lsn: Lsn, mode: ApplyMode) -> TableResult<Vec<PageNo>> {
        let mut decided: Vec<(PageNo, bool)> = Vec::new();
        for op in ops {
            let page = op.page();
            if is_bitmap_page(page, self.block_size) {
                return Err(TableError::corrupt(format!("row change targets bitmap page {}", page)));
            }
            let mut guard = self.cache.write(self.file, page)?;
            let apply = match decided.iter().find(|(p, _)| *p == page) {
                Some((_, apply)) => *apply,
                None => {
                    let apply = mode == ApplyMode::Runtime || page_lsn(&guard) < lsn;
                    decided.push((page, apply));
                    apply
                }
            };
            if apply {
                apply_op(&mut guard[..], op)?;
                guard.mark_dirty(lsn);
            }
        }
        let touched: Vec<PageNo> = decided
            .into_iter()
            .filter(|(_, apply)| *apply)
            .map(|(page, _)| page)
            .collect();
        for page in &touched {
            self.refresh_bitmap(*page, lsn)?;
        }
        Ok(touched)
    }

    fn refresh_bitmap(&self, page: PageNo, lsn: Lsn) -> TableResult<()> {
        let code = {
            let guard = self.cache.read(self.file, page)?;
            Fullness::of_page(&guard)
        };
        let bitmap = bitmap_for(page, self.block_size);
        let mut guard = self.cache.write(self.file, bitmap)?;
        let formatted = page_type(&guard) == Some(PageType::Bitmap);
        {
            let mut view = BitmapPage::new(&mut guard[..]);
            if !formatted {
                view.init().map_err(TableError::corrupt)?;
            }
            view.set(page, bitmap, code);
        }
        guard.mark_dirty(lsn);
        Ok(())
    }

    /// Recompute every bitmap page from the data pages
    pub fn rebuild_bitmaps(&self, data_pages: PageNo, lsn: Lsn) -> TableResult<()> {
        let span = pages_per_bitmap(self.block_size) + 1;
        let mut bitmap = 0;
        while bitmap < data_pages.max(1) {
            let last = (bitmap + span).min(data_pages);
            let mut codes = Vec::new();
            for page in bitmap + 1..last {
                let guard = self.cache.read(self.file, page)?;
                codes.push((page, Fullness::of_page(&guard)));
            }
            let mut guard = self.cache.write(self.file, bitmap)?;
            {
                let mut view = BitmapPage::new(&mut guard[..]);
                view.init().map_err(TableError::corrupt)?;
                for (page, code) in codes {
                    view.set(page, bitmap, code);
                }
            }
            guard.mark_dirty(lsn);
            bitmap += span;
        }
        Ok(())
    }

    /// Pages the bitmaps and page contents disagree about
    pub fn check_bitmaps(&self, data_pages: PageNo) -> TableResult<Vec<PageNo>> {
        let mut wrong = BTreeSet::new();
        for page in 1..data_pages {
            if is_bitmap_page(page, self.block_size) {
                continue;
            }
            let actual = {
                let guard = self.cache.read(self.file, page)?;
                Fullness::of_page(&guard)
            };
            let bitmap = bitmap_for(page, self.block_size);
            let guard = self.cache.read(self.file, bitmap)?;
            let recorded = if page_type(&guard) == Some(PageType::Bitmap) {
                BitmapPage::new(&guard[..]).get(page, bitmap)
            } else {
                Fullness::Empty
            };
            if recorded != actual {
                wrong.insert(page);
            }
        }
        Ok(wrong.into_iter().collect())
    }
}

fn apply_op(page: &mut [u8], op: &PageOp) -> TableResult<()> {
    match op {
        PageOp::InsertFragment {
            slot,
            kind,
            init,
            bytes,
            ..
        } => {
            if *init || page_type(page) != Some(*kind) {
                format_page(page, *kind);
            }
            DirectoryPage::new(page)
                .insert_at(*slot, bytes)
                .map_err(|e| TableError::corrupt(format!("{}: {}", op, e)))
        }
        PageOp::DeleteFragment { slot, .. } => {
            if !matches!(page_type(page), Some(PageType::Head | PageType::Tail)) {
                return Err(TableError::corrupt(format!("{}: not a directory page", op)));
            }
            DirectoryPage::new(page)
                .delete(*slot)
                .map(|_| ())
                .map_err(|e| TableError::corrupt(format!("{}: {}", op, e)))
        }
        PageOp::WriteFullPage {
            kind, next, bytes, ..
        } => FullPage::new(page)
            .write(*kind, *next, bytes)
            .map_err(|e| TableError::corrupt(format!("{}: {}", op, e))),
        PageOp::FreePage { .. } => {
            format_page(page, PageType::Unallocated);
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hooks::Pipeline;
    use crate::observability::MetricsRegistry;
    use crate::pagecache::FileBlockStore;
    use std::sync::Arc;
    use tempfile::TempDir;

    const BS: usize = 1024;

    fn setup(dir: &TempDir) -> (PageCache, FileId) {
        let cache = PageCache::new(64, None, Arc::new(MetricsRegistry::new()));
        let store = FileBlockStore::open(&dir.path().join("t.ard"), BS).unwrap();
        let file = cache
            .register_file("t.ard", Arc::new(store), Arc::new(Pipeline::standard(false, None)), BS)
            .unwrap();
        (cache, file)
    }

    fn insert(data: &BlockRecordFile<'_>, row: &[u8], pages: &mut PageNo, lsn: Lsn) -> RowId {
        let plan = data.plan_insert(row, pages).unwrap();
        data.apply(&plan.redo, lsn, ApplyMode::Runtime).unwrap();
        RowId::from_ptr(plan.head)
    }

    fn row(len: usize, seed: u8) -> Vec<u8> {
        (0..len).map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed)).collect()
    }

    #[test]
    fn test_small_rows_share_a_head_page() {
        let dir = TempDir::new().unwrap();
        let (cache, file) = setup(&dir);
        let data = BlockRecordFile::new(&cache, file, BS);
        let mut pages = 0;
        let a = insert(&data, b"alpha", &mut pages, Lsn::new(1, 100));
        let b = insert(&data, b"beta", &mut pages, Lsn::new(1, 200));
        assert_eq!(a.ptr().page, 1);
        assert_eq!(b.ptr().page, 1);
        assert_ne!(a, b);
        assert_eq!(pages, 2);
        assert_eq!(data.read_row(a).unwrap(), b"alpha");
        assert_eq!(data.read_row(b).unwrap(), b"beta");
        assert!(data.check_bitmaps(pages).unwrap().is_empty());
    }

    #[test]
    fn test_long_rows_chain_and_read_back() {
        let dir = TempDir::new().unwrap();
        let (cache, file) = setup(&dir);
        let data = BlockRecordFile::new(&cache, file, BS);
        let mut pages = 0;
        // One full page plus a tail fragment
        let medium = row(1500, 1);
        // A blob extent
        let long = row(BS * 6, 2);
        let m = insert(&data, &medium, &mut pages, Lsn::new(1, 100));
        let l = insert(&data, &long, &mut pages, Lsn::new(1, 200));
        assert_eq!(data.read_row(m).unwrap(), medium);
        assert_eq!(data.read_row(l).unwrap(), long);
        let scanned = data.scan(pages).unwrap();
        assert_eq!(scanned.len(), 2);
        assert!(data.check_bitmaps(pages).unwrap().is_empty());
    }

    #[test]
    fn test_undo_reverts_insert_and_delete() {
        let dir = TempDir::new().unwrap();
        let (cache, file) = setup(&dir);
        let data = BlockRecordFile::new(&cache, file, BS);
        let mut pages = 0;
        let long = row(3000, 7);
        let plan = data.plan_insert(&long, &mut pages).unwrap();
        data.apply(&plan.redo, Lsn::new(1, 100), ApplyMode::Runtime).unwrap();
        let id = RowId::from_ptr(plan.head);

        let (delete, old) = data.plan_delete(id).unwrap();
        assert_eq!(old, long);
        data.apply(&delete.redo, Lsn::new(1, 200), ApplyMode::Runtime).unwrap();
        assert!(data.read_row(id).is_err());

        data.apply(&delete.undo, Lsn::new(1, 300), ApplyMode::Runtime).unwrap();
        assert_eq!(data.read_row(id).unwrap(), long);
        data.apply(&plan.undo, Lsn::new(1, 400), ApplyMode::Runtime).unwrap();
        assert!(data.scan(pages).unwrap().is_empty());
        assert!(data.check_bitmaps(pages).unwrap().is_empty());
    }

    #[test]
    fn test_update_keeps_row_id() {
        let dir = TempDir::new().unwrap();
        let (cache, file) = setup(&dir);
        let data = BlockRecordFile::new(&cache, file, BS);
        let mut pages = 0;
        let id = insert(&data, b"short", &mut pages, Lsn::new(1, 100));
        let other = insert(&data, b"neighbour", &mut pages, Lsn::new(1, 150));

        let grown = row(2500, 3);
        let (plan, old) = data.plan_update(id, &grown, &mut pages).unwrap();
        assert_eq!(old, b"short");
        assert_eq!(plan.head, id.ptr());
        data.apply(&plan.redo, Lsn::new(1, 200), ApplyMode::Runtime).unwrap();
        assert_eq!(data.read_row(id).unwrap(), grown);
        assert_eq!(data.read_row(other).unwrap(), b"neighbour");

        data.apply(&plan.undo, Lsn::new(1, 300), ApplyMode::Runtime).unwrap();
        assert_eq!(data.read_row(id).unwrap(), b"short");
    }

    #[test]
    fn test_redo_skips_pages_already_current() {
        let dir = TempDir::new().unwrap();
        let (cache, file) = setup(&dir);
        let data = BlockRecordFile::new(&cache, file, BS);
        let mut pages = 0;
        let plan = data.plan_insert(b"once", &mut pages).unwrap();
        let lsn = Lsn::new(1, 100);
        data.apply(&plan.redo, lsn, ApplyMode::Runtime).unwrap();
        // A second pass at the same LSN must not insert into the used slot
        assert!(data.apply(&plan.redo, lsn, ApplyMode::Redo).unwrap().is_empty());
        assert_eq!(data.scan(pages).unwrap().len(), 1);

        let later = data.plan_insert(b"twice", &mut pages).unwrap();
        let touched = data.apply(&later.redo, Lsn::new(1, 200), ApplyMode::Redo).unwrap();
        assert_eq!(touched, vec![later.head.page]);
    }

    #[test]
    fn test_freed_space_is_reused() {
        let dir = TempDir::new().unwrap();
        let (cache, file) = setup(&dir);
        let data = BlockRecordFile::new(&cache, file, BS);
        let mut pages = 0;
        let ids: Vec<RowId> = (0..6)
            .map(|i| insert(&data, &row(300, i), &mut pages, Lsn::new(1, 100 + i as u32)))
            .collect();
        let before = pages;
        for id in &ids {
            let (plan, _) = data.plan_delete(*id).unwrap();
            data.apply(&plan.redo, Lsn::new(2, 100), ApplyMode::Runtime).unwrap();
        }
        for i in 0..6 {
            insert(&data, &row(300, i), &mut pages, Lsn::new(3, 100 + i as u32));
        }
        assert_eq!(pages, before);
    }
}
