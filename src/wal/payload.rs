//! Payload codecs for the structured record types
//!
//! All integers are little-endian. Byte strings are length-prefixed with a
//! u32. Decoding never panics on short or garbled input; it returns
//! `InvalidData`.

use std::fmt;
use std::io;

use super::record::RecordType;
use crate::lsn::Lsn;
use crate::page::{PageNo, PageType, RowPtr};
use crate::table::RowId;
use crate::trn::TrnId;

/// Short per-log identifier for a table file, bound by a `FileId` record
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TableId(pub u16);

impl fmt::Display for TableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "t{}", self.0)
    }
}

fn invalid(message: impl Into<String>) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, message.into())
}

#[derive(Default)]
struct Encoder {
    buf: Vec<u8>,
}

impl Encoder {
    fn u8(&mut self, v: u8) -> &mut Self {
        self.buf.push(v);
        self
    }
    fn u16(&mut self, v: u16) -> &mut Self {
        self.buf.extend_from_slice(&v.to_le_bytes());
        self
    }
    fn u32(&mut self, v: u32) -> &mut Self {
        self.buf.extend_from_slice(&v.to_le_bytes());
        self
    }
    fn u64(&mut self, v: u64) -> &mut Self {
        self.buf.extend_from_slice(&v.to_le_bytes());
        self
    }
    fn lsn(&mut self, v: Lsn) -> &mut Self {
        self.u64(v.raw())
    }
    fn bytes(&mut self, v: &[u8]) -> &mut Self {
        self.u32(v.len() as u32);
        self.buf.extend_from_slice(v);
        self
    }
    fn opt_bytes(&mut self, v: Option<&[u8]>) -> &mut Self {
        match v {
            Some(b) => self.u8(1).bytes(b),
            None => self.u8(0),
        }
    }
    fn row_ptr(&mut self, v: RowPtr) -> &mut Self {
        self.u32(v.page).u16(v.slot)
    }
    fn finish(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.buf)
    }
}

struct Decoder<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Decoder<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn take(&mut self, n: usize) -> io::Result<&'a [u8]> {
        if self.data.len() - self.pos < n {
            return Err(invalid(format!(
                "payload truncated: need {} bytes at {}, have {}",
                n,
                self.pos,
                self.data.len() - self.pos
            )));
        }
        let slice = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn u8(&mut self) -> io::Result<u8> {
        Ok(self.take(1)?[0])
    }
    fn u16(&mut self) -> io::Result<u16> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }
    fn u32(&mut self) -> io::Result<u32> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }
    fn u64(&mut self) -> io::Result<u64> {
        let b = self.take(8)?;
        let mut a = [0u8; 8];
        a.copy_from_slice(b);
        Ok(u64::from_le_bytes(a))
    }
    fn lsn(&mut self) -> io::Result<Lsn> {
        Ok(Lsn::from_raw(self.u64()?))
    }
    fn bytes(&mut self) -> io::Result<Vec<u8>> {
        let len = self.u32()? as usize;
        Ok(self.take(len)?.to_vec())
    }
    fn opt_bytes(&mut self) -> io::Result<Option<Vec<u8>>> {
        match self.u8()? {
            0 => Ok(None),
            1 => Ok(Some(self.bytes()?)),
            other => Err(invalid(format!("bad option tag {}", other))),
        }
    }
    fn row_ptr(&mut self) -> io::Result<RowPtr> {
        Ok(RowPtr::new(self.u32()?, self.u16()?))
    }
    fn page_type(&mut self) -> io::Result<PageType> {
        let raw = self.u8()?;
        PageType::from_u8(raw).ok_or_else(|| invalid(format!("bad page type {}", raw)))
    }
    /// Element count, bounded by the bytes left so garbage cannot force a
    /// huge allocation
    fn count(&mut self, min_elem: usize) -> io::Result<usize> {
        let n = self.u32()? as usize;
        if n.saturating_mul(min_elem) > self.data.len() - self.pos {
            return Err(invalid(format!("element count {} exceeds payload", n)));
        }
        Ok(n)
    }
    fn finish(&self) -> io::Result<()> {
        if self.pos != self.data.len() {
            return Err(invalid(format!(
                "{} trailing bytes after payload",
                self.data.len() - self.pos
            )));
        }
        Ok(())
    }
}

/// Binds a table id to the table's path (relative to the data directory)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileIdRecord {
    pub table: TableId,
    pub path: String,
}

impl FileIdRecord {
    pub fn serialize(&self) -> Vec<u8> {
        Encoder::default()
            .u16(self.table.0)
            .bytes(self.path.as_bytes())
            .finish()
    }

    pub fn deserialize(data: &[u8]) -> io::Result<Self> {
        let mut d = Decoder::new(data);
        let table = TableId(d.u16()?);
        let path = String::from_utf8(d.bytes()?).map_err(|e| invalid(e.to_string()))?;
        d.finish()?;
        Ok(Self { table, path })
    }
}

/// One physical change to one data page
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageOp {
    /// Put a fragment into a directory slot; `init` formats the page as
    /// `kind` first
    InsertFragment {
        page: PageNo,
        slot: u16,
        kind: PageType,
        init: bool,
        bytes: Vec<u8>,
    },
    DeleteFragment {
        page: PageNo,
        slot: u16,
    },
    /// Replace a whole full or blob page
    WriteFullPage {
        page: PageNo,
        kind: PageType,
        next: RowPtr,
        bytes: Vec<u8>,
    },
    FreePage {
        page: PageNo,
    },
}

const OP_INSERT: u8 = 1;
const OP_DELETE: u8 = 2;
const OP_WRITE_FULL: u8 = 3;
const OP_FREE: u8 = 4;

impl PageOp {
    pub fn page(&self) -> PageNo {
        match self {
            PageOp::InsertFragment { page, .. }
            | PageOp::DeleteFragment { page, .. }
            | PageOp::WriteFullPage { page, .. }
            | PageOp::FreePage { page } => *page,
        }
    }

    fn encode(&self, e: &mut Encoder) {
        match self {
            PageOp::InsertFragment {
                page,
                slot,
                kind,
                init,
                bytes,
            } => {
                e.u8(OP_INSERT)
                    .u32(*page)
                    .u16(*slot)
                    .u8(kind.as_u8())
                    .u8(*init as u8)
                    .bytes(bytes);
            }
            PageOp::DeleteFragment { page, slot } => {
                e.u8(OP_DELETE).u32(*page).u16(*slot);
            }
            PageOp::WriteFullPage {
                page,
                kind,
                next,
                bytes,
            } => {
                e.u8(OP_WRITE_FULL)
                    .u32(*page)
                    .u8(kind.as_u8())
                    .row_ptr(*next)
                    .bytes(bytes);
            }
            PageOp::FreePage { page } => {
                e.u8(OP_FREE).u32(*page);
            }
        }
    }

    fn decode(d: &mut Decoder<'_>) -> io::Result<Self> {
        match d.u8()? {
            OP_INSERT => Ok(PageOp::InsertFragment {
                page: d.u32()?,
                slot: d.u16()?,
                kind: d.page_type()?,
                init: d.u8()? != 0,
                bytes: d.bytes()?,
            }),
            OP_DELETE => Ok(PageOp::DeleteFragment {
                page: d.u32()?,
                slot: d.u16()?,
            }),
            OP_WRITE_FULL => Ok(PageOp::WriteFullPage {
                page: d.u32()?,
                kind: d.page_type()?,
                next: d.row_ptr()?,
                bytes: d.bytes()?,
            }),
            OP_FREE => Ok(PageOp::FreePage { page: d.u32()? }),
            other => Err(invalid(format!("unknown page op {}", other))),
        }
    }
}

impl fmt::Display for PageOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PageOp::InsertFragment {
                page,
                slot,
                kind,
                init,
                bytes,
            } => write!(
                f,
                "insert {} {}:{} len={}{}",
                kind,
                page,
                slot,
                bytes.len(),
                if *init { " init" } else { "" }
            ),
            PageOp::DeleteFragment { page, slot } => write!(f, "delete {}:{}", page, slot),
            PageOp::WriteFullPage {
                page,
                kind,
                next,
                bytes,
            } => write!(f, "write {} {} len={} next={}", kind, page, bytes.len(), next),
            PageOp::FreePage { page } => write!(f, "free {}", page),
        }
    }
}

fn encode_ops(e: &mut Encoder, ops: &[PageOp]) {
    e.u32(ops.len() as u32);
    for op in ops {
        op.encode(e);
    }
}

fn decode_ops(d: &mut Decoder<'_>) -> io::Result<Vec<PageOp>> {
    let n = d.count(5)?;
    let mut ops = Vec::with_capacity(n);
    for _ in 0..n {
        ops.push(PageOp::decode(d)?);
    }
    Ok(ops)
}

/// Combined redo/undo record for one row change
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowRecord {
    pub table: TableId,
    pub rowid: RowId,
    /// The owning transaction's previous undoable record
    pub prev_undo_lsn: Lsn,
    pub redo: Vec<PageOp>,
    /// Applied in order to reverse `redo`
    pub undo: Vec<PageOp>,
    pub key_before: Option<Vec<u8>>,
    pub key_after: Option<Vec<u8>>,
}

impl RowRecord {
    pub fn serialize(&self) -> Vec<u8> {
        let mut e = Encoder::default();
        e.u16(self.table.0)
            .u64(self.rowid.raw())
            .lsn(self.prev_undo_lsn);
        encode_ops(&mut e, &self.redo);
        encode_ops(&mut e, &self.undo);
        e.opt_bytes(self.key_before.as_deref())
            .opt_bytes(self.key_after.as_deref());
        e.finish()
    }

    pub fn deserialize(data: &[u8]) -> io::Result<Self> {
        let mut d = Decoder::new(data);
        let record = Self {
            table: TableId(d.u16()?),
            rowid: RowId::from_raw(d.u64()?),
            prev_undo_lsn: d.lsn()?,
            redo: decode_ops(&mut d)?,
            undo: decode_ops(&mut d)?,
            key_before: d.opt_bytes()?,
            key_after: d.opt_bytes()?,
        };
        d.finish()?;
        Ok(record)
    }
}

/// Compensation record: the page changes that undid one row record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClrRecord {
    pub table: TableId,
    pub rowid: RowId,
    pub undone_lsn: Lsn,
    pub undone_type: RecordType,
    /// Where the transaction's undo continues
    pub undo_next_lsn: Lsn,
    pub ops: Vec<PageOp>,
}

impl ClrRecord {
    pub fn serialize(&self) -> Vec<u8> {
        let mut e = Encoder::default();
        e.u16(self.table.0)
            .u64(self.rowid.raw())
            .lsn(self.undone_lsn)
            .u8(self.undone_type.as_u8())
            .lsn(self.undo_next_lsn);
        encode_ops(&mut e, &self.ops);
        e.finish()
    }

    pub fn deserialize(data: &[u8]) -> io::Result<Self> {
        let mut d = Decoder::new(data);
        let table = TableId(d.u16()?);
        let rowid = RowId::from_raw(d.u64()?);
        let undone_lsn = d.lsn()?;
        let raw_type = d.u8()?;
        let undone_type = RecordType::from_u8(raw_type)
            .ok_or_else(|| invalid(format!("bad undone record type {}", raw_type)))?;
        let record = Self {
            table,
            rowid,
            undone_lsn,
            undone_type,
            undo_next_lsn: d.lsn()?,
            ops: decode_ops(&mut d)?,
        };
        d.finish()?;
        Ok(record)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckpointTrn {
    pub id: TrnId,
    pub first_undo_lsn: Lsn,
    pub undo_lsn: Lsn,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirtyPageEntry {
    pub table: TableId,
    pub page: PageNo,
    pub rec_lsn: Lsn,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckpointTable {
    pub table: TableId,
    pub path: String,
}

/// State captured by one checkpoint
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CheckpointRecord {
    /// Log horizon when the checkpoint started
    pub start_horizon: Lsn,
    pub trns: Vec<CheckpointTrn>,
    pub dirty_pages: Vec<DirtyPageEntry>,
    pub tables: Vec<CheckpointTable>,
    pub max_trid: TrnId,
    pub max_table_id: u16,
}

impl CheckpointRecord {
    pub fn serialize(&self) -> Vec<u8> {
        let mut e = Encoder::default();
        e.lsn(self.start_horizon);
        e.u32(self.trns.len() as u32);
        for trn in &self.trns {
            e.u64(trn.id.raw()).lsn(trn.first_undo_lsn).lsn(trn.undo_lsn);
        }
        e.u32(self.dirty_pages.len() as u32);
        for page in &self.dirty_pages {
            e.u16(page.table.0).u32(page.page).lsn(page.rec_lsn);
        }
        e.u32(self.tables.len() as u32);
        for table in &self.tables {
            e.u16(table.table.0).bytes(table.path.as_bytes());
        }
        e.u64(self.max_trid.raw()).u16(self.max_table_id);
        e.finish()
    }

    pub fn deserialize(data: &[u8]) -> io::Result<Self> {
        let mut d = Decoder::new(data);
        let start_horizon = d.lsn()?;
        let n = d.count(24)?;
        let mut trns = Vec::with_capacity(n);
        for _ in 0..n {
            trns.push(CheckpointTrn {
                id: TrnId::new(d.u64()?),
                first_undo_lsn: d.lsn()?,
                undo_lsn: d.lsn()?,
            });
        }
        let n = d.count(14)?;
        let mut dirty_pages = Vec::with_capacity(n);
        for _ in 0..n {
            dirty_pages.push(DirtyPageEntry {
                table: TableId(d.u16()?),
                page: d.u32()?,
                rec_lsn: d.lsn()?,
            });
        }
        let n = d.count(6)?;
        let mut tables = Vec::with_capacity(n);
        for _ in 0..n {
            let table = TableId(d.u16()?);
            let path = String::from_utf8(d.bytes()?).map_err(|e| invalid(e.to_string()))?;
            tables.push(CheckpointTable { table, path });
        }
        let record = Self {
            start_horizon,
            trns,
            dirty_pages,
            tables,
            max_trid: TrnId::new(d.u64()?),
            max_table_id: d.u16()?,
        };
        d.finish()?;
        Ok(record)
    }

    /// Smallest LSN recovery needs: the start horizon, the oldest dirty
    /// page, and the oldest undo chain
    pub fn min_needed_lsn(&self) -> Lsn {
        let dirty = self.dirty_pages.iter().map(|p| p.rec_lsn);
        let undo = self
            .trns
            .iter()
            .map(|t| t.first_undo_lsn)
            .filter(|l| !l.is_impossible());
        dirty
            .chain(undo)
            .fold(self.start_horizon, |min, lsn| min.min(lsn))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_ops() -> Vec<PageOp> {
        vec![
            PageOp::InsertFragment {
                page: 1,
                slot: 0,
                kind: PageType::Head,
                init: true,
                bytes: b"head".to_vec(),
            },
            PageOp::WriteFullPage {
                page: 2,
                kind: PageType::Full,
                next: RowPtr::new(3, 1),
                bytes: vec![7u8; 40],
            },
            PageOp::DeleteFragment { page: 3, slot: 1 },
            PageOp::FreePage { page: 2 },
        ]
    }

    #[test]
    fn test_row_record_codec() {
        let record = RowRecord {
            table: TableId(4),
            rowid: RowId::from_raw((1 << 16) | 2),
            prev_undo_lsn: Lsn::new(1, 90),
            redo: sample_ops(),
            undo: vec![PageOp::DeleteFragment { page: 1, slot: 0 }],
            key_before: None,
            key_after: Some(b"k1".to_vec()),
        };
        let decoded = RowRecord::deserialize(&record.serialize()).unwrap();
        assert_eq!(decoded, record);
    }

    #[test]
    fn test_truncated_payload_is_invalid_data() {
        let record = ClrRecord {
            table: TableId(1),
            rowid: RowId::from_raw(9),
            undone_lsn: Lsn::new(1, 200),
            undone_type: RecordType::RowInsert,
            undo_next_lsn: Lsn::IMPOSSIBLE,
            ops: sample_ops(),
        };
        let bytes = record.serialize();
        for cut in [0, 1, 10, bytes.len() - 1] {
            let err = ClrRecord::deserialize(&bytes[..cut]).unwrap_err();
            assert_eq!(err.kind(), io::ErrorKind::InvalidData);
        }
    }

    #[test]
    fn test_trailing_bytes_rejected() {
        let mut bytes = FileIdRecord {
            table: TableId(2),
            path: "db/t1".to_string(),
        }
        .serialize();
        bytes.push(0);
        assert!(FileIdRecord::deserialize(&bytes).is_err());
    }

    #[test]
    fn test_huge_count_rejected_without_allocating() {
        let mut bytes = Lsn::new(1, 64).raw().to_le_bytes().to_vec();
        bytes.extend_from_slice(&u32::MAX.to_le_bytes());
        assert!(CheckpointRecord::deserialize(&bytes).is_err());
    }

    #[test]
    fn test_checkpoint_min_needed_lsn() {
        let record = CheckpointRecord {
            start_horizon: Lsn::new(3, 500),
            trns: vec![
                CheckpointTrn {
                    id: TrnId::new(7),
                    first_undo_lsn: Lsn::new(2, 100),
                    undo_lsn: Lsn::new(3, 10),
                },
                CheckpointTrn {
                    id: TrnId::new(8),
                    first_undo_lsn: Lsn::IMPOSSIBLE,
                    undo_lsn: Lsn::IMPOSSIBLE,
                },
            ],
            dirty_pages: vec![DirtyPageEntry {
                table: TableId(1),
                page: 5,
                rec_lsn: Lsn::new(2, 900),
            }],
            tables: vec![CheckpointTable {
                table: TableId(1),
                path: "db/t".to_string(),
            }],
            max_trid: TrnId::new(8),
            max_table_id: 1,
        };
        assert_eq!(record.min_needed_lsn(), Lsn::new(2, 100));
        let decoded = CheckpointRecord::deserialize(&record.serialize()).unwrap();
        assert_eq!(decoded, record);
    }
}
