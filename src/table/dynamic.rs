//! DYNAMIC row format
//!
//! The data file is a sequence of variable blocks,
//! `[flag u8][block length u32][data length u32][data]`, addressed by byte
//! offset. Deleted blocks keep the offset of the next free block in their
//! first eight data bytes. Inserts take the first free block that is large
//! enough and split off the remainder when it can hold a block of its own.

use std::fs::{File, OpenOptions};
use std::os::unix::fs::FileExt;
use std::path::Path;

use super::errors::{TableError, TableResult};
use super::header::{TableHeader, NO_FREE};
use super::RowId;

const LIVE: u8 = 1;
const DELETED: u8 = 2;
const BLOCK_HEADER_SIZE: u64 = 9;
const LINK_SIZE: u64 = 8;
const MIN_BLOCK: u64 = BLOCK_HEADER_SIZE + LINK_SIZE;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct BlockHeader {
    flag: u8,
    block_len: u64,
    data_len: u64,
}

#[derive(Debug)]
pub struct DynamicFile {
    file: File,
}

/// What `repair` found
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DynamicRepair {
    pub rows: u64,
    pub free_blocks: u64,
    pub merged_blocks: u64,
    pub truncated_bytes: u64,
}

fn block_size_for(len: usize) -> u64 {
    (BLOCK_HEADER_SIZE + len as u64).max(MIN_BLOCK)
}

impl DynamicFile {
    pub fn open(path: &Path, read_only: bool) -> TableResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(!read_only)
            .create(!read_only)
            .open(path)
            .map_err(|e| TableError::io(format!("cannot open {}", path.display()), e))?;
        Ok(Self { file })
    }

    fn read_header(&self, offset: u64) -> TableResult<BlockHeader> {
        let mut buf = [0u8; BLOCK_HEADER_SIZE as usize];
        self.file
            .read_exact_at(&mut buf, offset)
            .map_err(|e| TableError::io(format!("cannot read block at {}", offset), e))?;
        Ok(BlockHeader {
            flag: buf[0],
            block_len: u32::from_le_bytes([buf[1], buf[2], buf[3], buf[4]]) as u64,
            data_len: u32::from_le_bytes([buf[5], buf[6], buf[7], buf[8]]) as u64,
        })
    }

    fn write_block(&self, offset: u64, header: BlockHeader, data: &[u8]) -> TableResult<()> {
        let mut buf = Vec::with_capacity(BLOCK_HEADER_SIZE as usize + data.len());
        buf.push(header.flag);
        buf.extend_from_slice(&(header.block_len as u32).to_le_bytes());
        buf.extend_from_slice(&(header.data_len as u32).to_le_bytes());
        buf.extend_from_slice(data);
        self.file
            .write_all_at(&buf, offset)
            .map_err(|e| TableError::io(format!("cannot write block at {}", offset), e))
    }

    fn write_free(&self, offset: u64, block_len: u64, next: u64) -> TableResult<()> {
        let header = BlockHeader {
            flag: DELETED,
            block_len,
            data_len: 0,
        };
        self.write_block(offset, header, &next.to_le_bytes())
    }

    fn read_link(&self, offset: u64) -> TableResult<u64> {
        let mut buf = [0u8; LINK_SIZE as usize];
        self.file
            .read_exact_at(&mut buf, offset + BLOCK_HEADER_SIZE)
            .map_err(|e| TableError::io(format!("cannot read free link at {}", offset), e))?;
        Ok(u64::from_le_bytes(buf))
    }

    fn valid_block(&self, table: &TableHeader, offset: u64) -> TableResult<BlockHeader> {
        if offset + BLOCK_HEADER_SIZE > table.data_file_length {
            return Err(TableError::corrupt(format!("block offset {} past end of data", offset)));
        }
        let header = self.read_header(offset)?;
        if header.block_len < MIN_BLOCK
            || offset + header.block_len > table.data_file_length
            || BLOCK_HEADER_SIZE + header.data_len > header.block_len
        {
            return Err(TableError::corrupt(format!("bad block header at {}", offset)));
        }
        Ok(header)
    }

    pub fn insert(&self, table: &mut TableHeader, row: &[u8]) -> TableResult<RowId> {
        if row.len() > u32::MAX as usize - BLOCK_HEADER_SIZE as usize {
            return Err(TableError::invalid_row("row too long for a DYNAMIC block"));
        }
        let need = block_size_for(row.len());
        let mut prev: Option<u64> = None;
        let mut cur = table.free_head;
        let mut hops = 0u64;
        while cur != NO_FREE {
            hops += 1;
            if hops > table.data_file_length / MIN_BLOCK + 1 {
                return Err(TableError::corrupt("free chain loops"));
            }
            let block = self.valid_block(table, cur)?;
            if block.flag != DELETED {
                return Err(TableError::corrupt(format!("free chain points at live block {}", cur)));
            }
            let next = self.read_link(cur)?;
            if block.block_len < need {
                prev = Some(cur);
                cur = next;
                continue;
            }

            // Unlink, then split off the remainder if it is big enough
            let mut follow = next;
            let mut used_len = block.block_len;
            if block.block_len - need >= MIN_BLOCK {
                let rest = cur + need;
                self.write_free(rest, block.block_len - need, next)?;
                follow = rest;
                used_len = need;
            }
            match prev {
                Some(p) => self.write_free(p, self.read_header(p)?.block_len, follow)?,
                None => table.free_head = follow,
            }
            self.write_live(cur, used_len, row)?;
            table.row_count += 1;
            return Ok(RowId::from_raw(cur));
        }

        let offset = table.data_file_length;
        self.write_live(offset, need, row)?;
        table.data_file_length = offset + need;
        table.row_count += 1;
        Ok(RowId::from_raw(offset))
    }

    fn write_live(&self, offset: u64, block_len: u64, row: &[u8]) -> TableResult<()> {
        let header = BlockHeader {
            flag: LIVE,
            block_len,
            data_len: row.len() as u64,
        };
        self.write_block(offset, header, row)
    }

    pub fn read(&self, table: &TableHeader, rowid: RowId) -> TableResult<Vec<u8>> {
        let offset = rowid.raw();
        let block = match self.valid_block(table, offset) {
            Ok(block) if block.flag == LIVE => block,
            Ok(_) => return Err(TableError::row_not_found(rowid)),
            Err(e) if e.is_corruption() => return Err(TableError::row_not_found(rowid)),
            Err(e) => return Err(e),
        };
        let mut data = vec![0u8; block.data_len as usize];
        self.file
            .read_exact_at(&mut data, offset + BLOCK_HEADER_SIZE)
            .map_err(|e| TableError::io(format!("cannot read row at {}", offset), e))?;
        Ok(data)
    }

    /// Rewrite a row. It stays in place when its block is large enough and
    /// moves otherwise; returns the row's id afterwards and the old row.
    pub fn update(
        &self,
        table: &mut TableHeader,
        rowid: RowId,
        row: &[u8],
    ) -> TableResult<(RowId, Vec<u8>)> {
        let old = self.read(table, rowid)?;
        let block = self.read_header(rowid.raw())?;
        if BLOCK_HEADER_SIZE + row.len() as u64 <= block.block_len {
            self.write_live(rowid.raw(), block.block_len, row)?;
            return Ok((rowid, old));
        }
        self.delete(table, rowid)?;
        let moved = self.insert(table, row)?;
        Ok((moved, old))
    }

    /// Returns the old row
    pub fn delete(&self, table: &mut TableHeader, rowid: RowId) -> TableResult<Vec<u8>> {
        let old = self.read(table, rowid)?;
        let block = self.read_header(rowid.raw())?;
        self.write_free(rowid.raw(), block.block_len, table.free_head)?;
        table.free_head = rowid.raw();
        table.row_count = table.row_count.saturating_sub(1);
        Ok(old)
    }

    pub fn scan(&self, table: &TableHeader) -> TableResult<Vec<(RowId, Vec<u8>)>> {
        let mut rows = Vec::new();
        let mut offset = 0;
        while offset < table.data_file_length {
            let block = self.valid_block(table, offset)?;
            if block.flag == LIVE {
                let id = RowId::from_raw(offset);
                rows.push((id, self.read(table, id)?));
            }
            offset += block.block_len;
        }
        Ok(rows)
    }

    /// Walk the file, cut it at the first unreadable block, merge runs of
    /// free blocks and rebuild the free chain and row count
    pub fn repair(&self, table: &mut TableHeader) -> TableResult<DynamicRepair> {
        let file_len = self
            .file
            .metadata()
            .map_err(|e| TableError::io("cannot stat data file", e))?
            .len();
        let mut report = DynamicRepair::default();
        let mut blocks: Vec<(u64, BlockHeader)> = Vec::new();
        let mut offset = 0;
        while offset + BLOCK_HEADER_SIZE <= file_len {
            let block = self.read_header(offset)?;
            let sane = matches!(block.flag, LIVE | DELETED)
                && block.block_len >= MIN_BLOCK
                && offset + block.block_len <= file_len
                && BLOCK_HEADER_SIZE + block.data_len <= block.block_len;
            if !sane {
                break;
            }
            blocks.push((offset, block));
            offset += block.block_len;
        }
        report.truncated_bytes = file_len - offset;
        self.file
            .set_len(offset)
            .map_err(|e| TableError::io("cannot trim data file", e))?;
        table.data_file_length = offset;

        let mut free_head = NO_FREE;
        let mut run: Option<(u64, u64)> = None;
        let flush_run = |run: &mut Option<(u64, u64)>, free_head: &mut u64| -> TableResult<()> {
            if let Some((start, len)) = run.take() {
                self.write_free(start, len, *free_head)?;
                *free_head = start;
            }
            Ok(())
        };
        for (offset, block) in blocks {
            if block.flag == LIVE {
                report.rows += 1;
                flush_run(&mut run, &mut free_head)?;
                continue;
            }
            run = match run {
                Some((start, len)) => {
                    report.merged_blocks += 1;
                    Some((start, len + block.block_len))
                }
                None => {
                    report.free_blocks += 1;
                    Some((offset, block.block_len))
                }
            };
        }
        flush_run(&mut run, &mut free_head)?;
        table.free_head = free_head;
        table.row_count = report.rows;
        self.sync()?;
        Ok(report)
    }

    pub fn sync(&self) -> TableResult<()> {
        self.file
            .sync_data()
            .map_err(|e| TableError::io("cannot sync data file", e))
    }
}
