//! FIXED row format
//!
//! The data file is an array of equal slots, `[flag u8][record]`. A deleted
//! slot keeps the number of the next free slot in its first eight record
//! bytes, so free slots form a LIFO chain headed by `free_head`. Record
//! bodies shorter than eight bytes are padded to fit the link.

use std::fs::{File, OpenOptions};
use std::os::unix::fs::FileExt;
use std::path::Path;

use super::errors::{TableError, TableResult};
use super::header::{TableHeader, NO_FREE};
use super::RowId;

const LIVE: u8 = 1;
const DELETED: u8 = 2;
const LINK_SIZE: usize = 8;

#[derive(Debug)]
pub struct FixedFile {
    file: File,
    reclength: usize,
}

/// What `repair` found
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FixedRepair {
    pub rows: u64,
    pub free_slots: u64,
    pub dropped_slots: u64,
}

impl FixedFile {
    pub fn open(path: &Path, reclength: u32, read_only: bool) -> TableResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(!read_only)
            .create(!read_only)
            .open(path)
            .map_err(|e| TableError::io(format!("cannot open {}", path.display()), e))?;
        Ok(Self {
            file,
            reclength: reclength as usize,
        })
    }

    fn slot_size(&self) -> u64 {
        1 + self.reclength.max(LINK_SIZE) as u64
    }

    fn slot_count(&self, header: &TableHeader) -> u64 {
        header.data_file_length / self.slot_size()
    }

    fn read_slot(&self, slot: u64) -> TableResult<Vec<u8>> {
        let mut buf = vec![0u8; self.slot_size() as usize];
        self.file
            .read_exact_at(&mut buf, slot * self.slot_size())
            .map_err(|e| TableError::io(format!("cannot read record {}", slot), e))?;
        Ok(buf)
    }

    fn write_slot(&self, slot: u64, buf: &[u8]) -> TableResult<()> {
        self.file
            .write_all_at(buf, slot * self.slot_size())
            .map_err(|e| TableError::io(format!("cannot write record {}", slot), e))
    }

    fn live_slot(&self, row: &[u8]) -> Vec<u8> {
        let mut buf = vec![0u8; self.slot_size() as usize];
        buf[0] = LIVE;
        buf[1..1 + row.len()].copy_from_slice(row);
        buf
    }

    fn check_len(&self, row: &[u8]) -> TableResult<()> {
        if row.len() != self.reclength {
            return Err(TableError::invalid_row(format!(
                "FIXED rows are {} bytes, got {}",
                self.reclength,
                row.len()
            )));
        }
        Ok(())
    }

    pub fn insert(&self, header: &mut TableHeader, row: &[u8]) -> TableResult<RowId> {
        self.check_len(row)?;
        let slot = if header.free_head != NO_FREE {
            let slot = header.free_head;
            let old = self.read_slot(slot)?;
            if old[0] != DELETED {
                return Err(TableError::corrupt(format!("free chain points at live record {}", slot)));
            }
            let mut link = [0u8; LINK_SIZE];
            link.copy_from_slice(&old[1..1 + LINK_SIZE]);
            header.free_head = u64::from_le_bytes(link);
            slot
        } else {
            let slot = self.slot_count(header);
            header.data_file_length = (slot + 1) * self.slot_size();
            slot
        };
        self.write_slot(slot, &self.live_slot(row))?;
        header.row_count += 1;
        Ok(RowId::from_raw(slot))
    }

    pub fn read(&self, header: &TableHeader, rowid: RowId) -> TableResult<Vec<u8>> {
        if rowid.raw() >= self.slot_count(header) {
            return Err(TableError::row_not_found(rowid));
        }
        let buf = self.read_slot(rowid.raw())?;
        if buf[0] != LIVE {
            return Err(TableError::row_not_found(rowid));
        }
        Ok(buf[1..1 + self.reclength].to_vec())
    }

    /// Overwrite in place; returns the old row
    pub fn update(&self, header: &TableHeader, rowid: RowId, row: &[u8]) -> TableResult<Vec<u8>> {
        self.check_len(row)?;
        let old = self.read(header, rowid)?;
        self.write_slot(rowid.raw(), &self.live_slot(row))?;
        Ok(old)
    }

    /// Returns the old row
    pub fn delete(&self, header: &mut TableHeader, rowid: RowId) -> TableResult<Vec<u8>> {
        let old = self.read(header, rowid)?;
        let mut buf = vec![0u8; self.slot_size() as usize];
        buf[0] = DELETED;
        buf[1..1 + LINK_SIZE].copy_from_slice(&header.free_head.to_le_bytes());
        self.write_slot(rowid.raw(), &buf)?;
        header.free_head = rowid.raw();
        header.row_count = header.row_count.saturating_sub(1);
        Ok(old)
    }

    pub fn scan(&self, header: &TableHeader) -> TableResult<Vec<(RowId, Vec<u8>)>> {
        let mut rows = Vec::new();
        for slot in 0..self.slot_count(header) {
            let buf = self.read_slot(slot)?;
            if buf[0] == LIVE {
                rows.push((RowId::from_raw(slot), buf[1..1 + self.reclength].to_vec()));
            }
        }
        Ok(rows)
    }

    /// Rebuild the free chain and counters from the file contents. Slots
    /// with an unknown flag and a partial last slot are turned into free
    /// slots.
    pub fn repair(&self, header: &mut TableHeader) -> TableResult<FixedRepair> {
        let len = self
            .file
            .metadata()
            .map_err(|e| TableError::io("cannot stat data file", e))?
            .len();
        let slots = len / self.slot_size();
        header.data_file_length = slots * self.slot_size();
        self.file
            .set_len(header.data_file_length)
            .map_err(|e| TableError::io("cannot trim data file", e))?;

        let mut report = FixedRepair::default();
        let mut free_head = NO_FREE;
        for slot in 0..slots {
            let buf = self.read_slot(slot)?;
            if buf[0] == LIVE {
                report.rows += 1;
                continue;
            }
            if buf[0] != DELETED {
                report.dropped_slots += 1;
            }
            let mut free = vec![0u8; self.slot_size() as usize];
            free[0] = DELETED;
            free[1..1 + LINK_SIZE].copy_from_slice(&free_head.to_le_bytes());
            self.write_slot(slot, &free)?;
            free_head = slot;
            report.free_slots += 1;
        }
        header.free_head = free_head;
        header.row_count = report.rows;
        self.sync()?;
        Ok(report)
    }

    pub fn sync(&self) -> TableResult<()> {
        self.file
            .sync_data()
            .map_err(|e| TableError::io("cannot sync data file", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hooks::CryptData;
    use crate::lsn::Lsn;
    use crate::table::TableOptions;
    use tempfile::TempDir;

    fn setup(dir: &TempDir, reclength: u32) -> (FixedFile, TableHeader) {
        let opts = TableOptions::fixed(reclength);
        let header = TableHeader::new(&opts, CryptData::none(), Lsn::IMPOSSIBLE);
        let file = FixedFile::open(&dir.path().join("t.ard"), reclength, false).unwrap();
        (file, header)
    }

    #[test]
    fn test_deleted_slots_are_reused_lifo() {
        let dir = TempDir::new().unwrap();
        let (file, mut header) = setup(&dir, 4);
        let ids: Vec<RowId> = (0..4u32)
            .map(|n| file.insert(&mut header, &n.to_le_bytes()).unwrap())
            .collect();
        file.delete(&mut header, ids[1]).unwrap();
        file.delete(&mut header, ids[3]).unwrap();
        assert_eq!(header.row_count, 2);

        assert_eq!(file.insert(&mut header, b"aaaa").unwrap(), ids[3]);
        assert_eq!(file.insert(&mut header, b"bbbb").unwrap(), ids[1]);
        assert_eq!(file.insert(&mut header, b"cccc").unwrap(), RowId::from_raw(4));
        assert_eq!(file.read(&header, ids[1]).unwrap(), b"bbbb");
    }

    #[test]
    fn test_wrong_length_and_missing_rows() {
        let dir = TempDir::new().unwrap();
        let (file, mut header) = setup(&dir, 16);
        assert!(file.insert(&mut header, b"short").is_err());
        let id = file.insert(&mut header, &[7u8; 16]).unwrap();
        file.update(&header, id, &[8u8; 16]).unwrap();
        assert_eq!(file.read(&header, id).unwrap(), vec![8u8; 16]);
        file.delete(&mut header, id).unwrap();
        assert!(file.read(&header, id).is_err());
        assert!(file.read(&header, RowId::from_raw(99)).is_err());
    }

    #[test]
    fn test_repair_rebuilds_chain() {
        let dir = TempDir::new().unwrap();
        let (file, mut header) = setup(&dir, 8);
        for n in 0..5u64 {
            file.insert(&mut header, &n.to_le_bytes()).unwrap();
        }
        file.delete(&mut header, RowId::from_raw(2)).unwrap();
        // Lose the header state and leave a partial slot at the end
        let mut stale = header.clone();
        stale.free_head = NO_FREE;
        stale.row_count = 0;
        file.file.write_all_at(&[1, 2, 3], 5 * file.slot_size()).unwrap();

        let report = file.repair(&mut stale).unwrap();
        assert_eq!(report.rows, 4);
        assert_eq!(report.free_slots, 1);
        assert_eq!(stale.free_head, 2);
        assert_eq!(stale.data_file_length, header.data_file_length);
        assert_eq!(file.scan(&stale).unwrap().len(), 4);
    }
}
