//! Directory pages (head and tail pages)
//!
//! Header after the common part:
//! - Entry count (u16) at 10
//! - Free bytes (u16) at 12, counting holes
//! - End of the packed data area (u16) at 14
//! - Key version (u32) at 16
//!
//! Fragments are packed upward from offset 20. Directory entries
//! `[offset u16, length u16]` grow downward from the trailer; entry `i`
//! sits `4 * (i + 1)` bytes below it. An empty entry is all zeros.

use super::{read_u16, write_u16, PAGE_TRAILER_SIZE};

pub const DIRECTORY_HEADER_SIZE: usize = 20;
pub const DIRECTORY_ENTRY_SIZE: usize = 4;

const COUNT_OFFSET: usize = 10;
const FREE_OFFSET: usize = 12;
const DATA_END_OFFSET: usize = 14;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DirectoryEntry {
    pub offset: u16,
    pub len: u16,
}

impl DirectoryEntry {
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

#[derive(Debug)]
pub struct DirectoryPage<B> {
    buf: B,
}

/// Largest fragment an empty page of `block_size` can hold in one slot
pub fn max_fragment_len(block_size: usize) -> usize {
    block_size - PAGE_TRAILER_SIZE - DIRECTORY_HEADER_SIZE - DIRECTORY_ENTRY_SIZE
}

impl<B: AsRef<[u8]>> DirectoryPage<B> {
    pub fn new(buf: B) -> Self {
        Self { buf }
    }

    fn bytes(&self) -> &[u8] {
        self.buf.as_ref()
    }

    fn entry_pos(&self, slot: u16) -> usize {
        self.bytes().len() - PAGE_TRAILER_SIZE - DIRECTORY_ENTRY_SIZE * (slot as usize + 1)
    }

    /// Directory length, including empty entries
    pub fn entry_count(&self) -> u16 {
        read_u16(self.bytes(), COUNT_OFFSET)
    }

    pub fn free_space(&self) -> usize {
        read_u16(self.bytes(), FREE_OFFSET) as usize
    }

    fn data_end(&self) -> usize {
        read_u16(self.bytes(), DATA_END_OFFSET) as usize
    }

    fn dir_start(&self, count: u16) -> usize {
        self.bytes().len() - PAGE_TRAILER_SIZE - DIRECTORY_ENTRY_SIZE * count as usize
    }

    pub fn entry(&self, slot: u16) -> Option<DirectoryEntry> {
        if slot >= self.entry_count() {
            return None;
        }
        let pos = self.entry_pos(slot);
        let entry = DirectoryEntry {
            offset: read_u16(self.bytes(), pos),
            len: read_u16(self.bytes(), pos + 2),
        };
        if entry.is_empty() {
            None
        } else {
            Some(entry)
        }
    }

    pub fn fragment(&self, slot: u16) -> Option<&[u8]> {
        let entry = self.entry(slot)?;
        let start = entry.offset as usize;
        self.bytes().get(start..start + entry.len as usize)
    }

    pub fn live_slots(&self) -> Vec<u16> {
        (0..self.entry_count()).filter(|s| self.entry(*s).is_some()).collect()
    }

    pub fn live_count(&self) -> usize {
        self.live_slots().len()
    }

    /// The slot a new fragment should take: the first hole, else a new entry
    pub fn first_free_slot(&self) -> u16 {
        (0..self.entry_count())
            .find(|s| self.entry(*s).is_none())
            .unwrap_or_else(|| self.entry_count())
    }

    /// Bytes a fragment of `len` would consume in `slot`, directory growth
    /// included
    pub fn space_needed(&self, slot: u16, len: usize) -> usize {
        let count = self.entry_count();
        let grow = if slot >= count {
            (slot - count + 1) as usize * DIRECTORY_ENTRY_SIZE
        } else {
            0
        };
        len + grow
    }

    pub fn can_insert(&self, slot: u16, len: usize) -> bool {
        self.entry(slot).is_none() && len > 0 && self.space_needed(slot, len) <= self.free_space()
    }

    /// Usable bytes of an empty page of this size
    pub fn capacity(&self) -> usize {
        self.bytes().len() - PAGE_TRAILER_SIZE - DIRECTORY_HEADER_SIZE
    }
}

/// Lay out an empty directory on an already-typed page
pub fn init_directory(page: &mut [u8]) {
    let free = page.len() - PAGE_TRAILER_SIZE - DIRECTORY_HEADER_SIZE;
    write_u16(page, COUNT_OFFSET, 0);
    write_u16(page, FREE_OFFSET, free as u16);
    write_u16(page, DATA_END_OFFSET, DIRECTORY_HEADER_SIZE as u16);
}

impl<B: AsRef<[u8]> + AsMut<[u8]>> DirectoryPage<B> {
    fn bytes_mut(&mut self) -> &mut [u8] {
        self.buf.as_mut()
    }

    fn set_entry(&mut self, slot: u16, entry: DirectoryEntry) {
        let pos = self.entry_pos(slot);
        let page = self.bytes_mut();
        write_u16(page, pos, entry.offset);
        write_u16(page, pos + 2, entry.len);
    }

    fn refresh_free(&mut self) {
        let count = self.entry_count();
        let used: usize = self
            .live_slots()
            .iter()
            .filter_map(|s| self.entry(*s))
            .map(|e| e.len as usize)
            .sum();
        let free = self.dir_start(count) - DIRECTORY_HEADER_SIZE - used;
        write_u16(self.bytes_mut(), FREE_OFFSET, free as u16);
    }

    /// Store `bytes` in `slot`, growing the directory and compacting the
    /// data area when needed
    pub fn insert_at(&mut self, slot: u16, bytes: &[u8]) -> Result<(), String> {
        if self.entry(slot).is_some() {
            return Err(format!("slot {} is already in use", slot));
        }
        if bytes.is_empty() {
            return Err("empty fragment".to_string());
        }
        if self.space_needed(slot, bytes.len()) > self.free_space() {
            return Err(format!(
                "fragment of {} bytes does not fit ({} free)",
                bytes.len(),
                self.free_space()
            ));
        }
        let count = self.entry_count();
        let new_count = count.max(slot + 1);
        if self.data_end() + bytes.len() > self.dir_start(new_count) {
            self.compact();
        }
        for empty in count..new_count {
            self.set_entry(empty, DirectoryEntry { offset: 0, len: 0 });
        }
        write_u16(self.bytes_mut(), COUNT_OFFSET, new_count);

        let start = self.data_end();
        self.bytes_mut()[start..start + bytes.len()].copy_from_slice(bytes);
        self.set_entry(
            slot,
            DirectoryEntry {
                offset: start as u16,
                len: bytes.len() as u16,
            },
        );
        write_u16(self.bytes_mut(), DATA_END_OFFSET, (start + bytes.len()) as u16);
        self.refresh_free();
        Ok(())
    }

    /// Remove the fragment in `slot`, returning its bytes
    pub fn delete(&mut self, slot: u16) -> Result<Vec<u8>, String> {
        let entry = self
            .entry(slot)
            .ok_or_else(|| format!("slot {} is empty", slot))?;
        let start = entry.offset as usize;
        let end = start + entry.len as usize;
        let old = self.bytes()[start..end].to_vec();
        self.bytes_mut()[start..end].fill(0);
        self.set_entry(slot, DirectoryEntry { offset: 0, len: 0 });
        if end == self.data_end() {
            write_u16(self.bytes_mut(), DATA_END_OFFSET, start as u16);
        }

        let mut count = self.entry_count();
        while count > 0 && self.entry(count - 1).is_none() {
            count -= 1;
            write_u16(self.bytes_mut(), COUNT_OFFSET, count);
            let pos = self.entry_pos(count);
            self.bytes_mut()[pos..pos + DIRECTORY_ENTRY_SIZE].fill(0);
        }
        if count == 0 {
            write_u16(self.bytes_mut(), DATA_END_OFFSET, DIRECTORY_HEADER_SIZE as u16);
        }
        self.refresh_free();
        Ok(old)
    }

    /// Pack live fragments to the start of the data area, in offset order
    pub fn compact(&mut self) {
        let mut live: Vec<(u16, DirectoryEntry)> = self
            .live_slots()
            .into_iter()
            .filter_map(|s| self.entry(s).map(|e| (s, e)))
            .collect();
        live.sort_by_key(|(_, e)| e.offset);

        let copies: Vec<(u16, Vec<u8>)> = live
            .iter()
            .map(|(s, e)| {
                let start = e.offset as usize;
                (*s, self.bytes()[start..start + e.len as usize].to_vec())
            })
            .collect();

        let dir_start = self.dir_start(self.entry_count());
        self.bytes_mut()[DIRECTORY_HEADER_SIZE..dir_start].fill(0);
        let mut pos = DIRECTORY_HEADER_SIZE;
        for (slot, data) in copies {
            self.bytes_mut()[pos..pos + data.len()].copy_from_slice(&data);
            self.set_entry(
                slot,
                DirectoryEntry {
                    offset: pos as u16,
                    len: data.len() as u16,
                },
            );
            pos += data.len();
        }
        write_u16(self.bytes_mut(), DATA_END_OFFSET, pos as u16);
    }
}
