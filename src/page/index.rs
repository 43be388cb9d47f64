//! Index (B-tree node) page header
//!
//! - Key count (u16) at 10
//! - Used bytes (u16) at 12
//! - Level (u8) at 14, 0 for leaves
//! - Key version (u32) at 16
//! - Right sibling (u32) at 20, 0 for none
//! - Leftmost child (u32) at 24, internal nodes only
//! - Fixed-size entries from 28

use super::{format_page, read_u16, read_u32, write_u16, write_u32, PageNo, PageType, PAGE_TRAILER_SIZE};

pub const INDEX_HEADER_SIZE: usize = 28;

const KEY_COUNT_OFFSET: usize = 10;
const USED_OFFSET: usize = 12;
const LEVEL_OFFSET: usize = 14;
const SIBLING_OFFSET: usize = 20;
const LEFTMOST_OFFSET: usize = 24;

#[derive(Debug)]
pub struct IndexPage<B> {
    buf: B,
}

impl<B: AsRef<[u8]>> IndexPage<B> {
    pub fn new(buf: B) -> Self {
        Self { buf }
    }

    pub fn key_count(&self) -> usize {
        read_u16(self.buf.as_ref(), KEY_COUNT_OFFSET) as usize
    }

    pub fn used(&self) -> usize {
        read_u16(self.buf.as_ref(), USED_OFFSET) as usize
    }

    pub fn level(&self) -> u8 {
        self.buf.as_ref()[LEVEL_OFFSET]
    }

    pub fn is_leaf(&self) -> bool {
        self.level() == 0
    }

    pub fn right_sibling(&self) -> PageNo {
        read_u32(self.buf.as_ref(), SIBLING_OFFSET)
    }

    pub fn leftmost_child(&self) -> PageNo {
        read_u32(self.buf.as_ref(), LEFTMOST_OFFSET)
    }

    /// Entry area capacity in bytes
    pub fn capacity(&self) -> usize {
        self.buf.as_ref().len() - INDEX_HEADER_SIZE - PAGE_TRAILER_SIZE
    }

    pub fn entry(&self, index: usize, entry_len: usize) -> &[u8] {
        let start = INDEX_HEADER_SIZE + index * entry_len;
        &self.buf.as_ref()[start..start + entry_len]
    }
}

impl<B: AsRef<[u8]> + AsMut<[u8]>> IndexPage<B> {
    pub fn init(&mut self, level: u8) {
        let page = self.buf.as_mut();
        format_page(page, PageType::Index);
        page[LEVEL_OFFSET] = level;
    }

    pub fn set_right_sibling(&mut self, page: PageNo) {
        write_u32(self.buf.as_mut(), SIBLING_OFFSET, page);
    }

    pub fn set_leftmost_child(&mut self, page: PageNo) {
        write_u32(self.buf.as_mut(), LEFTMOST_OFFSET, page);
    }

    /// Replace every entry with `entries`, each `entry_len` bytes
    pub fn set_entries(&mut self, entries: &[Vec<u8>], entry_len: usize) {
        let page = self.buf.as_mut();
        let end = page.len() - PAGE_TRAILER_SIZE;
        page[INDEX_HEADER_SIZE..end].fill(0);
        let mut pos = INDEX_HEADER_SIZE;
        for entry in entries {
            page[pos..pos + entry_len].copy_from_slice(&entry[..entry_len]);
            pos += entry_len;
        }
        write_u16(page, KEY_COUNT_OFFSET, entries.len() as u16);
        write_u16(page, USED_OFFSET, (entries.len() * entry_len) as u16);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entries_round_trip() {
        let mut buf = vec![0u8; 1024];
        let mut page = IndexPage::new(&mut buf[..]);
        page.init(1);
        page.set_leftmost_child(4);
        page.set_right_sibling(9);
        let entries = vec![vec![1u8; 12], vec![2u8; 12]];
        page.set_entries(&entries, 12);
        assert_eq!(page.key_count(), 2);
        assert_eq!(page.used(), 24);
        assert_eq!(page.entry(1, 12), &[2u8; 12][..]);
        assert_eq!(page.leftmost_child(), 4);
        assert_eq!(page.right_sibling(), 9);
        assert!(!page.is_leaf());
    }
}
