//! Full-page layout (full, blob and bitmap pages)
//!
//! - Key version (u32) at 10
//! - Used bytes (u16) at 14
//! - Continuation pointer (page u32, slot u16) at 16
//! - Data from 22 up to the trailer

use super::{format_page, read_u16, write_u16, PageType, RowPtr, PAGE_TRAILER_SIZE};

pub const FULL_HEADER_SIZE: usize = 22;

const USED_OFFSET: usize = 14;
const NEXT_OFFSET: usize = 16;

#[derive(Debug)]
pub struct FullPage<B> {
    buf: B,
}

/// Data bytes a full page of `block_size` holds
pub fn full_capacity(block_size: usize) -> usize {
    block_size - FULL_HEADER_SIZE - PAGE_TRAILER_SIZE
}

impl<B: AsRef<[u8]>> FullPage<B> {
    pub fn new(buf: B) -> Self {
        Self { buf }
    }

    pub fn used(&self) -> usize {
        read_u16(self.buf.as_ref(), USED_OFFSET) as usize
    }

    pub fn next(&self) -> RowPtr {
        RowPtr::read_at(self.buf.as_ref(), NEXT_OFFSET)
    }

    pub fn data(&self) -> &[u8] {
        let used = self.used().min(self.capacity());
        &self.buf.as_ref()[FULL_HEADER_SIZE..FULL_HEADER_SIZE + used]
    }

    /// The whole data area, used or not
    pub fn body(&self) -> &[u8] {
        let len = self.buf.as_ref().len();
        &self.buf.as_ref()[FULL_HEADER_SIZE..len - PAGE_TRAILER_SIZE]
    }

    pub fn capacity(&self) -> usize {
        full_capacity(self.buf.as_ref().len())
    }
}

impl<B: AsRef<[u8]> + AsMut<[u8]>> FullPage<B> {
    /// Format the page as `kind` holding `data`, chained to `next`
    pub fn write(&mut self, kind: PageType, next: RowPtr, data: &[u8]) -> Result<(), String> {
        if data.len() > self.capacity() {
            return Err(format!(
                "{} bytes exceed full page capacity {}",
                data.len(),
                self.capacity()
            ));
        }
        let page = self.buf.as_mut();
        format_page(page, kind);
        write_u16(page, USED_OFFSET, data.len() as u16);
        next.write_at(page, NEXT_OFFSET);
        page[FULL_HEADER_SIZE..FULL_HEADER_SIZE + data.len()].copy_from_slice(data);
        Ok(())
    }

    pub fn body_mut(&mut self) -> &mut [u8] {
        let page = self.buf.as_mut();
        let len = page.len();
        &mut page[FULL_HEADER_SIZE..len - PAGE_TRAILER_SIZE]
    }

    pub fn set_used(&mut self, used: usize) {
        write_u16(self.buf.as_mut(), USED_OFFSET, used as u16);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_and_read() {
        let mut buf = vec![0u8; 1024];
        let mut page = FullPage::new(&mut buf[..]);
        page.write(PageType::Full, RowPtr::new(9, 2), b"chunk of a long row")
            .unwrap();
        assert_eq!(page.data(), b"chunk of a long row");
        assert_eq!(page.next(), RowPtr::new(9, 2));
        assert_eq!(crate::page::page_type(&buf), Some(PageType::Full));
    }

    #[test]
    fn test_capacity_enforced() {
        let mut buf = vec![0u8; 1024];
        let mut page = FullPage::new(&mut buf[..]);
        let cap = page.capacity();
        assert_eq!(cap, 1024 - 30);
        assert!(page.write(PageType::Blob, RowPtr::NONE, &vec![1u8; cap]).is_ok());
        assert!(page.write(PageType::Blob, RowPtr::NONE, &vec![1u8; cap + 1]).is_err());
    }
}
