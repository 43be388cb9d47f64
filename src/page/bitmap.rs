//! Bitmap pages
//!
//! A bitmap page uses the full-page layout. Its data area holds a 4-bit
//! fullness code for each of the pages that follow it, two per byte, low
//! nibble first. Bitmap pages sit at 0, K+1, 2(K+1), ... where K is the
//! number of pages one bitmap covers.

use super::directory::DirectoryPage;
use super::full::{full_capacity, FullPage};
use super::{page_type, PageNo, PageType, RowPtr};

/// How full a data page is
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum Fullness {
    Empty = 0,
    HeadRoomy = 1,
    HeadSome = 2,
    HeadFull = 3,
    TailRoomy = 4,
    TailSome = 5,
    TailFull = 6,
    FullPage = 7,
}

impl Fullness {
    pub fn from_u8(value: u8) -> Self {
        match value & 0x0f {
            1 => Fullness::HeadRoomy,
            2 => Fullness::HeadSome,
            3 => Fullness::HeadFull,
            4 => Fullness::TailRoomy,
            5 => Fullness::TailSome,
            6 => Fullness::TailFull,
            0 => Fullness::Empty,
            _ => Fullness::FullPage,
        }
    }

    /// Fullness of a decoded data page
    pub fn of_page(page: &[u8]) -> Fullness {
        match page_type(page) {
            Some(PageType::Head) | Some(PageType::Tail) => {
                let dir = DirectoryPage::new(page);
                if dir.live_count() == 0 {
                    return Fullness::Empty;
                }
                let free = dir.free_space();
                let cap = dir.capacity();
                let head = page_type(page) == Some(PageType::Head);
                match (head, free * 2 >= cap, free * 8 >= cap) {
                    (true, true, _) => Fullness::HeadRoomy,
                    (true, false, true) => Fullness::HeadSome,
                    (true, false, false) => Fullness::HeadFull,
                    (false, true, _) => Fullness::TailRoomy,
                    (false, false, true) => Fullness::TailSome,
                    (false, false, false) => Fullness::TailFull,
                }
            }
            Some(PageType::Unallocated) | None => Fullness::Empty,
            Some(_) => Fullness::FullPage,
        }
    }

    /// Whether a page with this code may take a new fragment of `kind`
    pub fn accepts(self, kind: PageType) -> bool {
        match (self, kind) {
            (Fullness::Empty, _) => true,
            (Fullness::HeadRoomy | Fullness::HeadSome, PageType::Head) => true,
            (Fullness::TailRoomy | Fullness::TailSome, PageType::Tail) => true,
            _ => false,
        }
    }
}

/// Pages covered by one bitmap page of `block_size`
pub fn pages_per_bitmap(block_size: usize) -> u32 {
    (full_capacity(block_size) * 2) as u32
}

pub fn is_bitmap_page(page: PageNo, block_size: usize) -> bool {
    page % (pages_per_bitmap(block_size) + 1) == 0
}

/// The bitmap page covering `page`
pub fn bitmap_for(page: PageNo, block_size: usize) -> PageNo {
    let span = pages_per_bitmap(block_size) + 1;
    (page / span) * span
}

#[derive(Debug)]
pub struct BitmapPage<B> {
    buf: B,
}

impl<B: AsRef<[u8]>> BitmapPage<B> {
    pub fn new(buf: B) -> Self {
        Self { buf }
    }

    pub fn get(&self, page: PageNo, bitmap_page: PageNo) -> Fullness {
        let index = (page - bitmap_page - 1) as usize;
        let byte = FullPage::new(self.buf.as_ref()).body()[index / 2];
        let nibble = if index % 2 == 0 { byte & 0x0f } else { byte >> 4 };
        Fullness::from_u8(nibble)
    }

    /// Covered pages with their codes, in page order
    pub fn entries(&self, bitmap_page: PageNo, limit: PageNo) -> Vec<(PageNo, Fullness)> {
        let block_size = self.buf.as_ref().len();
        let last = (bitmap_page + pages_per_bitmap(block_size)).min(limit.saturating_sub(1));
        (bitmap_page + 1..=last)
            .map(|p| (p, self.get(p, bitmap_page)))
            .collect()
    }
}

impl<B: AsRef<[u8]> + AsMut<[u8]>> BitmapPage<B> {
    pub fn init(&mut self) -> Result<(), String> {
        let mut full = FullPage::new(self.buf.as_mut());
        full.write(PageType::Bitmap, RowPtr::NONE, &[])?;
        let cap = full.capacity();
        full.set_used(cap);
        Ok(())
    }

    pub fn set(&mut self, page: PageNo, bitmap_page: PageNo, code: Fullness) {
        let index = (page - bitmap_page - 1) as usize;
        let mut full = FullPage::new(self.buf.as_mut());
        let body = full.body_mut();
        let byte = &mut body[index / 2];
        if index % 2 == 0 {
            *byte = (*byte & 0xf0) | code as u8;
        } else {
            *byte = (*byte & 0x0f) | ((code as u8) << 4);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page::format_page;

    #[test]
    fn test_bitmap_positions() {
        let per = pages_per_bitmap(1024);
        assert_eq!(per, 2 * (1024 - 30) as u32);
        assert!(is_bitmap_page(0, 1024));
        assert!(!is_bitmap_page(1, 1024));
        assert!(is_bitmap_page(per + 1, 1024));
        assert_eq!(bitmap_for(per, 1024), 0);
        assert_eq!(bitmap_for(per + 5, 1024), per + 1);
    }

    #[test]
    fn test_set_get_nibbles() {
        let mut buf = vec![0u8; 1024];
        let mut bitmap = BitmapPage::new(&mut buf[..]);
        bitmap.init().unwrap();
        bitmap.set(1, 0, Fullness::HeadSome);
        bitmap.set(2, 0, Fullness::FullPage);
        bitmap.set(3, 0, Fullness::TailRoomy);
        assert_eq!(bitmap.get(1, 0), Fullness::HeadSome);
        assert_eq!(bitmap.get(2, 0), Fullness::FullPage);
        assert_eq!(bitmap.get(3, 0), Fullness::TailRoomy);
        assert_eq!(bitmap.get(4, 0), Fullness::Empty);
        bitmap.set(2, 0, Fullness::Empty);
        assert_eq!(bitmap.get(1, 0), Fullness::HeadSome);
        assert_eq!(bitmap.get(2, 0), Fullness::Empty);
    }

    #[test]
    fn test_fullness_of_pages() {
        let mut page = vec![0u8; 1024];
        assert_eq!(Fullness::of_page(&page), Fullness::Empty);
        format_page(&mut page, PageType::Head);
        assert_eq!(Fullness::of_page(&page), Fullness::Empty);
        DirectoryPage::new(&mut page[..]).insert_at(0, &[1u8; 10]).unwrap();
        assert_eq!(Fullness::of_page(&page), Fullness::HeadRoomy);
        DirectoryPage::new(&mut page[..]).insert_at(1, &[1u8; 800]).unwrap();
        assert_eq!(Fullness::of_page(&page), Fullness::HeadSome);
        assert!(Fullness::HeadSome.accepts(PageType::Head));
        assert!(!Fullness::HeadSome.accepts(PageType::Tail));
        assert!(!Fullness::FullPage.accepts(PageType::Head));
    }
}
