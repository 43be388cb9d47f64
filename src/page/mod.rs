//! Page kinds and on-page layouts
//!
//! Every page shares a common header:
//! - LSN of the last log record that changed the page (u64 LE) at 0
//! - Page type (u8) at 8
//! - Flags (u8) at 9
//!
//! and an 8-byte trailer holding the page CRC and the block checksum
//! (see [`crate::hooks`]). What lies between depends on the kind; the
//! layout is chosen by matching on [`PageType`], never by raw offsets at
//! the call site.

mod bitmap;
mod directory;
mod full;
mod index;

use std::fmt;

use crate::lsn::Lsn;

pub use bitmap::{bitmap_for, is_bitmap_page, pages_per_bitmap, BitmapPage, Fullness};
pub use directory::{
    max_fragment_len, DirectoryEntry, DirectoryPage, DIRECTORY_ENTRY_SIZE, DIRECTORY_HEADER_SIZE,
};
pub use full::{full_capacity, FullPage, FULL_HEADER_SIZE};
pub use index::{IndexPage, INDEX_HEADER_SIZE};

/// Page number inside one table file
pub type PageNo = u32;

pub const LSN_OFFSET: usize = 0;
pub const TYPE_OFFSET: usize = 8;
pub const FLAGS_OFFSET: usize = 9;
pub const COMMON_HEADER_SIZE: usize = 10;
/// Page CRC (4) then block checksum (4)
pub const PAGE_TRAILER_SIZE: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PageType {
    /// Never written, or freed
    Unallocated = 0,
    /// Row heads, addressed by directory slot
    Head = 1,
    /// Row tails, the last short piece of a long row
    Tail = 2,
    /// One full chunk of a long row
    Full = 3,
    /// A chunk inside a contiguous extent of a very long row
    Blob = 4,
    /// Fullness codes for the pages that follow it
    Bitmap = 5,
    /// B-tree node
    Index = 6,
}

/// The header and body arrangement a page type uses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageLayout {
    Blank,
    Directory,
    Full,
    Index,
}

impl PageType {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(PageType::Unallocated),
            1 => Some(PageType::Head),
            2 => Some(PageType::Tail),
            3 => Some(PageType::Full),
            4 => Some(PageType::Blob),
            5 => Some(PageType::Bitmap),
            6 => Some(PageType::Index),
            _ => None,
        }
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn layout(self) -> PageLayout {
        match self {
            PageType::Unallocated => PageLayout::Blank,
            PageType::Head | PageType::Tail => PageLayout::Directory,
            PageType::Full | PageType::Blob | PageType::Bitmap => PageLayout::Full,
            PageType::Index => PageLayout::Index,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            PageType::Unallocated => "unallocated",
            PageType::Head => "head",
            PageType::Tail => "tail",
            PageType::Full => "full",
            PageType::Blob => "blob",
            PageType::Bitmap => "bitmap",
            PageType::Index => "index",
        }
    }
}

impl fmt::Display for PageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl PageLayout {
    /// Bytes at the start of the page that stay in clear when the page is
    /// compressed or encrypted
    pub fn header_size(self) -> usize {
        match self {
            PageLayout::Blank => COMMON_HEADER_SIZE,
            PageLayout::Directory => DIRECTORY_HEADER_SIZE,
            PageLayout::Full => FULL_HEADER_SIZE,
            PageLayout::Index => INDEX_HEADER_SIZE,
        }
    }

    /// Where the encryption key version lives, if pages of this layout are
    /// ever encrypted
    pub fn key_version_offset(self) -> Option<usize> {
        match self {
            PageLayout::Blank => None,
            PageLayout::Directory => Some(16),
            PageLayout::Full => Some(10),
            PageLayout::Index => Some(16),
        }
    }
}

/// Continuation pointer: a page and a directory slot on it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct RowPtr {
    pub page: PageNo,
    pub slot: u16,
}

impl RowPtr {
    pub const NONE: RowPtr = RowPtr { page: 0, slot: 0 };
    pub const ENCODED_SIZE: usize = 6;

    pub fn new(page: PageNo, slot: u16) -> Self {
        Self { page, slot }
    }

    /// Page 0 is always a bitmap page, so it never holds row data
    pub fn is_none(&self) -> bool {
        self.page == 0
    }

    pub fn write_at(&self, buf: &mut [u8], pos: usize) {
        buf[pos..pos + 4].copy_from_slice(&self.page.to_le_bytes());
        buf[pos + 4..pos + 6].copy_from_slice(&self.slot.to_le_bytes());
    }

    pub fn read_at(buf: &[u8], pos: usize) -> Self {
        Self {
            page: read_u32(buf, pos),
            slot: read_u16(buf, pos + 4),
        }
    }
}

impl fmt::Display for RowPtr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.page, self.slot)
    }
}

pub(crate) fn read_u16(buf: &[u8], pos: usize) -> u16 {
    u16::from_le_bytes([buf[pos], buf[pos + 1]])
}

pub(crate) fn read_u32(buf: &[u8], pos: usize) -> u32 {
    u32::from_le_bytes([buf[pos], buf[pos + 1], buf[pos + 2], buf[pos + 3]])
}

pub(crate) fn write_u16(buf: &mut [u8], pos: usize, value: u16) {
    buf[pos..pos + 2].copy_from_slice(&value.to_le_bytes());
}

pub(crate) fn write_u32(buf: &mut [u8], pos: usize, value: u32) {
    buf[pos..pos + 4].copy_from_slice(&value.to_le_bytes());
}

pub fn page_lsn(page: &[u8]) -> Lsn {
    Lsn::read_at(page, LSN_OFFSET)
}

pub fn set_page_lsn(page: &mut [u8], lsn: Lsn) {
    lsn.write_at(page, LSN_OFFSET);
}

/// Raw type byte; `None` when it names no known kind
pub fn page_type(page: &[u8]) -> Option<PageType> {
    PageType::from_u8(page[TYPE_OFFSET])
}

/// True for a block that was never written
pub fn is_blank(block: &[u8]) -> bool {
    block.iter().all(|b| *b == 0)
}

/// Reset a page to an empty page of `kind`, keeping its LSN
pub fn format_page(page: &mut [u8], kind: PageType) {
    let lsn = page_lsn(page);
    page.fill(0);
    set_page_lsn(page, lsn);
    page[TYPE_OFFSET] = kind.as_u8();
    match kind.layout() {
        PageLayout::Directory => directory::init_directory(page),
        PageLayout::Full | PageLayout::Index | PageLayout::Blank => {}
    }
}

/// Offset of the key version inside `page`, from the page's own type byte
pub fn key_version_offset(page: &[u8]) -> Option<usize> {
    page_type(page).and_then(|t| t.layout().key_version_offset())
}

/// Borrowed, typed view of a page
#[derive(Debug)]
pub enum PageView<'a> {
    Unallocated,
    Head(DirectoryPage<&'a [u8]>),
    Tail(DirectoryPage<&'a [u8]>),
    Full(FullPage<&'a [u8]>),
    Blob(FullPage<&'a [u8]>),
    Bitmap(BitmapPage<&'a [u8]>),
    Index(IndexPage<&'a [u8]>),
}

impl<'a> PageView<'a> {
    /// Classify a decoded page; fails on an unknown type byte
    pub fn parse(page: &'a [u8]) -> Result<PageView<'a>, String> {
        let kind = page_type(page).ok_or_else(|| format!("unknown page type {}", page[TYPE_OFFSET]))?;
        Ok(match kind {
            PageType::Unallocated => PageView::Unallocated,
            PageType::Head => PageView::Head(DirectoryPage::new(page)),
            PageType::Tail => PageView::Tail(DirectoryPage::new(page)),
            PageType::Full => PageView::Full(FullPage::new(page)),
            PageType::Blob => PageView::Blob(FullPage::new(page)),
            PageType::Bitmap => PageView::Bitmap(BitmapPage::new(page)),
            PageType::Index => PageView::Index(IndexPage::new(page)),
        })
    }

    pub fn page_type(&self) -> PageType {
        match self {
            PageView::Unallocated => PageType::Unallocated,
            PageView::Head(_) => PageType::Head,
            PageView::Tail(_) => PageType::Tail,
            PageView::Full(_) => PageType::Full,
            PageView::Blob(_) => PageType::Blob,
            PageView::Bitmap(_) => PageType::Bitmap,
            PageView::Index(_) => PageType::Index,
        }
    }

    /// One-line description used by the log and page tools
    pub fn summary(&self) -> String {
        match self {
            PageView::Unallocated => "unallocated".to_string(),
            PageView::Head(d) | PageView::Tail(d) => format!(
                "{} entries={} free={}",
                self.page_type(),
                d.live_count(),
                d.free_space()
            ),
            PageView::Full(p) | PageView::Blob(p) => {
                format!("{} used={} next={}", self.page_type(), p.used(), p.next())
            }
            PageView::Bitmap(_) => "bitmap".to_string(),
            PageView::Index(p) => format!("index level={} keys={}", p.level(), p.key_count()),
        }
    }
}
