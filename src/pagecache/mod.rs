//! Page cache
//!
//! Fixed-size slot cache over table files. Callers borrow a page through a
//! read or write guard for the duration of a latch; the cache owns every
//! buffer. On a miss the stored block is read from the file's
//! [`BlockStore`] and decoded by the file's [`crate::hooks::Pipeline`];
//! dirty pages are encoded on a scratch copy on their way out.
//!
//! A page whose header carries an LSN is written only after the log is
//! durable up to that LSN. The cache asks through [`FlushGuard`], which
//! the log implements.

mod cache;
mod errors;
mod store;

use std::fmt;

use crate::lsn::Lsn;
use crate::wal::Wal;

pub use cache::{DirtyPage, PageCache, PageReadGuard, PageWriteGuard};
pub use errors::{PageCacheError, PageCacheErrorCode, PageCacheResult};
pub use store::{BlockStore, FileBlockStore};

/// Cache-local handle of a registered file
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FileId(pub u32);

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "f{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushMode {
    /// Write dirty pages, keep them cached
    Keep,
    /// Write dirty pages, then evict the file's pages
    Release,
    /// Evict without writing; used on error paths and crash simulation
    IgnoreChanged,
}

/// Enforces log-before-data for page writes
pub trait FlushGuard: Send + Sync + fmt::Debug {
    /// Make the log durable through the record at `lsn`
    fn ensure_durable(&self, lsn: Lsn) -> Result<(), String>;
}

impl FlushGuard for Wal {
    fn ensure_durable(&self, lsn: Lsn) -> Result<(), String> {
        if self.is_durable(lsn) {
            return Ok(());
        }
        self.flush(lsn).map_err(|e| e.to_string())
    }
}
