//! Tables
//!
//! A table is two files under the data directory:
//! - `{name}.aid`, the index file: the header page (page 0, written
//!   directly and never transformed) followed by B-tree pages
//! - `{name}.ard`, the data file, whose layout depends on the row format
//!
//! BLOCK_RECORD data files are paged, go through the page cache and may be
//! transactional. FIXED and DYNAMIC data files are plain record files
//! accessed directly; they are never logged.
//!
//! Lifecycle of a table:
//!
//! ```text
//! CLOSED -> OPENING -> OPEN -> CLOSING -> CLOSED
//!              \-> RECOVERY -> OPEN      (open_count was non-zero)
//! ```

mod block_record;
mod btree;
mod dynamic;
mod errors;
mod fixed;
mod handle;
mod header;
mod options;
mod registry;
mod share;
mod undo;

use std::fmt;

use crate::page::{PageNo, RowPtr};

pub use block_record::{ApplyMode, BlockRecordFile, RowPlacement, HEAD_HEADER_SIZE};
pub use btree::{BTree, ENTRY_ROWID_SIZE};
pub use errors::{TableError, TableErrorCode, TableResult};
pub use handle::TableHandle;
pub use dynamic::DynamicRepair;
pub use fixed::FixedRepair;
pub use header::{HeaderLayout, TableHeader, HEADER_MAGIC, HEADER_VERSION};
pub use options::{KeyDef, RowFormat, TableOptions};
pub use registry::{validate_name, TablePaths, TableRegistry};
pub use share::{RebuildReport, Share, TableState};
pub use undo::{rollback, undo_row_record, UndoMode};

pub const INDEX_EXT: &str = "aid";
pub const DATA_EXT: &str = "ard";

/// Row address inside one table.
///
/// BLOCK_RECORD: head page in the high bits, directory slot in the low 16.
/// FIXED: record number. DYNAMIC: byte offset of the row's block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct RowId(u64);

impl RowId {
    pub const fn from_raw(raw: u64) -> Self {
        RowId(raw)
    }

    pub const fn raw(self) -> u64 {
        self.0
    }

    pub fn from_ptr(ptr: RowPtr) -> Self {
        RowId(((ptr.page as u64) << 16) | ptr.slot as u64)
    }

    /// Head location of a BLOCK_RECORD row
    pub fn ptr(self) -> RowPtr {
        RowPtr::new((self.0 >> 16) as PageNo, (self.0 & 0xffff) as u16)
    }
}

impl fmt::Display for RowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rowid_packs_page_and_slot() {
        let id = RowId::from_ptr(RowPtr::new(70_000, 513));
        assert_eq!(id.ptr(), RowPtr::new(70_000, 513));
        assert_eq!(id.raw(), (70_000u64 << 16) | 513);
        assert_eq!(RowId::from_raw(id.raw()), id);
    }
}
