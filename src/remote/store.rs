//! Table blocks as remote objects
//!
//! A table `t` of database `db` is laid out as:
//!
//! ```text
//! db/t/frm             table definition (JSON)
//! db/t/aria            index header page
//! db/t/index/000001    index page 1, and so on
//! db/t/data/000001     data page 0, and so on
//! ```
//!
//! Block numbers start at 1 and are zero-padded to six digits; larger
//! numbers simply grow longer. The index header page has its own object,
//! so index page `n` is block `n` while data page `n` is block `n + 1`.

use std::io;
use std::sync::Arc;

use super::backend::ObjectBackend;
use super::errors::RemoteError;
use crate::page::PageNo;
use crate::pagecache::BlockStore;

pub const HEADER_OBJECT: &str = "aria";
pub const DEFINITION_OBJECT: &str = "frm";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKind {
    Index,
    Data,
}

impl BlockKind {
    pub fn dir(self) -> &'static str {
        match self {
            BlockKind::Index => "index",
            BlockKind::Data => "data",
        }
    }

    /// Pages in front of the first block object
    fn head_blocks(self) -> PageNo {
        match self {
            BlockKind::Index => 1,
            BlockKind::Data => 0,
        }
    }

    /// Block number of `page`, `None` for the index header page
    pub fn block_number(self, page: PageNo) -> Option<u64> {
        let head = self.head_blocks();
        if page < head {
            return None;
        }
        Some(u64::from(page - head) + 1)
    }
}

/// `db/table`
pub fn table_prefix(database: &str, table: &str) -> String {
    format!("{}/{}", database, table)
}

/// `db/table/{index|data}/NNNNNN`
pub fn block_key(database: &str, table: &str, kind: BlockKind, block: u64) -> String {
    format!("{}/{}/{:06}", table_prefix(database, table), kind.dir(), block)
}

/// Read-only block store over the objects of one table file
#[derive(Debug)]
pub struct RemoteBlockStore {
    backend: Arc<dyn ObjectBackend>,
    database: String,
    table: String,
    kind: BlockKind,
    /// Page count, fixed when the store is opened
    pages: u32,
    /// Stored size of every block; `None` for compressed tables
    block_size: Option<usize>,
}

impl RemoteBlockStore {
    pub fn open(
        backend: Arc<dyn ObjectBackend>,
        database: &str,
        table: &str,
        kind: BlockKind,
        block_size: Option<usize>,
    ) -> Result<Self, RemoteError> {
        let prefix = format!("{}/{}", table_prefix(database, table), kind.dir());
        let blocks = backend.list(&prefix)?.len() as u32;
        let pages = if blocks == 0 {
            0
        } else {
            blocks + kind.head_blocks()
        };
        Ok(Self {
            backend,
            database: database.to_string(),
            table: table.to_string(),
            kind,
            pages,
            block_size,
        })
    }
}

fn read_only() -> io::Error {
    io::Error::new(io::ErrorKind::PermissionDenied, "remote tables are read-only")
}

impl BlockStore for RemoteBlockStore {
    fn read_block(&self, block: PageNo) -> io::Result<Option<Vec<u8>>> {
        let Some(number) = self.kind.block_number(block) else {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "the index header page is not a block object",
            ));
        };
        let key = block_key(&self.database, &self.table, self.kind, number);
        match self.backend.get(&key) {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn write_block(&self, _block: PageNo, _data: &[u8]) -> io::Result<()> {
        Err(read_only())
    }

    fn block_count(&self) -> io::Result<u32> {
        Ok(self.pages)
    }

    fn truncate(&self, _blocks: u32) -> io::Result<()> {
        Err(read_only())
    }

    fn sync(&self) -> io::Result<()> {
        Ok(())
    }

    fn fixed_block_size(&self) -> Option<usize> {
        self.block_size
    }

    fn is_read_only(&self) -> bool {
        true
    }
}
