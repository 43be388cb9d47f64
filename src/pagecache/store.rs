//! Block stores: where the page cache reads and writes stored blocks
//!
//! A store addresses blocks by page number. A block that was never written
//! reads as `None`; the cache turns that into a zeroed page.

use std::fmt;
use std::fs::{File, OpenOptions};
use std::io;
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};

use crate::page::PageNo;

pub trait BlockStore: Send + Sync + fmt::Debug {
    /// Stored bytes of `block`, or `None` past the end of the store
    fn read_block(&self, block: PageNo) -> io::Result<Option<Vec<u8>>>;

    fn write_block(&self, block: PageNo, data: &[u8]) -> io::Result<()>;

    /// Number of blocks, including holes below the highest written one
    fn block_count(&self) -> io::Result<u32>;

    /// Drop every block at or above `blocks`
    fn truncate(&self, blocks: u32) -> io::Result<()>;

    fn sync(&self) -> io::Result<()>;

    /// Exact stored size of every block, or `None` when stored images may
    /// vary in length
    fn fixed_block_size(&self) -> Option<usize>;

    fn is_read_only(&self) -> bool {
        false
    }
}

/// Blocks laid out back to back in one local file; block `n` sits at
/// `n * block_size`
pub struct FileBlockStore {
    path: PathBuf,
    file: File,
    block_size: usize,
    read_only: bool,
}

impl FileBlockStore {
    pub fn open(path: &Path, block_size: usize) -> io::Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            file,
            block_size,
            read_only: false,
        })
    }

    pub fn open_read_only(path: &Path, block_size: usize) -> io::Result<Self> {
        let file = OpenOptions::new().read(true).open(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            file,
            block_size,
            read_only: true,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn offset(&self, block: PageNo) -> u64 {
        block as u64 * self.block_size as u64
    }
}

impl fmt::Debug for FileBlockStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileBlockStore")
            .field("path", &self.path)
            .field("block_size", &self.block_size)
            .finish()
    }
}

impl BlockStore for FileBlockStore {
    fn read_block(&self, block: PageNo) -> io::Result<Option<Vec<u8>>> {
        let len = self.file.metadata()?.len();
        let start = self.offset(block);
        if start >= len {
            return Ok(None);
        }
        let mut buf = vec![0u8; self.block_size];
        let available = ((len - start) as usize).min(self.block_size);
        // A short last block (torn extension) reads zero-padded and then
        // fails its checksum
        self.file.read_exact_at(&mut buf[..available], start)?;
        Ok(Some(buf))
    }

    fn write_block(&self, block: PageNo, data: &[u8]) -> io::Result<()> {
        if self.read_only {
            return Err(io::Error::new(io::ErrorKind::PermissionDenied, "store is read-only"));
        }
        if data.len() != self.block_size {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("block of {} bytes, store takes {}", data.len(), self.block_size),
            ));
        }
        self.file.write_all_at(data, self.offset(block))
    }

    fn block_count(&self) -> io::Result<u32> {
        let len = self.file.metadata()?.len();
        let bs = self.block_size as u64;
        Ok(((len + bs - 1) / bs) as u32)
    }

    fn truncate(&self, blocks: u32) -> io::Result<()> {
        if self.read_only {
            return Err(io::Error::new(io::ErrorKind::PermissionDenied, "store is read-only"));
        }
        let len = self.file.metadata()?.len();
        let target = self.offset(blocks);
        if target < len {
            self.file.set_len(target)?;
        }
        Ok(())
    }

    fn sync(&self) -> io::Result<()> {
        if self.read_only {
            return Ok(());
        }
        self.file.sync_data()
    }

    fn fixed_block_size(&self) -> Option<usize> {
        Some(self.block_size)
    }

    fn is_read_only(&self) -> bool {
        self.read_only
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_unwritten_blocks_read_as_none() {
        let dir = TempDir::new().unwrap();
        let store = FileBlockStore::open(&dir.path().join("t.ard"), 1024).unwrap();
        assert_eq!(store.block_count().unwrap(), 0);
        assert!(store.read_block(0).unwrap().is_none());

        store.write_block(2, &[5u8; 1024]).unwrap();
        assert_eq!(store.block_count().unwrap(), 3);
        assert_eq!(store.read_block(1).unwrap(), Some(vec![0u8; 1024]));
        assert_eq!(store.read_block(2).unwrap(), Some(vec![5u8; 1024]));
        assert!(store.read_block(3).unwrap().is_none());
    }

    #[test]
    fn test_truncate_keeps_lower_blocks() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("t.aid");
        let store = FileBlockStore::open(&path, 1024).unwrap();
        store.write_block(0, &[1u8; 1024]).unwrap();
        store.write_block(1, &[2u8; 1024]).unwrap();
        store.write_block(2, &[3u8; 1024]).unwrap();
        store.truncate(1).unwrap();
        assert_eq!(store.block_count().unwrap(), 1);
        assert_eq!(store.read_block(0).unwrap(), Some(vec![1u8; 1024]));
    }

    #[test]
    fn test_wrong_length_rejected() {
        let dir = TempDir::new().unwrap();
        let store = FileBlockStore::open(&dir.path().join("t.ard"), 1024).unwrap();
        assert!(store.write_block(0, &[0u8; 100]).is_err());
    }

    #[test]
    fn test_read_only_store_refuses_writes() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("t.ard");
        std::fs::write(&path, vec![0u8; 1024]).unwrap();
        let store = FileBlockStore::open_read_only(&path, 1024).unwrap();
        assert!(store.is_read_only());
        assert!(store.write_block(0, &[0u8; 1024]).is_err());
    }
}
