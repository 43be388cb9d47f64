//! Page CRC and block checksum
//!
//! Two checksums guard a page:
//! - The page CRC covers the plain page image (header and body, key version
//!   excluded) and is checked after every other transform is reversed.
//! - The block checksum covers the stored bytes exactly as they sit on
//!   disk, including the page CRC, and is checked before anything else.
//!
//! Both are CRC32 seeded with the page number, so a block written to the
//! wrong position fails. CRC32 catches every burst of up to 32 bits, so a
//! single changed byte anywhere in a stored block is always detected.

use crc32fast::Hasher;

use super::errors::{HookError, HookResult};
use super::{PageTransform, TransformContext};
use crate::page::{key_version_offset, read_u32, write_u32, PageNo, PAGE_TRAILER_SIZE};

fn page_crc(page: &[u8], page_no: PageNo) -> u32 {
    let end = page.len() - PAGE_TRAILER_SIZE;
    let mut hasher = Hasher::new_with_initial(page_no);
    match key_version_offset(page) {
        Some(kv) => {
            hasher.update(&page[..kv]);
            hasher.update(&page[kv + 4..end]);
        }
        None => hasher.update(&page[..end]),
    }
    hasher.finalize()
}

fn block_checksum(stored: &[u8], page_no: PageNo) -> u32 {
    let mut hasher = Hasher::new_with_initial(!page_no);
    hasher.update(&stored[..stored.len() - 4]);
    hasher.finalize()
}

/// Stamps and verifies the CRC of the plain page
#[derive(Debug, Default)]
pub struct PageCrc;

impl PageTransform for PageCrc {
    fn name(&self) -> &'static str {
        "page_crc"
    }

    fn encode(&self, ctx: &TransformContext, mut page: Vec<u8>) -> HookResult<Vec<u8>> {
        let crc = page_crc(&page, ctx.page_no);
        let pos = page.len() - PAGE_TRAILER_SIZE;
        write_u32(&mut page, pos, crc);
        Ok(page)
    }

    fn decode(&self, ctx: &TransformContext, page: Vec<u8>) -> HookResult<Vec<u8>> {
        if page.len() != ctx.block_size {
            return Err(HookError::corrupt(
                ctx.page_no,
                format!("page is {} bytes, expected {}", page.len(), ctx.block_size),
            ));
        }
        let stored = read_u32(&page, page.len() - PAGE_TRAILER_SIZE);
        if stored != page_crc(&page, ctx.page_no) {
            return Err(HookError::corrupt(ctx.page_no, "page checksum mismatch"));
        }
        Ok(page)
    }
}

/// Outermost transform: checksum over the stored bytes
#[derive(Debug, Default)]
pub struct BlockChecksum;

impl PageTransform for BlockChecksum {
    fn name(&self) -> &'static str {
        "block_checksum"
    }

    fn encode(&self, ctx: &TransformContext, mut stored: Vec<u8>) -> HookResult<Vec<u8>> {
        let crc = block_checksum(&stored, ctx.page_no);
        let pos = stored.len() - 4;
        write_u32(&mut stored, pos, crc);
        Ok(stored)
    }

    fn decode(&self, ctx: &TransformContext, stored: Vec<u8>) -> HookResult<Vec<u8>> {
        if stored.len() < PAGE_TRAILER_SIZE {
            return Err(HookError::corrupt(ctx.page_no, "block shorter than its trailer"));
        }
        let expected = read_u32(&stored, stored.len() - 4);
        if expected != block_checksum(&stored, ctx.page_no) {
            return Err(HookError::corrupt(ctx.page_no, "block checksum mismatch"));
        }
        Ok(stored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page::{format_page, set_page_lsn, PageType};
    use crate::lsn::Lsn;

    fn ctx() -> TransformContext {
        TransformContext {
            page_no: 12,
            block_size: 1024,
        }
    }

    fn sample_page() -> Vec<u8> {
        let mut page = vec![0u8; 1024];
        set_page_lsn(&mut page, Lsn::new(1, 4096));
        format_page(&mut page, PageType::Full);
        page[40..60].copy_from_slice(&[0xabu8; 20]);
        page
    }

    #[test]
    fn test_page_crc_round_trip() {
        let stamped = PageCrc.encode(&ctx(), sample_page()).unwrap();
        assert!(PageCrc.decode(&ctx(), stamped).is_ok());
    }

    #[test]
    fn test_page_crc_ignores_key_version() {
        let mut stamped = PageCrc.encode(&ctx(), sample_page()).unwrap();
        // Key version of a full-layout page lives at 10
        stamped[10] = 9;
        assert!(PageCrc.decode(&ctx(), stamped).is_ok());
    }

    #[test]
    fn test_page_crc_detects_wrong_position() {
        let stamped = PageCrc.encode(&ctx(), sample_page()).unwrap();
        let moved = TransformContext {
            page_no: 13,
            block_size: 1024,
        };
        assert!(PageCrc.decode(&moved, stamped).unwrap_err().is_corruption());
    }

    #[test]
    fn test_block_checksum_catches_every_byte() {
        let stored = BlockChecksum.encode(&ctx(), sample_page()).unwrap();
        for i in 0..stored.len() {
            let mut bad = stored.clone();
            bad[i] ^= 0x01;
            assert!(BlockChecksum.decode(&ctx(), bad).is_err(), "byte {}", i);
        }
    }
}
