//! Page transforms applied around physical I/O
//!
//! A [`Pipeline`] is an ordered list of [`PageTransform`] objects. Writing
//! runs `encode` front to back on a scratch copy of the page; reading runs
//! `decode` back to front, so every step is undone by its own inverse:
//!
//! ```text
//! write: page CRC -> compress -> encrypt -> block checksum
//! read:  block checksum -> decrypt -> decompress -> page CRC
//! ```
//!
//! The cached page is never modified by a transform.

mod compress;
mod crc;
mod encrypt;
mod errors;
mod keys;

use std::fmt;
use std::sync::Arc;

use crate::page::PageNo;

pub use compress::{frame_flag, PageCompressor, COMPRESS_HEADER_SIZE, FLAG_STORED, FLAG_ZLIB};
pub use crc::{BlockChecksum, PageCrc};
pub use encrypt::{apply_keystream, derive_iv, CryptData, CryptScheme, PageEncryptor, IV_LEN};
pub use errors::{HookError, HookErrorCode, HookResult};
pub use keys::{FileKeyProvider, KeyProvider, StaticKeyProvider};

/// What a transform knows about the page it is working on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransformContext {
    pub page_no: PageNo,
    pub block_size: usize,
}

pub trait PageTransform: Send + Sync + fmt::Debug {
    fn name(&self) -> &'static str;

    fn encode(&self, ctx: &TransformContext, page: Vec<u8>) -> HookResult<Vec<u8>>;

    fn decode(&self, ctx: &TransformContext, stored: Vec<u8>) -> HookResult<Vec<u8>>;
}

#[derive(Debug, Default)]
pub struct Pipeline {
    transforms: Vec<Box<dyn PageTransform>>,
    variable_length: bool,
}

impl Pipeline {
    pub fn new(transforms: Vec<Box<dyn PageTransform>>) -> Self {
        Self {
            transforms,
            variable_length: false,
        }
    }

    /// The usual chain: page CRC, optional compression, optional
    /// encryption, block checksum
    pub fn standard(compress: bool, encryptor: Option<PageEncryptor>) -> Self {
        let mut transforms: Vec<Box<dyn PageTransform>> = vec![Box::new(PageCrc)];
        if compress {
            transforms.push(Box::new(PageCompressor::default()));
        }
        if let Some(enc) = encryptor {
            transforms.push(Box::new(enc));
        }
        transforms.push(Box::new(BlockChecksum));
        Self {
            transforms,
            variable_length: compress,
        }
    }

    /// True when stored images may differ in length from the page size
    pub fn is_variable_length(&self) -> bool {
        self.variable_length
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.transforms.iter().map(|t| t.name()).collect()
    }

    /// Transform a copy of `page` into the bytes that go to storage
    pub fn encode(&self, ctx: &TransformContext, page: &[u8]) -> HookResult<Vec<u8>> {
        self.transforms
            .iter()
            .try_fold(page.to_vec(), |buf, t| t.encode(ctx, buf))
    }

    /// Turn stored bytes back into a page
    pub fn decode(&self, ctx: &TransformContext, stored: Vec<u8>) -> HookResult<Vec<u8>> {
        let page = self
            .transforms
            .iter()
            .rev()
            .try_fold(stored, |buf, t| t.decode(ctx, buf))?;
        if page.len() != ctx.block_size {
            return Err(HookError::corrupt(
                ctx.page_no,
                format!("decoded page is {} bytes, expected {}", page.len(), ctx.block_size),
            ));
        }
        Ok(page)
    }
}

/// Shared handle, installed per table file in the page cache
pub type SharedPipeline = Arc<Pipeline>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lsn::Lsn;
    use crate::page::{format_page, set_page_lsn, PageType, FULL_HEADER_SIZE, PAGE_TRAILER_SIZE};
    use proptest::prelude::*;

    fn keys() -> Arc<dyn KeyProvider> {
        Arc::new(StaticKeyProvider::new().with_key(1, &[9u8; 32]).unwrap())
    }

    fn page_with(body: &[u8], block_size: usize, lsn: Lsn) -> Vec<u8> {
        let mut page = vec![0u8; block_size];
        set_page_lsn(&mut page, lsn);
        format_page(&mut page, PageType::Full);
        let n = body.len().min(block_size - FULL_HEADER_SIZE - PAGE_TRAILER_SIZE);
        page[FULL_HEADER_SIZE..FULL_HEADER_SIZE + n].copy_from_slice(&body[..n]);
        page
    }

    fn full_pipeline() -> Pipeline {
        let enc = PageEncryptor::new(CryptData::generate(1), keys()).unwrap();
        Pipeline::standard(true, Some(enc))
    }

    #[test]
    fn test_order_of_transforms() {
        assert_eq!(
            full_pipeline().names(),
            vec!["page_crc", "compress", "encrypt", "block_checksum"]
        );
        assert_eq!(Pipeline::standard(false, None).names(), vec!["page_crc", "block_checksum"]);
    }

    #[test]
    fn test_encode_leaves_input_untouched() {
        let page = page_with(b"some row bytes", 1024, Lsn::new(1, 64));
        let before = page.clone();
        let _ = full_pipeline().encode(&TransformContext { page_no: 4, block_size: 1024 }, &page);
        assert_eq!(page, before);
    }

    #[test]
    fn test_single_byte_flip_always_detected() {
        let ctx = TransformContext {
            page_no: 8,
            block_size: 1024,
        };
        for pipeline in [Pipeline::standard(false, None), full_pipeline()] {
            let page = page_with(&[3u8; 500], 1024, Lsn::new(2, 128));
            let stored = pipeline.encode(&ctx, &page).unwrap();
            for i in 0..stored.len() {
                let mut bad = stored.clone();
                bad[i] = bad[i].wrapping_add(1);
                let err = pipeline.decode(&ctx, bad).unwrap_err();
                assert!(err.is_corruption(), "flip at {} not reported as corruption", i);
            }
        }
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn prop_pipeline_round_trip(
            body in proptest::collection::vec(any::<u8>(), 0..900),
            page_no in 1u32..100_000,
            lsn in 1u64..u64::MAX,
            compress in any::<bool>(),
            encrypt in any::<bool>(),
        ) {
            let enc = if encrypt {
                Some(PageEncryptor::new(CryptData::generate(1), keys()).unwrap())
            } else {
                None
            };
            let pipeline = Pipeline::standard(compress, enc);
            let ctx = TransformContext { page_no, block_size: 1024 };
            let page = page_with(&body, 1024, Lsn::from_raw(lsn));
            let stored = pipeline.encode(&ctx, &page).unwrap();
            let mut decoded = pipeline.decode(&ctx, stored).unwrap();
            // The key version is stamped on the way out
            decoded[10..14].fill(0);
            let mut expected = page.clone();
            expected[10..14].fill(0);
            // Page CRC sits in the trailer of the decoded copy only
            let end = 1024 - PAGE_TRAILER_SIZE;
            decoded[end..].fill(0);
            expected[end..].fill(0);
            prop_assert_eq!(decoded, expected);
        }
    }
}
