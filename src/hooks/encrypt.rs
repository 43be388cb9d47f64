//! Page encryption (AES in counter mode)
//!
//! The counter block for a page is
//!
//! ```text
//! IV = iv_tail (4 bytes) || page_no (u32 LE) || lsn (u64 LE)
//! ```
//!
//! where `iv_tail` is the last four bytes of the table's stored IV. A page
//! rewritten after a change always carries a newer LSN, so the same key
//! stream never covers two different page images. Only the body between
//! the clear header and the trailer is encrypted; the key version used is
//! written into the header at the offset the page layout reserves for it.

use std::sync::Arc;

use ctr::cipher::{KeyIvInit, StreamCipher};
use rand::RngCore;

use super::errors::{HookError, HookResult};
use super::keys::KeyProvider;
use super::{PageTransform, TransformContext};
use crate::lsn::Lsn;
use crate::page::{page_lsn, page_type, read_u32, write_u32, PageLayout, PageNo, PAGE_TRAILER_SIZE};

type Aes128Ctr = ctr::Ctr128BE<aes::Aes128>;
type Aes192Ctr = ctr::Ctr128BE<aes::Aes192>;
type Aes256Ctr = ctr::Ctr128BE<aes::Aes256>;

pub const IV_LEN: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CryptScheme {
    None = 0,
    AesCtr = 1,
}

impl CryptScheme {
    pub fn from_u8(value: u8) -> HookResult<Self> {
        match value {
            0 => Ok(CryptScheme::None),
            1 => Ok(CryptScheme::AesCtr),
            other => Err(HookError::unsupported_scheme(other)),
        }
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

/// Per-table crypt material, persisted in the table header.
///
/// Generated once at creation and never regenerated for an existing table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CryptData {
    pub scheme: CryptScheme,
    pub iv: [u8; IV_LEN],
    pub key_version: u32,
}

impl CryptData {
    pub fn none() -> Self {
        Self {
            scheme: CryptScheme::None,
            iv: [0u8; IV_LEN],
            key_version: 0,
        }
    }

    pub fn generate(key_version: u32) -> Self {
        let mut iv = [0u8; IV_LEN];
        rand::thread_rng().fill_bytes(&mut iv);
        Self {
            scheme: CryptScheme::AesCtr,
            iv,
            key_version,
        }
    }

    pub fn is_encrypted(&self) -> bool {
        self.scheme != CryptScheme::None
    }

    pub fn iv_tail(&self) -> [u8; 4] {
        let mut tail = [0u8; 4];
        tail.copy_from_slice(&self.iv[IV_LEN - 4..]);
        tail
    }
}

pub fn derive_iv(iv_tail: [u8; 4], page_no: PageNo, lsn: Lsn) -> [u8; IV_LEN] {
    let mut iv = [0u8; IV_LEN];
    iv[0..4].copy_from_slice(&iv_tail);
    iv[4..8].copy_from_slice(&page_no.to_le_bytes());
    iv[8..16].copy_from_slice(&lsn.to_le_bytes());
    iv
}

/// XOR `data` with the key stream for (`page_no`, `lsn`); the same call
/// encrypts and decrypts
pub fn apply_keystream(
    key: &[u8],
    iv_tail: [u8; 4],
    page_no: PageNo,
    lsn: Lsn,
    data: &mut [u8],
) -> HookResult<()> {
    let iv = derive_iv(iv_tail, page_no, lsn);
    let bad_len = |_| HookError::key_length(key.len());
    match key.len() {
        16 => Aes128Ctr::new_from_slices(key, &iv)
            .map_err(bad_len)?
            .apply_keystream(data),
        24 => Aes192Ctr::new_from_slices(key, &iv)
            .map_err(bad_len)?
            .apply_keystream(data),
        32 => Aes256Ctr::new_from_slices(key, &iv)
            .map_err(bad_len)?
            .apply_keystream(data),
        other => return Err(HookError::key_length(other)),
    }
    Ok(())
}

#[derive(Debug)]
pub struct PageEncryptor {
    crypt: CryptData,
    keys: Arc<dyn KeyProvider>,
}

impl PageEncryptor {
    /// Fails when the scheme is unsupported or the write key is missing or
    /// has a bad length, so a table never opens half-configured
    pub fn new(crypt: CryptData, keys: Arc<dyn KeyProvider>) -> HookResult<Self> {
        if crypt.scheme != CryptScheme::AesCtr {
            return Err(HookError::unsupported_scheme(crypt.scheme.as_u8()));
        }
        let key = keys
            .key(crypt.key_version)
            .ok_or_else(|| HookError::key_missing(crypt.key_version))?;
        match key.len() {
            16 | 24 | 32 => Ok(Self { crypt, keys }),
            other => Err(HookError::key_length(other)),
        }
    }

    /// Encrypted region and key version position, `None` for blank pages
    fn region(
        &self,
        ctx: &TransformContext,
        stored: &[u8],
    ) -> HookResult<Option<(usize, usize)>> {
        let kind = page_type(stored).ok_or_else(|| HookError::corrupt(ctx.page_no, "unknown page type"))?;
        let layout = kind.layout();
        match (layout, layout.key_version_offset()) {
            (PageLayout::Blank, _) | (_, None) => Ok(None),
            (_, Some(kv)) => {
                let start = layout.header_size();
                if stored.len() < start + PAGE_TRAILER_SIZE {
                    return Err(HookError::corrupt(ctx.page_no, "encrypted block too short"));
                }
                Ok(Some((start, kv)))
            }
        }
    }
}

impl PageTransform for PageEncryptor {
    fn name(&self) -> &'static str {
        "encrypt"
    }

    fn encode(&self, ctx: &TransformContext, mut page: Vec<u8>) -> HookResult<Vec<u8>> {
        let (start, kv) = match self.region(ctx, &page)? {
            Some(region) => region,
            None => return Ok(page),
        };
        let key = self
            .keys
            .key(self.crypt.key_version)
            .ok_or_else(|| HookError::key_missing(self.crypt.key_version))?;
        write_u32(&mut page, kv, self.crypt.key_version);
        let lsn = page_lsn(&page);
        let end = page.len() - PAGE_TRAILER_SIZE;
        apply_keystream(&key, self.crypt.iv_tail(), ctx.page_no, lsn, &mut page[start..end])?;
        Ok(page)
    }

    fn decode(&self, ctx: &TransformContext, mut stored: Vec<u8>) -> HookResult<Vec<u8>> {
        let (start, kv) = match self.region(ctx, &stored)? {
            Some(region) => region,
            None => return Ok(stored),
        };
        let version = read_u32(&stored, kv);
        let key = self.keys.key(version).ok_or_else(|| {
            HookError::corrupt(ctx.page_no, format!("page names unknown key version {}", version))
        })?;
        let lsn = page_lsn(&stored);
        let end = stored.len() - PAGE_TRAILER_SIZE;
        apply_keystream(&key, self.crypt.iv_tail(), ctx.page_no, lsn, &mut stored[start..end])?;
        Ok(stored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hooks::keys::StaticKeyProvider;
    use crate::hooks::HookErrorCode;
    use crate::page::{format_page, set_page_lsn, PageType, DIRECTORY_HEADER_SIZE};

    fn keys() -> Arc<dyn KeyProvider> {
        Arc::new(
            StaticKeyProvider::new()
                .with_key(1, &[0x11u8; 16])
                .unwrap()
                .with_key(2, &[0x22u8; 32])
                .unwrap(),
        )
    }

    fn head_page(lsn: Lsn) -> Vec<u8> {
        let mut page = vec![0u8; 2048];
        set_page_lsn(&mut page, lsn);
        format_page(&mut page, PageType::Head);
        for (i, b) in page[DIRECTORY_HEADER_SIZE..1000].iter_mut().enumerate() {
            *b = (i % 251) as u8;
        }
        page
    }

    #[test]
    fn test_keystream_depends_on_lsn() {
        let key = [0x42u8; 16];
        let tail = [1, 2, 3, 4];
        let plain = vec![0x5au8; 256];

        let mut data = plain.clone();
        apply_keystream(&key, tail, 42, Lsn::from_raw(1000), &mut data).unwrap();
        assert_ne!(data, plain);

        let mut same = data.clone();
        apply_keystream(&key, tail, 42, Lsn::from_raw(1000), &mut same).unwrap();
        assert_eq!(same, plain);

        let mut other = data.clone();
        apply_keystream(&key, tail, 42, Lsn::from_raw(1001), &mut other).unwrap();
        assert_ne!(other, plain);
    }

    #[test]
    fn test_page_round_trip_keeps_header_clear() {
        let enc = PageEncryptor::new(CryptData::generate(1), keys()).unwrap();
        let ctx = TransformContext {
            page_no: 9,
            block_size: 2048,
        };
        let page = head_page(Lsn::new(1, 300));
        let stored = enc.encode(&ctx, page.clone()).unwrap();
        assert_eq!(&stored[..16], &page[..16]);
        assert_eq!(read_u32(&stored, 16), 1);
        assert_ne!(&stored[DIRECTORY_HEADER_SIZE..1000], &page[DIRECTORY_HEADER_SIZE..1000]);

        let mut decoded = enc.decode(&ctx, stored).unwrap();
        decoded[16..20].fill(0);
        assert_eq!(decoded, page);
    }

    #[test]
    fn test_blank_page_passes_through() {
        let enc = PageEncryptor::new(CryptData::generate(1), keys()).unwrap();
        let ctx = TransformContext {
            page_no: 1,
            block_size: 2048,
        };
        let page = vec![0u8; 2048];
        assert_eq!(enc.encode(&ctx, page.clone()).unwrap(), page);
    }

    #[test]
    fn test_unknown_key_version_is_corruption() {
        let enc = PageEncryptor::new(CryptData::generate(1), keys()).unwrap();
        let ctx = TransformContext {
            page_no: 9,
            block_size: 2048,
        };
        let mut stored = enc.encode(&ctx, head_page(Lsn::new(1, 64))).unwrap();
        write_u32(&mut stored, 16, 99);
        assert!(enc.decode(&ctx, stored).unwrap_err().is_corruption());
    }

    #[test]
    fn test_construction_checks() {
        assert_eq!(
            PageEncryptor::new(CryptData::none(), keys()).unwrap_err().code(),
            HookErrorCode::AriaCryptUnsupportedScheme
        );
        assert_eq!(
            PageEncryptor::new(CryptData::generate(5), keys()).unwrap_err().code(),
            HookErrorCode::AriaCryptKeyMissing
        );
        assert!(CryptScheme::from_u8(9).is_err());
    }
}
