//! The table header page
//!
//! Page 0 of the index file describes the table so tools can read it
//! without a running engine. Field positions differ between format
//! versions, so they are looked up in a [`HeaderLayout`] keyed by the
//! version stored right after the magic. Version 1 predates encryption;
//! version 2 adds the crypt fields and is the one written.
//!
//! The header page is never passed through the page transforms. It is
//! written with a positioned write and fsynced, and carries its own CRC at
//! the end of the layout.

use std::fs::File;
use std::os::unix::fs::FileExt;

use chrono::{DateTime, TimeZone, Utc};

use super::errors::{TableError, TableResult};
use super::options::{KeyDef, RowFormat, TableOptions};
use crate::hooks::{CryptData, CryptScheme, IV_LEN};
use crate::lsn::Lsn;
use crate::page::{read_u16, read_u32, write_u16, write_u32, PageNo};

pub const HEADER_MAGIC: &[u8; 8] = b"ARIATBL\0";
pub const HEADER_VERSION: u16 = 2;

const MAGIC_LEN: usize = 8;
const VERSION_OFFSET: usize = 8;

const FLAG_TRANSACTIONAL: u8 = 0x01;
const FLAG_COMPRESSED: u8 = 0x02;

/// Byte offsets of every header field for one format version
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeaderLayout {
    pub version: u16,
    pub block_size: usize,
    pub row_format: usize,
    pub flags: usize,
    /// `None` when the version has no crypt fields
    pub crypt_scheme: Option<usize>,
    pub crypt_key_version: Option<usize>,
    pub crypt_iv: Option<usize>,
    pub key_offset: usize,
    pub key_len: usize,
    pub key_unique: usize,
    pub reclength: usize,
    pub row_count: usize,
    pub index_root: usize,
    pub index_pages: usize,
    pub data_pages: usize,
    pub open_count: usize,
    pub crashed: usize,
    pub free_head: usize,
    pub data_file_length: usize,
    pub create_lsn: usize,
    pub create_time: usize,
    pub crc: usize,
}

const LAYOUT_V1: HeaderLayout = HeaderLayout {
    version: 1,
    block_size: 10,
    row_format: 14,
    flags: 15,
    crypt_scheme: None,
    crypt_key_version: None,
    crypt_iv: None,
    key_offset: 16,
    key_len: 18,
    key_unique: 20,
    reclength: 21,
    row_count: 25,
    index_root: 33,
    index_pages: 37,
    data_pages: 41,
    open_count: 45,
    crashed: 49,
    free_head: 50,
    data_file_length: 58,
    create_lsn: 66,
    create_time: 74,
    crc: 82,
};

const LAYOUT_V2: HeaderLayout = HeaderLayout {
    version: 2,
    block_size: 10,
    row_format: 14,
    flags: 15,
    crypt_scheme: Some(16),
    crypt_key_version: Some(17),
    crypt_iv: Some(21),
    key_offset: 37,
    key_len: 39,
    key_unique: 41,
    reclength: 42,
    row_count: 46,
    index_root: 54,
    index_pages: 58,
    data_pages: 62,
    open_count: 66,
    crashed: 70,
    free_head: 71,
    data_file_length: 79,
    create_lsn: 87,
    create_time: 95,
    crc: 103,
};

impl HeaderLayout {
    pub fn for_version(version: u16) -> Option<&'static HeaderLayout> {
        match version {
            1 => Some(&LAYOUT_V1),
            2 => Some(&LAYOUT_V2),
            _ => None,
        }
    }

    pub fn current() -> &'static HeaderLayout {
        &LAYOUT_V2
    }

    /// Bytes covered by the layout, CRC included
    pub fn size(&self) -> usize {
        self.crc + 4
    }
}

fn read_u64(buf: &[u8], pos: usize) -> u64 {
    let mut b = [0u8; 8];
    b.copy_from_slice(&buf[pos..pos + 8]);
    u64::from_le_bytes(b)
}

fn write_u64(buf: &mut [u8], pos: usize, value: u64) {
    buf[pos..pos + 8].copy_from_slice(&value.to_le_bytes());
}

/// Decoded header page
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableHeader {
    pub version: u16,
    pub block_size: u32,
    pub row_format: RowFormat,
    pub transactional: bool,
    pub compressed: bool,
    pub crypt: CryptData,
    pub key: Option<KeyDef>,
    pub reclength: u32,
    pub row_count: u64,
    /// B-tree root, 0 for an empty index
    pub index_root: PageNo,
    /// Next unused index page
    pub index_pages: PageNo,
    /// Next unused data page (BLOCK_RECORD)
    pub data_pages: PageNo,
    pub open_count: u32,
    pub crashed: bool,
    /// Head of the deleted-record chain (FIXED) or free block list
    /// (DYNAMIC); `u64::MAX` when empty
    pub free_head: u64,
    /// Logical end of a FIXED or DYNAMIC data file
    pub data_file_length: u64,
    pub create_lsn: Lsn,
    pub create_time: DateTime<Utc>,
}

pub const NO_FREE: u64 = u64::MAX;

impl TableHeader {
    pub fn new(options: &TableOptions, crypt: CryptData, create_lsn: Lsn) -> Self {
        Self {
            version: HEADER_VERSION,
            block_size: options.block_size,
            row_format: options.row_format,
            transactional: options.transactional,
            compressed: false,
            crypt,
            key: options.key,
            reclength: options.reclength,
            row_count: 0,
            index_root: 0,
            index_pages: 1,
            data_pages: 0,
            open_count: 0,
            crashed: false,
            free_head: NO_FREE,
            data_file_length: 0,
            create_lsn,
            create_time: Utc::now(),
        }
    }

    /// The definition this header was created from
    pub fn options(&self) -> TableOptions {
        TableOptions {
            row_format: self.row_format,
            block_size: self.block_size,
            transactional: self.transactional,
            encrypted: self.crypt.is_encrypted(),
            key: self.key,
            reclength: self.reclength,
        }
    }

    /// Encode into a page of `block_size` bytes with the current layout
    pub fn encode(&self) -> TableResult<Vec<u8>> {
        self.encode_with(HeaderLayout::current())
    }

    pub fn encode_with(&self, layout: &HeaderLayout) -> TableResult<Vec<u8>> {
        let mut page = vec![0u8; self.block_size as usize];
        if page.len() < layout.size() {
            return Err(TableError::corrupt("block size too small for the header"));
        }
        page[..MAGIC_LEN].copy_from_slice(HEADER_MAGIC);
        write_u16(&mut page, VERSION_OFFSET, layout.version);
        write_u32(&mut page, layout.block_size, self.block_size);
        page[layout.row_format] = self.row_format.as_u8();
        let mut flags = 0u8;
        if self.transactional {
            flags |= FLAG_TRANSACTIONAL;
        }
        if self.compressed {
            flags |= FLAG_COMPRESSED;
        }
        page[layout.flags] = flags;

        match (layout.crypt_scheme, layout.crypt_key_version, layout.crypt_iv) {
            (Some(scheme), Some(kv), Some(iv)) => {
                page[scheme] = self.crypt.scheme.as_u8();
                write_u32(&mut page, kv, self.crypt.key_version);
                page[iv..iv + IV_LEN].copy_from_slice(&self.crypt.iv);
            }
            _ if self.crypt.is_encrypted() => {
                return Err(TableError::unsupported(format!(
                    "header version {} cannot describe an encrypted table",
                    layout.version
                )))
            }
            _ => {}
        }

        let (key_offset, key_len, unique) = match self.key {
            Some(k) => (k.offset, k.len, k.unique),
            None => (0, 0, false),
        };
        write_u16(&mut page, layout.key_offset, key_offset);
        write_u16(&mut page, layout.key_len, key_len);
        page[layout.key_unique] = unique as u8;
        write_u32(&mut page, layout.reclength, self.reclength);
        write_u64(&mut page, layout.row_count, self.row_count);
        write_u32(&mut page, layout.index_root, self.index_root);
        write_u32(&mut page, layout.index_pages, self.index_pages);
        write_u32(&mut page, layout.data_pages, self.data_pages);
        write_u32(&mut page, layout.open_count, self.open_count);
        page[layout.crashed] = self.crashed as u8;
        write_u64(&mut page, layout.free_head, self.free_head);
        write_u64(&mut page, layout.data_file_length, self.data_file_length);
        write_u64(&mut page, layout.create_lsn, self.create_lsn.raw());
        write_u64(
            &mut page,
            layout.create_time,
            self.create_time.timestamp_millis() as u64,
        );
        let crc = crc32fast::hash(&page[..layout.crc]);
        write_u32(&mut page, layout.crc, crc);
        Ok(page)
    }

    pub fn decode(page: &[u8]) -> TableResult<Self> {
        if page.len() < VERSION_OFFSET + 2 || &page[..MAGIC_LEN] != HEADER_MAGIC {
            return Err(TableError::corrupt("not a table header"));
        }
        let version = read_u16(page, VERSION_OFFSET);
        let layout = HeaderLayout::for_version(version)
            .ok_or_else(|| TableError::corrupt(format!("unknown header version {}", version)))?;
        if page.len() < layout.size() {
            return Err(TableError::corrupt("header page truncated"));
        }
        if read_u32(page, layout.crc) != crc32fast::hash(&page[..layout.crc]) {
            return Err(TableError::corrupt("header checksum mismatch"));
        }

        let block_size = read_u32(page, layout.block_size);
        let row_format = RowFormat::from_u8(page[layout.row_format]).ok_or_else(|| {
            TableError::corrupt(format!("unknown row format {}", page[layout.row_format]))
        })?;
        let flags = page[layout.flags];

        let crypt = match (layout.crypt_scheme, layout.crypt_key_version, layout.crypt_iv) {
            (Some(scheme), Some(kv), Some(iv)) => {
                let mut bytes = [0u8; IV_LEN];
                bytes.copy_from_slice(&page[iv..iv + IV_LEN]);
                CryptData {
                    scheme: CryptScheme::from_u8(page[scheme])?,
                    iv: bytes,
                    key_version: read_u32(page, kv),
                }
            }
            _ => CryptData::none(),
        };

        let key_len = read_u16(page, layout.key_len);
        let key = if key_len == 0 {
            None
        } else {
            Some(KeyDef {
                offset: read_u16(page, layout.key_offset),
                len: key_len,
                unique: page[layout.key_unique] != 0,
            })
        };

        let millis = read_u64(page, layout.create_time) as i64;
        let create_time = Utc
            .timestamp_millis_opt(millis)
            .single()
            .ok_or_else(|| TableError::corrupt(format!("bad create time {}", millis)))?;

        Ok(Self {
            version,
            block_size,
            row_format,
            transactional: flags & FLAG_TRANSACTIONAL != 0,
            compressed: flags & FLAG_COMPRESSED != 0,
            crypt,
            key,
            reclength: read_u32(page, layout.reclength),
            row_count: read_u64(page, layout.row_count),
            index_root: read_u32(page, layout.index_root),
            index_pages: read_u32(page, layout.index_pages),
            data_pages: read_u32(page, layout.data_pages),
            open_count: read_u32(page, layout.open_count),
            crashed: page[layout.crashed] != 0,
            free_head: read_u64(page, layout.free_head),
            data_file_length: read_u64(page, layout.data_file_length),
            create_lsn: Lsn::from_raw(read_u64(page, layout.create_lsn)),
            create_time,
        })
    }

    /// Read the header from page 0 of an index file. Only the fixed prefix
    /// is needed to find the block size.
    pub fn read_from(file: &File) -> TableResult<Self> {
        let mut head = vec![0u8; HeaderLayout::current().size().max(LAYOUT_V1.size())];
        file.read_exact_at(&mut head, 0)
            .map_err(|e| TableError::io("cannot read table header", e))?;
        let block_size = match HeaderLayout::for_version(read_u16(&head, VERSION_OFFSET)) {
            Some(layout) => read_u32(&head, layout.block_size) as usize,
            None => return Self::decode(&head),
        };
        if block_size < head.len() {
            return Self::decode(&head);
        }
        let mut page = vec![0u8; block_size];
        file.read_exact_at(&mut page, 0)
            .map_err(|e| TableError::io("cannot read table header", e))?;
        Self::decode(&page)
    }

    /// Write and fsync page 0 of an index file
    pub fn write_to(&self, file: &File) -> TableResult<()> {
        let page = self.encode()?;
        file.write_all_at(&page, 0)
            .map_err(|e| TableError::io("cannot write table header", e))?;
        file.sync_data()
            .map_err(|e| TableError::io("cannot sync table header", e))
    }
}
