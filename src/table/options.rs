//! Table definitions
//!
//! `TableOptions` is what a caller passes to create a table. It is also the
//! table definition object stored next to a table copied to a remote
//! backend, so it serializes to JSON.

use serde::{Deserialize, Serialize};

use super::errors::{TableError, TableResult};
use crate::config::validate_block_size;

/// Row formats; each has its own packing and space reuse rules
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum RowFormat {
    /// Fixed-length records, deleted slots chained for reuse
    Fixed = 0,
    /// Variable-length blocks, first-fit reuse with splitting
    Dynamic = 1,
    /// Paged rows split into fragments; may be transactional
    BlockRecord = 2,
}

impl RowFormat {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(RowFormat::Fixed),
            1 => Some(RowFormat::Dynamic),
            2 => Some(RowFormat::BlockRecord),
            _ => None,
        }
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn name(self) -> &'static str {
        match self {
            RowFormat::Fixed => "FIXED",
            RowFormat::Dynamic => "DYNAMIC",
            RowFormat::BlockRecord => "BLOCK_RECORD",
        }
    }

    /// Only self-contained fixed blocks can live on a remote backend
    pub fn supports_remote(self) -> bool {
        self == RowFormat::BlockRecord
    }
}

/// The indexed key: a fixed-length byte range of every row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyDef {
    pub offset: u16,
    pub len: u16,
    #[serde(default)]
    pub unique: bool,
}

impl KeyDef {
    pub fn extract<'a>(&self, row: &'a [u8]) -> TableResult<&'a [u8]> {
        let start = self.offset as usize;
        let end = start + self.len as usize;
        row.get(start..end).ok_or_else(|| {
            TableError::invalid_row(format!(
                "row of {} bytes has no key at {}..{}",
                row.len(),
                start,
                end
            ))
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableOptions {
    pub row_format: RowFormat,

    /// Page size for BLOCK_RECORD data and for index pages
    #[serde(default = "default_block_size")]
    pub block_size: u32,

    /// Log changes and take part in transactions (BLOCK_RECORD only)
    #[serde(default)]
    pub transactional: bool,

    /// Encrypt pages with the engine's latest key
    #[serde(default)]
    pub encrypted: bool,

    #[serde(default)]
    pub key: Option<KeyDef>,

    /// Record length for FIXED tables
    #[serde(default)]
    pub reclength: u32,
}

fn default_block_size() -> u32 {
    8192
}

impl TableOptions {
    pub fn block_record() -> Self {
        Self {
            row_format: RowFormat::BlockRecord,
            block_size: default_block_size(),
            transactional: true,
            encrypted: false,
            key: None,
            reclength: 0,
        }
    }

    pub fn fixed(reclength: u32) -> Self {
        Self {
            row_format: RowFormat::Fixed,
            transactional: false,
            reclength,
            ..Self::block_record()
        }
    }

    pub fn dynamic() -> Self {
        Self {
            row_format: RowFormat::Dynamic,
            transactional: false,
            ..Self::block_record()
        }
    }

    pub fn with_key(mut self, offset: u16, len: u16, unique: bool) -> Self {
        self.key = Some(KeyDef {
            offset,
            len,
            unique,
        });
        self
    }

    pub fn with_block_size(mut self, block_size: u32) -> Self {
        self.block_size = block_size;
        self
    }

    pub fn with_encryption(mut self) -> Self {
        self.encrypted = true;
        self
    }

    pub fn non_transactional(mut self) -> Self {
        self.transactional = false;
        self
    }

    pub fn validate(&self) -> TableResult<()> {
        validate_block_size(self.block_size)
            .map_err(|e| TableError::invalid_row(e.message().to_string()))?;
        if self.transactional && self.row_format != RowFormat::BlockRecord {
            return Err(TableError::unsupported(format!(
                "{} tables cannot be transactional",
                self.row_format.name()
            )));
        }
        if self.encrypted && self.row_format != RowFormat::BlockRecord {
            return Err(TableError::unsupported(format!(
                "{} tables cannot be encrypted",
                self.row_format.name()
            )));
        }
        if self.row_format == RowFormat::Fixed && self.reclength == 0 {
            return Err(TableError::invalid_row("FIXED tables need a record length"));
        }
        if let Some(key) = self.key {
            if key.len == 0 {
                return Err(TableError::invalid_row("key length must be positive"));
            }
            if self.row_format == RowFormat::Fixed
                && key.offset as u32 + key.len as u32 > self.reclength
            {
                return Err(TableError::invalid_row("key lies outside the record"));
            }
            // An index page must hold at least four entries
            let entry = key.len as usize + super::btree::ENTRY_ROWID_SIZE + 4;
            if entry * 4 > self.block_size as usize / 2 {
                return Err(TableError::invalid_row("key too long for the block size"));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_definition_json() {
        let opts = TableOptions::block_record().with_key(0, 8, true);
        let json = serde_json::to_string(&opts).unwrap();
        assert!(json.contains("\"row_format\":\"block_record\""));
        let back: TableOptions = serde_json::from_str(&json).unwrap();
        assert_eq!(back, opts);

        let minimal: TableOptions = serde_json::from_str(r#"{"row_format":"dynamic"}"#).unwrap();
        assert_eq!(minimal.block_size, 8192);
        assert!(!minimal.transactional);
    }

    #[test]
    fn test_only_block_record_is_transactional() {
        let mut opts = TableOptions::dynamic();
        opts.transactional = true;
        assert!(opts.validate().is_err());
        assert!(TableOptions::block_record().validate().is_ok());
        assert!(TableOptions::fixed(0).validate().is_err());
        assert!(TableOptions::fixed(16).with_key(10, 8, false).validate().is_err());
    }

    #[test]
    fn test_key_extraction() {
        let key = KeyDef {
            offset: 2,
            len: 3,
            unique: false,
        };
        assert_eq!(key.extract(b"abcdefg").unwrap(), b"cde");
        assert!(key.extract(b"abcd").is_err());
    }
}
