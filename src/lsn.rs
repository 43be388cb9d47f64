//! Log sequence numbers
//!
//! An LSN names a byte position in the transaction log. The high 32 bits
//! carry the log file number and the low 32 bits the offset inside that
//! file, so plain numeric ordering is also log order across rotations.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Log sequence number: `(file_no << 32) | offset`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct Lsn(u64);

impl Lsn {
    /// Sentinel for "no LSN": never assigned to a record
    pub const IMPOSSIBLE: Lsn = Lsn(0);

    /// Upper bound for open-ended ranges
    pub const MAX: Lsn = Lsn(u64::MAX);

    /// Build an LSN from a file number and an offset inside that file
    pub const fn new(file_no: u32, offset: u32) -> Self {
        Lsn(((file_no as u64) << 32) | offset as u64)
    }

    /// Wrap a raw packed value
    pub const fn from_raw(raw: u64) -> Self {
        Lsn(raw)
    }

    /// Packed representation, as stored in pages and records
    pub const fn raw(self) -> u64 {
        self.0
    }

    /// Log file number
    pub const fn file_no(self) -> u32 {
        (self.0 >> 32) as u32
    }

    /// Offset inside the log file
    pub const fn offset(self) -> u32 {
        self.0 as u32
    }

    /// True for the "empty" sentinel
    pub const fn is_impossible(self) -> bool {
        self.0 == 0
    }

    /// Same file, offset advanced by `len` bytes
    pub fn advance(self, len: u32) -> Self {
        Lsn::new(self.file_no(), self.offset() + len)
    }

    pub fn to_le_bytes(self) -> [u8; 8] {
        self.0.to_le_bytes()
    }

    pub fn from_le_bytes(bytes: [u8; 8]) -> Self {
        Lsn(u64::from_le_bytes(bytes))
    }

    /// Read an LSN stored little-endian at `pos`
    ///
    /// Callers guarantee `pos + 8 <= buf.len()`.
    pub fn read_at(buf: &[u8], pos: usize) -> Self {
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&buf[pos..pos + 8]);
        Lsn::from_le_bytes(bytes)
    }

    /// Store an LSN little-endian at `pos`
    pub fn write_at(self, buf: &mut [u8], pos: usize) {
        buf[pos..pos + 8].copy_from_slice(&self.to_le_bytes());
    }

    /// Parse the textual forms accepted by the tools: a decimal raw value,
    /// `0x` hex raw value, `file:offset`, or the display form
    /// `(file,0xoffset)`.
    pub fn parse(text: &str) -> Option<Lsn> {
        let text = text.trim();
        if let Some(inner) = text.strip_prefix('(').and_then(|t| t.strip_suffix(')')) {
            let (file, offset) = inner.split_once(',')?;
            let file = file.trim().parse::<u32>().ok()?;
            return Some(Lsn::new(file, parse_u32(offset.trim())?));
        }
        if let Some((file, offset)) = text.split_once(':') {
            let file = file.trim().parse::<u32>().ok()?;
            let offset = parse_u32(offset.trim())?;
            return Some(Lsn::new(file, offset));
        }
        if let Some(hex) = text.strip_prefix("0x") {
            return u64::from_str_radix(hex, 16).ok().map(Lsn);
        }
        text.parse::<u64>().ok().map(Lsn)
    }
}

fn parse_u32(text: &str) -> Option<u32> {
    match text.strip_prefix("0x") {
        Some(hex) => u32::from_str_radix(hex, 16).ok(),
        None => text.parse().ok(),
    }
}

impl fmt::Display for Lsn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({},0x{:x})", self.file_no(), self.offset())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_packing() {
        let lsn = Lsn::new(3, 0x1234);
        assert_eq!(lsn.file_no(), 3);
        assert_eq!(lsn.offset(), 0x1234);
        assert_eq!(lsn.raw(), (3u64 << 32) | 0x1234);
    }

    #[test]
    fn test_ordering_across_files() {
        let end_of_first = Lsn::new(1, u32::MAX);
        let start_of_second = Lsn::new(2, 64);
        assert!(end_of_first < start_of_second);
    }

    #[test]
    fn test_sentinels() {
        assert!(Lsn::IMPOSSIBLE.is_impossible());
        assert!(!Lsn::new(1, 64).is_impossible());
        assert!(Lsn::MAX > Lsn::new(u32::MAX - 1, 0));
    }

    #[test]
    fn test_parse_forms() {
        assert_eq!(Lsn::parse("2:64"), Some(Lsn::new(2, 64)));
        assert_eq!(Lsn::parse("2:0x40"), Some(Lsn::new(2, 64)));
        assert_eq!(Lsn::parse("0x200000040"), Some(Lsn::new(2, 64)));
        assert_eq!(Lsn::parse(&Lsn::new(2, 64).raw().to_string()), Some(Lsn::new(2, 64)));
        assert_eq!(Lsn::parse("(2,0x40)"), Some(Lsn::new(2, 64)));
        assert_eq!(Lsn::parse(&Lsn::new(7, 0x1f0).to_string()), Some(Lsn::new(7, 0x1f0)));
        assert_eq!(Lsn::parse("nope"), None);
    }

    #[test]
    fn test_display() {
        assert_eq!(Lsn::new(1, 255).to_string(), "(1,0xff)");
    }

    #[test]
    fn test_byte_round_trip_in_buffer() {
        let mut buf = [0u8; 16];
        Lsn::new(7, 99).write_at(&mut buf, 4);
        assert_eq!(Lsn::read_at(&buf, 4), Lsn::new(7, 99));
    }
}
