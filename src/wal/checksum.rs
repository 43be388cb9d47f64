//! CRC32 checksums for log records and file headers
//!
//! Record checksums are seeded with the record's LSN, so bytes left over at
//! an offset from an older incarnation of the file never validate at a new
//! position.

use crc32fast::Hasher;

use crate::lsn::Lsn;

/// Computes a CRC32 checksum over the provided data.
///
/// Used for file headers and other bytes whose position is fixed.
///
/// # Arguments
///
/// * `data` - The bytes to compute the checksum over
pub fn compute_checksum(data: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(data);
    hasher.finalize()
}

/// CRC32 over `data`, seeded with the LSN the data is stored at
pub fn record_checksum(lsn: Lsn, data: &[u8]) -> u32 {
    let seed = (lsn.raw() ^ (lsn.raw() >> 32)) as u32;
    let mut hasher = Hasher::new_with_initial(seed);
    hasher.update(data);
    hasher.finalize()
}

/// Verifies that the computed checksum matches the expected checksum.
///
/// # Returns
///
/// `true` if the checksum matches, `false` otherwise
pub fn verify_checksum(data: &[u8], expected: u32) -> bool {
    compute_checksum(data) == expected
}
