//! Transaction log
//!
//! An append-only sequence of log files. Every record gets an LSN when it
//! is appended; the LSN is the record's position, so ordering across files
//! is plain numeric ordering.
//!
//! # Invariants
//!
//! - LSNs are strictly increasing, with no gaps between records
//! - A page is never written to a table file before the log is durable up
//!   to the LSN stamped on that page (enforced by the page cache through
//!   [`FlushGuard`](crate::pagecache::FlushGuard))
//! - Every record carries a checksum seeded with its LSN
//! - A file is only purged when it is not the current file and lies
//!   entirely below the checkpoint's retained LSN

mod checksum;
mod errors;
mod file;
mod payload;
mod reader;
mod record;
mod writer;

pub use checksum::{compute_checksum, record_checksum, verify_checksum};
pub use errors::{WalError, WalErrorCode, WalResult};
pub use file::{file_name, list_files, sync_dir, LogFileHeader, LOG_HEADER_SIZE};
pub use payload::{
    CheckpointRecord, CheckpointTable, CheckpointTrn, ClrRecord, DirtyPageEntry, FileIdRecord,
    PageOp, RowRecord, TableId,
};
pub use reader::WalScanner;
pub use record::{RecordType, WalRecord, FRAME_HEADER_SIZE, MIN_FRAME_SIZE};
pub use writer::{Wal, WalOptions};
