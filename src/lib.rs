//! ariadb - a crash-safe, page-oriented storage engine
//!
//! Tables live in fixed-size pages that pass through a page cache and a
//! pipeline of page transforms (CRC, compression, encryption) on their way
//! to disk. Every change to a transactional table is written to the log
//! first; checkpoints bound how much of the log recovery has to read, and
//! recovery replays and rolls back whatever a crash interrupted.
//!
//! [`engine::Engine`] wires the subsystems together.

pub mod checkpoint;
pub mod cli;
pub mod config;
pub mod control;
pub mod crash_point;
pub mod engine;
pub mod hooks;
pub mod lsn;
pub mod observability;
pub mod page;
pub mod pagecache;
pub mod recovery;
pub mod remote;
pub mod table;
pub mod trn;
pub mod wal;
