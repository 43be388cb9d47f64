//! # Remote Table Storage
//!
//! Tables can be copied to an object backend and opened from there
//! read-only. Each page becomes one object; the header page and the table
//! definition get objects of their own. See `store` for the key layout.
//!
//! The backend is a trait so that other object stores can be plugged in;
//! `LocalBackend` keeps objects in a directory tree.

mod backend;
mod copy;
mod errors;
mod local;
mod store;

pub use backend::ObjectBackend;
pub use copy::{
    copy_from_remote, copy_to_remote, delete_from_remote, open_remote, CopyOptions, CopyReport, RemoteTable,
    TableDefinition,
};
pub use errors::{RemoteError, RemoteResult};
pub use local::LocalBackend;
pub use store::{block_key, BlockKind, RemoteBlockStore, DEFINITION_OBJECT, HEADER_OBJECT};
