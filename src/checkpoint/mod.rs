//! Checkpoints
//!
//! A checkpoint records which part of the log recovery still needs: the
//! oldest rec_lsn among dirty pages, the oldest undo chain start among
//! active transactions and the log horizon when the checkpoint began,
//! whichever is lowest. That LSN goes into the control file and becomes the
//! floor below which the log may be purged.
//!
//! Checkpoint LSNs never decrease. A failed checkpoint is logged and leaves
//! the previous one in force.
//!
//! # Levels
//!
//! - `Indirect`: flush nothing, only record state
//! - `Medium`: flush pages dirtied before the previous checkpoint began, so
//!   hot pages do not hold the log back forever
//! - `Full`: flush every dirty page; used before a clean shutdown

mod background;
mod coordinator;
mod errors;

pub use background::Checkpointer;
pub use coordinator::{CheckpointManager, CheckpointOutcome};
pub use errors::{CheckpointError, CheckpointErrorCode, CheckpointResult};
