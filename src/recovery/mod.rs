//! Crash recovery
//!
//! Recovery brings every transactional table back to the state the log
//! describes: changes of committed transactions are all present, changes
//! of transactions that never finished are all gone.
//!
//! # Phases
//!
//! `SCAN_FROM_CHECKPOINT → REDO_PHASE → UNDO_PHASE → DONE`
//!
//! Redo is idempotent: a page's stamped LSN tells whether a record's change
//! is already on it, so running recovery twice gives the same pages as
//! running it once. Undo logs a CLR per compensated record, which makes an
//! interrupted undo resumable.
//!
//! # Failure
//!
//! A record that cannot be decoded stops recovery with
//! `ARIA_RECOVERY_PARSE_ERROR`, naming the LSN and record type. Best-effort
//! mode turns such records and per-page redo errors into warnings, for
//! forensic use; the report lists every warning.

mod errors;
mod replay;
mod startup;
mod undo;
mod verifier;

pub use errors::{RecoveryError, RecoveryErrorCode, RecoveryResult};
pub use replay::{RecoveredTrn, TrnTable};
pub use startup::{RecoveryManager, RecoveryOptions, RecoveryPhase, RecoveryReport};
pub use verifier::TableCheck;
