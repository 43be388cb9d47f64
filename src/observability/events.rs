//! Observable engine events
//!
//! Every structured log line the engine emits names one of these events.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    // Lifecycle
    EngineOpen,
    EngineClose,
    ConfigLoaded,

    // Transaction log
    LogOpen,
    LogRotate,
    LogFlush,
    LogPurge,
    LogTornTail,
    LogCorruption,

    // Page cache
    PageCorrupt,
    PageIoError,
    PageEvict,

    // Tables
    TableCreate,
    TableOpen,
    TableClose,
    TableCrashed,
    TableRepair,

    // Transactions
    TrnCommit,
    TrnRollback,

    // Checkpoint
    CheckpointStart,
    CheckpointComplete,
    CheckpointFailed,

    // Recovery
    RecoveryStart,
    RecoveryScan,
    RecoveryRedoBegin,
    RecoveryRedoComplete,
    RecoveryUndoBegin,
    RecoveryUndoComplete,
    RecoveryWarning,
    RecoveryComplete,
    RecoveryFailed,

    // Remote storage
    RemoteCopyStart,
    RemoteCopyComplete,
}

impl Event {
    pub fn as_str(&self) -> &'static str {
        match self {
            Event::EngineOpen => "ENGINE_OPEN",
            Event::EngineClose => "ENGINE_CLOSE",
            Event::ConfigLoaded => "CONFIG_LOADED",

            Event::LogOpen => "LOG_OPEN",
            Event::LogRotate => "LOG_ROTATE",
            Event::LogFlush => "LOG_FLUSH",
            Event::LogPurge => "LOG_PURGE",
            Event::LogTornTail => "LOG_TORN_TAIL",
            Event::LogCorruption => "LOG_CORRUPTION",

            Event::PageCorrupt => "PAGE_CORRUPT",
            Event::PageIoError => "PAGE_IO_ERROR",
            Event::PageEvict => "PAGE_EVICT",

            Event::TableCreate => "TABLE_CREATE",
            Event::TableOpen => "TABLE_OPEN",
            Event::TableClose => "TABLE_CLOSE",
            Event::TableCrashed => "TABLE_CRASHED",
            Event::TableRepair => "TABLE_REPAIR",

            Event::TrnCommit => "TRN_COMMIT",
            Event::TrnRollback => "TRN_ROLLBACK",

            Event::CheckpointStart => "CHECKPOINT_BEGIN",
            Event::CheckpointComplete => "CHECKPOINT_COMPLETE",
            Event::CheckpointFailed => "CHECKPOINT_FAILED",

            Event::RecoveryStart => "RECOVERY_BEGIN",
            Event::RecoveryScan => "RECOVERY_SCAN",
            Event::RecoveryRedoBegin => "REDO_BEGIN",
            Event::RecoveryRedoComplete => "REDO_COMPLETE",
            Event::RecoveryUndoBegin => "UNDO_BEGIN",
            Event::RecoveryUndoComplete => "UNDO_COMPLETE",
            Event::RecoveryWarning => "RECOVERY_WARNING",
            Event::RecoveryComplete => "RECOVERY_COMPLETE",
            Event::RecoveryFailed => "RECOVERY_FAILED",

            Event::RemoteCopyStart => "REMOTE_COPY_BEGIN",
            Event::RemoteCopyComplete => "REMOTE_COPY_COMPLETE",
        }
    }

    /// Events that leave a table or the engine unusable
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Event::LogCorruption | Event::RecoveryFailed | Event::TableCrashed
        )
    }

    /// Events that signal a degraded but continuing state
    pub fn is_warning(&self) -> bool {
        matches!(
            self,
            Event::LogTornTail
                | Event::CheckpointFailed
                | Event::RecoveryWarning
                | Event::PageCorrupt
                | Event::PageIoError
        )
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_events() {
        assert!(Event::LogCorruption.is_fatal());
        assert!(Event::RecoveryFailed.is_fatal());
        assert!(!Event::CheckpointFailed.is_fatal());
    }

    #[test]
    fn test_warning_events() {
        assert!(Event::CheckpointFailed.is_warning());
        assert!(Event::LogTornTail.is_warning());
        assert!(!Event::CheckpointComplete.is_warning());
    }

    #[test]
    fn test_event_names_upper_snake() {
        for event in [Event::EngineOpen, Event::RecoveryRedoBegin, Event::RemoteCopyComplete] {
            assert!(event.as_str().chars().all(|c| c.is_ascii_uppercase() || c == '_'));
        }
    }
}
