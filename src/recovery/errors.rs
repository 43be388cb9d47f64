//! Recovery error types
//!
//! Error codes:
//! - ARIA_RECOVERY_PARSE_ERROR (FATAL): a log record could not be decoded
//! - ARIA_RECOVERY_REDO_FAILED (FATAL): a page change could not be replayed
//! - ARIA_RECOVERY_UNDO_FAILED (FATAL): an incomplete transaction could not be rolled back
//! - ARIA_RECOVERY_LOG_ERROR (FATAL): the log could not be read or written
//! - ARIA_RECOVERY_FAILED (FATAL): anything else
//!
//! Failed recovery leaves the affected tables marked crashed. Every code is
//! fatal for the engine start; the caller decides whether to retry in
//! best-effort mode or run a repair.

use std::fmt;

use crate::lsn::Lsn;
use crate::observability::Severity;
use crate::table::TableError;
use crate::wal::{RecordType, WalError, WalErrorCode};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryErrorCode {
    AriaRecoveryParseError,
    AriaRecoveryRedoFailed,
    AriaRecoveryUndoFailed,
    AriaRecoveryLogError,
    AriaRecoveryFailed,
}

impl RecoveryErrorCode {
    /// Get the error code string
    pub fn code(&self) -> &'static str {
        match self {
            RecoveryErrorCode::AriaRecoveryParseError => "ARIA_RECOVERY_PARSE_ERROR",
            RecoveryErrorCode::AriaRecoveryRedoFailed => "ARIA_RECOVERY_REDO_FAILED",
            RecoveryErrorCode::AriaRecoveryUndoFailed => "ARIA_RECOVERY_UNDO_FAILED",
            RecoveryErrorCode::AriaRecoveryLogError => "ARIA_RECOVERY_LOG_ERROR",
            RecoveryErrorCode::AriaRecoveryFailed => "ARIA_RECOVERY_FAILED",
        }
    }

    /// Get the severity
    pub fn severity(&self) -> Severity {
        Severity::Fatal
    }
}

impl fmt::Display for RecoveryErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

#[derive(Debug)]
enum Cause {
    Log(WalError),
    Table(TableError),
}

#[derive(Debug)]
pub struct RecoveryError {
    code: RecoveryErrorCode,
    message: String,
    /// LSN of the record being processed
    lsn: Option<Lsn>,
    record_type: Option<RecordType>,
    cause: Option<Cause>,
}

impl RecoveryError {
    /// Record body could not be parsed
    pub fn parse_error(lsn: Lsn, record_type: RecordType, reason: impl fmt::Display) -> Self {
        Self {
            code: RecoveryErrorCode::AriaRecoveryParseError,
            message: format!("cannot decode {} record: {}", record_type, reason),
            lsn: Some(lsn),
            record_type: Some(record_type),
            cause: None,
        }
    }

    /// A log read that failed on a damaged record counts as a parse error
    pub fn log(err: WalError) -> Self {
        let code = if err.code() == WalErrorCode::AriaLogCorruption {
            RecoveryErrorCode::AriaRecoveryParseError
        } else {
            RecoveryErrorCode::AriaRecoveryLogError
        };
        Self {
            code,
            message: err.message().to_string(),
            lsn: err.lsn(),
            record_type: None,
            cause: Some(Cause::Log(err)),
        }
    }

    /// Redo of a record failed
    pub fn redo_failed(lsn: Lsn, record_type: RecordType, err: TableError) -> Self {
        Self {
            code: RecoveryErrorCode::AriaRecoveryRedoFailed,
            message: format!("redo of {} record failed: {}", record_type, err.message()),
            lsn: Some(lsn),
            record_type: Some(record_type),
            cause: Some(Cause::Table(err)),
        }
    }

    /// Undo of a record failed
    pub fn undo_failed(lsn: Lsn, err: TableError) -> Self {
        Self {
            code: RecoveryErrorCode::AriaRecoveryUndoFailed,
            message: format!("undo failed: {}", err.message()),
            lsn: Some(lsn),
            record_type: None,
            cause: Some(Cause::Table(err)),
        }
    }

    /// Recovery failed
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            code: RecoveryErrorCode::AriaRecoveryFailed,
            message: message.into(),
            lsn: None,
            record_type: None,
            cause: None,
        }
    }

    /// Get the error code
    pub fn code(&self) -> RecoveryErrorCode {
        self.code
    }

    /// Get the severity
    pub fn severity(&self) -> Severity {
        self.code.severity()
    }

    /// Get the error message
    pub fn message(&self) -> &str {
        &self.message
    }

    /// LSN the error refers to, if any
    pub fn lsn(&self) -> Option<Lsn> {
        self.lsn
    }

    /// Record type being applied, if known
    pub fn record_type(&self) -> Option<RecordType> {
        self.record_type
    }

    /// Returns true if this error must halt the engine
    pub fn is_fatal(&self) -> bool {
        true
    }
}

impl From<WalError> for RecoveryError {
    fn from(err: WalError) -> Self {
        RecoveryError::log(err)
    }
}

impl From<TableError> for RecoveryError {
    fn from(err: TableError) -> Self {
        Self {
            code: RecoveryErrorCode::AriaRecoveryFailed,
            message: err.message().to_string(),
            lsn: None,
            record_type: None,
            cause: Some(Cause::Table(err)),
        }
    }
}

impl fmt::Display for RecoveryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}: {}", self.severity(), self.code, self.message)?;
        match (self.lsn, self.record_type) {
            (Some(lsn), Some(t)) => write!(f, " (lsn {}, type {})", lsn, t),
            (Some(lsn), None) => write!(f, " (lsn {})", lsn),
            _ => Ok(()),
        }
    }
}

impl std::error::Error for RecoveryError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match &self.cause {
            Some(Cause::Log(e)) => Some(e),
            Some(Cause::Table(e)) => Some(e),
            None => None,
        }
    }
}

pub type RecoveryResult<T> = Result<T, RecoveryError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_error_carries_position() {
        let err = RecoveryError::parse_error(Lsn::new(2, 0x40), RecordType::RowInsert, "short payload");
        assert_eq!(err.code().code(), "ARIA_RECOVERY_PARSE_ERROR");
        let text = err.to_string();
        assert!(text.starts_with("[FATAL] ARIA_RECOVERY_PARSE_ERROR"));
        assert!(text.contains("(2,0x40)"));
        assert!(text.contains("ROW_INSERT"));
    }

    #[test]
    fn test_log_corruption_maps_to_parse_error() {
        let err: RecoveryError = WalError::corruption_at(Lsn::new(1, 0x80), "bad crc").into();
        assert_eq!(err.code(), RecoveryErrorCode::AriaRecoveryParseError);
        assert_eq!(err.lsn(), Some(Lsn::new(1, 0x80)));

        let err: RecoveryError = WalError::lsn_not_found(Lsn::new(1, 0x80), "purged").into();
        assert_eq!(err.code(), RecoveryErrorCode::AriaRecoveryLogError);
    }
}
