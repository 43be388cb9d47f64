//! Transaction log error types
//!
//! Error codes:
//! - ARIA_LOG_IO_ERROR (ERROR)
//! - ARIA_LOG_FSYNC_FAILED (FATAL)
//! - ARIA_LOG_CORRUPTION (FATAL)
//! - ARIA_LOG_LSN_NOT_FOUND (ERROR)
//! - ARIA_LOG_RECORD_TOO_LARGE (ERROR)
//! - ARIA_LOG_MISMATCH (FATAL)
//! - ARIA_LOG_FAILED (FATAL)

use std::fmt;
use std::io;

use crate::lsn::Lsn;
use crate::observability::Severity;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalErrorCode {
    /// A log write or read failed at the OS level
    AriaLogIoError,
    /// fsync of a log file failed; durability is unknown
    AriaLogFsyncFailed,
    /// A record failed its length, type or checksum validation
    AriaLogCorruption,
    /// The LSN was purged already or lies beyond the log end
    AriaLogLsnNotFound,
    /// A record does not fit into one log file
    AriaLogRecordTooLarge,
    /// Log files do not belong to this engine or are not contiguous
    AriaLogMismatch,
    /// An earlier write failure left a hole; the log refuses appends
    AriaLogFailed,
}

impl WalErrorCode {
    /// Get the error code string
    pub fn code(&self) -> &'static str {
        match self {
            WalErrorCode::AriaLogIoError => "ARIA_LOG_IO_ERROR",
            WalErrorCode::AriaLogFsyncFailed => "ARIA_LOG_FSYNC_FAILED",
            WalErrorCode::AriaLogCorruption => "ARIA_LOG_CORRUPTION",
            WalErrorCode::AriaLogLsnNotFound => "ARIA_LOG_LSN_NOT_FOUND",
            WalErrorCode::AriaLogRecordTooLarge => "ARIA_LOG_RECORD_TOO_LARGE",
            WalErrorCode::AriaLogMismatch => "ARIA_LOG_MISMATCH",
            WalErrorCode::AriaLogFailed => "ARIA_LOG_FAILED",
        }
    }

    /// Get the severity
    pub fn severity(&self) -> Severity {
        match self {
            WalErrorCode::AriaLogIoError
            | WalErrorCode::AriaLogLsnNotFound
            | WalErrorCode::AriaLogRecordTooLarge => Severity::Error,
            WalErrorCode::AriaLogFsyncFailed
            | WalErrorCode::AriaLogCorruption
            | WalErrorCode::AriaLogMismatch
            | WalErrorCode::AriaLogFailed => Severity::Fatal,
        }
    }
}

impl fmt::Display for WalErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

#[derive(Debug)]
pub struct WalError {
    code: WalErrorCode,
    message: String,
    details: Option<String>,
    lsn: Option<Lsn>,
    source: Option<io::Error>,
}

impl WalError {
    fn new(code: WalErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
            lsn: None,
            source: None,
        }
    }

    /// I/O error
    pub fn io_error(message: impl Into<String>, source: io::Error) -> Self {
        Self {
            source: Some(source),
            ..Self::new(WalErrorCode::AriaLogIoError, message)
        }
    }

    /// fsync of a log file failed
    pub fn fsync_failed(file_no: u32, source: io::Error) -> Self {
        Self {
            details: Some(format!("file_no: {}", file_no)),
            source: Some(source),
            ..Self::new(WalErrorCode::AriaLogFsyncFailed, "fsync of log file failed")
        }
    }

    /// A record at `lsn` failed validation
    pub fn corruption_at(lsn: Lsn, reason: impl Into<String>) -> Self {
        Self {
            details: Some(format!("lsn: {}", lsn)),
            lsn: Some(lsn),
            ..Self::new(WalErrorCode::AriaLogCorruption, reason)
        }
    }

    /// No record at this LSN
    pub fn lsn_not_found(lsn: Lsn, reason: impl Into<String>) -> Self {
        Self {
            details: Some(format!("lsn: {}", lsn)),
            lsn: Some(lsn),
            ..Self::new(WalErrorCode::AriaLogLsnNotFound, reason)
        }
    }

    /// Record exceeds the maximum size
    pub fn record_too_large(len: usize, max: u32) -> Self {
        Self {
            details: Some(format!("record_len: {}, file_limit: {}", len, max)),
            ..Self::new(WalErrorCode::AriaLogRecordTooLarge, "record does not fit in a log file")
        }
    }

    /// Log file does not belong to this database
    pub fn mismatch(file_no: u32, reason: impl Into<String>) -> Self {
        Self {
            details: Some(format!("file_no: {}", file_no)),
            ..Self::new(WalErrorCode::AriaLogMismatch, reason)
        }
    }

    /// Log is unusable after an earlier failure
    pub fn log_failed() -> Self {
        Self::new(
            WalErrorCode::AriaLogFailed,
            "log is read-only after an earlier write failure",
        )
    }

    /// Get the error code
    pub fn code(&self) -> WalErrorCode {
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

    /// Get the underlying error details, if any
    pub fn details(&self) -> Option<&str> {
        self.details.as_deref()
    }

    /// LSN the error refers to, when there is one
    pub fn lsn(&self) -> Option<Lsn> {
        self.lsn
    }

    /// Returns true if this error must halt the engine
    pub fn is_fatal(&self) -> bool {
        self.severity() == Severity::Fatal
    }
}

impl fmt::Display for WalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}: {}", self.severity(), self.code.code(), self.message)?;
        if let Some(ref details) = self.details {
            write!(f, " ({})", details)?;
        }
        Ok(())
    }
}

impl std::error::Error for WalError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source.as_ref().map(|e| e as &(dyn std::error::Error + 'static))
    }
}

pub type WalResult<T> = Result<T, WalError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_and_severity() {
        let err = WalError::io_error("write", io::Error::new(io::ErrorKind::Other, "x"));
        assert_eq!(err.code().code(), "ARIA_LOG_IO_ERROR");
        assert!(!err.is_fatal());

        let err = WalError::fsync_failed(3, io::Error::new(io::ErrorKind::Other, "x"));
        assert!(err.is_fatal());
        assert_eq!(err.details(), Some("file_no: 3"));
    }

    #[test]
    fn test_corruption_carries_lsn() {
        let err = WalError::corruption_at(Lsn::new(2, 100), "bad crc");
        assert_eq!(err.lsn(), Some(Lsn::new(2, 100)));
        assert!(err.is_fatal());
        let text = err.to_string();
        assert!(text.contains("[FATAL]"));
        assert!(text.contains("ARIA_LOG_CORRUPTION"));
        assert!(text.contains("(2,0x64)"));
    }

    #[test]
    fn test_lsn_not_found_is_not_fatal() {
        let err = WalError::lsn_not_found(Lsn::new(1, 64), "purged");
        assert_eq!(err.code(), WalErrorCode::AriaLogLsnNotFound);
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_source_is_exposed() {
        use std::error::Error;
        let err = WalError::io_error("read", io::Error::new(io::ErrorKind::NotFound, "gone"));
        assert!(err.source().is_some());
    }
}
