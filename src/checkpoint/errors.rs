//! Checkpoint error types
//!
//! A failed checkpoint never damages serving state: recovery falls back to
//! the previous checkpoint, or the log start, and only takes longer.
//! Every code is therefore ERROR severity, except when the log itself
//! reports a fatal condition.
//!
//! Error codes:
//! - ARIA_CHECKPOINT_FAILED: generic failure (background thread, bad state)
//! - ARIA_CHECKPOINT_FLUSH_FAILED: dirty pages could not be written
//! - ARIA_CHECKPOINT_LOG_FAILED: the checkpoint record could not be logged
//! - ARIA_CHECKPOINT_CONTROL_FAILED: the control file could not be replaced

use std::fmt;

use crate::control::ControlError;
use crate::observability::Severity;
use crate::pagecache::PageCacheError;
use crate::wal::WalError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckpointErrorCode {
    AriaCheckpointFailed,
    AriaCheckpointFlushFailed,
    AriaCheckpointLogFailed,
    AriaCheckpointControlFailed,
}

impl CheckpointErrorCode {
    /// Get the error code string
    pub fn code(&self) -> &'static str {
        match self {
            CheckpointErrorCode::AriaCheckpointFailed => "ARIA_CHECKPOINT_FAILED",
            CheckpointErrorCode::AriaCheckpointFlushFailed => "ARIA_CHECKPOINT_FLUSH_FAILED",
            CheckpointErrorCode::AriaCheckpointLogFailed => "ARIA_CHECKPOINT_LOG_FAILED",
            CheckpointErrorCode::AriaCheckpointControlFailed => "ARIA_CHECKPOINT_CONTROL_FAILED",
        }
    }
}

impl fmt::Display for CheckpointErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

#[derive(Debug)]
enum Cause {
    Page(PageCacheError),
    Log(WalError),
    Control(ControlError),
}

#[derive(Debug)]
pub struct CheckpointError {
    code: CheckpointErrorCode,
    message: String,
    cause: Option<Cause>,
}

impl CheckpointError {
    /// Checkpoint failed
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            code: CheckpointErrorCode::AriaCheckpointFailed,
            message: message.into(),
            cause: None,
        }
    }

    /// Get the error code
    pub fn code(&self) -> CheckpointErrorCode {
        self.code
    }

    /// Get the error message
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Get the severity
    pub fn severity(&self) -> Severity {
        match &self.cause {
            Some(Cause::Log(e)) if e.is_fatal() => Severity::Fatal,
            _ => Severity::Error,
        }
    }

    /// Returns true if this error must halt the engine
    pub fn is_fatal(&self) -> bool {
        self.severity() == Severity::Fatal
    }
}

impl From<PageCacheError> for CheckpointError {
    fn from(err: PageCacheError) -> Self {
        Self {
            code: CheckpointErrorCode::AriaCheckpointFlushFailed,
            message: format!("flushing dirty pages failed: {}", err.message()),
            cause: Some(Cause::Page(err)),
        }
    }
}

impl From<WalError> for CheckpointError {
    fn from(err: WalError) -> Self {
        Self {
            code: CheckpointErrorCode::AriaCheckpointLogFailed,
            message: format!("logging the checkpoint failed: {}", err.message()),
            cause: Some(Cause::Log(err)),
        }
    }
}

impl From<ControlError> for CheckpointError {
    fn from(err: ControlError) -> Self {
        Self {
            code: CheckpointErrorCode::AriaCheckpointControlFailed,
            message: format!("control file update failed: {}", err.message()),
            cause: Some(Cause::Control(err)),
        }
    }
}

impl fmt::Display for CheckpointError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}: {}", self.severity(), self.code, self.message)
    }
}

impl std::error::Error for CheckpointError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match &self.cause {
            Some(Cause::Page(e)) => Some(e),
            Some(Cause::Log(e)) => Some(e),
            Some(Cause::Control(e)) => Some(e),
            None => None,
        }
    }
}

pub type CheckpointResult<T> = Result<T, CheckpointError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checkpoint_errors_are_not_fatal() {
        let err = CheckpointError::failed("background thread stopped");
        assert!(!err.is_fatal());
        assert_eq!(err.code().code(), "ARIA_CHECKPOINT_FAILED");
        assert!(err.to_string().starts_with("[ERROR] ARIA_CHECKPOINT_FAILED"));
    }

    #[test]
    fn test_control_error_keeps_source() {
        use std::error::Error;
        let err: CheckpointError = ControlError::corrupt("bad magic").into();
        assert_eq!(err.code(), CheckpointErrorCode::AriaCheckpointControlFailed);
        assert!(err.source().is_some());
    }
}
