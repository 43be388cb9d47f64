//! Transaction error types
//!
//! Error codes:
//! - ARIA_TRN_NOT_ACTIVE (ERROR)
//! - ARIA_TRN_LOG_FAILED (ERROR, or FATAL when the log itself failed)

use std::fmt;

use super::TrnId;
use crate::observability::Severity;
use crate::wal::WalError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrnErrorCode {
    /// Commit or rollback of a transaction that already ended
    AriaTrnNotActive,
    /// Writing the commit or abort record failed
    AriaTrnLogFailed,
}

impl TrnErrorCode {
    /// Get the error code string
    pub fn code(&self) -> &'static str {
        match self {
            TrnErrorCode::AriaTrnNotActive => "ARIA_TRN_NOT_ACTIVE",
            TrnErrorCode::AriaTrnLogFailed => "ARIA_TRN_LOG_FAILED",
        }
    }
}

#[derive(Debug)]
pub struct TrnError {
    code: TrnErrorCode,
    message: String,
    trn: TrnId,
    source: Option<WalError>,
}

impl TrnError {
    /// Transaction is not active
    pub fn not_active(trn: TrnId) -> Self {
        Self {
            code: TrnErrorCode::AriaTrnNotActive,
            message: "transaction is no longer active".to_string(),
            trn,
            source: None,
        }
    }

    /// Log write for the transaction failed
    pub fn log_failed(trn: TrnId, source: WalError) -> Self {
        Self {
            code: TrnErrorCode::AriaTrnLogFailed,
            message: "could not log transaction end".to_string(),
            trn,
            source: Some(source),
        }
    }

    /// Get the error code
    pub fn code(&self) -> TrnErrorCode {
        self.code
    }

    /// Transaction that failed
    pub fn trn(&self) -> TrnId {
        self.trn
    }

    /// Get the error message
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Get the severity
    pub fn severity(&self) -> Severity {
        match &self.source {
            Some(wal) if wal.is_fatal() => Severity::Fatal,
            _ => Severity::Error,
        }
    }
}

impl fmt::Display for TrnError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {}: {} (trn: {})",
            self.severity(),
            self.code.code(),
            self.message,
            self.trn
        )
    }
}

impl std::error::Error for TrnError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source.as_ref().map(|e| e as &(dyn std::error::Error + 'static))
    }
}

pub type TrnResult<T> = Result<T, TrnError>;
