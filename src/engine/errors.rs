//! Engine error type
//!
//! The engine adds two codes of its own and otherwise passes the error of
//! the failing subsystem through unchanged: `code()` and `Display` show
//! the subsystem's code, `source()` returns the subsystem error.
//!
//! Error codes:
//! - ARIA_ENGINE_LOG_MISMATCH (FATAL): log files exist without a control file,
//!   or belong to another control file
//! - ARIA_ENGINE_CLOSED (ERROR): the engine was already closed

use std::fmt;

use crate::checkpoint::CheckpointError;
use crate::config::ConfigError;
use crate::control::ControlError;
use crate::hooks::HookError;
use crate::observability::Severity;
use crate::recovery::RecoveryError;
use crate::remote::RemoteError;
use crate::table::TableError;
use crate::trn::TrnError;
use crate::wal::WalError;

#[derive(Debug)]
pub enum EngineError {
    LogMismatch(String),
    Closed,
    Config(ConfigError),
    Control(ControlError),
    Log(WalError),
    Keys(HookError),
    Table(TableError),
    Trn(TrnError),
    Checkpoint(CheckpointError),
    Recovery(RecoveryError),
    Remote(RemoteError),
}

impl EngineError {
    /// Get the error code string
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::LogMismatch(_) => "ARIA_ENGINE_LOG_MISMATCH",
            EngineError::Closed => "ARIA_ENGINE_CLOSED",
            EngineError::Config(e) => e.code().code(),
            EngineError::Control(e) => e.code().code(),
            EngineError::Log(e) => e.code().code(),
            EngineError::Keys(e) => e.code().code(),
            EngineError::Table(e) => e.code_str(),
            EngineError::Trn(e) => e.code().code(),
            EngineError::Checkpoint(e) => e.code().code(),
            EngineError::Recovery(e) => e.code().code(),
            EngineError::Remote(e) => e.code(),
        }
    }

    /// Get the severity
    pub fn severity(&self) -> Severity {
        match self {
            EngineError::LogMismatch(_) => Severity::Fatal,
            EngineError::Closed | EngineError::Config(_) | EngineError::Remote(_) => Severity::Error,
            EngineError::Control(e) => e.severity(),
            EngineError::Log(e) => e.severity(),
            EngineError::Keys(e) => e.severity(),
            EngineError::Table(e) => e.severity(),
            EngineError::Trn(e) => e.severity(),
            EngineError::Checkpoint(e) => e.severity(),
            EngineError::Recovery(e) => e.severity(),
        }
    }
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineError::LogMismatch(message) => {
                write!(f, "[{}] {}: {}", self.severity(), self.code(), message)
            }
            EngineError::Closed => write!(f, "[{}] {}: engine is closed", self.severity(), self.code()),
            EngineError::Config(e) => e.fmt(f),
            EngineError::Control(e) => e.fmt(f),
            EngineError::Log(e) => e.fmt(f),
            EngineError::Keys(e) => e.fmt(f),
            EngineError::Table(e) => e.fmt(f),
            EngineError::Trn(e) => e.fmt(f),
            EngineError::Checkpoint(e) => e.fmt(f),
            EngineError::Recovery(e) => e.fmt(f),
            EngineError::Remote(e) => write!(f, "[{}] {}: {}", self.severity(), self.code(), e),
        }
    }
}

impl std::error::Error for EngineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            EngineError::LogMismatch(_) | EngineError::Closed => None,
            EngineError::Config(e) => Some(e),
            EngineError::Control(e) => Some(e),
            EngineError::Log(e) => Some(e),
            EngineError::Keys(e) => Some(e),
            EngineError::Table(e) => Some(e),
            EngineError::Trn(e) => Some(e),
            EngineError::Checkpoint(e) => Some(e),
            EngineError::Recovery(e) => Some(e),
            EngineError::Remote(e) => Some(e),
        }
    }
}

macro_rules! from_subsystem {
    ($($variant:ident => $error:ty),* $(,)?) => {
        $(
            impl From<$error> for EngineError {
                fn from(err: $error) -> Self {
                    EngineError::$variant(err)
                }
            }
        )*
    };
}

from_subsystem! {
    Config => ConfigError,
    Control => ControlError,
    Log => WalError,
    Keys => HookError,
    Table => TableError,
    Trn => TrnError,
    Checkpoint => CheckpointError,
    Recovery => RecoveryError,
    Remote => RemoteError,
}

pub type EngineResult<T> = Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subsystem_code_passes_through() {
        let err: EngineError = TableError::not_found("db/t1").into();
        assert_eq!(err.code(), "ARIA_TABLE_NOT_FOUND");
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_engine_codes() {
        let err = EngineError::LogMismatch("no control file".into());
        assert_eq!(err.severity(), Severity::Fatal);
        assert!(err.to_string().starts_with("[FATAL] ARIA_ENGINE_LOG_MISMATCH"));
        assert_eq!(EngineError::Closed.code(), "ARIA_ENGINE_CLOSED");
    }
}
