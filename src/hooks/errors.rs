//! Page transform error types
//!
//! Error codes:
//! - ARIA_PAGE_CORRUPT (FATAL): a checksum or frame check failed on read
//! - ARIA_CRYPT_KEY_LENGTH (ERROR)
//! - ARIA_CRYPT_UNSUPPORTED_SCHEME (ERROR)
//! - ARIA_CRYPT_KEY_MISSING (ERROR)
//! - ARIA_CRYPT_KEY_FILE_INVALID (ERROR)
//!
//! Corruption is never retried or repaired here; it signals damage on disk.

use std::fmt;
use std::io;

use crate::observability::Severity;
use crate::page::PageNo;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookErrorCode {
    AriaPageCorrupt,
    AriaCryptKeyLength,
    AriaCryptUnsupportedScheme,
    AriaCryptKeyMissing,
    AriaCryptKeyFileInvalid,
}

impl HookErrorCode {
    /// Get the error code string
    pub fn code(&self) -> &'static str {
        match self {
            HookErrorCode::AriaPageCorrupt => "ARIA_PAGE_CORRUPT",
            HookErrorCode::AriaCryptKeyLength => "ARIA_CRYPT_KEY_LENGTH",
            HookErrorCode::AriaCryptUnsupportedScheme => "ARIA_CRYPT_UNSUPPORTED_SCHEME",
            HookErrorCode::AriaCryptKeyMissing => "ARIA_CRYPT_KEY_MISSING",
            HookErrorCode::AriaCryptKeyFileInvalid => "ARIA_CRYPT_KEY_FILE_INVALID",
        }
    }

    /// Get the severity
    pub fn severity(&self) -> Severity {
        match self {
            HookErrorCode::AriaPageCorrupt => Severity::Fatal,
            _ => Severity::Error,
        }
    }
}

#[derive(Debug)]
pub struct HookError {
    code: HookErrorCode,
    message: String,
    page: Option<PageNo>,
    source: Option<io::Error>,
}

impl HookError {
    fn new(code: HookErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            page: None,
            source: None,
        }
    }

    /// Page failed its hook check
    pub fn corrupt(page: PageNo, reason: impl Into<String>) -> Self {
        Self {
            page: Some(page),
            ..Self::new(HookErrorCode::AriaPageCorrupt, reason)
        }
    }

    /// Key has the wrong length
    pub fn key_length(len: usize) -> Self {
        Self::new(
            HookErrorCode::AriaCryptKeyLength,
            format!("key of {} bytes; expected 16, 24 or 32", len),
        )
    }

    /// Unknown encryption scheme on a page
    pub fn unsupported_scheme(scheme: u8) -> Self {
        Self::new(
            HookErrorCode::AriaCryptUnsupportedScheme,
            format!("crypt scheme {} is not supported", scheme),
        )
    }

    /// No key for the page's key version
    pub fn key_missing(version: u32) -> Self {
        Self::new(
            HookErrorCode::AriaCryptKeyMissing,
            format!("no key for version {}", version),
        )
    }

    /// Key file could not be loaded
    pub fn key_file_invalid(message: impl Into<String>, source: Option<io::Error>) -> Self {
        Self {
            source,
            ..Self::new(HookErrorCode::AriaCryptKeyFileInvalid, message)
        }
    }

    /// Get the error code
    pub fn code(&self) -> HookErrorCode {
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

    /// Page the error refers to, if any
    pub fn page(&self) -> Option<PageNo> {
        self.page
    }

    /// Returns true if this error reports damaged data
    pub fn is_corruption(&self) -> bool {
        self.code == HookErrorCode::AriaPageCorrupt
    }
}

impl fmt::Display for HookError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}: {}", self.severity(), self.code.code(), self.message)?;
        if let Some(page) = self.page {
            write!(f, " (page: {})", page)?;
        }
        Ok(())
    }
}

impl std::error::Error for HookError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source.as_ref().map(|e| e as &(dyn std::error::Error + 'static))
    }
}

pub type HookResult<T> = Result<T, HookError>;
