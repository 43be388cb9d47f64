//! Page cache error types
//!
//! Error codes:
//! - ARIA_PAGE_IO_ERROR (ERROR): a block read, write or sync failed
//! - ARIA_PAGE_CORRUPT (FATAL): a stored block failed its checks on read
//! - ARIA_PAGE_LOG_FLUSH_FAILED (FATAL): the log could not be made durable
//!   up to a page's LSN, so the page was not written
//! - ARIA_PAGE_CACHE_FULL (ERROR): every slot is pinned
//! - ARIA_PAGE_UNKNOWN_FILE (ERROR)
//! - ARIA_PAGE_READ_ONLY (ERROR)
//! - ARIA_PAGE_TRANSFORM_FAILED (ERROR): an encode step refused the page

use std::fmt;
use std::io;

use super::FileId;
use crate::hooks::HookError;
use crate::observability::Severity;
use crate::page::PageNo;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageCacheErrorCode {
    AriaPageIoError,
    AriaPageCorrupt,
    AriaPageLogFlushFailed,
    AriaPageCacheFull,
    AriaPageUnknownFile,
    AriaPageReadOnly,
    AriaPageTransformFailed,
}

impl PageCacheErrorCode {
    /// Get the error code string
    pub fn code(&self) -> &'static str {
        match self {
            PageCacheErrorCode::AriaPageIoError => "ARIA_PAGE_IO_ERROR",
            PageCacheErrorCode::AriaPageCorrupt => "ARIA_PAGE_CORRUPT",
            PageCacheErrorCode::AriaPageLogFlushFailed => "ARIA_PAGE_LOG_FLUSH_FAILED",
            PageCacheErrorCode::AriaPageCacheFull => "ARIA_PAGE_CACHE_FULL",
            PageCacheErrorCode::AriaPageUnknownFile => "ARIA_PAGE_UNKNOWN_FILE",
            PageCacheErrorCode::AriaPageReadOnly => "ARIA_PAGE_READ_ONLY",
            PageCacheErrorCode::AriaPageTransformFailed => "ARIA_PAGE_TRANSFORM_FAILED",
        }
    }

    /// Get the severity
    pub fn severity(&self) -> Severity {
        match self {
            PageCacheErrorCode::AriaPageCorrupt | PageCacheErrorCode::AriaPageLogFlushFailed => {
                Severity::Fatal
            }
            _ => Severity::Error,
        }
    }
}

#[derive(Debug)]
enum Cause {
    Io(io::Error),
    Hook(HookError),
}

#[derive(Debug)]
pub struct PageCacheError {
    code: PageCacheErrorCode,
    message: String,
    file: Option<FileId>,
    page: Option<PageNo>,
    cause: Option<Cause>,
}

impl PageCacheError {
    fn new(code: PageCacheErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            file: None,
            page: None,
            cause: None,
        }
    }

    /// I/O error on a page
    pub fn io(file: FileId, page: PageNo, message: impl Into<String>, source: io::Error) -> Self {
        Self {
            file: Some(file),
            page: Some(page),
            cause: Some(Cause::Io(source)),
            ..Self::new(PageCacheErrorCode::AriaPageIoError, message)
        }
    }

    /// Sync of a data file failed
    pub fn sync_failed(file: FileId, source: io::Error) -> Self {
        Self {
            file: Some(file),
            cause: Some(Cause::Io(source)),
            ..Self::new(PageCacheErrorCode::AriaPageIoError, "sync of table file failed")
        }
    }

    /// Decoding the stored block failed
    pub fn from_hook(file: FileId, page: PageNo, source: HookError) -> Self {
        let code = if source.is_corruption() {
            PageCacheErrorCode::AriaPageCorrupt
        } else {
            PageCacheErrorCode::AriaPageTransformFailed
        };
        Self {
            file: Some(file),
            page: Some(page),
            message: source.message().to_string(),
            cause: Some(Cause::Hook(source)),
            ..Self::new(code, "")
        }
    }

    /// Page failed validation
    pub fn corrupt(file: FileId, page: PageNo, reason: impl Into<String>) -> Self {
        Self {
            file: Some(file),
            page: Some(page),
            ..Self::new(PageCacheErrorCode::AriaPageCorrupt, reason)
        }
    }

    /// Log could not be flushed ahead of a page write
    pub fn log_flush_failed(file: FileId, page: PageNo, reason: impl Into<String>) -> Self {
        Self {
            file: Some(file),
            page: Some(page),
            ..Self::new(PageCacheErrorCode::AriaPageLogFlushFailed, reason)
        }
    }

    /// Every slot is pinned
    pub fn cache_full(slots: usize) -> Self {
        Self::new(
            PageCacheErrorCode::AriaPageCacheFull,
            format!("all {} cache slots are pinned", slots),
        )
    }

    /// File was never registered
    pub fn unknown_file(file: FileId) -> Self {
        Self {
            file: Some(file),
            ..Self::new(PageCacheErrorCode::AriaPageUnknownFile, "file is not registered")
        }
    }

    /// Write to a read-only file
    pub fn read_only(file: FileId, page: PageNo) -> Self {
        Self {
            file: Some(file),
            page: Some(page),
            ..Self::new(PageCacheErrorCode::AriaPageReadOnly, "file is read-only")
        }
    }

    /// A file was registered with a pipeline its store cannot hold
    pub fn incompatible_store(reason: impl Into<String>) -> Self {
        Self::new(PageCacheErrorCode::AriaPageTransformFailed, reason)
    }

    /// Page read back as a bad block
    pub fn bad_block(file: FileId, page: PageNo, reason: impl Into<String>) -> Self {
        Self {
            file: Some(file),
            page: Some(page),
            ..Self::new(PageCacheErrorCode::AriaPageTransformFailed, reason)
        }
    }

    /// Get the error code
    pub fn code(&self) -> PageCacheErrorCode {
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

    /// File the error refers to, if any
    pub fn file(&self) -> Option<FileId> {
        self.file
    }

    /// Page the error refers to, if any
    pub fn page(&self) -> Option<PageNo> {
        self.page
    }

    /// Returns true if this error reports damaged data
    pub fn is_corruption(&self) -> bool {
        self.code == PageCacheErrorCode::AriaPageCorrupt
    }
}

impl fmt::Display for PageCacheError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}: {}", self.severity(), self.code.code(), self.message)?;
        match (self.file, self.page) {
            (Some(file), Some(page)) => write!(f, " (file: {}, page: {})", file, page),
            (Some(file), None) => write!(f, " (file: {})", file),
            _ => Ok(()),
        }
    }
}

impl std::error::Error for PageCacheError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match &self.cause {
            Some(Cause::Io(e)) => Some(e),
            Some(Cause::Hook(e)) => Some(e),
            None => None,
        }
    }
}

pub type PageCacheResult<T> = Result<T, PageCacheError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hook_corruption_maps_to_page_corrupt() {
        let err = PageCacheError::from_hook(FileId(3), 7, HookError::corrupt(7, "page checksum mismatch"));
        assert!(err.is_corruption());
        assert_eq!(err.severity(), Severity::Fatal);
        assert_eq!(
            err.to_string(),
            "[FATAL] ARIA_PAGE_CORRUPT: page checksum mismatch (file: f3, page: 7)"
        );
    }

    #[test]
    fn test_io_error_keeps_source() {
        use std::error::Error as _;
        let err = PageCacheError::io(
            FileId(1),
            2,
            "read failed",
            io::Error::new(io::ErrorKind::UnexpectedEof, "short"),
        );
        assert_eq!(err.code(), PageCacheErrorCode::AriaPageIoError);
        assert!(err.source().is_some());
    }
}
