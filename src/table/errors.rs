//! Table error types
//!
//! Error codes:
//! - ARIA_TABLE_IO_ERROR (ERROR): header or direct data file I/O failed
//! - ARIA_TABLE_CORRUPT (FATAL): a header, page or row failed validation
//! - ARIA_TABLE_CRASHED (ERROR): the table must be repaired or recovered
//! - ARIA_TABLE_NOT_FOUND (ERROR)
//! - ARIA_TABLE_EXISTS (ERROR)
//! - ARIA_TABLE_LOCKED (ERROR): another transaction is writing the table
//! - ARIA_TABLE_READ_ONLY (ERROR)
//! - ARIA_TABLE_ROW_NOT_FOUND (ERROR)
//! - ARIA_TABLE_DUPLICATE_KEY (ERROR)
//! - ARIA_TABLE_INVALID_ROW (ERROR): row length or key does not fit the table
//! - ARIA_TABLE_UNSUPPORTED (ERROR): the operation needs another row format
//! - ARIA_TABLE_IN_USE (ERROR): handles or transactions still reference it
//! - page cache, log, crypt and transaction errors keep their own codes

use std::fmt;
use std::io;

use crate::hooks::HookError;
use crate::observability::Severity;
use crate::pagecache::PageCacheError;
use crate::trn::TrnError;
use crate::wal::WalError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableErrorCode {
    AriaTableIoError,
    AriaTableCorrupt,
    AriaTableCrashed,
    AriaTableNotFound,
    AriaTableExists,
    AriaTableLocked,
    AriaTableReadOnly,
    AriaTableRowNotFound,
    AriaTableDuplicateKey,
    AriaTableInvalidRow,
    AriaTableUnsupported,
    AriaTableInUse,
    /// Wraps a page cache error
    AriaTablePage,
    /// Wraps a log error
    AriaTableLog,
    /// Wraps a crypt or key error
    AriaTableCrypt,
    /// Wraps a transaction error
    AriaTableTrn,
}

impl TableErrorCode {
    /// Get the error code string
    pub fn code(&self) -> &'static str {
        match self {
            TableErrorCode::AriaTableIoError => "ARIA_TABLE_IO_ERROR",
            TableErrorCode::AriaTableCorrupt => "ARIA_TABLE_CORRUPT",
            TableErrorCode::AriaTableCrashed => "ARIA_TABLE_CRASHED",
            TableErrorCode::AriaTableNotFound => "ARIA_TABLE_NOT_FOUND",
            TableErrorCode::AriaTableExists => "ARIA_TABLE_EXISTS",
            TableErrorCode::AriaTableLocked => "ARIA_TABLE_LOCKED",
            TableErrorCode::AriaTableReadOnly => "ARIA_TABLE_READ_ONLY",
            TableErrorCode::AriaTableRowNotFound => "ARIA_TABLE_ROW_NOT_FOUND",
            TableErrorCode::AriaTableDuplicateKey => "ARIA_TABLE_DUPLICATE_KEY",
            TableErrorCode::AriaTableInvalidRow => "ARIA_TABLE_INVALID_ROW",
            TableErrorCode::AriaTableUnsupported => "ARIA_TABLE_UNSUPPORTED",
            TableErrorCode::AriaTableInUse => "ARIA_TABLE_IN_USE",
            TableErrorCode::AriaTablePage => "ARIA_TABLE_PAGE",
            TableErrorCode::AriaTableLog => "ARIA_TABLE_LOG",
            TableErrorCode::AriaTableCrypt => "ARIA_TABLE_CRYPT",
            TableErrorCode::AriaTableTrn => "ARIA_TABLE_TRN",
        }
    }
}

#[derive(Debug)]
enum Cause {
    Io(io::Error),
    Page(PageCacheError),
    Log(WalError),
    Hook(HookError),
    Trn(TrnError),
}

#[derive(Debug)]
pub struct TableError {
    code: TableErrorCode,
    message: String,
    table: Option<String>,
    cause: Option<Cause>,
}

impl TableError {
    fn new(code: TableErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            table: None,
            cause: None,
        }
    }

    /// I/O error
    pub fn io(message: impl Into<String>, source: io::Error) -> Self {
        Self {
            cause: Some(Cause::Io(source)),
            ..Self::new(TableErrorCode::AriaTableIoError, message)
        }
    }

    /// Table data is corrupt
    pub fn corrupt(message: impl Into<String>) -> Self {
        Self::new(TableErrorCode::AriaTableCorrupt, message)
    }

    /// Table is marked crashed
    pub fn crashed(table: &str) -> Self {
        Self::new(
            TableErrorCode::AriaTableCrashed,
            "table is marked crashed; repair it first",
        )
        .with_table(table)
    }

    /// Table not found
    pub fn not_found(table: &str) -> Self {
        Self::new(TableErrorCode::AriaTableNotFound, "no such table").with_table(table)
    }

    /// Table already exists
    pub fn exists(table: &str) -> Self {
        Self::new(TableErrorCode::AriaTableExists, "table already exists").with_table(table)
    }

    /// Table locked by another owner
    pub fn locked(table: &str, owner: impl fmt::Display) -> Self {
        Self::new(
            TableErrorCode::AriaTableLocked,
            format!("table is being written by transaction {}", owner),
        )
        .with_table(table)
    }

    /// Table opened read-only
    pub fn read_only(table: &str) -> Self {
        Self::new(TableErrorCode::AriaTableReadOnly, "table is read-only").with_table(table)
    }

    /// Row not found
    pub fn row_not_found(row: impl fmt::Display) -> Self {
        Self::new(
            TableErrorCode::AriaTableRowNotFound,
            format!("row {} does not exist", row),
        )
    }

    /// Duplicate unique key
    pub fn duplicate_key() -> Self {
        Self::new(TableErrorCode::AriaTableDuplicateKey, "duplicate key in unique index")
    }

    /// Row does not match the table definition
    pub fn invalid_row(message: impl Into<String>) -> Self {
        Self::new(TableErrorCode::AriaTableInvalidRow, message)
    }

    /// Operation not supported by this table format
    pub fn unsupported(message: impl Into<String>) -> Self {
        Self::new(TableErrorCode::AriaTableUnsupported, message)
    }

    /// Table still open
    pub fn in_use(table: &str) -> Self {
        Self::new(TableErrorCode::AriaTableInUse, "table is still in use").with_table(table)
    }

    /// Attach the table name
    pub fn with_table(mut self, table: &str) -> Self {
        self.table = Some(table.to_string());
        self
    }

    /// Get the error code
    pub fn code(&self) -> TableErrorCode {
        self.code
    }

    /// Stable code string; wrapped errors report their own code
    pub fn code_str(&self) -> &'static str {
        match &self.cause {
            Some(Cause::Page(e)) => e.code().code(),
            Some(Cause::Log(e)) => e.code().code(),
            Some(Cause::Hook(e)) => e.code().code(),
            Some(Cause::Trn(e)) => e.code().code(),
            _ => self.code.code(),
        }
    }

    /// Get the severity
    pub fn severity(&self) -> Severity {
        match &self.cause {
            Some(Cause::Page(e)) => e.severity(),
            Some(Cause::Log(e)) => e.severity(),
            Some(Cause::Hook(e)) => e.severity(),
            Some(Cause::Trn(e)) => e.severity(),
            _ if self.code == TableErrorCode::AriaTableCorrupt => Severity::Fatal,
            _ => Severity::Error,
        }
    }

    /// Get the error message
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Table the error refers to, if any
    pub fn table(&self) -> Option<&str> {
        self.table.as_deref()
    }

    /// True for errors that should mark the table crashed
    pub fn is_storage_failure(&self) -> bool {
        match &self.cause {
            Some(Cause::Page(_)) | Some(Cause::Io(_)) => true,
            Some(Cause::Hook(e)) => e.is_corruption(),
            _ => self.code == TableErrorCode::AriaTableCorrupt,
        }
    }

    /// Returns true if this error reports damaged data
    pub fn is_corruption(&self) -> bool {
        match &self.cause {
            Some(Cause::Page(e)) => e.is_corruption(),
            Some(Cause::Hook(e)) => e.is_corruption(),
            _ => self.code == TableErrorCode::AriaTableCorrupt,
        }
    }
}

impl From<PageCacheError> for TableError {
    fn from(err: PageCacheError) -> Self {
        Self {
            message: err.message().to_string(),
            cause: Some(Cause::Page(err)),
            ..Self::new(TableErrorCode::AriaTablePage, "")
        }
    }
}

impl From<WalError> for TableError {
    fn from(err: WalError) -> Self {
        Self {
            message: err.message().to_string(),
            cause: Some(Cause::Log(err)),
            ..Self::new(TableErrorCode::AriaTableLog, "")
        }
    }
}

impl From<HookError> for TableError {
    fn from(err: HookError) -> Self {
        Self {
            message: err.message().to_string(),
            cause: Some(Cause::Hook(err)),
            ..Self::new(TableErrorCode::AriaTableCrypt, "")
        }
    }
}

impl From<TrnError> for TableError {
    fn from(err: TrnError) -> Self {
        Self {
            message: err.message().to_string(),
            cause: Some(Cause::Trn(err)),
            ..Self::new(TableErrorCode::AriaTableTrn, "")
        }
    }
}

impl fmt::Display for TableError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}: {}", self.severity(), self.code_str(), self.message)?;
        if let Some(ref table) = self.table {
            write!(f, " (table: {})", table)?;
        }
        Ok(())
    }
}

impl std::error::Error for TableError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match &self.cause {
            Some(Cause::Io(e)) => Some(e),
            Some(Cause::Page(e)) => Some(e),
            Some(Cause::Log(e)) => Some(e),
            Some(Cause::Hook(e)) => Some(e),
            Some(Cause::Trn(e)) => Some(e),
            None => None,
        }
    }
}

pub type TableResult<T> = Result<T, TableError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pagecache::FileId;

    #[test]
    fn test_wrapped_page_error_keeps_code() {
        let err: TableError = PageCacheError::corrupt(FileId(2), 9, "bad crc").into();
        assert_eq!(err.code(), TableErrorCode::AriaTablePage);
        assert_eq!(err.code_str(), "ARIA_PAGE_CORRUPT");
        assert!(err.is_corruption());
        assert!(err.is_storage_failure());
        assert_eq!(err.severity(), Severity::Fatal);
    }

    #[test]
    fn test_display_names_table() {
        let err = TableError::locked("db/t1", 7);
        assert_eq!(
            err.to_string(),
            "[ERROR] ARIA_TABLE_LOCKED: table is being written by transaction 7 (table: db/t1)"
        );
        assert!(!err.is_storage_failure());
    }
}
