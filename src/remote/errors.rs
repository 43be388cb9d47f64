//! Remote storage errors

use thiserror::Error;

use crate::hooks::HookError;
use crate::table::TableError;

pub type RemoteResult<T> = Result<T, RemoteError>;

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("object not found: {0}")]
    ObjectNotFound(String),

    #[error("table {0} does not exist in the remote store")]
    TableNotFound(String),

    #[error("table {0} already exists in the remote store")]
    TableExists(String),

    #[error("local table {0} already exists")]
    LocalExists(String),

    #[error("invalid object key: {0}")]
    InvalidKey(String),

    #[error("table {0} cannot be copied: {1}")]
    NotCopyable(String, String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error(transparent)]
    Table(#[from] TableError),

    #[error(transparent)]
    Hook(#[from] HookError),

    #[error("invalid table definition: {0}")]
    Definition(String),
}

impl RemoteError {
    /// Get the error code string
    pub fn code(&self) -> &'static str {
        match self {
            RemoteError::ObjectNotFound(_) => "ARIA_REMOTE_OBJECT_NOT_FOUND",
            RemoteError::TableNotFound(_) => "ARIA_REMOTE_TABLE_NOT_FOUND",
            RemoteError::TableExists(_) | RemoteError::LocalExists(_) => "ARIA_REMOTE_TABLE_EXISTS",
            RemoteError::InvalidKey(_) => "ARIA_REMOTE_INVALID_KEY",
            RemoteError::NotCopyable(_, _) => "ARIA_REMOTE_NOT_COPYABLE",
            RemoteError::Io(_) => "ARIA_REMOTE_IO_ERROR",
            RemoteError::Table(e) => e.code_str(),
            RemoteError::Hook(e) => e.code().code(),
            RemoteError::Definition(_) => "ARIA_REMOTE_BAD_DEFINITION",
        }
    }

    /// Returns true if the remote object does not exist
    pub fn is_not_found(&self) -> bool {
        matches!(self, RemoteError::ObjectNotFound(_))
    }
}

impl From<std::io::Error> for RemoteError {
    fn from(err: std::io::Error) -> Self {
        RemoteError::Io(err.to_string())
    }
}

impl From<RemoteError> for std::io::Error {
    fn from(err: RemoteError) -> Self {
        let kind = match err {
            RemoteError::ObjectNotFound(_) => std::io::ErrorKind::NotFound,
            RemoteError::InvalidKey(_) => std::io::ErrorKind::InvalidInput,
            _ => std::io::ErrorKind::Other,
        };
        std::io::Error::new(kind, err.to_string())
    }
}
