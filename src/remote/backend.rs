//! # Object Backend Trait

use super::errors::RemoteResult;

/// A flat object store scoped to one bucket. Keys are `/`-separated paths.
pub trait ObjectBackend: Send + Sync + std::fmt::Debug {
    /// Store `data` under `key`, replacing any previous object
    fn put(&self, key: &str, data: &[u8]) -> RemoteResult<()>;

    /// Fails with `ObjectNotFound` when there is no such object
    fn get(&self, key: &str) -> RemoteResult<Vec<u8>>;

    /// Fails with `ObjectNotFound` when there is no such object
    fn delete(&self, key: &str) -> RemoteResult<()>;

    fn exists(&self, key: &str) -> RemoteResult<bool>;

    /// Keys starting with `prefix/`, sorted
    fn list(&self, prefix: &str) -> RemoteResult<Vec<String>>;
}
