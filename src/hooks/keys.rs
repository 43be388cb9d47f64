//! Encryption key providers
//!
//! Keys are addressed by version. Pages record the version they were
//! written with, so rotating to a new key leaves older pages readable as
//! long as the provider still has their key.
//!
//! Key file format:
//!
//! ```json
//! {"keys": [{"version": 1, "key": "<base64>"}]}
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::Deserialize;

use super::errors::{HookError, HookResult};

pub trait KeyProvider: Send + Sync + std::fmt::Debug {
    /// Key bytes for `version`
    fn key(&self, version: u32) -> Option<Vec<u8>>;

    /// Version new pages are written with
    fn latest_version(&self) -> Option<u32>;
}

fn check_length(key: &[u8]) -> HookResult<()> {
    match key.len() {
        16 | 24 | 32 => Ok(()),
        other => Err(HookError::key_length(other)),
    }
}

/// Keys held in memory
#[derive(Debug, Clone, Default)]
pub struct StaticKeyProvider {
    keys: BTreeMap<u32, Vec<u8>>,
}

impl StaticKeyProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_key(mut self, version: u32, key: &[u8]) -> HookResult<Self> {
        check_length(key)?;
        self.keys.insert(version, key.to_vec());
        Ok(self)
    }
}

impl KeyProvider for StaticKeyProvider {
    fn key(&self, version: u32) -> Option<Vec<u8>> {
        self.keys.get(&version).cloned()
    }

    fn latest_version(&self) -> Option<u32> {
        self.keys.keys().next_back().copied()
    }
}

#[derive(Debug, Deserialize)]
struct KeyFile {
    keys: Vec<KeyFileEntry>,
}

#[derive(Debug, Deserialize)]
struct KeyFileEntry {
    version: u32,
    key: String,
}

/// Keys loaded from a JSON key file
#[derive(Debug, Clone)]
pub struct FileKeyProvider {
    inner: StaticKeyProvider,
}

impl FileKeyProvider {
    pub fn load(path: &Path) -> HookResult<Self> {
        let text = fs::read_to_string(path).map_err(|e| {
            HookError::key_file_invalid(format!("cannot read {}", path.display()), Some(e))
        })?;
        Self::parse(&text)
    }

    pub fn parse(text: &str) -> HookResult<Self> {
        let file: KeyFile = serde_json::from_str(text)
            .map_err(|e| HookError::key_file_invalid(format!("malformed key file: {}", e), None))?;
        if file.keys.is_empty() {
            return Err(HookError::key_file_invalid("key file lists no keys", None));
        }
        let mut inner = StaticKeyProvider::new();
        for entry in file.keys {
            let key = STANDARD.decode(entry.key.trim()).map_err(|e| {
                HookError::key_file_invalid(
                    format!("key version {} is not valid base64: {}", entry.version, e),
                    None,
                )
            })?;
            inner = inner.with_key(entry.version, &key)?;
        }
        Ok(Self { inner })
    }
}

impl KeyProvider for FileKeyProvider {
    fn key(&self, version: u32) -> Option<Vec<u8>> {
        self.inner.key(version)
    }

    fn latest_version(&self) -> Option<u32> {
        self.inner.latest_version()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hooks::HookErrorCode;

    #[test]
    fn test_static_provider_latest() {
        let provider = StaticKeyProvider::new()
            .with_key(1, &[1u8; 16])
            .unwrap()
            .with_key(3, &[3u8; 32])
            .unwrap();
        assert_eq!(provider.latest_version(), Some(3));
        assert_eq!(provider.key(1), Some(vec![1u8; 16]));
        assert!(provider.key(2).is_none());
    }

    #[test]
    fn test_bad_key_length() {
        let err = StaticKeyProvider::new().with_key(1, &[0u8; 20]).unwrap_err();
        assert_eq!(err.code(), HookErrorCode::AriaCryptKeyLength);
    }

    #[test]
    fn test_parse_key_file() {
        let key = STANDARD.encode([7u8; 24]);
        let text = format!(r#"{{"keys":[{{"version":2,"key":"{}"}}]}}"#, key);
        let provider = FileKeyProvider::parse(&text).unwrap();
        assert_eq!(provider.latest_version(), Some(2));
        assert_eq!(provider.key(2), Some(vec![7u8; 24]));
    }

    #[test]
    fn test_key_file_errors() {
        assert!(FileKeyProvider::parse("not json").is_err());
        assert!(FileKeyProvider::parse(r#"{"keys":[]}"#).is_err());
        let err = FileKeyProvider::parse(r#"{"keys":[{"version":1,"key":"AAAA"}]}"#).unwrap_err();
        assert_eq!(err.code(), HookErrorCode::AriaCryptKeyLength);
    }

    #[test]
    fn test_load_from_disk() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("keys.json");
        let key = STANDARD.encode([1u8; 16]);
        fs::write(&path, format!(r#"{{"keys":[{{"version":1,"key":"{}"}}]}}"#, key)).unwrap();
        assert_eq!(FileKeyProvider::load(&path).unwrap().latest_version(), Some(1));
        assert!(FileKeyProvider::load(&dir.path().join("missing.json")).is_err());
    }
}
