//! # Local Directory Backend
//!
//! Every object is a file below `root/bucket`; the key's `/` separators
//! become directories. Puts go through a temporary file and a rename, so a
//! reader never sees half an object.

use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

use super::backend::ObjectBackend;
use super::errors::{RemoteError, RemoteResult};

const TMP_SUFFIX: &str = ".tmp";

#[derive(Debug)]
pub struct LocalBackend {
    root: PathBuf,
}

impl LocalBackend {
    /// Backend for `bucket` below `root`
    pub fn new(root: impl AsRef<Path>, bucket: &str) -> RemoteResult<Self> {
        check_key(bucket)?;
        Ok(Self {
            root: root.as_ref().join(bucket),
        })
    }

    fn full_path(&self, key: &str) -> RemoteResult<PathBuf> {
        check_key(key)?;
        Ok(self.root.join(key))
    }
}

/// Keys are relative paths without `.` or `..` components
fn check_key(key: &str) -> RemoteResult<()> {
    let path = Path::new(key);
    let valid = !key.is_empty()
        && !key.ends_with(TMP_SUFFIX)
        && path.components().all(|c| matches!(c, Component::Normal(_)));
    if valid {
        Ok(())
    } else {
        Err(RemoteError::InvalidKey(key.to_string()))
    }
}

fn not_found_or_io(key: &str, e: io::Error) -> RemoteError {
    if e.kind() == io::ErrorKind::NotFound {
        RemoteError::ObjectNotFound(key.to_string())
    } else {
        RemoteError::Io(format!("{}: {}", key, e))
    }
}

impl ObjectBackend for LocalBackend {
    fn put(&self, key: &str, data: &[u8]) -> RemoteResult<()> {
        let full_path = self.full_path(key)?;
        if let Some(parent) = full_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut tmp = full_path.clone().into_os_string();
        tmp.push(TMP_SUFFIX);
        let tmp = PathBuf::from(tmp);
        fs::write(&tmp, data)?;
        fs::rename(&tmp, &full_path)?;
        Ok(())
    }

    fn get(&self, key: &str) -> RemoteResult<Vec<u8>> {
        let full_path = self.full_path(key)?;
        fs::read(&full_path).map_err(|e| not_found_or_io(key, e))
    }

    fn delete(&self, key: &str) -> RemoteResult<()> {
        let full_path = self.full_path(key)?;
        fs::remove_file(&full_path).map_err(|e| not_found_or_io(key, e))
    }

    fn exists(&self, key: &str) -> RemoteResult<bool> {
        Ok(self.full_path(key)?.is_file())
    }

    fn list(&self, prefix: &str) -> RemoteResult<Vec<String>> {
        let full_path = self.full_path(prefix)?;
        let mut results = Vec::new();
        let mut pending = vec![(full_path, prefix.to_string())];
        while let Some((dir, key)) = pending.pop() {
            let entries = match fs::read_dir(&dir) {
                Ok(entries) => entries,
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            for entry in entries {
                let entry = entry?;
                let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                    continue;
                };
                let child = format!("{}/{}", key, name);
                if entry.file_type()?.is_dir() {
                    pending.push((entry.path(), child));
                } else if !name.ends_with(TMP_SUFFIX) {
                    results.push(child);
                }
            }
        }
        results.sort();
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_put_get() {
        let temp = TempDir::new().unwrap();
        let backend = LocalBackend::new(temp.path(), "bucket").unwrap();

        backend.put("db/t1/aria", b"hello").unwrap();
        assert_eq!(backend.get("db/t1/aria").unwrap(), b"hello");
        backend.put("db/t1/aria", b"again").unwrap();
        assert_eq!(backend.get("db/t1/aria").unwrap(), b"again");
    }

    #[test]
    fn test_list_is_recursive_and_sorted() {
        let temp = TempDir::new().unwrap();
        let backend = LocalBackend::new(temp.path(), "bucket").unwrap();

        backend.put("db/t1/data/000002", b"b").unwrap();
        backend.put("db/t1/data/000001", b"a").unwrap();
        backend.put("db/t1/index/000001", b"i").unwrap();
        backend.put("db/t2/data/000001", b"x").unwrap();

        assert_eq!(
            backend.list("db/t1").unwrap(),
            vec!["db/t1/data/000001", "db/t1/data/000002", "db/t1/index/000001"]
        );
        assert!(backend.list("db/none").unwrap().is_empty());
    }

    #[test]
    fn test_delete_and_not_found() {
        let temp = TempDir::new().unwrap();
        let backend = LocalBackend::new(temp.path(), "bucket").unwrap();

        backend.put("delete-me", b"bye").unwrap();
        assert!(backend.exists("delete-me").unwrap());
        backend.delete("delete-me").unwrap();
        assert!(!backend.exists("delete-me").unwrap());

        assert!(backend.get("delete-me").unwrap_err().is_not_found());
        assert!(backend.delete("delete-me").unwrap_err().is_not_found());
    }

    #[test]
    fn test_keys_stay_inside_bucket() {
        let temp = TempDir::new().unwrap();
        let backend = LocalBackend::new(temp.path(), "bucket").unwrap();

        for key in ["", "../escape", "/abs", "a/../b", "obj.tmp"] {
            assert!(matches!(backend.put(key, b"x"), Err(RemoteError::InvalidKey(_))), "{}", key);
        }
        assert!(LocalBackend::new(temp.path(), "..").is_err());
    }
}
