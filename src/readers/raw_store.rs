use crate::error::{ProcessingError, Result};
use chrono::{DateTime, Utc};
use std::fs;
use std::path::{Path, PathBuf};

/// Listing entry for one immutable raw object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectMeta {
    /// `/`-separated key relative to the raw zone root
    pub key: String,
    pub size: u64,
    pub last_modified: DateTime<Utc>,
}

/// Read access to the raw zone.
///
/// Implementations must be cheap to call repeatedly; retries and timeouts
/// are applied by the caller.
pub trait RawStore: Send + Sync {
    /// Every object under `prefix`, in any order
    fn list(&self, prefix: &str) -> Result<Vec<ObjectMeta>>;

    /// Full content of one object
    fn get(&self, key: &str) -> Result<Vec<u8>>;
}

/// Raw zone kept on a local or mounted filesystem.
#[derive(Debug, Clone)]
pub struct LocalRawStore {
    root: PathBuf,
}

impl LocalRawStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, key: &str) -> Result<PathBuf> {
        if key.split('/').any(|part| part == "..") {
            return Err(ProcessingError::InvalidFormat(format!(
                "Object key escapes the raw zone: {}",
                key
            )));
        }
        Ok(self.root.join(key))
    }

    fn walk(&self, dir: &Path, key_prefix: &str, out: &mut Vec<ObjectMeta>) -> Result<()> {
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();

            // Hidden and bookkeeping files are not raw objects.
            if name.starts_with('.') || name.starts_with('_') {
                continue;
            }

            let key = format!("{}/{}", key_prefix, name);
            let file_type = entry.file_type()?;
            if file_type.is_dir() {
                self.walk(&entry.path(), &key, out)?;
            } else if file_type.is_file() {
                let metadata = entry.metadata()?;
                let last_modified = metadata
                    .modified()
                    .map(DateTime::<Utc>::from)
                    .unwrap_or_else(|_| DateTime::<Utc>::from(std::time::UNIX_EPOCH));
                out.push(ObjectMeta {
                    key,
                    size: metadata.len(),
                    last_modified,
                });
            }
        }
        Ok(())
    }
}

impl RawStore for LocalRawStore {
    fn list(&self, prefix: &str) -> Result<Vec<ObjectMeta>> {
        // A missing root means the zone itself is unreachable.
        if !self.root.is_dir() {
            return Err(ProcessingError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("Raw zone not found: {}", self.root.display()),
            )));
        }

        let prefix = prefix.trim_matches('/');
        let dir = self.resolve(prefix)?;
        let mut objects = Vec::new();
        if dir.is_dir() {
            self.walk(&dir, prefix, &mut objects)?;
        }
        Ok(objects)
    }

    fn get(&self, key: &str) -> Result<Vec<u8>> {
        Ok(fs::read(self.resolve(key)?)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_list_walks_nested_prefixes() {
        let dir = TempDir::new().unwrap();
        let nested = dir.path().join("iot-sensors/2024/06/01/12");
        fs::create_dir_all(&nested).unwrap();
        fs::write(nested.join("batch-1"), b"{}").unwrap();
        fs::write(nested.join(".partial"), b"{}").unwrap();
        fs::create_dir_all(dir.path().join("weather")).unwrap();

        let store = LocalRawStore::new(dir.path());
        let objects = store.list("iot-sensors").unwrap();
        assert_eq!(objects.len(), 1);
        assert_eq!(objects[0].key, "iot-sensors/2024/06/01/12/batch-1");
        assert_eq!(objects[0].size, 2);

        assert!(store.list("weather").unwrap().is_empty());
        assert!(store.list("missing").unwrap().is_empty());
        assert_eq!(store.get(&objects[0].key).unwrap(), b"{}");
    }

    #[test]
    fn test_missing_root_is_an_io_error() {
        let store = LocalRawStore::new("/nonexistent/raw-zone");
        let err = store.list("weather").unwrap_err();
        assert!(err.is_transient());
    }

    #[test]
    fn test_keys_cannot_escape_root() {
        let dir = TempDir::new().unwrap();
        let store = LocalRawStore::new(dir.path());
        assert!(matches!(
            store.get("../etc/passwd"),
            Err(ProcessingError::InvalidFormat(_))
        ));
    }
}
