//! Durable blob storage.
//!
//! The index persists vector records and snapshots through the [`BlobStore`]
//! trait; durability and replication of the backing medium are the store's
//! own concern. [`FileBlobStore`] maps keys to files with atomic
//! temp-file + rename writes. [`MemoryBlobStore`] backs tests and
//! ephemeral indexes.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};

/// Abstract durable key-value blob storage.
///
/// Keys are slash-separated UTF-8 paths chosen by the engine
/// (e.g. `vec/42`, `index/snapshot`). Values are opaque byte sequences.
pub trait BlobStore: Send + Sync {
    /// Store a blob, replacing any existing value atomically.
    fn write(&self, key: &str, bytes: &[u8]) -> io::Result<()>;

    /// Retrieve a blob. `Ok(None)` on a missing key.
    fn read(&self, key: &str) -> io::Result<Option<Vec<u8>>>;

    /// Delete a blob. Deleting a missing key is not an error.
    fn delete(&self, key: &str) -> io::Result<()>;

    /// List all keys with the given prefix, in unspecified order.
    fn list_keys(&self, prefix: &str) -> io::Result<Vec<String>>;
}

/// File-backed blob store: one file per key under a base directory.
#[derive(Debug)]
pub struct FileBlobStore {
    base: PathBuf,
}

impl FileBlobStore {
    /// Open or create a blob store rooted at `base`.
    pub fn new<P: AsRef<Path>>(base: P) -> io::Result<Self> {
        let base = base.as_ref().to_path_buf();
        std::fs::create_dir_all(&base)?;
        Ok(Self { base })
    }

    fn key_to_path(&self, key: &str) -> io::Result<PathBuf> {
        if key.is_empty() || key.split('/').any(|seg| seg.is_empty() || seg == "." || seg == "..") {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("invalid blob key: {key:?}"),
            ));
        }
        Ok(self.base.join(key))
    }
}

impl BlobStore for FileBlobStore {
    fn write(&self, key: &str, bytes: &[u8]) -> io::Result<()> {
        let path = self.key_to_path(key)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        // Atomic replace: write to temp, then rename.
        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, bytes)?;
        std::fs::rename(&tmp, &path)
    }

    fn read(&self, key: &str) -> io::Result<Option<Vec<u8>>> {
        let path = self.key_to_path(key)?;
        match std::fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn delete(&self, key: &str) -> io::Result<()> {
        let path = self.key_to_path(key)?;
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }

    fn list_keys(&self, prefix: &str) -> io::Result<Vec<String>> {
        let mut keys = Vec::new();
        let mut stack = vec![self.base.clone()];
        while let Some(dir) = stack.pop() {
            let entries = match std::fs::read_dir(&dir) {
                Ok(e) => e,
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e),
            };
            for entry in entries {
                let entry = entry?;
                let path = entry.path();
                if path.is_dir() {
                    stack.push(path);
                } else if path.extension().and_then(|s| s.to_str()) != Some("tmp") {
                    if let Ok(rel) = path.strip_prefix(&self.base) {
                        let key = rel
                            .components()
                            .map(|c| c.as_os_str().to_string_lossy())
                            .collect::<Vec<_>>()
                            .join("/");
                        if key.starts_with(prefix) {
                            keys.push(key);
                        }
                    }
                }
            }
        }
        Ok(keys)
    }
}

/// In-memory blob store for tests and ephemeral indexes.
#[derive(Debug, Default)]
pub struct MemoryBlobStore {
    blobs: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl BlobStore for MemoryBlobStore {
    fn write(&self, key: &str, bytes: &[u8]) -> io::Result<()> {
        self.blobs.lock().insert(key.to_string(), bytes.to_vec());
        Ok(())
    }

    fn read(&self, key: &str) -> io::Result<Option<Vec<u8>>> {
        Ok(self.blobs.lock().get(key).cloned())
    }

    fn delete(&self, key: &str) -> io::Result<()> {
        self.blobs.lock().remove(key);
        Ok(())
    }

    fn list_keys(&self, prefix: &str) -> io::Result<Vec<String>> {
        Ok(self
            .blobs
            .lock()
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }
}
