//! Vector store: the durable `VectorId → record` mapping.
//!
//! Owns the mapping from identifiers to full-precision records, keeps a
//! write-through in-memory cache for hot reads, and persists every record
//! through the abstract [`BlobStore`]. Transient I/O errors are retried
//! with exponential backoff here, at the durable-store boundary; layers
//! above see only the final error.

/// Abstract durable blob storage and its file/memory implementations.
pub mod blob;

pub use blob::{BlobStore, FileBlobStore, MemoryBlobStore};

use crate::config;
use crate::error::Result;
use crate::record::VectorRecord;
use crate::VectorId;
use std::collections::BTreeMap;
use std::io;
use std::sync::Arc;
use std::time::Duration;

/// Durable mapping from vector id to its full-precision record.
///
/// `put` on an existing id overwrites; callers wanting append semantics
/// must generate fresh ids.
pub struct VectorStore {
    blobs: Arc<dyn BlobStore>,
    /// Write-through cache, keyed for deterministic iteration order.
    cache: BTreeMap<VectorId, VectorRecord>,
}

impl VectorStore {
    /// Create an empty store over the given blob backend.
    pub fn new(blobs: Arc<dyn BlobStore>) -> Self {
        Self {
            blobs,
            cache: BTreeMap::new(),
        }
    }

    fn key(id: VectorId) -> String {
        format!("{}{}", config::VECTOR_KEY_PREFIX, id)
    }

    /// Number of stored records.
    pub fn len(&self) -> usize {
        self.cache.len()
    }

    /// Whether the store holds no records.
    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }

    /// Store a record, overwriting any existing one under the same id.
    /// Durable before the cache is updated.
    pub fn put(&mut self, id: VectorId, record: VectorRecord) -> Result<()> {
        let bytes = bincode::serialize(&record)?;
        let key = Self::key(id);
        with_retries(|| self.blobs.write(&key, &bytes))?;
        self.cache.insert(id, record);
        Ok(())
    }

    /// Fetch a record. `None` on a missing id.
    pub fn get(&self, id: VectorId) -> Option<&VectorRecord> {
        self.cache.get(&id)
    }

    /// Whether a record exists under this id.
    pub fn contains(&self, id: VectorId) -> bool {
        self.cache.contains_key(&id)
    }

    /// Remove a record. Removing a missing id is a no-op.
    pub fn remove(&mut self, id: VectorId) -> Result<()> {
        let key = Self::key(id);
        with_retries(|| self.blobs.delete(&key))?;
        self.cache.remove(&id);
        Ok(())
    }

    /// Lazily iterate all records in ascending id order. Restartable and
    /// finite: the iterator borrows the store, so no mutation can occur
    /// while one is live.
    pub fn iter(&self) -> impl Iterator<Item = (VectorId, &VectorRecord)> {
        self.cache.iter().map(|(&id, rec)| (id, rec))
    }

    /// Rehydrate the cache from the blob store. Used on open when no
    /// snapshot is available but records survived.
    pub fn load_all(&mut self) -> Result<usize> {
        let keys = with_retries(|| self.blobs.list_keys(config::VECTOR_KEY_PREFIX))?;
        let mut loaded = 0usize;
        for key in keys {
            let id: VectorId = match key[config::VECTOR_KEY_PREFIX.len()..].parse() {
                Ok(id) => id,
                Err(_) => {
                    tracing::warn!("skipping blob with malformed vector key: {key}");
                    continue;
                }
            };
            if let Some(bytes) = with_retries(|| self.blobs.read(&key))? {
                let record: VectorRecord = bincode::deserialize(&bytes)?;
                self.cache.insert(id, record);
                loaded += 1;
            }
        }
        Ok(loaded)
    }
}

/// Run a blob-store operation, retrying transient failures with exponential
/// backoff. Permanent errors surface immediately.
fn with_retries<T>(mut op: impl FnMut() -> io::Result<T>) -> io::Result<T> {
    let mut delay = Duration::from_millis(config::BLOB_RETRY_BASE_DELAY_MS);
    let mut attempt = 1u32;
    loop {
        match op() {
            Ok(v) => return Ok(v),
            Err(e) if attempt < config::BLOB_RETRY_ATTEMPTS && is_transient(&e) => {
                tracing::warn!("blob store I/O failed (attempt {attempt}), retrying: {e}");
                std::thread::sleep(delay);
                delay *= 2;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

fn is_transient(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::Interrupted | io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> VectorStore {
        VectorStore::new(Arc::new(MemoryBlobStore::new()))
    }

    #[test]
    fn test_put_get_remove() {
        let mut s = store();
        s.put(7, VectorRecord::new(vec![1.0, 2.0])).unwrap();
        assert_eq!(s.get(7).unwrap().vector, vec![1.0, 2.0]);
        assert!(s.get(8).is_none());

        s.remove(7).unwrap();
        assert!(s.get(7).is_none());
        assert!(s.is_empty());
    }

    #[test]
    fn test_put_overwrites() {
        let mut s = store();
        s.put(1, VectorRecord::new(vec![1.0])).unwrap();
        s.put(1, VectorRecord::new(vec![2.0])).unwrap();
        assert_eq!(s.len(), 1);
        assert_eq!(s.get(1).unwrap().vector, vec![2.0]);
    }

    #[test]
    fn test_iter_is_ordered_and_restartable() {
        let mut s = store();
        for id in [5u64, 1, 3] {
            s.put(id, VectorRecord::new(vec![id as f32])).unwrap();
        }
        let ids: Vec<VectorId> = s.iter().map(|(id, _)| id).collect();
        assert_eq!(ids, vec![1, 3, 5]);
        // Restartable: a second pass yields the same sequence.
        let ids2: Vec<VectorId> = s.iter().map(|(id, _)| id).collect();
        assert_eq!(ids, ids2);
    }

    #[test]
    fn test_load_all_rehydrates_from_blobs() {
        let blobs = Arc::new(MemoryBlobStore::new());
        {
            let mut s = VectorStore::new(Arc::clone(&blobs) as Arc<dyn BlobStore>);
            s.put(10, VectorRecord::new(vec![0.5, 0.5])).unwrap();
            s.put(20, VectorRecord::new(vec![1.5, 1.5])).unwrap();
        }
        let mut fresh = VectorStore::new(blobs as Arc<dyn BlobStore>);
        assert_eq!(fresh.load_all().unwrap(), 2);
        assert_eq!(fresh.get(20).unwrap().vector, vec![1.5, 1.5]);
    }
}
