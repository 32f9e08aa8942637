//! In-process storage backend.

use std::collections::HashMap;
use std::sync::RwLock;

use bytes::Bytes;

use super::{BoxFuture, StaleMarking, Storage, StorageError};
use crate::key::StorageKey;

#[derive(Debug, Clone)]
struct Entry {
    value: Bytes,
    stale: bool,
}

/// A `HashMap` behind an `RwLock`, with stale-marking support.
///
/// Unbounded: nothing is ever evicted. Meant for tests, demos and
/// short-lived processes.
///
/// # Examples
///
/// ```
/// use bytes::Bytes;
/// use cachet::key::CacheKey;
/// use cachet::http::Request;
/// use cachet::storage::{MemoryStorage, Storage};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), cachet::storage::StorageError> {
/// let storage = MemoryStorage::new();
/// let request = Request::get("http://example.com/").unwrap();
/// let key = CacheKey::base(request.method(), request.url()).storage_key();
///
/// storage.set(&key, Bytes::from_static(b"payload")).await?;
/// assert_eq!(storage.get(&key).await?.as_deref(), Some(&b"payload"[..]));
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Default)]
pub struct MemoryStorage {
    entries: RwLock<HashMap<StorageKey, Entry>>,
}

impl MemoryStorage {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries, stale-marked ones included.
    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    /// Returns `true` when nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn read<T>(&self, f: impl FnOnce(&HashMap<StorageKey, Entry>) -> T) -> Result<T, StorageError> {
        let entries = self.entries.read().map_err(|_| poisoned())?;
        Ok(f(&entries))
    }

    fn write<T>(
        &self,
        f: impl FnOnce(&mut HashMap<StorageKey, Entry>) -> T,
    ) -> Result<T, StorageError> {
        let mut entries = self.entries.write().map_err(|_| poisoned())?;
        Ok(f(&mut entries))
    }
}

fn poisoned() -> StorageError {
    StorageError::Backend("memory storage lock poisoned".to_owned())
}

impl Storage for MemoryStorage {
    fn get<'a>(&'a self, key: &'a StorageKey) -> BoxFuture<'a, Result<Option<Bytes>, StorageError>> {
        Box::pin(async move {
            self.read(|entries| {
                entries
                    .get(key)
                    .filter(|e| !e.stale)
                    .map(|e| e.value.clone())
            })
        })
    }

    fn set<'a>(&'a self, key: &'a StorageKey, value: Bytes) -> BoxFuture<'a, Result<(), StorageError>> {
        Box::pin(async move {
            self.write(|entries| {
                entries.insert(key.clone(), Entry { value, stale: false });
            })
        })
    }

    fn delete<'a>(&'a self, key: &'a StorageKey) -> BoxFuture<'a, Result<(), StorageError>> {
        Box::pin(async move {
            self.write(|entries| {
                entries.remove(key);
            })
        })
    }

    fn stale_marking(&self) -> Option<&dyn StaleMarking> {
        Some(self)
    }
}

impl StaleMarking for MemoryStorage {
    fn mark_stale<'a>(&'a self, key: &'a StorageKey) -> BoxFuture<'a, Result<(), StorageError>> {
        Box::pin(async move {
            self.write(|entries| {
                if let Some(entry) = entries.get_mut(key) {
                    entry.stale = true;
                }
            })
        })
    }

    fn is_stale<'a>(&'a self, key: &'a StorageKey) -> BoxFuture<'a, Result<bool, StorageError>> {
        Box::pin(async move { self.read(|entries| entries.get(key).is_some_and(|e| e.stale)) })
    }

    fn get_stale<'a>(
        &'a self,
        key: &'a StorageKey,
    ) -> BoxFuture<'a, Result<Option<Bytes>, StorageError>> {
        Box::pin(async move {
            self.read(|entries| {
                entries
                    .get(key)
                    .filter(|e| e.stale)
                    .map(|e| e.value.clone())
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::Request;
    use crate::key::CacheKey;

    fn key(url: &str) -> StorageKey {
        let req = Request::get(url).unwrap();
        CacheKey::base(req.method(), req.url()).storage_key()
    }

    #[tokio::test]
    async fn set_get_delete() {
        let storage = MemoryStorage::new();
        let k = key("http://example.com/a");
        assert_eq!(storage.get(&k).await.unwrap(), None);

        storage.set(&k, Bytes::from_static(b"one")).await.unwrap();
        assert_eq!(storage.get(&k).await.unwrap(), Some(Bytes::from_static(b"one")));

        storage.delete(&k).await.unwrap();
        assert_eq!(storage.get(&k).await.unwrap(), None);
        storage.delete(&k).await.unwrap();
    }

    #[tokio::test]
    async fn latest_write_wins() {
        let storage = MemoryStorage::new();
        let k = key("http://example.com/a");
        storage.set(&k, Bytes::from_static(b"one")).await.unwrap();
        storage.set(&k, Bytes::from_static(b"two")).await.unwrap();
        assert_eq!(storage.len(), 1);
        assert_eq!(storage.get(&k).await.unwrap(), Some(Bytes::from_static(b"two")));
    }

    #[tokio::test]
    async fn stale_marking_hides_until_rewritten() {
        let storage = MemoryStorage::new();
        let k = key("http://example.com/a");
        storage.set(&k, Bytes::from_static(b"one")).await.unwrap();

        let marking = storage.stale_marking().unwrap();
        marking.mark_stale(&k).await.unwrap();
        assert!(marking.is_stale(&k).await.unwrap());
        assert_eq!(storage.get(&k).await.unwrap(), None);
        assert_eq!(
            marking.get_stale(&k).await.unwrap(),
            Some(Bytes::from_static(b"one"))
        );

        storage.set(&k, Bytes::from_static(b"two")).await.unwrap();
        assert!(!marking.is_stale(&k).await.unwrap());
        assert_eq!(marking.get_stale(&k).await.unwrap(), None);
    }

    #[tokio::test]
    async fn marking_missing_key_is_noop() {
        let storage = MemoryStorage::new();
        let k = key("http://example.com/missing");
        storage.mark_stale(&k).await.unwrap();
        assert!(!storage.is_stale(&k).await.unwrap());
        assert!(storage.is_empty());
    }
}
