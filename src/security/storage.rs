//! Hashing and encrypting access to a storage backend.

use std::sync::Arc;

use bytes::Bytes;
use thiserror::Error;
use tracing::trace;

use super::{Cipher, CipherError};
use crate::key::CacheKey;
use crate::storage::{Storage, StorageError};

/// Errors from the secure read path.
///
/// Backend failures and integrity failures are kept apart: the former are
/// survivable (a miss), the latter must never be served.
#[derive(Debug, Error)]
pub enum SecureStorageError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("cache entry failed its integrity check: {0}")]
    Integrity(#[from] CipherError),
}

/// The only path from the engine to a backend.
///
/// Every call hashes the [`CacheKey`] into a
/// [`StorageKey`](crate::key::StorageKey) first. With a [`Cipher`]
/// configured, payloads are encrypted on `set` and decrypted on every read.
#[derive(Clone)]
pub struct SecureStorage {
    backend: Arc<dyn Storage>,
    cipher: Option<Arc<Cipher>>,
}

impl SecureStorage {
    /// Wraps `backend`, encrypting payloads when `cipher` is set.
    pub fn new(backend: Arc<dyn Storage>, cipher: Option<Cipher>) -> Self {
        Self {
            backend,
            cipher: cipher.map(Arc::new),
        }
    }

    /// Returns `true` when payloads are encrypted at rest.
    pub fn is_encrypted(&self) -> bool {
        self.cipher.is_some()
    }

    /// Returns `true` when the backend can flag entries stale.
    pub fn supports_stale_marking(&self) -> bool {
        self.backend.stale_marking().is_some()
    }

    /// Reads and, if configured, decrypts the entry for `key`.
    ///
    /// # Errors
    ///
    /// [`SecureStorageError::Storage`] on backend failure,
    /// [`SecureStorageError::Integrity`] when decryption fails.
    pub async fn get(&self, key: &CacheKey) -> Result<Option<Bytes>, SecureStorageError> {
        let storage_key = key.storage_key();
        trace!(key = %storage_key, "storage get");
        match self.backend.get(&storage_key).await? {
            Some(payload) => Ok(Some(self.open(payload)?)),
            None => Ok(None),
        }
    }

    /// Encrypts (if configured) and stores `payload` under `key`.
    ///
    /// # Errors
    ///
    /// Backend failures, or [`SecureStorageError::Integrity`] if sealing fails.
    pub async fn set(&self, key: &CacheKey, payload: Bytes) -> Result<(), SecureStorageError> {
        let storage_key = key.storage_key();
        let payload = match &self.cipher {
            Some(cipher) => cipher.encrypt(&payload)?,
            None => payload,
        };
        trace!(key = %storage_key, bytes = payload.len(), "storage set");
        self.backend.set(&storage_key, payload).await?;
        Ok(())
    }

    /// Removes the entry for `key`.
    ///
    /// # Errors
    ///
    /// Backend failures.
    pub async fn delete(&self, key: &CacheKey) -> Result<(), StorageError> {
        let storage_key = key.storage_key();
        trace!(key = %storage_key, "storage delete");
        self.backend.delete(&storage_key).await
    }

    /// Flags the entry for `key` stale, or deletes it when the backend cannot
    /// flag entries.
    ///
    /// # Errors
    ///
    /// Backend failures.
    pub async fn mark_stale(&self, key: &CacheKey) -> Result<(), StorageError> {
        let storage_key = key.storage_key();
        match self.backend.stale_marking() {
            Some(marking) => {
                trace!(key = %storage_key, "storage mark stale");
                marking.mark_stale(&storage_key).await
            }
            None => self.backend.delete(&storage_key).await,
        }
    }

    /// Reads a stale-marked entry for `key`; `None` when the backend has no
    /// such entry or cannot flag entries at all.
    ///
    /// # Errors
    ///
    /// As for [`get`](Self::get).
    pub async fn get_stale(&self, key: &CacheKey) -> Result<Option<Bytes>, SecureStorageError> {
        let Some(marking) = self.backend.stale_marking() else {
            return Ok(None);
        };
        let storage_key = key.storage_key();
        if !marking.is_stale(&storage_key).await? {
            return Ok(None);
        }
        match marking.get_stale(&storage_key).await? {
            Some(payload) => Ok(Some(self.open(payload)?)),
            None => Ok(None),
        }
    }

    fn open(&self, payload: Bytes) -> Result<Bytes, CipherError> {
        match &self.cipher {
            Some(cipher) => cipher.decrypt(&payload),
            None => Ok(payload),
        }
    }
}

impl std::fmt::Debug for SecureStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecureStorage")
            .field("encrypted", &self.is_encrypted())
            .field("stale_marking", &self.supports_stale_marking())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::Request;
    use crate::storage::MemoryStorage;

    fn key() -> CacheKey {
        let req = Request::get("http://example.com/secure").unwrap();
        CacheKey::base(req.method(), req.url())
    }

    #[tokio::test]
    async fn backend_sees_only_hashed_keys_and_ciphertext() {
        let backend = Arc::new(MemoryStorage::new());
        let cipher = Cipher::from_passphrase("p4ss").unwrap();
        let secure = SecureStorage::new(backend.clone(), Some(cipher));

        secure.set(&key(), Bytes::from_static(b"plaintext body")).await.unwrap();

        let raw = backend.get(&key().storage_key()).await.unwrap().unwrap();
        assert!(!raw.windows(9).any(|w| w == b"plaintext"));
        assert_eq!(
            secure.get(&key()).await.unwrap(),
            Some(Bytes::from_static(b"plaintext body"))
        );
    }

    #[tokio::test]
    async fn plaintext_without_cipher() {
        let backend = Arc::new(MemoryStorage::new());
        let secure = SecureStorage::new(backend.clone(), None);
        secure.set(&key(), Bytes::from_static(b"body")).await.unwrap();
        assert_eq!(
            backend.get(&key().storage_key()).await.unwrap(),
            Some(Bytes::from_static(b"body"))
        );
    }

    #[tokio::test]
    async fn corrupted_entry_is_an_integrity_error() {
        let backend = Arc::new(MemoryStorage::new());
        let secure = SecureStorage::new(
            backend.clone(),
            Some(Cipher::from_passphrase("p4ss").unwrap()),
        );
        backend
            .set(&key().storage_key(), Bytes::from_static(b"definitely not sealed by us"))
            .await
            .unwrap();
        assert!(matches!(
            secure.get(&key()).await,
            Err(SecureStorageError::Integrity(_))
        ));
    }

    #[tokio::test]
    async fn mark_stale_then_get_stale() {
        let secure = SecureStorage::new(Arc::new(MemoryStorage::new()), None);
        secure.set(&key(), Bytes::from_static(b"old")).await.unwrap();
        secure.mark_stale(&key()).await.unwrap();
        assert_eq!(secure.get(&key()).await.unwrap(), None);
        assert_eq!(
            secure.get_stale(&key()).await.unwrap(),
            Some(Bytes::from_static(b"old"))
        );
    }

    struct DeleteOnly(MemoryStorage);

    impl Storage for DeleteOnly {
        fn get<'a>(
            &'a self,
            key: &'a crate::key::StorageKey,
        ) -> crate::storage::BoxFuture<'a, Result<Option<Bytes>, StorageError>> {
            self.0.get(key)
        }

        fn set<'a>(
            &'a self,
            key: &'a crate::key::StorageKey,
            value: Bytes,
        ) -> crate::storage::BoxFuture<'a, Result<(), StorageError>> {
            self.0.set(key, value)
        }

        fn delete<'a>(
            &'a self,
            key: &'a crate::key::StorageKey,
        ) -> crate::storage::BoxFuture<'a, Result<(), StorageError>> {
            self.0.delete(key)
        }
    }

    #[tokio::test]
    async fn mark_stale_falls_back_to_delete() {
        let secure = SecureStorage::new(Arc::new(DeleteOnly(MemoryStorage::new())), None);
        assert!(!secure.supports_stale_marking());
        secure.set(&key(), Bytes::from_static(b"old")).await.unwrap();
        secure.mark_stale(&key()).await.unwrap();
        assert_eq!(secure.get(&key()).await.unwrap(), None);
        assert_eq!(secure.get_stale(&key()).await.unwrap(), None);
    }
}
