//! The storage contract consumed by the cache engine.
//!
//! Backends only ever see hashed [`StorageKey`]s and opaque byte payloads;
//! eviction, persistence and their own concurrency safety are entirely
//! theirs. Operations are futures: dropping one cancels it.
//!
//! Backends that prefer flagging entries over deleting them additionally
//! implement [`StaleMarking`] and expose it through
//! [`Storage::stale_marking`]. The engine falls back to deletion when a
//! backend returns `None` there.

use std::future::Future;
use std::pin::Pin;

use bytes::Bytes;
use thiserror::Error;

use crate::key::StorageKey;

pub mod memory;

pub use memory::MemoryStorage;

/// A boxed, `Send` future, the return type of every storage operation.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Errors reported by storage backends.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("storage backend error: {0}")]
    Backend(String),
}

/// A byte store keyed by [`StorageKey`].
///
/// # Contract
///
/// - `get` returns `Ok(None)` for a missing key; errors are reserved for
///   backend failures.
/// - `set` replaces any previous value wholesale.
/// - `delete` of a missing key succeeds.
pub trait Storage: Send + Sync {
    /// Fetches the payload stored under `key`.
    fn get<'a>(&'a self, key: &'a StorageKey) -> BoxFuture<'a, Result<Option<Bytes>, StorageError>>;

    /// Stores `value` under `key`.
    fn set<'a>(&'a self, key: &'a StorageKey, value: Bytes) -> BoxFuture<'a, Result<(), StorageError>>;

    /// Removes the payload stored under `key`.
    fn delete<'a>(&'a self, key: &'a StorageKey) -> BoxFuture<'a, Result<(), StorageError>>;

    /// The backend's stale-marking capability, if it has one.
    fn stale_marking(&self) -> Option<&dyn StaleMarking> {
        None
    }
}

/// Optional capability: flag an entry as stale instead of deleting it.
///
/// A marked entry is hidden from [`Storage::get`] but remains readable
/// through [`get_stale`](Self::get_stale) until the next `set` or `delete`
/// of the same key.
pub trait StaleMarking: Send + Sync {
    /// Flags the entry under `key` as stale.
    fn mark_stale<'a>(&'a self, key: &'a StorageKey) -> BoxFuture<'a, Result<(), StorageError>>;

    /// Returns `true` when `key` holds a stale-marked entry.
    fn is_stale<'a>(&'a self, key: &'a StorageKey) -> BoxFuture<'a, Result<bool, StorageError>>;

    /// Fetches a stale-marked entry.
    fn get_stale<'a>(&'a self, key: &'a StorageKey)
    -> BoxFuture<'a, Result<Option<Bytes>, StorageError>>;
}
