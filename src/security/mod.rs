//! At-rest protection for cache entries.
//!
//! - [`Cipher`]: scrypt-derived AES-256-GCM sealing of payloads.
//! - [`SecureStorage`]: the engine's single gateway to a backend: hashes
//!   every key and seals/opens every payload.

pub mod cipher;
pub mod storage;

pub use cipher::{Cipher, CipherError};
pub use storage::{SecureStorage, SecureStorageError};
