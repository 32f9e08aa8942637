//! Payload encryption for stored cache entries.
//!
//! A 256-bit key is derived once from a passphrase with scrypt; payloads are
//! sealed with AES-256-GCM under a fresh random 96-bit nonce, which is
//! prepended to the ciphertext:
//!
//! ```text
//! | nonce (12 bytes) | ciphertext | tag (16 bytes) |
//! ```

use std::fmt;

use bytes::Bytes;
use ring::aead::{AES_256_GCM, Aad, LessSafeKey, NONCE_LEN, Nonce, UnboundKey};
use ring::rand::{SecureRandom, SystemRandom};
use thiserror::Error;
use zeroize::Zeroizing;

// Fixed so the same passphrase yields the same key across processes.
const KDF_SALT: &[u8] = b"cachet/storage-encryption/v1";
const KDF_LOG_N: u8 = 15;
const KDF_R: u32 = 8;
const KDF_P: u32 = 1;
const KEY_LEN: usize = 32;

/// Errors raised while deriving keys or sealing/opening payloads.
#[derive(Debug, Error)]
pub enum CipherError {
    #[error("encryption passphrase must not be empty")]
    EmptyPassphrase,

    #[error("key derivation failed: {0}")]
    KeyDerivation(String),

    #[error("failed to encrypt cache entry")]
    Encrypt,

    #[error("encrypted cache entry is truncated ({len} bytes)")]
    Truncated { len: usize },

    #[error("failed to decrypt cache entry: corrupted, tampered with, or sealed under another key")]
    Decrypt,
}

/// AES-256-GCM state derived from a passphrase.
///
/// # Examples
///
/// ```
/// use cachet::security::Cipher;
///
/// let cipher = Cipher::from_passphrase("correct horse battery staple").unwrap();
/// let sealed = cipher.encrypt(b"cached response").unwrap();
/// assert_eq!(&cipher.decrypt(&sealed).unwrap()[..], b"cached response");
///
/// let other = Cipher::from_passphrase("another passphrase").unwrap();
/// assert!(other.decrypt(&sealed).is_err());
/// ```
pub struct Cipher {
    key: LessSafeKey,
    rng: SystemRandom,
}

impl Cipher {
    /// Derives the key for `passphrase`.
    ///
    /// # Errors
    ///
    /// - [`CipherError::EmptyPassphrase`] for an empty passphrase.
    /// - [`CipherError::KeyDerivation`] if scrypt or the AEAD rejects the key.
    pub fn from_passphrase(passphrase: &str) -> Result<Self, CipherError> {
        if passphrase.is_empty() {
            return Err(CipherError::EmptyPassphrase);
        }

        let params = scrypt::Params::new(KDF_LOG_N, KDF_R, KDF_P, KEY_LEN)
            .map_err(|e| CipherError::KeyDerivation(e.to_string()))?;
        let mut key = Zeroizing::new([0u8; KEY_LEN]);
        scrypt::scrypt(passphrase.as_bytes(), KDF_SALT, &params, key.as_mut_slice())
            .map_err(|e| CipherError::KeyDerivation(e.to_string()))?;

        let unbound = UnboundKey::new(&AES_256_GCM, key.as_slice())
            .map_err(|_| CipherError::KeyDerivation("invalid AES-256-GCM key".to_owned()))?;

        Ok(Self {
            key: LessSafeKey::new(unbound),
            rng: SystemRandom::new(),
        })
    }

    /// Seals `plaintext` under a fresh random nonce.
    ///
    /// # Errors
    ///
    /// [`CipherError::Encrypt`] if the system RNG or the AEAD fails.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Bytes, CipherError> {
        let mut nonce = [0u8; NONCE_LEN];
        self.rng.fill(&mut nonce).map_err(|_| CipherError::Encrypt)?;

        let mut in_out = plaintext.to_vec();
        self.key
            .seal_in_place_append_tag(Nonce::assume_unique_for_key(nonce), Aad::empty(), &mut in_out)
            .map_err(|_| CipherError::Encrypt)?;

        let mut sealed = Vec::with_capacity(NONCE_LEN + in_out.len());
        sealed.extend_from_slice(&nonce);
        sealed.extend_from_slice(&in_out);
        Ok(Bytes::from(sealed))
    }

    /// Opens a payload produced by [`encrypt`](Self::encrypt).
    ///
    /// # Errors
    ///
    /// - [`CipherError::Truncated`] when the payload cannot hold a nonce and tag.
    /// - [`CipherError::Decrypt`] when authentication fails.
    pub fn decrypt(&self, sealed: &[u8]) -> Result<Bytes, CipherError> {
        if sealed.len() < NONCE_LEN + AES_256_GCM.tag_len() {
            return Err(CipherError::Truncated { len: sealed.len() });
        }

        let (nonce, ciphertext) = sealed.split_at(NONCE_LEN);
        let nonce = Nonce::try_assume_unique_for_key(nonce).map_err(|_| CipherError::Decrypt)?;
        let mut in_out = ciphertext.to_vec();
        let plaintext = self
            .key
            .open_in_place(nonce, Aad::empty(), &mut in_out)
            .map_err(|_| CipherError::Decrypt)?;

        Ok(Bytes::copy_from_slice(plaintext))
    }
}

impl fmt::Debug for Cipher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cipher")
            .field("algorithm", &"AES-256-GCM")
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::OnceLock;

    use super::*;

    // scrypt is deliberately slow; derive each test key once.
    fn cipher() -> &'static Cipher {
        static CIPHER: OnceLock<Cipher> = OnceLock::new();
        CIPHER.get_or_init(|| Cipher::from_passphrase("test passphrase").unwrap())
    }

    #[test]
    fn round_trip() {
        for payload in [&b""[..], b"x", b"HTTP/1.1 200 OK\r\n\r\nbody"] {
            let sealed = cipher().encrypt(payload).unwrap();
            assert_eq!(&cipher().decrypt(&sealed).unwrap()[..], payload);
        }
    }

    #[test]
    fn nonces_are_random() {
        let a = cipher().encrypt(b"same").unwrap();
        let b = cipher().encrypt(b"same").unwrap();
        assert_ne!(a, b);
        assert_eq!(a.len(), NONCE_LEN + 4 + 16);
    }

    #[test]
    fn same_passphrase_same_key() {
        let sealed = cipher().encrypt(b"portable").unwrap();
        let again = Cipher::from_passphrase("test passphrase").unwrap();
        assert_eq!(&again.decrypt(&sealed).unwrap()[..], b"portable");
    }

    #[test]
    fn wrong_passphrase_fails() {
        let sealed = cipher().encrypt(b"secret").unwrap();
        let other = Cipher::from_passphrase("not the passphrase").unwrap();
        assert!(matches!(other.decrypt(&sealed), Err(CipherError::Decrypt)));
    }

    #[test]
    fn tampering_detected() {
        let mut sealed = cipher().encrypt(b"secret").unwrap().to_vec();
        let last = sealed.len() - 1;
        sealed[last] ^= 0x01;
        assert!(matches!(cipher().decrypt(&sealed), Err(CipherError::Decrypt)));
    }

    #[test]
    fn truncated_payload() {
        assert!(matches!(
            cipher().decrypt(&[0u8; 10]),
            Err(CipherError::Truncated { len: 10 })
        ));
    }

    #[test]
    fn empty_passphrase_rejected() {
        assert!(matches!(
            Cipher::from_passphrase(""),
            Err(CipherError::EmptyPassphrase)
        ));
    }
}
