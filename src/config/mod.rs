//! Engine configuration.
//!
//! [`CacheOptions`] holds the plain-data switches and can be loaded from
//! JSON. Behavior that is not data (storage backend, inner transport,
//! cacheability predicate, clock, tracing span) is supplied through
//! [`CachingTransportBuilder`](crate::engine::CachingTransportBuilder).

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use serde::Deserialize;
use thiserror::Error;

use crate::http::StatusCode;
use crate::security::CipherError;

/// Errors reported while building an engine. Never raised per request.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("encryption passphrase must not be empty")]
    EmptyPassphrase,

    #[error("failed to set up storage encryption: {0}")]
    Cipher(#[from] CipherError),

    #[error("invalid cache options: {0}")]
    Json(#[from] serde_json::Error),
}

/// Decides whether a status outside the default cacheable set may be stored.
pub type CacheablePredicate = Arc<dyn Fn(StatusCode) -> bool + Send + Sync>;

/// Plain-data engine switches. Every field is optional in JSON.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use cachet::config::CacheOptions;
///
/// let options = CacheOptions::from_json(r#"{
///     "shared_cache": true,
///     "key_headers": ["X-Tenant"],
///     "background_revalidation_timeout_secs": 5
/// }"#).unwrap();
///
/// assert!(options.shared_cache);
/// assert!(options.mark_cached_responses);
/// assert_eq!(options.background_revalidation_timeout(), Some(Duration::from_secs(5)));
/// ```
#[derive(Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CacheOptions {
    /// Add `X-From-Cache: 1` to responses served from cache.
    pub mark_cached_responses: bool,
    /// Never serve stored responses with a 5xx status.
    pub skip_server_errors: bool,
    /// Upper bound for each background revalidation; unbounded when `None`.
    pub background_revalidation_timeout_secs: Option<u64>,
    /// Shared (proxy) cache semantics instead of private.
    pub shared_cache: bool,
    /// Store responses carrying `Vary` under per-variant keys as well.
    pub vary_separation: bool,
    /// Request headers whose values differentiate cache keys.
    pub key_headers: Vec<String>,
    /// Suppress the advisory `Warning` headers.
    pub disable_warning_headers: bool,
    /// Encrypt stored payloads with a key derived from this passphrase.
    pub encryption_passphrase: Option<String>,
    /// Flag invalidated entries stale instead of deleting them, when the
    /// backend supports it.
    pub stale_marking: bool,
}

impl Default for CacheOptions {
    fn default() -> Self {
        Self {
            mark_cached_responses: true,
            skip_server_errors: false,
            background_revalidation_timeout_secs: None,
            shared_cache: false,
            vary_separation: false,
            key_headers: Vec::new(),
            disable_warning_headers: false,
            encryption_passphrase: None,
            stale_marking: false,
        }
    }
}

impl CacheOptions {
    /// Parses options from a JSON object. Missing fields take their defaults.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Json`] for malformed JSON or unknown fields.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    /// The background revalidation bound as a [`Duration`].
    pub fn background_revalidation_timeout(&self) -> Option<Duration> {
        self.background_revalidation_timeout_secs
            .map(Duration::from_secs)
    }
}

impl fmt::Debug for CacheOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheOptions")
            .field("mark_cached_responses", &self.mark_cached_responses)
            .field("skip_server_errors", &self.skip_server_errors)
            .field(
                "background_revalidation_timeout_secs",
                &self.background_revalidation_timeout_secs,
            )
            .field("shared_cache", &self.shared_cache)
            .field("vary_separation", &self.vary_separation)
            .field("key_headers", &self.key_headers)
            .field("disable_warning_headers", &self.disable_warning_headers)
            .field(
                "encryption_passphrase",
                &self.encryption_passphrase.as_ref().map(|_| "<redacted>"),
            )
            .field("stale_marking", &self.stale_marking)
            .finish()
    }
}

/// Source of the current wall-clock time for freshness and `Age`.
pub trait Clock: Send + Sync {
    fn now(&self) -> SystemTime;
}

/// [`Clock`] reading [`SystemTime::now`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> SystemTime {
        SystemTime::now()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let options = CacheOptions::default();
        assert!(options.mark_cached_responses);
        assert!(!options.shared_cache);
        assert!(options.key_headers.is_empty());
        assert_eq!(options.background_revalidation_timeout(), None);
        assert_eq!(CacheOptions::from_json("{}").unwrap(), options);
    }

    #[test]
    fn full_json() {
        let options = CacheOptions::from_json(
            r#"{
                "mark_cached_responses": false,
                "skip_server_errors": true,
                "background_revalidation_timeout_secs": 30,
                "shared_cache": true,
                "vary_separation": true,
                "key_headers": ["X-Tenant", "Accept"],
                "disable_warning_headers": true,
                "encryption_passphrase": "hunter2",
                "stale_marking": true
            }"#,
        )
        .unwrap();
        assert!(!options.mark_cached_responses);
        assert!(options.skip_server_errors);
        assert!(options.vary_separation);
        assert!(options.disable_warning_headers);
        assert!(options.stale_marking);
        assert_eq!(options.key_headers, ["X-Tenant", "Accept"]);
        assert_eq!(options.encryption_passphrase.as_deref(), Some("hunter2"));
    }

    #[test]
    fn unknown_fields_rejected() {
        assert!(matches!(
            CacheOptions::from_json(r#"{"shared": true}"#),
            Err(ConfigError::Json(_))
        ));
    }

    #[test]
    fn debug_redacts_passphrase() {
        let options = CacheOptions {
            encryption_passphrase: Some("hunter2".to_owned()),
            ..CacheOptions::default()
        };
        let printed = format!("{options:?}");
        assert!(!printed.contains("hunter2"));
        assert!(printed.contains("<redacted>"));
    }
}
