use std::sync::Arc;

use tracing::{Span, debug, info_span};

use super::{CachingTransport, Inner};
use crate::config::{CacheOptions, CacheablePredicate, Clock, ConfigError, SystemClock};
use crate::http::StatusCode;
use crate::security::{Cipher, SecureStorage};
use crate::storage::Storage;
use crate::transport::{HttpTransport, Transport};

/// Configures and builds a [`CachingTransport`].
///
/// Everything except the storage backend is optional:
///
/// | Setting            | Default                        |
/// |--------------------|--------------------------------|
/// | options            | [`CacheOptions::default`]      |
/// | inner transport    | [`HttpTransport`]              |
/// | cacheable statuses | the default cacheable set only |
/// | clock              | [`SystemClock`]                |
/// | span               | `info_span!("cachet")`         |
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use cachet::config::CacheOptions;
/// use cachet::engine::CachingTransport;
/// use cachet::storage::MemoryStorage;
///
/// let cache = CachingTransport::builder(Arc::new(MemoryStorage::new()))
///     .options(CacheOptions { shared_cache: true, ..CacheOptions::default() })
///     .cacheable_status(|status| status.as_u16() == 302)
///     .span(tracing::info_span!("http-cache", tier = "edge"))
///     .build()
///     .unwrap();
/// assert!(cache.options().shared_cache);
/// ```
pub struct CachingTransportBuilder {
    storage: Arc<dyn Storage>,
    options: CacheOptions,
    transport: Option<Arc<dyn Transport>>,
    cacheable: Option<CacheablePredicate>,
    clock: Option<Arc<dyn Clock>>,
    span: Option<Span>,
}

impl CachingTransportBuilder {
    pub(super) fn new(storage: Arc<dyn Storage>) -> Self {
        Self {
            storage,
            options: CacheOptions::default(),
            transport: None,
            cacheable: None,
            clock: None,
            span: None,
        }
    }

    /// Replaces the engine options.
    #[must_use]
    pub fn options(mut self, options: CacheOptions) -> Self {
        self.options = options;
        self
    }

    /// Sends origin requests through `transport` instead of [`HttpTransport`].
    #[must_use]
    pub fn transport(mut self, transport: impl Transport + 'static) -> Self {
        self.transport = Some(Arc::new(transport));
        self
    }

    /// Allows storing statuses outside the default cacheable set when
    /// `predicate` returns `true`. `must-understand` still applies.
    #[must_use]
    pub fn cacheable_status<F>(mut self, predicate: F) -> Self
    where
        F: Fn(StatusCode) -> bool + Send + Sync + 'static,
    {
        self.cacheable = Some(Arc::new(predicate));
        self
    }

    /// Replaces the wall clock used for freshness and `Age`.
    #[must_use]
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Parent span for every request and background revalidation.
    #[must_use]
    pub fn span(mut self, span: Span) -> Self {
        self.span = Some(span);
        self
    }

    /// Validates the configuration and builds the engine.
    ///
    /// The encryption key, if any, is derived here, once.
    ///
    /// # Errors
    ///
    /// - [`ConfigError::EmptyPassphrase`] for an empty encryption passphrase.
    /// - [`ConfigError::Cipher`] if key derivation fails.
    pub fn build(self) -> Result<CachingTransport, ConfigError> {
        let cipher = match self.options.encryption_passphrase.as_deref() {
            Some("") => return Err(ConfigError::EmptyPassphrase),
            Some(passphrase) => Some(Cipher::from_passphrase(passphrase)?),
            None => None,
        };

        if self.options.stale_marking && self.storage.stale_marking().is_none() {
            debug!("storage backend cannot mark entries stale; invalidation will delete");
        }

        let transport = self
            .transport
            .unwrap_or_else(|| Arc::new(HttpTransport::new()));

        Ok(CachingTransport {
            inner: Arc::new(Inner {
                transport,
                storage: SecureStorage::new(self.storage, cipher),
                options: self.options,
                cacheable: self.cacheable,
                clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
                span: self.span.unwrap_or_else(|| info_span!("cachet")),
            }),
        })
    }
}

impl std::fmt::Debug for CachingTransportBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachingTransportBuilder")
            .field("options", &self.options)
            .field("custom_transport", &self.transport.is_some())
            .field("cacheable_predicate", &self.cacheable.is_some())
            .finish_non_exhaustive()
    }
}
