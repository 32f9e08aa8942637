//! The caching round-trip engine.
//!
//! [`CachingTransport`] wraps an inner [`Transport`]. Per request it derives
//! the cache key, looks the key up, classifies what it finds and then either
//! serves the stored response, serves it while refreshing it in the
//! background, revalidates it conditionally, or fetches from the origin.
//! Origin responses are stored once their body has been fully read.

use std::fmt;
use std::sync::Arc;
use std::time::SystemTime;

use bytes::Bytes;
use thiserror::Error;
use tokio::io::AsyncReadExt;
use tracing::{Instrument, Span, debug, trace, warn};

use crate::config::{CacheOptions, CacheablePredicate, Clock};
use crate::directives::Directives;
use crate::freshness::{self, Freshness, can_store, is_default_cacheable_status, stale_if_error_permitted};
use crate::http::{Body, Headers, Method, Request, Response, StatusCode};
use crate::invalidate;
use crate::key::CacheKey;
use crate::record::StoredResponse;
use crate::security::{CipherError, SecureStorage, SecureStorageError};
use crate::storage::BoxFuture;
use crate::transport::{Transport, TransportError};
use crate::vary;

mod builder;
mod persist;


pub use builder::CachingTransportBuilder;
use persist::{Persist, PersistOnEof};

/// Set to `1` on responses served from cache.
pub const X_FROM_CACHE: &str = "X-From-Cache";
/// Set to `1` when a conditional request confirmed the stored response.
pub const X_REVALIDATED: &str = "X-Revalidated";
/// Set to `1` when a stale response is served.
pub const X_STALE: &str = "X-Stale";
/// The freshness classification of a served response.
pub const X_CACHE_FRESHNESS: &str = "X-Cache-Freshness";

/// `Warning` value for stale responses (RFC 7234 §5.5.1).
pub const WARNING_STALE: &str = "110 - \"Response is Stale\"";
/// `Warning` value when revalidation failed (RFC 7234 §5.5.2).
pub const WARNING_REVALIDATION_FAILED: &str = "111 - \"Revalidation Failed\"";

const HOP_BY_HOP: [&str; 8] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// The errors a caller of the engine can see.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("cache entry failed its integrity check: {0}")]
    Integrity(#[from] CipherError),
}

impl From<CacheError> for TransportError {
    fn from(err: CacheError) -> Self {
        match err {
            CacheError::Transport(err) => err,
            CacheError::Integrity(err) => TransportError::Other(err.to_string()),
        }
    }
}

/// An RFC 9111 private (or shared) cache in front of a [`Transport`].
///
/// Cheap to clone; clones share storage and configuration.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use cachet::engine::CachingTransport;
/// use cachet::http::{Request, Response, StatusCode};
/// use cachet::storage::MemoryStorage;
/// use cachet::transport::transport_fn;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let cache = CachingTransport::builder(Arc::new(MemoryStorage::new()))
///     .transport(transport_fn(|_req: Request| async {
///         Ok(Response::new(StatusCode::OK)
///             .header("Date", httpdate::fmt_http_date(std::time::SystemTime::now()))
///             .header("Cache-Control", "max-age=60")
///             .body("hello"))
///     }))
///     .build()?;
///
/// let first = cache.execute(Request::get("http://example.com/")?).await?;
/// assert_eq!(&first.bytes().await?[..], b"hello");
///
/// let second = cache.execute(Request::get("http://example.com/")?).await?;
/// assert_eq!(second.headers().get("x-from-cache"), Some("1"));
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct CachingTransport {
    inner: Arc<Inner>,
}

struct Inner {
    transport: Arc<dyn Transport>,
    storage: SecureStorage,
    options: CacheOptions,
    cacheable: Option<CacheablePredicate>,
    clock: Arc<dyn Clock>,
    span: Span,
}

/// A stored response found by lookup.
struct Cached {
    key: CacheKey,
    record: StoredResponse,
    // Found through the stale-marking capability rather than a plain get.
    marked_stale: bool,
}

impl CachingTransport {
    /// Starts configuring an engine over `storage`.
    pub fn builder(storage: Arc<dyn crate::storage::Storage>) -> CachingTransportBuilder {
        CachingTransportBuilder::new(storage)
    }

    /// Returns the options the engine was built with.
    pub fn options(&self) -> &CacheOptions {
        &self.inner.options
    }

    /// Executes `request` through the cache.
    ///
    /// The request's deadline, if any, bounds the whole synchronous path.
    /// Background revalidations started by this call are not bound by it.
    ///
    /// # Errors
    ///
    /// - [`CacheError::Transport`]: the origin failed and no stale response
    ///   could stand in, or the deadline passed.
    /// - [`CacheError::Integrity`]: a stored entry failed decryption.
    pub async fn execute(&self, request: Request) -> Result<Response, CacheError> {
        let deadline = request.deadline_at();
        let work = self.handle(request).instrument(self.inner.span.clone());
        match deadline {
            Some(deadline) => tokio::time::timeout_at(deadline, work)
                .await
                .map_err(|_| CacheError::Transport(TransportError::Timeout))?,
            None => work.await,
        }
    }

    async fn handle(&self, request: Request) -> Result<Response, CacheError> {
        let key = self.cache_key(&request);
        let cacheable = is_cacheable(&request);
        let only_if_cached =
            cacheable && Directives::from_headers(request.headers()).contains("only-if-cached");

        let cached = if cacheable {
            self.lookup(&key, &request).await?
        } else {
            None
        };

        let Some(cached) = cached else {
            if only_if_cached {
                debug!(key = %key, "only-if-cached miss");
                return Ok(Response::new(StatusCode::GATEWAY_TIMEOUT));
            }
            trace!(key = %key, "cache miss");
            return self.forward(request, key, None).await;
        };

        let now = self.inner.clock.now();
        let evaluation = freshness::evaluate(
            cached.record.headers(),
            request.headers(),
            now,
            self.inner.options.shared_cache,
        );
        let mut state = evaluation.state;
        if cached.marked_stale
            && !only_if_cached
            && matches!(state, Freshness::Fresh | Freshness::StaleWhileRevalidate)
        {
            state = Freshness::Stale;
        }
        if request.is_revalidation() && state == Freshness::StaleWhileRevalidate {
            state = Freshness::Stale;
        }
        debug!(key = %key, freshness = %state, "cache hit");

        match state {
            Freshness::Fresh => {
                let mut response = self.serve(cached.record, state, now);
                if evaluation.relaxed {
                    self.flag_stale(&mut response, WARNING_STALE);
                }
                Ok(response)
            }
            Freshness::StaleWhileRevalidate => {
                self.spawn_revalidation(&request);
                let mut response = self.serve(cached.record, state, now);
                self.flag_stale(&mut response, WARNING_STALE);
                Ok(response)
            }
            _ if only_if_cached => Ok(Response::new(StatusCode::GATEWAY_TIMEOUT)),
            Freshness::Stale | Freshness::Transparent => {
                self.forward(request, key, Some((cached, state))).await
            }
        }
    }

    /// The base key, differentiated by the configured request headers.
    fn cache_key(&self, request: &Request) -> CacheKey {
        CacheKey::base(request.method(), request.url())
            .with_headers(request.headers(), &self.inner.options.key_headers)
    }

    async fn lookup(&self, key: &CacheKey, request: &Request) -> Result<Option<Cached>, CacheError> {
        let Some(mut cached) = self.load(key).await? else {
            return Ok(None);
        };

        if self.inner.options.vary_separation && !vary::is_wildcard(cached.record.headers()) {
            let names = vary::vary_names(cached.record.headers());
            let variant = key.with_variant(request, names.iter().map(String::as_str));
            if variant != *key {
                match self.load(&variant).await? {
                    // A stale-marked base entry taints every variant behind it.
                    Some(mut found) => {
                        found.marked_stale |= cached.marked_stale;
                        cached = found;
                    }
                    None => {
                        trace!(key = %variant, "variant not stored");
                        return Ok(None);
                    }
                }
            }
        }

        if !vary::matches(cached.record.headers(), request.headers()) {
            debug!(key = %cached.key, "stored variant does not match request");
            return Ok(None);
        }
        if self.inner.options.skip_server_errors && cached.record.status().is_server_error() {
            debug!(key = %cached.key, status = %cached.record.status(), "skipping stored server error");
            return Ok(None);
        }
        Ok(Some(cached))
    }

    /// Reads one key. Backend failures and undecodable records count as a
    /// miss; integrity failures do not.
    async fn load(&self, key: &CacheKey) -> Result<Option<Cached>, CacheError> {
        let storage = &self.inner.storage;

        let mut payload = read_or_miss(key, storage.get(key).await)?;
        let mut marked_stale = false;
        if payload.is_none() && self.inner.options.stale_marking && storage.supports_stale_marking() {
            payload = read_or_miss(key, storage.get_stale(key).await)?;
            marked_stale = payload.is_some();
        }

        let Some(payload) = payload else {
            return Ok(None);
        };
        match StoredResponse::from_bytes(&payload) {
            Ok(record) => Ok(Some(Cached {
                key: key.clone(),
                record,
                marked_stale,
            })),
            Err(e) => {
                warn!(key = %key, error = %e, "discarding undecodable cache entry");
                Ok(None)
            }
        }
    }

    /// Sends `request` to the origin, revalidating `cached` when it is stale,
    /// and handles the outcome.
    async fn forward(
        &self,
        request: Request,
        key: CacheKey,
        cached: Option<(Cached, Freshness)>,
    ) -> Result<Response, CacheError> {
        let mut outgoing = request.clone();
        if let Some((cached, Freshness::Stale)) = &cached {
            add_validators(outgoing.headers_mut(), cached.record.headers());
        }

        let request_time = self.inner.clock.now();
        let result = self.inner.transport.round_trip(outgoing).await;
        let response_time = self.inner.clock.now();

        let Some((cached, state)) = cached else {
            return self.complete(request, key, result?, request_time, response_time).await;
        };

        let not_modified = match &result {
            Ok(response) if response.status() == StatusCode::NOT_MODIFIED => {
                Some(response.headers().clone())
            }
            _ => None,
        };
        if let Some(fresh) = not_modified {
            return Ok(self
                .revalidated(&request, &key, cached, state, &fresh, request_time, response_time)
                .await);
        }

        let failed = match &result {
            Ok(response) => response.status().is_server_error(),
            Err(_) => true,
        };
        if failed {
            if stale_if_error_permitted(cached.record.headers(), request.headers(), response_time) {
                match &result {
                    Ok(response) => warn!(key = %key, status = %response.status(), "origin error; serving stale"),
                    Err(e) => warn!(key = %key, error = %e, "origin unreachable; serving stale"),
                }
                let mut response = self.serve(cached.record, Freshness::Stale, response_time);
                self.flag_stale(&mut response, WARNING_REVALIDATION_FAILED);
                return Ok(response);
            }
            self.invalidate_entry(&key, &cached.key).await;
            return self.complete(request, key, result?, request_time, response_time).await;
        }

        let response = result?;
        if !(response.status().is_success() || response.status().is_redirection()) {
            self.invalidate_entry(&key, &cached.key).await;
        }
        self.complete(request, key, response, request_time, response_time).await
    }

    /// Post-fetch handling of an origin response: invalidation for unsafe
    /// methods, then the storage decision.
    async fn complete(
        &self,
        request: Request,
        key: CacheKey,
        response: Response,
        request_time: SystemTime,
        response_time: SystemTime,
    ) -> Result<Response, CacheError> {
        let status = response.status();

        if invalidate::triggers(request.method(), status) {
            let targets = invalidate::invalidation_keys(
                &request,
                response.headers(),
                &self.inner.options.key_headers,
            );
            for target in &targets {
                if self.inner.options.vary_separation {
                    self.invalidate_variant(target, &request).await;
                }
                self.invalidate(target).await;
            }
        }

        if !is_cacheable(&request) {
            return Ok(response);
        }

        if !self.is_storable(&request, &response) {
            trace!(key = %key, status = %status, "response not storable");
            self.invalidate(&key).await;
            return Ok(response);
        }

        let (status, headers, body) = response.into_parts();
        let mut record_headers = headers.clone();
        vary::capture(&mut record_headers, request.headers());
        if !StoredResponse::within_header_limit(&record_headers) {
            debug!(key = %key, headers = record_headers.len(), "too many headers to store");
            self.invalidate(&key).await;
            return Ok(Response::from_parts(status, headers, body));
        }
        let keys = self.store_keys(&key, &request, &headers);

        let this = self.clone();
        let span = self.inner.span.clone();
        let persist: Persist = Box::new(move |body: Bytes| {
            Box::pin(
                async move {
                    let mut record = StoredResponse::new(status, record_headers, body);
                    record.stamp(request_time, response_time, this.inner.clock.now());
                    this.store(&keys, &record).await;
                }
                .instrument(span),
            )
        });

        Ok(Response::from_parts(
            status,
            headers,
            Body::from_reader(PersistOnEof::new(body, persist)),
        ))
    }

    fn is_storable(&self, request: &Request, response: &Response) -> bool {
        let status = response.status();
        if !can_store(
            request.headers(),
            response.headers(),
            status,
            self.inner.options.shared_cache,
        ) {
            return false;
        }
        is_default_cacheable_status(status)
            || self
                .inner
                .cacheable
                .as_ref()
                .is_some_and(|cacheable| cacheable(status))
    }

    /// The base key, plus the variant key when vary separation applies.
    fn store_keys(&self, key: &CacheKey, request: &Request, headers: &Headers) -> Vec<CacheKey> {
        let mut keys = vec![key.clone()];
        if self.inner.options.vary_separation && !vary::is_wildcard(headers) {
            let names = vary::vary_names(headers);
            let variant = key.with_variant(request, names.iter().map(String::as_str));
            if variant != *key {
                keys.push(variant);
            }
        }
        keys
    }

    async fn store(&self, keys: &[CacheKey], record: &StoredResponse) {
        if record.headers().len() > StoredResponse::MAX_HEADERS {
            debug!(headers = record.headers().len(), "too many headers to store");
            return;
        }
        let payload = record.to_bytes();
        for key in keys {
            match self.inner.storage.set(key, payload.clone()).await {
                Ok(()) => trace!(key = %key, bytes = payload.len(), "stored"),
                Err(e) => warn!(key = %key, error = %e, "failed to store cache entry"),
            }
        }
    }

    /// A 304 confirmed `cached`: fold the new headers in, persist, serve.
    #[allow(clippy::too_many_arguments)]
    async fn revalidated(
        &self,
        request: &Request,
        key: &CacheKey,
        cached: Cached,
        state: Freshness,
        fresh: &Headers,
        request_time: SystemTime,
        response_time: SystemTime,
    ) -> Response {
        let mut record = cached.record;
        merge_headers(record.headers_mut(), fresh);
        record.stamp(request_time, response_time, response_time);

        let keys = self.store_keys(key, request, record.headers());
        self.store(&keys, &record).await;
        debug!(key = %key, "revalidated");

        let mut response = self.serve(record, state, response_time);
        response.headers_mut().set(X_REVALIDATED, "1");
        response
    }

    /// Deletes, or stale-marks when configured, one key.
    async fn invalidate(&self, key: &CacheKey) {
        let storage = &self.inner.storage;
        let result = if self.inner.options.stale_marking {
            storage.mark_stale(key).await
        } else {
            storage.delete(key).await
        };
        match result {
            Ok(()) => trace!(key = %key, "invalidated"),
            Err(e) => warn!(key = %key, error = %e, "failed to invalidate cache entry"),
        }
    }

    /// Invalidates the variant of `target` that `request` selects, found
    /// through the `Vary` list of the entry stored under `target`.
    async fn invalidate_variant(&self, target: &CacheKey, request: &Request) {
        let cached = match self.load(target).await {
            Ok(Some(cached)) => cached,
            Ok(None) => return,
            Err(e) => {
                warn!(key = %target, error = %e, "cannot read entry to invalidate its variant");
                return;
            }
        };
        if vary::is_wildcard(cached.record.headers()) {
            return;
        }
        let names = vary::vary_names(cached.record.headers());
        let variant = target.with_variant(request, names.iter().map(String::as_str));
        if variant != *target {
            self.invalidate(&variant).await;
        }
    }

    async fn invalidate_entry(&self, key: &CacheKey, found: &CacheKey) {
        self.invalidate(key).await;
        if found != key {
            self.invalidate(found).await;
        }
    }

    fn serve(&self, record: StoredResponse, state: Freshness, now: SystemTime) -> Response {
        let age = record.age(now);
        let mut response = record.into_response();
        let headers = response.headers_mut();
        if self.inner.options.mark_cached_responses {
            headers.set(X_FROM_CACHE, "1");
        }
        headers.set(X_CACHE_FRESHNESS, state.as_str());
        headers.set("Age", age.to_string());
        response
    }

    fn flag_stale(&self, response: &mut Response, warning: &str) {
        let headers = response.headers_mut();
        headers.set(X_STALE, "1");
        if !self.inner.options.disable_warning_headers {
            headers.insert("Warning", warning);
        }
    }

    /// Refreshes the entry for `request` on a detached task.
    ///
    /// The task is bounded only by the configured background timeout; the
    /// caller's deadline and cancellation do not reach it.
    fn spawn_revalidation(&self, request: &Request) {
        let this = self.clone();
        let refresh = request.to_revalidation();
        let url = request.url().clone();
        let limit = self.inner.options.background_revalidation_timeout();

        let task = async move {
            let work = async {
                let response = this.round_trip(refresh).await?;
                let mut body = response.into_body();
                let mut sink = Vec::new();
                body.read_to_end(&mut sink).await?;
                Ok::<_, TransportError>(())
            };
            let outcome = match limit {
                Some(limit) => tokio::time::timeout(limit, work)
                    .await
                    .unwrap_or(Err(TransportError::Timeout)),
                None => work.await,
            };
            match outcome {
                Ok(()) => debug!(url = %url, "background revalidation complete"),
                Err(e) => warn!(url = %url, error = %e, "background revalidation failed"),
            }
        };
        tokio::spawn(task.instrument(self.inner.span.clone()));
    }
}

impl Transport for CachingTransport {
    fn round_trip(&self, request: Request) -> BoxFuture<'_, Result<Response, TransportError>> {
        Box::pin(async move { Ok(self.execute(request).await?) })
    }
}

impl fmt::Debug for CachingTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CachingTransport")
            .field("options", &self.inner.options)
            .field("storage", &self.inner.storage)
            .finish_non_exhaustive()
    }
}

/// GET and HEAD without `Range` go through lookup and storage.
fn is_cacheable(request: &Request) -> bool {
    matches!(request.method(), Method::Get | Method::Head) && !request.headers().contains("range")
}

fn read_or_miss(
    key: &CacheKey,
    result: Result<Option<Bytes>, SecureStorageError>,
) -> Result<Option<Bytes>, CacheError> {
    match result {
        Ok(payload) => Ok(payload),
        Err(SecureStorageError::Integrity(e)) => Err(CacheError::Integrity(e)),
        Err(SecureStorageError::Storage(e)) => {
            warn!(key = %key, error = %e, "storage read failed; treating as miss");
            Ok(None)
        }
    }
}

/// Adds `If-None-Match` / `If-Modified-Since` from the stored validators,
/// leaving any the caller already set.
fn add_validators(outgoing: &mut Headers, stored: &Headers) {
    if let Some(etag) = stored.get("etag") {
        if !outgoing.contains("if-none-match") {
            outgoing.insert("If-None-Match", etag);
        }
    }
    if let Some(last_modified) = stored.get("last-modified") {
        if !outgoing.contains("if-modified-since") {
            outgoing.insert("If-Modified-Since", last_modified);
        }
    }
}

/// Replaces stored headers with the end-to-end headers of a 304.
///
/// Hop-by-hop headers, headers nominated by `Connection`, and
/// `Content-Length` are left untouched.
fn merge_headers(stored: &mut Headers, fresh: &Headers) {
    let nominated: Vec<String> = fresh
        .get_list("connection")
        .map(str::to_ascii_lowercase)
        .collect();

    let mut names: Vec<&str> = Vec::new();
    for (name, _) in fresh.iter() {
        let lower = name.to_ascii_lowercase();
        if HOP_BY_HOP.contains(&lower.as_str())
            || nominated.contains(&lower)
            || lower == "content-length"
            || names.iter().any(|seen| seen.eq_ignore_ascii_case(name))
        {
            continue;
        }
        names.push(name);
    }

    for name in names {
        stored.remove(name);
        for value in fresh.get_all(name) {
            stored.insert(name, value);
        }
    }
}
