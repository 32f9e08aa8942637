//! The request-execution seam.
//!
//! A [`Transport`] turns a [`Request`] into a [`Response`]. The caching
//! engine consumes one (the "inner" transport that actually talks to the
//! origin) and is one itself, so caches stack as drop-in layers.
//!
//! - [`HttpTransport`]: the default: plain HTTP/1.1 over TCP.
//! - [`transport_fn`]: adapts an async closure, handy for tests and for
//!   bridging to other HTTP clients.

use std::future::Future;
use std::sync::Arc;

use thiserror::Error;

use crate::http::{Request, Response};
use crate::storage::BoxFuture;

pub mod http1;

pub use http1::HttpTransport;

/// Errors produced while executing a request.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("unsupported URL scheme: {0}")]
    UnsupportedScheme(String),

    #[error("URL has no host: {0}")]
    MissingHost(String),

    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed response: {0}")]
    Parse(#[from] httparse::Error),

    #[error("invalid chunk size in chunked body")]
    InvalidChunkSize,

    #[error("response head exceeds {limit} bytes")]
    HeadTooLarge { limit: usize },

    #[error("connection closed before the response was complete")]
    Incomplete,

    #[error("request deadline exceeded")]
    Timeout,

    #[error("{0}")]
    Other(String),
}

/// Executes HTTP requests.
///
/// Dropping the returned future cancels the exchange.
pub trait Transport: Send + Sync {
    /// Sends `request` and resolves to the origin's response.
    fn round_trip(&self, request: Request) -> BoxFuture<'_, Result<Response, TransportError>>;
}

impl<T: Transport + ?Sized> Transport for Arc<T> {
    fn round_trip(&self, request: Request) -> BoxFuture<'_, Result<Response, TransportError>> {
        (**self).round_trip(request)
    }
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn round_trip(&self, request: Request) -> BoxFuture<'_, Result<Response, TransportError>> {
        (**self).round_trip(request)
    }
}

/// A [`Transport`] backed by an async closure. Built by [`transport_fn`].
#[derive(Clone)]
pub struct FnTransport<F> {
    f: F,
}

/// Wraps `f` as a [`Transport`].
///
/// # Examples
///
/// ```
/// use cachet::http::{Request, Response, StatusCode};
/// use cachet::transport::{transport_fn, Transport};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let origin = transport_fn(|_req: Request| async {
///     Ok(Response::new(StatusCode::OK).body("hello"))
/// });
///
/// let response = origin.round_trip(Request::get("http://example.com/").unwrap()).await.unwrap();
/// assert_eq!(response.status(), StatusCode::OK);
/// # }
/// ```
pub fn transport_fn<F, Fut>(f: F) -> FnTransport<F>
where
    F: Fn(Request) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Response, TransportError>> + Send + 'static,
{
    FnTransport { f }
}

impl<F, Fut> Transport for FnTransport<F>
where
    F: Fn(Request) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Response, TransportError>> + Send + 'static,
{
    fn round_trip(&self, request: Request) -> BoxFuture<'_, Result<Response, TransportError>> {
        Box::pin((self.f)(request))
    }
}

impl<F> std::fmt::Debug for FnTransport<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnTransport").finish_non_exhaustive()
    }
}
