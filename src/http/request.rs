//! Outgoing HTTP requests.

use bytes::Bytes;
use tokio::time::Instant;
use url::Url;

use super::{Headers, Method};

/// An HTTP request on its way to an origin.
///
/// Requests are cheap to clone; the engine clones one whenever it needs a
/// variant with extra headers (conditional validators, background
/// revalidation) and leaves the caller's copy untouched.
///
/// # Examples
///
/// ```
/// use cachet::http::{Method, Request};
///
/// let request = Request::get("http://example.com/items?page=2")
///     .unwrap()
///     .header("Accept-Language", "en");
///
/// assert_eq!(request.method(), &Method::Get);
/// assert_eq!(request.url().path(), "/items");
/// assert_eq!(request.headers().get("accept-language"), Some("en"));
/// ```
#[derive(Debug, Clone)]
pub struct Request {
    method: Method,
    url: Url,
    headers: Headers,
    body: Bytes,
    deadline: Option<Instant>,
    // Set on background revalidation requests issued by the engine itself.
    revalidation: bool,
}

impl Request {
    /// Creates a request with no headers and an empty body.
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            headers: Headers::new(),
            body: Bytes::new(),
            deadline: None,
            revalidation: false,
        }
    }

    /// Parses `url` and creates a `GET` request for it.
    ///
    /// # Errors
    ///
    /// Returns the URL parse error when `url` is not an absolute URL.
    pub fn get(url: &str) -> Result<Self, url::ParseError> {
        Ok(Self::new(Method::Get, Url::parse(url)?))
    }

    /// Appends a request header.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Sets the request body.
    #[must_use]
    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// Bounds the synchronous request path (lookup, origin fetch, revalidation)
    /// by an absolute deadline.
    #[must_use]
    pub fn deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Returns the HTTP method.
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Returns the target URL.
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Returns the request headers.
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Returns the request headers for in-place modification.
    pub fn headers_mut(&mut self) -> &mut Headers {
        &mut self.headers
    }

    /// Returns the request body bytes.
    pub fn body_bytes(&self) -> &Bytes {
        &self.body
    }

    /// Returns the deadline, if one was set.
    pub fn deadline_at(&self) -> Option<Instant> {
        self.deadline
    }

    /// Returns the origin-form request target (`/path?query`).
    pub fn target(&self) -> String {
        match self.url.query() {
            Some(query) => format!("{}?{query}", self.url.path()),
            None => self.url.path().to_owned(),
        }
    }

    pub(crate) fn is_revalidation(&self) -> bool {
        self.revalidation
    }

    /// Copies this request for a background refresh: no deadline, and a
    /// `max-age=0` directive forcing every cache on the path to revalidate.
    pub(crate) fn to_revalidation(&self) -> Self {
        let mut request = self.clone();
        request.deadline = None;
        request.revalidation = true;
        request.headers.set("Cache-Control", "max-age=0");
        request
    }
}
