//! HTTP responses returned by transports and by the cache.

use bytes::Bytes;

use super::{Body, Headers, StatusCode};

/// An HTTP response with a streaming body.
///
/// # Examples
///
/// ```
/// use cachet::http::{Response, StatusCode};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> std::io::Result<()> {
/// let response = Response::new(StatusCode::OK)
///     .header("Cache-Control", "max-age=60")
///     .body("hello");
///
/// assert_eq!(response.headers().get("cache-control"), Some("max-age=60"));
/// assert_eq!(&response.bytes().await?[..], b"hello");
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Default)]
pub struct Response {
    status: StatusCode,
    headers: Headers,
    body: Body,
}

impl Response {
    /// Creates a new response with the given status and an empty body.
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: Headers::new(),
            body: Body::empty(),
        }
    }

    /// Assembles a response from its parts.
    pub fn from_parts(status: StatusCode, headers: Headers, body: Body) -> Self {
        Self {
            status,
            headers,
            body,
        }
    }

    /// Appends a response header. Multiple calls with the same name are additive.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Sets the response body.
    #[must_use]
    pub fn body(mut self, body: impl Into<Body>) -> Self {
        self.body = body.into();
        self
    }

    /// Returns the status code of this response.
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Returns the response headers.
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Returns the response headers for in-place decoration.
    pub fn headers_mut(&mut self) -> &mut Headers {
        &mut self.headers
    }

    /// Splits the response into status, headers and body.
    pub fn into_parts(self) -> (StatusCode, Headers, Body) {
        (self.status, self.headers, self.body)
    }

    /// Returns the body stream, discarding status and headers.
    pub fn into_body(self) -> Body {
        self.body
    }

    /// Drains the body and returns its contents.
    ///
    /// # Errors
    ///
    /// Any I/O error raised while reading the body.
    pub async fn bytes(self) -> std::io::Result<Bytes> {
        self.body.bytes().await
    }
}
