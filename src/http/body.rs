//! Streaming response bodies.
//!
//! A [`Body`] is a type-erased [`AsyncRead`]. Bodies built from bytes already
//! in memory read from a cursor; transports hand out bodies that stream
//! straight from the socket.

use std::fmt;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, ReadBuf};

/// A response body stream.
///
/// # Examples
///
/// ```
/// use cachet::http::Body;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> std::io::Result<()> {
/// let body = Body::from("hello");
/// assert_eq!(&body.bytes().await?[..], b"hello");
/// # Ok(())
/// # }
/// ```
pub struct Body {
    inner: Pin<Box<dyn AsyncRead + Send>>,
}

impl Body {
    /// An empty body.
    pub fn empty() -> Self {
        Self::from_bytes(Bytes::new())
    }

    /// A body reading from an in-memory buffer.
    pub fn from_bytes(bytes: impl Into<Bytes>) -> Self {
        Self::from_reader(io::Cursor::new(bytes.into()))
    }

    /// A body reading from an arbitrary async reader.
    pub fn from_reader<R>(reader: R) -> Self
    where
        R: AsyncRead + Send + 'static,
    {
        Self {
            inner: Box::pin(reader),
        }
    }

    /// Reads the body to the end and returns its contents.
    ///
    /// # Errors
    ///
    /// Any I/O error raised by the underlying stream.
    pub async fn bytes(mut self) -> io::Result<Bytes> {
        let mut buf = Vec::new();
        self.read_to_end(&mut buf).await?;
        Ok(Bytes::from(buf))
    }
}

impl AsyncRead for Body {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        self.inner.as_mut().poll_read(cx, buf)
    }
}

impl Default for Body {
    fn default() -> Self {
        Self::empty()
    }
}

impl fmt::Debug for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Body").finish_non_exhaustive()
    }
}

impl From<Bytes> for Body {
    fn from(bytes: Bytes) -> Self {
        Self::from_bytes(bytes)
    }
}

impl From<Vec<u8>> for Body {
    fn from(bytes: Vec<u8>) -> Self {
        Self::from_bytes(bytes)
    }
}

impl From<&'static str> for Body {
    fn from(s: &'static str) -> Self {
        Self::from_bytes(Bytes::from_static(s.as_bytes()))
    }
}

impl From<String> for Body {
    fn from(s: String) -> Self {
        Self::from_bytes(s.into_bytes())
    }
}
