//! Plain HTTP/1.1 client transport over Tokio TCP streams.
//!
//! One connection per request (`Connection: close`). Response heads are
//! parsed with [`httparse`]; bodies are framed by `Content-Length`, chunked
//! transfer coding, or connection close.

use std::io::Cursor;
use std::time::Duration;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, trace};

use super::{Transport, TransportError};
use crate::http::{Body, Headers, Method, Request, Response, StatusCode};
use crate::storage::BoxFuture;

/// Maximum size of a response head (status line plus headers).
const MAX_HEAD_SIZE: usize = 64 * 1024;

/// Initial read buffer capacity per connection.
const INITIAL_BUF_SIZE: usize = 4096;

const MAX_HEADERS: usize = 128;

/// The default origin transport.
///
/// `https` URLs are rejected with [`TransportError::UnsupportedScheme`];
/// callers needing TLS supply their own [`Transport`].
///
/// A request deadline bounds connecting, sending and reading the response
/// head. The body streams afterwards under the caller's control.
///
/// # Examples
///
/// ```rust,no_run
/// use cachet::http::Request;
/// use cachet::transport::{HttpTransport, Transport};
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let transport = HttpTransport::new();
/// let response = transport
///     .round_trip(Request::get("http://example.com/")?)
///     .await?;
/// println!("{}", response.status());
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, Default)]
pub struct HttpTransport {
    connect_timeout: Option<Duration>,
}

impl HttpTransport {
    /// Creates a transport with no connect timeout.
    pub fn new() -> Self {
        Self::default()
    }

    /// Bounds every TCP connect attempt.
    #[must_use]
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    async fn exchange(&self, request: Request) -> Result<Response, TransportError> {
        let url = request.url();
        if url.scheme() != "http" {
            return Err(TransportError::UnsupportedScheme(url.scheme().to_owned()));
        }
        let host = url
            .host_str()
            .ok_or_else(|| TransportError::MissingHost(url.to_string()))?;
        let addr = format!("{host}:{}", url.port_or_known_default().unwrap_or(80));

        let mut stream = self.connect(&addr).await?;
        debug!(
            peer = %addr,
            method = %request.method(),
            target = %request.target(),
            "sending request"
        );
        stream.write_all(&encode_request(&request)).await?;
        stream.flush().await?;

        let (status, mut headers, leftover) = read_head(&mut stream).await?;
        trace!(peer = %addr, status = %status, "response head received");

        let body = if !has_body(request.method(), status) {
            Body::empty()
        } else if is_chunked(&headers) {
            headers.remove("transfer-encoding");
            Body::from_bytes(read_chunked(&mut stream, leftover).await?)
        } else {
            let rest = AsyncReadExt::chain(Cursor::new(leftover.freeze()), stream);
            match content_length(&headers) {
                Some(len) => Body::from_reader(AsyncReadExt::take(rest, len)),
                None => Body::from_reader(rest),
            }
        };

        Ok(Response::from_parts(status, headers, body))
    }

    async fn connect(&self, addr: &str) -> Result<TcpStream, TransportError> {
        let connect = TcpStream::connect(addr);
        let result = match self.connect_timeout {
            Some(limit) => tokio::time::timeout(limit, connect)
                .await
                .map_err(|_| TransportError::Timeout)?,
            None => connect.await,
        };
        result.map_err(|source| TransportError::Connect {
            addr: addr.to_owned(),
            source,
        })
    }
}

impl Transport for HttpTransport {
    fn round_trip(&self, request: Request) -> BoxFuture<'_, Result<Response, TransportError>> {
        Box::pin(async move {
            match request.deadline_at() {
                Some(deadline) => tokio::time::timeout_at(deadline, self.exchange(request))
                    .await
                    .map_err(|_| TransportError::Timeout)?,
                None => self.exchange(request).await,
            }
        })
    }
}

fn encode_request(request: &Request) -> BytesMut {
    let url = request.url();
    let body = request.body_bytes();
    let mut buf = BytesMut::with_capacity(128 + request.headers().len() * 64 + body.len());

    buf.put(format!("{} {} HTTP/1.1\r\n", request.method(), request.target()).as_bytes());

    if !request.headers().contains("host") {
        let host = url.host_str().unwrap_or_default();
        match url.port() {
            Some(port) => buf.put(format!("Host: {host}:{port}\r\n").as_bytes()),
            None => buf.put(format!("Host: {host}\r\n").as_bytes()),
        }
    }

    for (name, value) in request.headers().iter() {
        if ["content-length", "connection", "transfer-encoding"]
            .iter()
            .any(|framing| name.eq_ignore_ascii_case(framing))
        {
            continue;
        }
        buf.put(format!("{name}: {value}\r\n").as_bytes());
    }

    if !body.is_empty() || matches!(request.method(), Method::Post | Method::Put | Method::Patch) {
        buf.put(format!("Content-Length: {}\r\n", body.len()).as_bytes());
    }
    buf.put(&b"Connection: close\r\n\r\n"[..]);
    buf.put(&body[..]);
    buf
}

/// Reads until a final (non-1xx) response head is complete. Returns the head
/// and whatever body bytes arrived with it.
async fn read_head(stream: &mut TcpStream) -> Result<(StatusCode, Headers, BytesMut), TransportError> {
    let mut buf = BytesMut::with_capacity(INITIAL_BUF_SIZE);

    loop {
        while let Some((status, headers, offset)) = parse_head(&buf)? {
            buf.advance(offset);
            if (100..200).contains(&status.as_u16()) && status.as_u16() != 101 {
                trace!(status = %status, "skipping interim response");
                continue;
            }
            return Ok((status, headers, buf));
        }

        if buf.len() > MAX_HEAD_SIZE {
            return Err(TransportError::HeadTooLarge {
                limit: MAX_HEAD_SIZE,
            });
        }
        if stream.read_buf(&mut buf).await? == 0 {
            return Err(TransportError::Incomplete);
        }
    }
}

fn parse_head(buf: &[u8]) -> Result<Option<(StatusCode, Headers, usize)>, TransportError> {
    let mut raw_headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut raw = httparse::Response::new(&mut raw_headers);

    let offset = match raw.parse(buf)? {
        httparse::Status::Complete(offset) => offset,
        httparse::Status::Partial => return Ok(None),
    };
    let status = raw
        .code
        .map(StatusCode::new)
        .ok_or(TransportError::Parse(httparse::Error::Status))?;

    let mut headers = Headers::with_capacity(raw.headers.len());
    for header in raw.headers.iter() {
        headers.insert(header.name, String::from_utf8_lossy(header.value).into_owned());
    }
    Ok(Some((status, headers, offset)))
}

fn has_body(method: &Method, status: StatusCode) -> bool {
    let code = status.as_u16();
    *method != Method::Head && code != 204 && code != 304 && !(100..200).contains(&code)
}

fn is_chunked(headers: &Headers) -> bool {
    headers
        .get_list("transfer-encoding")
        .last()
        .is_some_and(|coding| coding.eq_ignore_ascii_case("chunked"))
}

fn content_length(headers: &Headers) -> Option<u64> {
    headers.get("content-length")?.trim().parse().ok()
}

/// Decodes a chunked body into memory. Trailers are discarded.
async fn read_chunked(stream: &mut TcpStream, mut buf: BytesMut) -> Result<Bytes, TransportError> {
    let mut body = BytesMut::new();

    loop {
        match httparse::parse_chunk_size(&buf) {
            Ok(httparse::Status::Complete((offset, size))) => {
                if size == 0 {
                    return Ok(body.freeze());
                }
                let size = usize::try_from(size).map_err(|_| TransportError::InvalidChunkSize)?;
                fill(stream, &mut buf, offset + size + 2).await?;
                buf.advance(offset);
                body.extend_from_slice(&buf[..size]);
                buf.advance(size + 2);
            }
            Ok(httparse::Status::Partial) => {
                if stream.read_buf(&mut buf).await? == 0 {
                    return Err(TransportError::Incomplete);
                }
            }
            Err(_) => return Err(TransportError::InvalidChunkSize),
        }
    }
}

async fn fill(stream: &mut TcpStream, buf: &mut BytesMut, needed: usize) -> Result<(), TransportError> {
    while buf.len() < needed {
        if stream.read_buf(buf).await? == 0 {
            return Err(TransportError::Incomplete);
        }
    }
    Ok(())
}
