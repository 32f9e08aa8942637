//! The persisted form of a cached response.
//!
//! A record is an HTTP/1.1 response message: status line, header block and
//! the raw body, which runs to the end of the blob. Bookkeeping the engine
//! needs on the next lookup travels in reserved headers and is stripped
//! before a record is handed back to a caller.

use std::time::SystemTime;

use bytes::{BufMut, Bytes, BytesMut};
use thiserror::Error;

use crate::freshness::{current_age, from_unix_secs, unix_secs};
use crate::http::{Body, Headers, Response, StatusCode};
use crate::vary::VARIED_PREFIX;

/// Unix time at which the request that produced the record was sent.
pub const REQUEST_TIME_HEADER: &str = "X-Cache-Request-Time";
/// Unix time at which the origin's response arrived.
pub const RESPONSE_TIME_HEADER: &str = "X-Cache-Response-Time";
/// Unix time of the latest write of the record.
pub const STORED_AT_HEADER: &str = "X-Cache-Stored-At";
/// The first `Date` the origin sent for this record.
pub const ORIGINAL_DATE_HEADER: &str = "X-Cache-Original-Date";

const RESERVED_HEADERS: [&str; 4] = [
    REQUEST_TIME_HEADER,
    RESPONSE_TIME_HEADER,
    STORED_AT_HEADER,
    ORIGINAL_DATE_HEADER,
];

/// Errors raised when decoding a persisted record.
#[derive(Debug, Error)]
pub enum RecordError {
    #[error("malformed cache record: {0}")]
    Parse(#[from] httparse::Error),

    #[error("cache record is truncated")]
    Incomplete,

    #[error("cache record has no status code")]
    MissingStatus,

    #[error("cache record header {name} is not valid UTF-8")]
    InvalidHeader { name: String },
}

/// A response as held in storage.
///
/// # Examples
///
/// ```
/// use bytes::Bytes;
/// use cachet::http::{Headers, StatusCode};
/// use cachet::record::StoredResponse;
///
/// let mut headers = Headers::new();
/// headers.insert("Cache-Control", "max-age=60");
/// let record = StoredResponse::new(StatusCode::OK, headers, Bytes::from_static(b"hi"));
///
/// let decoded = StoredResponse::from_bytes(&record.to_bytes()).unwrap();
/// assert_eq!(decoded, record);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredResponse {
    status: StatusCode,
    headers: Headers,
    body: Bytes,
}

impl StoredResponse {
    /// Maximum number of headers accepted when decoding.
    pub const MAX_HEADERS: usize = 128;

    /// Creates a record from its parts.
    pub fn new(status: StatusCode, headers: Headers, body: Bytes) -> Self {
        Self {
            status,
            headers,
            body,
        }
    }

    /// Returns `true` when a record built from `headers` still decodes once
    /// the bookkeeping headers are added.
    pub fn within_header_limit(headers: &Headers) -> bool {
        headers.len() + RESERVED_HEADERS.len() <= Self::MAX_HEADERS
    }

    /// Returns the stored status code.
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Returns the stored headers, reserved ones included.
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Returns the stored headers for in-place modification.
    pub fn headers_mut(&mut self) -> &mut Headers {
        &mut self.headers
    }

    /// Returns the stored body.
    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Stamps the exchange times used for `Age` and `X-Cache-Stored-At`.
    ///
    /// The origin's first `Date` is preserved under
    /// [`ORIGINAL_DATE_HEADER`] across later revalidations.
    pub fn stamp(&mut self, request_time: SystemTime, response_time: SystemTime, stored_at: SystemTime) {
        self.headers
            .set(REQUEST_TIME_HEADER, unix_secs(request_time).to_string());
        self.headers
            .set(RESPONSE_TIME_HEADER, unix_secs(response_time).to_string());
        self.headers
            .set(STORED_AT_HEADER, unix_secs(stored_at).to_string());
        if !self.headers.contains(ORIGINAL_DATE_HEADER) {
            if let Some(date) = self.headers.get("date").map(str::to_owned) {
                self.headers.insert(ORIGINAL_DATE_HEADER, date);
            }
        }
    }

    /// When the request that produced this record was sent.
    pub fn request_time(&self) -> Option<SystemTime> {
        self.unix_header(REQUEST_TIME_HEADER)
    }

    /// When the origin's response arrived.
    pub fn response_time(&self) -> Option<SystemTime> {
        self.unix_header(RESPONSE_TIME_HEADER)
    }

    /// When the record was last written.
    pub fn stored_at(&self) -> Option<SystemTime> {
        self.unix_header(STORED_AT_HEADER)
    }

    /// The origin's first `Date` for this record.
    pub fn original_date(&self) -> Option<&str> {
        self.headers.get(ORIGINAL_DATE_HEADER)
    }

    /// The record's current age at `now`, in seconds.
    ///
    /// Records written without exchange times fall back to their stored-at
    /// time, and finally to `now` itself.
    pub fn age(&self, now: SystemTime) -> u64 {
        let response_time = self
            .response_time()
            .or_else(|| self.stored_at())
            .unwrap_or(now);
        current_age(&self.headers, self.request_time(), response_time, now)
    }

    /// Encodes the record as HTTP/1.1 response bytes.
    pub fn to_bytes(&self) -> Bytes {
        let estimated = 64 + self.headers.len() * 48 + self.body.len();
        let mut buf = BytesMut::with_capacity(estimated);

        buf.put(
            format!(
                "HTTP/1.1 {} {}\r\n",
                self.status.as_u16(),
                self.status.canonical_reason()
            )
            .as_bytes(),
        );
        for (name, value) in self.headers.iter() {
            buf.put(format!("{name}: {value}\r\n").as_bytes());
        }
        buf.put(&b"\r\n"[..]);
        buf.put(&self.body[..]);

        buf.freeze()
    }

    /// Decodes a record produced by [`to_bytes`](Self::to_bytes).
    ///
    /// # Errors
    ///
    /// - [`RecordError::Incomplete`]: the header block never terminates.
    /// - [`RecordError::Parse`]: the bytes are not an HTTP/1.1 response.
    /// - [`RecordError::MissingStatus`] / [`RecordError::InvalidHeader`].
    pub fn from_bytes(buf: &[u8]) -> Result<Self, RecordError> {
        let mut raw_headers = [httparse::EMPTY_HEADER; Self::MAX_HEADERS];
        let mut raw = httparse::Response::new(&mut raw_headers);

        let body_offset = match raw.parse(buf)? {
            httparse::Status::Complete(offset) => offset,
            httparse::Status::Partial => return Err(RecordError::Incomplete),
        };

        let status = raw.code.map(StatusCode::new).ok_or(RecordError::MissingStatus)?;

        let mut headers = Headers::with_capacity(raw.headers.len());
        for header in raw.headers.iter() {
            let value = std::str::from_utf8(header.value).map_err(|_| RecordError::InvalidHeader {
                name: header.name.to_owned(),
            })?;
            headers.insert(header.name, value);
        }

        Ok(Self {
            status,
            headers,
            body: Bytes::copy_from_slice(&buf[body_offset..]),
        })
    }

    /// Converts the record into a caller-facing response, dropping reserved
    /// headers.
    pub fn into_response(self) -> Response {
        let Self {
            status,
            mut headers,
            body,
        } = self;
        strip_reserved(&mut headers);
        Response::from_parts(status, headers, Body::from_bytes(body))
    }

    fn unix_header(&self, name: &str) -> Option<SystemTime> {
        self.headers
            .get(name)?
            .trim()
            .parse::<i64>()
            .ok()
            .map(from_unix_secs)
    }
}

/// Removes every bookkeeping header a record carries.
pub fn strip_reserved(headers: &mut Headers) {
    headers.remove_prefixed(VARIED_PREFIX);
    for name in RESERVED_HEADERS {
        headers.remove(name);
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn t(secs: i64) -> SystemTime {
        from_unix_secs(1_700_000_000 + secs)
    }

    fn record() -> StoredResponse {
        let mut headers = Headers::new();
        headers.insert("Date", httpdate::fmt_http_date(t(0)));
        headers.insert("Cache-Control", "max-age=3600");
        headers.insert("Set-Cookie", "a=1");
        headers.insert("Set-Cookie", "b=2");
        StoredResponse::new(StatusCode::OK, headers, Bytes::from_static(b"hello\r\n\r\nworld"))
    }

    #[test]
    fn encode_decode_preserves_everything() {
        let original = record();
        let decoded = StoredResponse::from_bytes(&original.to_bytes()).unwrap();
        assert_eq!(decoded, original);
        assert_eq!(decoded.headers().get_all("set-cookie").count(), 2);
    }

    #[test]
    fn encodes_as_http_response() {
        let bytes = record().to_bytes();
        let text = std::str::from_utf8(&bytes).unwrap();
        assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(text.ends_with("\r\n\r\nhello\r\n\r\nworld"));
    }

    #[test]
    fn unknown_status_survives() {
        let original = StoredResponse::new(StatusCode::new(599), Headers::new(), Bytes::new());
        let decoded = StoredResponse::from_bytes(&original.to_bytes()).unwrap();
        assert_eq!(decoded.status().as_u16(), 599);
        assert!(decoded.body().is_empty());
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(matches!(
            StoredResponse::from_bytes(b"HTTP/1.1 200 OK\r\nX: y\r\n"),
            Err(RecordError::Incomplete)
        ));
        assert!(matches!(
            StoredResponse::from_bytes(b"\x00\x01not a response\r\n\r\n"),
            Err(RecordError::Parse(_))
        ));
    }

    #[test]
    fn stamp_records_times_and_keeps_original_date() {
        let mut rec = record();
        rec.stamp(t(1), t(2), t(3));
        assert_eq!(rec.request_time(), Some(t(1)));
        assert_eq!(rec.response_time(), Some(t(2)));
        assert_eq!(rec.stored_at(), Some(t(3)));
        let first_date = httpdate::fmt_http_date(t(0));
        assert_eq!(rec.original_date(), Some(first_date.as_str()));

        rec.headers_mut().set("Date", httpdate::fmt_http_date(t(100)));
        rec.stamp(t(100), t(100), t(100));
        assert_eq!(rec.original_date(), Some(first_date.as_str()));
        assert_eq!(rec.headers().get_all(REQUEST_TIME_HEADER).count(), 1);
    }

    #[test]
    fn header_limit_leaves_room_for_bookkeeping() {
        let mut headers = Headers::new();
        for i in 0..StoredResponse::MAX_HEADERS - RESERVED_HEADERS.len() {
            headers.insert(format!("X-Filler-{i}"), "1");
        }
        assert!(StoredResponse::within_header_limit(&headers));

        let mut rec = StoredResponse::new(StatusCode::OK, headers.clone(), Bytes::new());
        rec.headers_mut().insert("Date", httpdate::fmt_http_date(t(0)));
        rec.stamp(t(0), t(0), t(0));
        assert_eq!(rec.headers().len(), StoredResponse::MAX_HEADERS + 1);
        assert!(StoredResponse::from_bytes(&rec.to_bytes()).is_err());

        headers.insert("X-One-More", "1");
        assert!(!StoredResponse::within_header_limit(&headers));
    }

    #[test]
    fn age_uses_stamped_times() {
        let mut rec = record();
        rec.stamp(t(0), t(0), t(0));
        assert_eq!(rec.age(t(0) + Duration::from_secs(2)), 2);
    }

    #[test]
    fn into_response_strips_reserved_headers() {
        let mut rec = record();
        rec.stamp(t(0), t(0), t(0));
        rec.headers_mut().insert("X-Varied-Accept", "text/html");

        let response = rec.into_response();
        let headers = response.headers();
        assert!(headers.contains("cache-control"));
        assert!(!headers.contains(REQUEST_TIME_HEADER));
        assert!(!headers.contains(RESPONSE_TIME_HEADER));
        assert!(!headers.contains(STORED_AT_HEADER));
        assert!(!headers.contains(ORIGINAL_DATE_HEADER));
        assert!(!headers.contains("x-varied-accept"));
    }
}
