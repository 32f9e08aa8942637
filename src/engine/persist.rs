//! Persist-on-drain response bodies.

use std::future::Future;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll, ready};

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, ReadBuf};

use crate::http::Body;
use crate::storage::BoxFuture;

/// Receives the complete body once the consumer reaches end of stream.
pub(crate) type Persist = Box<dyn FnOnce(Bytes) -> BoxFuture<'static, ()> + Send>;

enum State {
    Reading,
    Persisting(BoxFuture<'static, ()>),
    Done,
}

/// Wraps a response body, copying every byte read. On the first end of
/// stream the copy is handed to the persist action, which runs to
/// completion before EOF is reported to the reader.
///
/// A body that is dropped early, or fails mid-stream, persists nothing.
pub(crate) struct PersistOnEof {
    inner: Body,
    captured: BytesMut,
    persist: Option<Persist>,
    state: State,
}

impl PersistOnEof {
    pub(crate) fn new(inner: Body, persist: Persist) -> Self {
        Self {
            inner,
            captured: BytesMut::new(),
            persist: Some(persist),
            state: State::Reading,
        }
    }
}

impl AsyncRead for PersistOnEof {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();

        loop {
            match &mut this.state {
                State::Reading => {
                    // A zero-length read into a full buffer is not EOF.
                    if buf.remaining() == 0 {
                        return Poll::Ready(Ok(()));
                    }
                    let before = buf.filled().len();
                    ready!(Pin::new(&mut this.inner).poll_read(cx, buf))?;
                    let read = &buf.filled()[before..];
                    if !read.is_empty() {
                        this.captured.extend_from_slice(read);
                        return Poll::Ready(Ok(()));
                    }

                    match this.persist.take() {
                        Some(persist) => {
                            let body = std::mem::take(&mut this.captured).freeze();
                            this.state = State::Persisting(persist(body));
                        }
                        None => this.state = State::Done,
                    }
                }
                State::Persisting(persist) => {
                    ready!(persist.as_mut().poll(cx));
                    this.state = State::Done;
                    return Poll::Ready(Ok(()));
                }
                State::Done => return Pin::new(&mut this.inner).poll_read(cx, buf),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use tokio::io::AsyncReadExt;

    use super::*;

    fn recorder() -> (Persist, Arc<Mutex<Vec<Bytes>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let persist: Persist = Box::new(move |body| {
            Box::pin(async move {
                sink.lock().unwrap().push(body);
            })
        });
        (persist, seen)
    }

    #[tokio::test]
    async fn persists_once_after_full_drain() {
        let (persist, seen) = recorder();
        let mut body = PersistOnEof::new(Body::from("hello world"), persist);

        let mut small = [0u8; 4];
        let n = body.read(&mut small).await.unwrap();
        assert_eq!(&small[..n], b"hell");
        assert!(seen.lock().unwrap().is_empty());

        let mut rest = Vec::new();
        body.read_to_end(&mut rest).await.unwrap();
        assert_eq!(rest, b"o world");

        // Reading past EOF again must not persist twice.
        assert_eq!(body.read(&mut small).await.unwrap(), 0);
        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(&seen[0][..], b"hello world");
    }

    #[tokio::test]
    async fn dropped_body_persists_nothing() {
        let (persist, seen) = recorder();
        let mut body = PersistOnEof::new(Body::from("partial"), persist);
        let mut one = [0u8; 1];
        body.read_exact(&mut one).await.unwrap();
        drop(body);
        assert!(seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn empty_body_persists_empty_payload() {
        let (persist, seen) = recorder();
        let body = Body::from_reader(PersistOnEof::new(Body::empty(), persist));
        assert!(body.bytes().await.unwrap().is_empty());
        assert_eq!(seen.lock().unwrap().len(), 1);
    }
}
