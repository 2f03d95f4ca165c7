//! Byte-counting, listener-firing adapters wrapped around one request/response
//! pair on one connection (SPEC_FULL.md §3 "Exchange", §4.11).
//!
//! The wire codec itself — framing, header encode/decode, HTTP/2 streams —
//! is `hyper`/`h2`'s job (§1 "Out of scope"). What belongs to the engine is
//! everything OkHttp's `Exchange`/`ExchangeCodec` layer adds on top: counting
//! bytes against a declared `Content-Length`, firing the
//! [`EventListener`](super::listener::EventListener) hooks at the right
//! moments, and recording failures so the retry interceptor can later ask
//! "did this exchange ever fail". Grounded in the same pin-project style
//! `src/client/middleware/timeout/body.rs` uses for wrapping an
//! `http_body::Body`.

use std::{
    pin::Pin,
    sync::{
        Arc, Weak,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    task::{Context, Poll},
};

use bytes::Bytes;
use http_body::{Body, Frame, SizeHint};
use pin_project_lite::pin_project;
use tokio::io::AsyncWrite;

use crate::error::BoxError;

use super::listener::Listener;

/// Per-exchange shared state: whether it has ever recorded a failure.
/// Retry eligibility (SPEC_FULL.md §4.8) consults this flag, not the most
/// recent error alone, since a duplex exchange may have both succeeded and
/// failed on different halves.
#[derive(Clone, Default)]
pub struct ExchangeState {
    has_failure: Arc<AtomicBool>,
}

impl ExchangeState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has_failure(&self) -> bool {
        self.has_failure.load(Ordering::Acquire)
    }

    fn track_failure(&self) {
        self.has_failure.store(true, Ordering::Release);
    }
}

/// One request/response exchange on a connection (SPEC_FULL.md §3
/// "Exchange"). Holds the shared failure flag and the listener to thread
/// into the body adapters it produces.
#[derive(Clone)]
pub struct Exchange {
    state: ExchangeState,
    listener: Listener,
    duplex: bool,
    /// Kept alive for exactly as long as the exchange; `Connection::acquire`
    /// is handed a weak reference so it can prune a leaked exchange that
    /// never reached `release()` (SPEC_FULL.md §4.4 "leak pruning").
    token: Arc<()>,
}

impl Exchange {
    pub fn new(listener: Listener, duplex: bool) -> Self {
        Exchange {
            state: ExchangeState::new(),
            listener,
            duplex,
            token: Arc::new(()),
        }
    }

    pub fn state(&self) -> ExchangeState {
        self.state.clone()
    }

    /// Weak handle a connection can track without keeping the exchange alive.
    pub fn weak_token(&self) -> Weak<()> {
        Arc::downgrade(&self.token)
    }

    pub fn is_duplex(&self) -> bool {
        self.duplex
    }

    pub fn has_failure(&self) -> bool {
        self.state.has_failure()
    }

    /// Wraps `body` (the inbound response body) with byte counting and
    /// `Content-Length` enforcement, firing `response_body_start`/`_end` and
    /// `response_failed`/`track_failure` at the right moments.
    pub fn wrap_response_body<B>(&self, body: B, declared_length: Option<u64>) -> ResponseBodyReader<B>
    where
        B: Body<Data = Bytes>,
        B::Error: Into<BoxError>,
    {
        ResponseBodyReader {
            inner: body,
            state: self.state.clone(),
            listener: self.listener.clone(),
            declared_length,
            read: 0,
            started: false,
            ended: false,
        }
    }

    /// Wraps `writer` (the outbound request body sink) with the same
    /// counting/enforcement for the write side.
    pub fn wrap_request_body<W>(&self, writer: W, declared_length: Option<u64>) -> RequestBodyWriter<W>
    where
        W: AsyncWrite,
    {
        RequestBodyWriter {
            inner: writer,
            state: self.state.clone(),
            listener: self.listener.clone(),
            declared_length,
            written: 0,
            completed: false,
        }
    }
}

pin_project! {
    /// Response body adapter (SPEC_FULL.md §4.11 "Response body reader").
    pub struct ResponseBodyReader<B> {
        #[pin]
        inner: B,
        state: ExchangeState,
        listener: Listener,
        declared_length: Option<u64>,
        read: u64,
        started: bool,
        ended: bool,
    }
}

impl<B> ResponseBodyReader<B> {
    pub fn bytes_read(&self) -> u64 {
        self.read
    }
}

impl<B> Body for ResponseBodyReader<B>
where
    B: Body<Data = Bytes>,
    B::Error: Into<BoxError>,
{
    type Data = Bytes;
    type Error = BoxError;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.project();

        if !*this.started {
            *this.started = true;
            this.listener.response_body_start();
        }

        match this.inner.poll_frame(cx) {
            Poll::Ready(Some(Ok(frame))) => {
                if let Some(data) = frame.data_ref() {
                    *this.read += data.len() as u64;
                    if let Some(declared) = *this.declared_length {
                        if *this.read > declared {
                            let err: BoxError = "response body exceeded declared Content-Length".into();
                            this.state.track_failure();
                            this.listener.track_failure(&err);
                            return Poll::Ready(Some(Err(err)));
                        }
                    }
                }
                Poll::Ready(Some(Ok(frame)))
            }
            Poll::Ready(Some(Err(e))) => {
                let err = e.into();
                this.state.track_failure();
                this.listener.track_failure(&err);
                Poll::Ready(Some(Err(err)))
            }
            Poll::Ready(None) => {
                if !*this.ended {
                    *this.ended = true;
                    this.listener.response_body_end(*this.read);
                }
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}

pin_project! {
    /// Request body adapter (SPEC_FULL.md §4.11 "Request body writer").
    pub struct RequestBodyWriter<W> {
        #[pin]
        inner: W,
        state: ExchangeState,
        listener: Listener,
        declared_length: Option<u64>,
        written: u64,
        completed: bool,
    }
}

impl<W> RequestBodyWriter<W> {
    pub fn bytes_written(&self) -> u64 {
        self.written
    }
}

impl<W: AsyncWrite> AsyncWrite for RequestBodyWriter<W> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        let this = self.project();

        if let Some(declared) = *this.declared_length {
            if *this.written + buf.len() as u64 > declared {
                let err = std::io::Error::other("request body exceeded declared Content-Length");
                this.state.track_failure();
                let boxed: BoxError = Box::new(std::io::Error::new(err.kind(), err.to_string()));
                this.listener.track_failure(&boxed);
                return Poll::Ready(Err(err));
            }
        }

        match this.inner.poll_write(cx, buf) {
            Poll::Ready(Ok(n)) => {
                *this.written += n as u64;
                Poll::Ready(Ok(n))
            }
            Poll::Ready(Err(e)) => {
                this.state.track_failure();
                let boxed: BoxError = Box::new(std::io::Error::new(e.kind(), e.to_string()));
                this.listener.track_failure(&boxed);
                Poll::Ready(Err(e))
            }
            Poll::Pending => Poll::Pending,
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        self.project().inner.poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        let this = self.project();
        match this.inner.poll_shutdown(cx) {
            Poll::Ready(res) => {
                if !*this.completed {
                    *this.completed = true;
                    this.listener.request_body_end(*this.written);
                }
                Poll::Ready(res)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::{BodyExt, Full};

    #[tokio::test]
    async fn response_body_fires_start_and_end() {
        let listener = Listener::noop();
        let exchange = Exchange::new(listener, false);
        let body = Full::new(Bytes::from_static(b"hello")).map_err(|e: std::convert::Infallible| -> BoxError {
            match e {}
        });
        let mut wrapped = exchange.wrap_response_body(body, Some(5));
        let collected = BodyExt::collect(&mut wrapped).await.unwrap().to_bytes();
        assert_eq!(&collected[..], b"hello");
        assert_eq!(wrapped.bytes_read(), 5);
    }

    #[tokio::test]
    async fn response_body_over_declared_length_fails() {
        let listener = Listener::noop();
        let exchange = Exchange::new(listener, false);
        let body = Full::new(Bytes::from_static(b"hello")).map_err(|e: std::convert::Infallible| -> BoxError {
            match e {}
        });
        let mut wrapped = exchange.wrap_response_body(body, Some(2));
        let result = BodyExt::collect(&mut wrapped).await;
        assert!(result.is_err());
        assert!(exchange.has_failure());
    }

    #[tokio::test]
    async fn request_body_writer_counts_bytes_and_fires_end() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = Listener::noop();
        let exchange = Exchange::new(listener, false);
        let (sink, mut drain) = tokio::io::duplex(64);
        let drain_task = tokio::spawn(async move {
            let mut buf = Vec::new();
            drain.read_to_end(&mut buf).await.unwrap();
            buf
        });

        let mut writer = exchange.wrap_request_body(sink, Some(5));
        writer.write_all(b"hello").await.unwrap();
        writer.shutdown().await.unwrap();
        assert_eq!(writer.bytes_written(), 5);
        drop(writer);
        assert_eq!(drain_task.await.unwrap(), b"hello");
    }

    #[tokio::test]
    async fn request_body_writer_rejects_overflow() {
        use tokio::io::AsyncWriteExt;

        let listener = Listener::noop();
        let exchange = Exchange::new(listener, false);
        let (sink, _drain) = tokio::io::duplex(64);
        let mut writer = exchange.wrap_request_body(sink, Some(3));
        let err = writer.write_all(b"hello").await.unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::Other);
        assert!(exchange.has_failure());
    }
}
