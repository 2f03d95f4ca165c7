use std::{
    future::Future,
    pin::Pin,
    task::{Context, Poll},
    time::Duration,
};

use http::{Request, Response};
use http_body::Body;
use tower::Layer;
use tower_service::Service;

use super::{ResponseFuture, TimeoutBody};
use crate::{
    config::{RequestConfig, RequestTimeoutOptions},
    error::BoxError,
};

#[derive(Clone)]
pub struct TimeoutLayer {
    total_timeout: Option<Duration>,
    read_timeout: Option<Duration>,
}

impl TimeoutLayer {
    /// Create a timeout from a duration
    pub const fn new(total_timeout: Option<Duration>, read_timeout: Option<Duration>) -> Self {
        TimeoutLayer {
            total_timeout,
            read_timeout,
        }
    }
}

impl<S> Layer<S> for TimeoutLayer {
    type Service = Timeout<S>;

    fn layer(&self, service: S) -> Self::Service {
        Timeout::new(service, self.total_timeout, self.read_timeout)
    }
}

/// Bounds the time from issuing a request to receiving its response headers,
/// then keeps bounding the response body behind a [`TimeoutBody`].
///
/// A per-request override stored via `RequestBuilder::timeout`/`read_timeout`
/// takes precedence over the durations this service was built with.
#[derive(Clone)]
pub struct Timeout<S> {
    inner: S,
    total_timeout: Option<Duration>,
    read_timeout: Option<Duration>,
}

impl<S> Timeout<S> {
    /// Creates a new [`Timeout`] wrapping `inner`.
    pub fn new(inner: S, total_timeout: Option<Duration>, read_timeout: Option<Duration>) -> Self {
        Timeout {
            inner,
            total_timeout,
            read_timeout,
        }
    }
}

impl<S, ReqBody, ResBody> Service<Request<ReqBody>> for Timeout<S>
where
    S: Service<Request<ReqBody>, Response = Response<ResBody>>,
    S::Error: Into<BoxError>,
    S::Future: Send + 'static,
    ResBody: Body + Send + 'static,
    ResBody::Data: Send,
    ResBody::Error: Into<BoxError>,
{
    type Response = Response<TimeoutBody<ResBody>>;
    type Error = BoxError;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx).map_err(Into::into)
    }

    fn call(&mut self, req: Request<ReqBody>) -> Self::Future {
        let uri = req.uri().clone();
        let overrides = RequestConfig::<RequestTimeoutOptions>::get(req.extensions()).copied();
        let total_timeout = overrides.and_then(|o| o.total()).or(self.total_timeout);
        let read_timeout = overrides.and_then(|o| o.read()).or(self.read_timeout);

        let sleep = total_timeout.map(tokio::time::sleep);
        let response = ResponseFuture::new(self.inner.call(req), sleep, uri);

        Box::pin(async move {
            let response = response.await?;
            let (parts, body) = response.into_parts();
            let body = TimeoutBody::new(total_timeout, read_timeout, body);
            Ok(Response::from_parts(parts, body))
        })
    }
}

/// Applies a [`TimeoutBody`] to the response body.
#[derive(Clone)]
pub struct ResponseBodyTimeoutLayer {
    read_timeout: Option<Duration>,
    total_timeout: Option<Duration>,
}

impl ResponseBodyTimeoutLayer {
    /// Creates a new [`ResponseBodyTimeoutLayer`].
    pub const fn new(total_timeout: Option<Duration>, read_timeout: Option<Duration>) -> Self {
        Self {
            read_timeout,
            total_timeout,
        }
    }
}

impl<S> Layer<S> for ResponseBodyTimeoutLayer {
    type Service = ResponseBodyTimeout<S>;

    fn layer(&self, inner: S) -> Self::Service {
        ResponseBodyTimeout {
            inner,
            read_timeout: self.read_timeout,
            total_timeout: self.total_timeout,
        }
    }
}

/// Wraps response bodies in a [`TimeoutBody`] without racing the response
/// headers against a deadline.
///
/// Useful where a caller already owns a resolved [`Response`] (e.g. after a
/// redirect hop reused an existing connection) and only the body stream still
/// needs bounding.
#[derive(Clone)]
pub struct ResponseBodyTimeout<S> {
    inner: S,
    read_timeout: Option<Duration>,
    total_timeout: Option<Duration>,
}

impl<S, ReqBody, ResBody> Service<Request<ReqBody>> for ResponseBodyTimeout<S>
where
    S: Service<Request<ReqBody>, Response = Response<ResBody>>,
    S::Error: Into<BoxError>,
    S::Future: Send + 'static,
    ResBody: Body + Send + 'static,
    ResBody::Data: Send,
    ResBody::Error: Into<BoxError>,
{
    type Response = Response<TimeoutBody<ResBody>>;
    type Error = BoxError;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx).map_err(Into::into)
    }

    fn call(&mut self, req: Request<ReqBody>) -> Self::Future {
        let total_timeout = self.total_timeout;
        let read_timeout = self.read_timeout;
        let fut = self.inner.call(req);

        Box::pin(async move {
            let response = fut.await.map_err(Into::into)?;
            let (parts, body) = response.into_parts();
            let body = TimeoutBody::new(total_timeout, read_timeout, body);
            Ok(Response::from_parts(parts, body))
        })
    }
}
