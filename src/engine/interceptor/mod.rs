//! The interceptor chain: an ordered pipeline of stages, each of which calls
//! `chain.proceed(request)` exactly once to delegate further down the chain
//! (SPEC_FULL.md §4.7).
//!
//! Built-in order: application interceptors → [retry_followup] →
//! [bridge] → [cache] → [connect] → user network interceptors →
//! [call_server]. Grounded in the teacher's `tower::Service`-based
//! `client/middleware` stack (`src/client/middleware/*`), generalized from
//! tower's `Layer`/`Service` composition to OkHttp's explicit
//! `Chain::proceed` model: a single stage (retry-and-follow-up) needs to
//! re-run everything downstream of it for a whole new request, which a fixed
//! `tower::Service` stack can't express as naturally as an explicit chain
//! cursor can.

use std::{future::Future, pin::Pin, sync::Arc};

use bytes::Bytes;
use http_body_util::combinators::BoxBody;

use crate::error::BoxError;

use super::{call::Call, exchange::Exchange, listener::Listener};

pub mod bridge;
pub mod cache;
pub mod call_server;
pub mod connect;
pub mod retry_followup;

/// The request body type threaded through the chain: the same public body
/// type `RequestBuilder::body` accepts.
pub type ReqBody = crate::client::Body;

/// The response body type produced by the chain: a boxed body matching the
/// `http_body::Body<Data = Bytes, Error = BoxError>` bound the rest of the
/// engine (`exchange.rs`) already works in.
pub type ResBody = BoxBody<Bytes, BoxError>;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// One stage of the chain (SPEC_FULL.md §4.7).
pub trait Interceptor: Send + Sync + std::fmt::Debug {
    fn intercept<'a>(
        &'a self,
        chain: Chain<'a>,
        request: http::Request<ReqBody>,
    ) -> BoxFuture<'a, Result<http::Response<ResBody>, BoxError>>;
}

/// Per-call state shared by every stage: the owning [`Call`], its listener,
/// and the exchange the connect stage acquires for the call-server stage to
/// use. `exchange` is `None` until the connect interceptor runs.
pub struct CallContext {
    pub call: Arc<Call>,
    pub listener: Listener,
    exchange: crate::sync::Mutex<Option<Exchange>>,
}

impl CallContext {
    pub fn new(call: Arc<Call>, listener: Listener) -> Arc<Self> {
        Arc::new(CallContext {
            call,
            listener,
            exchange: crate::sync::Mutex::new(None),
        })
    }

    pub fn set_exchange(&self, exchange: Exchange) {
        *self.exchange.lock() = Some(exchange);
    }

    pub fn exchange(&self) -> Option<Exchange> {
        self.exchange.lock().clone()
    }
}

/// A cursor into the ordered list of interceptors plus the shared per-call
/// context. `proceed` advances the cursor and hands control, and the
/// request, to the next stage. The last entry in `interceptors` is expected
/// to be [`call_server::CallServerInterceptor`], which answers directly
/// instead of calling `proceed`.
#[derive(Clone)]
pub struct Chain<'a> {
    interceptors: &'a [Arc<dyn Interceptor>],
    index: usize,
    pub ctx: Arc<CallContext>,
}

impl<'a> Chain<'a> {
    pub fn new(interceptors: &'a [Arc<dyn Interceptor>], ctx: Arc<CallContext>) -> Self {
        Chain {
            interceptors,
            index: 0,
            ctx,
        }
    }

    /// Delegates `request` to the next stage. Reaching this past the end of
    /// `interceptors` means the chain was built without a terminal stage —
    /// an engine construction bug, surfaced as an error rather than a panic
    /// so it cannot take down an in-flight call's task.
    pub fn proceed(self, request: http::Request<ReqBody>) -> BoxFuture<'a, Result<http::Response<ResBody>, BoxError>> {
        if self.index >= self.interceptors.len() {
            return Box::pin(async { Err("interceptor chain exhausted without a terminal stage".into()) });
        }
        let next = self.interceptors[self.index].clone();
        let next_chain = Chain {
            interceptors: self.interceptors,
            index: self.index + 1,
            ctx: self.ctx,
        };
        next.intercept(next_chain, request)
    }
}

/// Runs a full interceptor chain for a single call, starting with
/// `request`.
pub async fn execute(
    interceptors: &[Arc<dyn Interceptor>],
    ctx: Arc<CallContext>,
    request: http::Request<ReqBody>,
) -> Result<http::Response<ResBody>, BoxError> {
    Chain::new(interceptors, ctx).proceed(request).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::Empty;

    #[derive(Debug)]
    struct Echo;

    impl Interceptor for Echo {
        fn intercept<'a>(
            &'a self,
            _chain: Chain<'a>,
            request: http::Request<ReqBody>,
        ) -> BoxFuture<'a, Result<http::Response<ResBody>, BoxError>> {
            Box::pin(async move {
                let extra = (request.uri().path().len() % 100) as u16;
                let body: ResBody = BoxBody::new(Empty::new().map_err(|e: std::convert::Infallible| match e {}));
                Ok(http::Response::builder()
                    .status(http::StatusCode::from_u16(200 + extra % 50).unwrap())
                    .body(body)
                    .unwrap())
            })
        }
    }

    #[derive(Debug)]
    struct AddHeader(&'static str, &'static str);

    impl Interceptor for AddHeader {
        fn intercept<'a>(
            &'a self,
            chain: Chain<'a>,
            mut request: http::Request<ReqBody>,
        ) -> BoxFuture<'a, Result<http::Response<ResBody>, BoxError>> {
            request
                .headers_mut()
                .insert(self.0, http::HeaderValue::from_static(self.1));
            chain.proceed(request)
        }
    }

    #[tokio::test]
    async fn single_terminal_stage_answers_the_request() {
        let interceptors: Vec<Arc<dyn Interceptor>> = vec![Arc::new(Echo)];
        let ctx = CallContext::new(Call::new(Listener::noop()), Listener::noop());
        let request = http::Request::builder()
            .uri("https://example.com/path")
            .body(crate::client::Body::from(Vec::<u8>::new()))
            .unwrap();
        let response = execute(&interceptors, ctx, request).await.unwrap();
        assert!(response.status().is_success());
    }

    #[tokio::test]
    async fn earlier_stages_can_mutate_the_request_before_proceeding() {
        #[derive(Debug)]
        struct AssertHeader;
        impl Interceptor for AssertHeader {
            fn intercept<'a>(
                &'a self,
                _chain: Chain<'a>,
                request: http::Request<ReqBody>,
            ) -> BoxFuture<'a, Result<http::Response<ResBody>, BoxError>> {
                Box::pin(async move {
                    assert_eq!(request.headers().get("x-test").unwrap(), "1");
                    let body: ResBody = BoxBody::new(Empty::new().map_err(|e: std::convert::Infallible| match e {}));
                    Ok(http::Response::builder().status(200).body(body).unwrap())
                })
            }
        }

        let interceptors: Vec<Arc<dyn Interceptor>> =
            vec![Arc::new(AddHeader("x-test", "1")), Arc::new(AssertHeader)];
        let ctx = CallContext::new(Call::new(Listener::noop()), Listener::noop());
        let request = http::Request::builder()
            .uri("https://example.com/")
            .body(crate::client::Body::from(Vec::<u8>::new()))
            .unwrap();
        execute(&interceptors, ctx, request).await.unwrap();
    }
}
