//! Retry-and-follow-up: recovers from a recoverable transport failure by
//! resending the same request, and turns certain response statuses into a
//! fresh request per SPEC_FULL.md §4.8. Bounded to [`MAX_FOLLOW_UPS`] total
//! follow-ups per call.
//!
//! Grounded in the teacher's `tower_http`-flavored
//! `client/layer/redirect` stack (relative-URI resolution via
//! `url::Url::join`, method downgrade on 30x, and the cross-host
//! `Authorization`/`Cookie` stripping in `remove_sensitive_headers`), lifted
//! out of its `tower::Service` shape and into an explicit `proceed`-again
//! loop since a single stage here must be able to re-run every stage below
//! it for a whole new request. Per-hop redirect approval is delegated to
//! [`crate::redirect::Policy`], the same type `ClientBuilder::redirect`
//! stores.

use std::sync::Arc;

use http::{
    Extensions, HeaderMap, HeaderValue, Method, StatusCode, Uri, Version,
    header::{AUTHORIZATION, CONTENT_ENCODING, CONTENT_LENGTH, CONTENT_TYPE, LOCATION, PROXY_AUTHORIZATION, RETRY_AFTER, TRANSFER_ENCODING, WWW_AUTHENTICATE},
};
use http_body_util::BodyExt;

use crate::{error::BoxError, redirect};

use super::{BoxFuture, Chain, Interceptor, ReqBody, ResBody};

pub const MAX_FOLLOW_UPS: u32 = 20;

/// Answers a 401/407 challenge with a credential header, or declines by
/// returning `None` (stops the follow-up chain, per SPEC_FULL.md §4.8).
pub trait Authenticator: Send + Sync + std::fmt::Debug {
    fn authenticate(&self, response: &http::Response<ResBody>) -> Option<HeaderValue>;
}

#[derive(Debug, Default)]
pub struct RetryFollowUpInterceptor {
    redirect_policy: redirect::Policy,
    authenticator: Option<Arc<dyn Authenticator>>,
    proxy_authenticator: Option<Arc<dyn Authenticator>>,
}

impl RetryFollowUpInterceptor {
    pub fn new(follow_redirects: bool) -> Self {
        RetryFollowUpInterceptor {
            redirect_policy: if follow_redirects { redirect::Policy::default() } else { redirect::Policy::none() },
            authenticator: None,
            proxy_authenticator: None,
        }
    }

    pub fn with_redirect_policy(mut self, policy: redirect::Policy) -> Self {
        self.redirect_policy = policy;
        self
    }

    pub fn with_authenticator(mut self, authenticator: Arc<dyn Authenticator>) -> Self {
        self.authenticator = Some(authenticator);
        self
    }

    pub fn with_proxy_authenticator(mut self, authenticator: Arc<dyn Authenticator>) -> Self {
        self.proxy_authenticator = Some(authenticator);
        self
    }
}

/// The parts of a request needed to rebuild it with a fresh body, captured
/// before the owned request is handed to `chain.proceed`.
struct RequestMeta {
    method: Method,
    uri: Uri,
    version: Version,
    headers: HeaderMap,
    extensions: Extensions,
}

fn capture_meta(request: &http::Request<ReqBody>) -> RequestMeta {
    RequestMeta {
        method: request.method().clone(),
        uri: request.uri().clone(),
        version: request.version(),
        headers: request.headers().clone(),
        extensions: request.extensions().clone(),
    }
}

fn rebuild(meta: &RequestMeta, body: ReqBody) -> http::Request<ReqBody> {
    let mut request = http::Request::new(body);
    *request.method_mut() = meta.method.clone();
    *request.uri_mut() = meta.uri.clone();
    *request.version_mut() = meta.version;
    *request.headers_mut() = meta.headers.clone();
    *request.extensions_mut() = meta.extensions.clone();
    request
}

fn drop_payload_headers(headers: &mut HeaderMap) {
    for header in [CONTENT_TYPE, CONTENT_LENGTH, CONTENT_ENCODING, TRANSFER_ENCODING] {
        headers.remove(header);
    }
}

/// Strips credentials that must not follow a request across an origin
/// boundary (RFC 7231 doesn't mandate this, but every mainstream client
/// does it, and so does this one).
fn remove_sensitive_headers(headers: &mut HeaderMap, previous: &Uri, next: &Uri) {
    let cross_origin = previous.host() != next.host() || previous.port() != next.port() || previous.scheme() != next.scheme();
    if cross_origin {
        headers.remove(AUTHORIZATION);
        headers.remove(http::header::COOKIE);
        headers.remove(PROXY_AUTHORIZATION);
        headers.remove(WWW_AUTHENTICATE);
    }
}

fn resolve_location(base: &Uri, location: &HeaderValue) -> Option<Uri> {
    let location = std::str::from_utf8(location.as_bytes()).ok()?;
    let base = url::Url::parse(&base.to_string()).ok()?;
    let resolved = base.join(location).ok()?;
    Uri::try_from(resolved.as_str()).ok()
}

fn parse_retry_after_seconds(headers: &HeaderMap) -> Option<u64> {
    headers.get(RETRY_AFTER)?.to_str().ok()?.trim().parse().ok()
}

async fn drain_quietly(response: http::Response<ResBody>) {
    let _ = response.into_body().collect().await;
}

/// What to do with a non-redirect response that isn't the final answer for
/// the call. Redirect statuses are handled separately, before this is
/// consulted, since building a redirect needs the parsed `Location`.
enum FollowUp {
    Stop,
    /// Resend the exact same request (408/503/421 retries).
    SameRequest,
    Authenticate { proxy: bool },
}

fn classify(status: StatusCode, version: Version, previous_status: Option<StatusCode>, retry_after: Option<u64>) -> FollowUp {
    match status {
        StatusCode::UNAUTHORIZED => FollowUp::Authenticate { proxy: false },
        StatusCode::PROXY_AUTHENTICATION_REQUIRED => FollowUp::Authenticate { proxy: true },
        StatusCode::REQUEST_TIMEOUT => {
            if previous_status == Some(StatusCode::REQUEST_TIMEOUT) || retry_after.is_some_and(|s| s > 0) {
                FollowUp::Stop
            } else {
                FollowUp::SameRequest
            }
        }
        StatusCode::SERVICE_UNAVAILABLE => {
            if previous_status == Some(StatusCode::SERVICE_UNAVAILABLE) {
                FollowUp::Stop
            } else if retry_after == Some(0) {
                FollowUp::SameRequest
            } else {
                FollowUp::Stop
            }
        }
        StatusCode::MISDIRECTED_REQUEST => {
            if version == Version::HTTP_2 && previous_status != Some(StatusCode::MISDIRECTED_REQUEST) {
                FollowUp::SameRequest
            } else {
                FollowUp::Stop
            }
        }
        _ => FollowUp::Stop,
    }
}

fn is_redirect_status(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::MULTIPLE_CHOICES
            | StatusCode::MOVED_PERMANENTLY
            | StatusCode::FOUND
            | StatusCode::SEE_OTHER
            | StatusCode::TEMPORARY_REDIRECT
            | StatusCode::PERMANENT_REDIRECT
    )
}

fn recoverable(err: &BoxError) -> bool {
    if let Some(e) = err.downcast_ref::<crate::error::Error>() {
        if e.is_exhausted_routes() || e.is_tls() || e.is_body() {
            return false;
        }
    }
    true
}

impl Interceptor for RetryFollowUpInterceptor {
    fn intercept<'a>(
        &'a self,
        chain: Chain<'a>,
        request: http::Request<ReqBody>,
    ) -> BoxFuture<'a, Result<http::Response<ResBody>, BoxError>> {
        Box::pin(async move {
            let redirect_policy = crate::config::RequestConfig::<crate::config::RequestRedirectPolicy>::get(request.extensions())
                .cloned()
                .unwrap_or_else(|| self.redirect_policy.clone());
            let mut request = request;
            let mut follow_up_count: u32 = 0;
            let mut previous_status: Option<StatusCode> = None;
            let mut previous_uris: Vec<Uri> = Vec::new();

            loop {
                let meta = capture_meta(&request);
                let retry_body = request.body().try_clone();
                let body_size_hint_zero = request.body().as_bytes().is_some_and(|b| b.is_empty());

                let outcome = chain.clone().proceed(request).await;

                let response = match outcome {
                    Ok(response) => response,
                    Err(err) => {
                        if follow_up_count < MAX_FOLLOW_UPS && recoverable(&err) {
                            if let Some(body) = retry_body {
                                follow_up_count += 1;
                                request = rebuild(&meta, body);
                                continue;
                            }
                        }
                        return Err(err);
                    }
                };

                if follow_up_count >= MAX_FOLLOW_UPS {
                    return Ok(response);
                }

                let status = response.status();
                let retry_after = parse_retry_after_seconds(response.headers());

                if is_redirect_status(status) {
                    let location = response.headers().get(LOCATION).and_then(|v| resolve_location(&meta.uri, v));
                    let Some(location) = location else {
                        return Ok(response);
                    };

                    match redirect_policy.check(status, response.headers(), &location, &previous_uris).await {
                        Ok(true) => {}
                        Ok(false) => return Ok(response),
                        Err(err) => return Err(Box::new(crate::error::Error::redirect(err, location)) as BoxError),
                    }
                    previous_uris.push(meta.uri.clone());

                    let mut headers = meta.headers.clone();
                    let mut method = meta.method.clone();
                    let mut body = if matches!(status, StatusCode::MULTIPLE_CHOICES | StatusCode::MOVED_PERMANENTLY | StatusCode::FOUND | StatusCode::SEE_OTHER) {
                        if !matches!(method, Method::GET | Method::HEAD) {
                            method = Method::GET;
                        }
                        drop_payload_headers(&mut headers);
                        Some(ReqBody::from(Vec::<u8>::new()))
                    } else if body_size_hint_zero {
                        Some(ReqBody::from(Vec::<u8>::new()))
                    } else {
                        retry_body
                    };

                    let Some(body) = body.take() else {
                        // 307/308 with a one-shot body that's already been
                        // consumed: nothing left to resend.
                        return Ok(response);
                    };

                    remove_sensitive_headers(&mut headers, &meta.uri, &location);

                    let mut next_meta = RequestMeta {
                        method,
                        uri: location,
                        version: meta.version,
                        headers,
                        extensions: meta.extensions.clone(),
                    };
                    let next = rebuild(&next_meta, body);
                    next_meta.headers = next.headers().clone();
                    let _ = next_meta;

                    drain_quietly(response).await;
                    follow_up_count += 1;
                    previous_status = Some(status);
                    request = next;
                    continue;
                }

                match classify(status, response.version(), previous_status, retry_after) {
                    FollowUp::Stop => return Ok(response),
                    FollowUp::SameRequest => {
                        let Some(body) = retry_body else {
                            return Ok(response);
                        };
                        if status == StatusCode::MISDIRECTED_REQUEST {
                            // 421: this connection was coalesced onto a host
                            // it can't actually serve. Don't let the retry
                            // reuse it (SPEC_FULL.md §4.8).
                            if let Some(conn) = chain.ctx.call.attached_connection() {
                                conn.disable_coalescing();
                            }
                            chain.ctx.call.detach_connection();
                        }
                        drain_quietly(response).await;
                        follow_up_count += 1;
                        previous_status = Some(status);
                        request = rebuild(&meta, body);
                    }
                    FollowUp::Authenticate { proxy } => {
                        let authenticator = if proxy { self.proxy_authenticator.as_ref() } else { self.authenticator.as_ref() };
                        let Some(authenticator) = authenticator else {
                            return Ok(response);
                        };
                        let Some(credential) = authenticator.authenticate(&response) else {
                            return Ok(response);
                        };
                        let Some(body) = retry_body else {
                            return Ok(response);
                        };
                        let header_name = if proxy { PROXY_AUTHORIZATION } else { AUTHORIZATION };
                        let mut next_meta = RequestMeta {
                            headers: meta.headers.clone(),
                            ..RequestMeta {
                                method: meta.method.clone(),
                                uri: meta.uri.clone(),
                                version: meta.version,
                                headers: HeaderMap::new(),
                                extensions: meta.extensions.clone(),
                            }
                        };
                        next_meta.headers.insert(header_name, credential);
                        drain_quietly(response).await;
                        follow_up_count += 1;
                        previous_status = Some(status);
                        request = rebuild(&next_meta, body);
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::call::Call;
    use crate::engine::interceptor::{CallContext, execute};
    use crate::engine::listener::Listener;
    use bytes::Bytes;
    use http_body_util::{BodyExt as _, Empty, combinators::BoxBody};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn empty_response(status: u16) -> http::Response<ResBody> {
        let body: ResBody = BoxBody::new(Empty::new().map_err(|e: std::convert::Infallible| match e {}));
        http::Response::builder().status(status).body(body).unwrap()
    }

    fn chain_for<'a>(interceptors: &'a [Arc<dyn Interceptor>]) -> (Arc<CallContext>, &'a [Arc<dyn Interceptor>]) {
        let ctx = CallContext::new(Call::new(Listener::noop()), Listener::noop());
        (ctx, interceptors)
    }

    #[derive(Debug)]
    struct Respond(AtomicUsize, Vec<u16>);

    impl Interceptor for Respond {
        fn intercept<'a>(
            &'a self,
            _chain: Chain<'a>,
            _request: http::Request<ReqBody>,
        ) -> BoxFuture<'a, Result<http::Response<ResBody>, BoxError>> {
            let index = self.0.fetch_add(1, Ordering::SeqCst);
            let status = self.1.get(index).copied().unwrap_or(*self.1.last().unwrap());
            Box::pin(async move { Ok(empty_response(status)) })
        }
    }

    #[tokio::test]
    async fn non_redirect_status_passes_straight_through() {
        let interceptors: Vec<Arc<dyn Interceptor>> = vec![
            Arc::new(RetryFollowUpInterceptor::new(true)),
            Arc::new(Respond(AtomicUsize::new(0), vec![200])),
        ];
        let (ctx, interceptors) = chain_for(&interceptors);
        let request = http::Request::builder()
            .uri("https://example.com/")
            .body(crate::client::Body::from(Vec::<u8>::new()))
            .unwrap();
        let response = execute(interceptors, ctx, request).await.unwrap();
        assert_eq!(response.status(), 200);
    }

    #[tokio::test]
    async fn redirect_is_followed_to_a_fresh_location() {
        #[derive(Debug)]
        struct RedirectOnce(AtomicUsize);
        impl Interceptor for RedirectOnce {
            fn intercept<'a>(
                &'a self,
                _chain: Chain<'a>,
                request: http::Request<ReqBody>,
            ) -> BoxFuture<'a, Result<http::Response<ResBody>, BoxError>> {
                let index = self.0.fetch_add(1, Ordering::SeqCst);
                Box::pin(async move {
                    if index == 0 {
                        assert_eq!(request.uri().path(), "/start");
                        let mut response = empty_response(302);
                        response
                            .headers_mut()
                            .insert(LOCATION, HeaderValue::from_static("https://example.com/next"));
                        Ok(response)
                    } else {
                        assert_eq!(request.uri().path(), "/next");
                        assert_eq!(request.method(), Method::GET);
                        Ok(empty_response(200))
                    }
                })
            }
        }

        let interceptors: Vec<Arc<dyn Interceptor>> =
            vec![Arc::new(RetryFollowUpInterceptor::new(true)), Arc::new(RedirectOnce(AtomicUsize::new(0)))];
        let (ctx, interceptors) = chain_for(&interceptors);
        let request = http::Request::builder()
            .method(Method::POST)
            .uri("https://example.com/start")
            .body(crate::client::Body::from(Vec::<u8>::new()))
            .unwrap();
        let response = execute(interceptors, ctx, request).await.unwrap();
        assert_eq!(response.status(), 200);
    }

    #[tokio::test]
    async fn redirect_across_origin_strips_authorization() {
        #[derive(Debug)]
        struct RedirectCrossOrigin(AtomicUsize);
        impl Interceptor for RedirectCrossOrigin {
            fn intercept<'a>(
                &'a self,
                _chain: Chain<'a>,
                request: http::Request<ReqBody>,
            ) -> BoxFuture<'a, Result<http::Response<ResBody>, BoxError>> {
                let index = self.0.fetch_add(1, Ordering::SeqCst);
                Box::pin(async move {
                    if index == 0 {
                        let mut response = empty_response(302);
                        response
                            .headers_mut()
                            .insert(LOCATION, HeaderValue::from_static("https://other.example/next"));
                        Ok(response)
                    } else {
                        assert!(request.headers().get(AUTHORIZATION).is_none());
                        Ok(empty_response(200))
                    }
                })
            }
        }

        let interceptors: Vec<Arc<dyn Interceptor>> =
            vec![Arc::new(RetryFollowUpInterceptor::new(true)), Arc::new(RedirectCrossOrigin(AtomicUsize::new(0)))];
        let (ctx, interceptors) = chain_for(&interceptors);
        let request = http::Request::builder()
            .uri("https://example.com/start")
            .header(AUTHORIZATION, "Bearer secret")
            .body(crate::client::Body::from(Vec::<u8>::new()))
            .unwrap();
        execute(interceptors, ctx, request).await.unwrap();
    }

    #[tokio::test]
    async fn request_timeout_is_retried_once_but_not_twice_in_a_row() {
        let interceptors: Vec<Arc<dyn Interceptor>> =
            vec![Arc::new(RetryFollowUpInterceptor::new(true)), Arc::new(Respond(AtomicUsize::new(0), vec![408, 408]))];
        let (ctx, interceptors) = chain_for(&interceptors);
        let request = http::Request::builder()
            .uri("https://example.com/")
            .body(crate::client::Body::from(Vec::<u8>::new()))
            .unwrap();
        let response = execute(interceptors, ctx, request).await.unwrap();
        assert_eq!(response.status(), 408);
    }

    #[tokio::test]
    async fn service_unavailable_without_retry_after_zero_is_not_retried() {
        let interceptors: Vec<Arc<dyn Interceptor>> =
            vec![Arc::new(RetryFollowUpInterceptor::new(true)), Arc::new(Respond(AtomicUsize::new(0), vec![503]))];
        let (ctx, interceptors) = chain_for(&interceptors);
        let request = http::Request::builder()
            .uri("https://example.com/")
            .body(crate::client::Body::from(Vec::<u8>::new()))
            .unwrap();
        let response = execute(interceptors, ctx, request).await.unwrap();
        assert_eq!(response.status(), 503);
    }

    #[tokio::test]
    async fn unauthenticated_without_an_authenticator_passes_through() {
        let interceptors: Vec<Arc<dyn Interceptor>> =
            vec![Arc::new(RetryFollowUpInterceptor::new(true)), Arc::new(Respond(AtomicUsize::new(0), vec![401]))];
        let (ctx, interceptors) = chain_for(&interceptors);
        let request = http::Request::builder()
            .uri("https://example.com/")
            .body(crate::client::Body::from(Vec::<u8>::new()))
            .unwrap();
        let response = execute(interceptors, ctx, request).await.unwrap();
        assert_eq!(response.status(), 401);
    }
}
