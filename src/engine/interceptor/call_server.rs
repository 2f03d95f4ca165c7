//! Call-server interceptor: the terminal stage that actually writes the
//! request to the wire and reads the response back (SPEC_FULL.md §4.11).
//!
//! Everything upstream of this stage (cache, connect, retry/follow-up) deals
//! in `http::Request`/`http::Response` only; this is the one place the
//! engine touches `hyper`'s codec directly, via
//! [`Connection::send_request`](crate::engine::connection::Connection::send_request).
//! Grounded in the teacher's `hyper_util::client::legacy::PoolClient::send_request`
//! for the shape of that call. Releasing the connection's active-exchange
//! slot back to the pool is left to `Call::message_done`/`call_done`
//! (`engine/call.rs`), driven by whoever finishes consuming the response
//! body — this stage's job ends once the response headers are back.

use http_body_util::BodyExt;

use crate::error::BoxError;

use super::{BoxFuture, Chain, Interceptor, ReqBody, ResBody};

#[derive(Debug, Default)]
pub struct CallServerInterceptor;

impl Interceptor for CallServerInterceptor {
    fn intercept<'a>(
        &'a self,
        chain: Chain<'a>,
        request: http::Request<ReqBody>,
    ) -> BoxFuture<'a, Result<http::Response<ResBody>, BoxError>> {
        Box::pin(async move {
            let ctx = chain.ctx.clone();

            let conn = ctx
                .call
                .attached_connection()
                .ok_or("call-server interceptor reached with no connection attached")?;
            let exchange = ctx
                .exchange()
                .ok_or("call-server interceptor reached with no exchange set")?;

            ctx.listener.request_body_start();
            let request_body_len = request.body().as_bytes().map(|b| b.len() as u64);

            let response = match conn.send_request(request).await {
                Ok(response) => response,
                Err(err) => {
                    ctx.listener.track_failure(&err);
                    return Err(err);
                }
            };

            ctx.listener.request_body_end(request_body_len.unwrap_or(0));
            ctx.listener.response_headers_start();
            ctx.listener.response_headers_end(response.status().as_u16());

            let declared_length = response
                .headers()
                .get(http::header::CONTENT_LENGTH)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok());

            let (mut parts, body) = response.into_parts();
            parts.extensions.insert(conn.info.clone());
            parts.extensions.insert(crate::ext::Extension(conn.info.clone()));
            let body = body.map_err(BoxError::from);
            let wrapped = exchange.wrap_response_body(body, declared_length);

            Ok(http::Response::from_parts(parts, wrapped.boxed()))
        })
    }
}
