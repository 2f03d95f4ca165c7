//! Bridge interceptor: translates between the caller-facing request and the
//! network-facing one — fills `Host`, `Content-Length`, and
//! `Accept-Encoding: gzip` when absent, and reverses gzip transparently on
//! the way back (SPEC_FULL.md §4.7).
//!
//! Grounded in [`crate::client::middleware::decoder`]'s
//! `tower_http`-based `Decompression` service for *why* a bridge stage
//! exists at all; this stage does the same job but inline in the interceptor
//! chain rather than as an outer `tower::Service` layer, since downstream
//! stages (cache, connect) need to see the same request the network
//! eventually receives.

use http::{HeaderValue, header};
use http_body_util::BodyExt;

use crate::error::BoxError;

use super::{BoxFuture, Chain, Interceptor, ReqBody, ResBody};

#[derive(Debug, Default)]
pub struct BridgeInterceptor;

impl Interceptor for BridgeInterceptor {
    fn intercept<'a>(
        &'a self,
        chain: Chain<'a>,
        mut request: http::Request<ReqBody>,
    ) -> BoxFuture<'a, Result<http::Response<ResBody>, BoxError>> {
        let mut we_added_accept_encoding = false;

        if !request.headers().contains_key(header::HOST) {
            if let Some(host) = request.uri().host() {
                let value = match request.uri().port_u16() {
                    Some(port) => format!("{host}:{port}"),
                    None => host.to_string(),
                };
                if let Ok(value) = HeaderValue::from_str(&value) {
                    request.headers_mut().insert(header::HOST, value);
                }
            }
        }

        if let Some(len) = request.body().as_bytes().map(|b| b.len()) {
            if !request.headers().contains_key(header::CONTENT_LENGTH) {
                request
                    .headers_mut()
                    .insert(header::CONTENT_LENGTH, HeaderValue::from(len));
            }
        }

        #[cfg(feature = "gzip")]
        if !request.headers().contains_key(header::ACCEPT_ENCODING) {
            request
                .headers_mut()
                .insert(header::ACCEPT_ENCODING, HeaderValue::from_static("gzip"));
            we_added_accept_encoding = true;
        }
        let _ = &we_added_accept_encoding;

        Box::pin(async move {
            let mut response = chain.proceed(request).await?;

            #[cfg(feature = "gzip")]
            if we_added_accept_encoding {
                let is_gzip = response
                    .headers()
                    .get(header::CONTENT_ENCODING)
                    .and_then(|v| v.to_str().ok())
                    .map(|v| v.eq_ignore_ascii_case("gzip"))
                    .unwrap_or(false);
                if is_gzip {
                    response.headers_mut().remove(header::CONTENT_ENCODING);
                    response.headers_mut().remove(header::CONTENT_LENGTH);
                    let (parts, body) = response.into_parts();
                    let decoded = gzip::decode_body(body);
                    response = http::Response::from_parts(parts, decoded);
                }
            }

            Ok(response)
        })
    }
}

#[cfg(feature = "gzip")]
mod gzip {
    use async_compression::tokio::bufread::GzipDecoder;
    use futures_util::TryStreamExt as _;
    use http_body::Frame;
    use http_body_util::{BodyExt, StreamBody};
    use tokio_util::io::{ReaderStream, StreamReader};

    use crate::error::BoxError;

    use super::ResBody;

    /// Wraps `body`'s byte stream through a gzip decoder, producing a fresh
    /// body of the decompressed bytes. Decoding happens lazily as the
    /// caller polls the returned body.
    pub(super) fn decode_body(body: ResBody) -> ResBody {
        let byte_stream = body
            .into_data_stream()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e));
        let reader = StreamReader::new(byte_stream);
        let decoder = GzipDecoder::new(reader);
        let decoded_stream = ReaderStream::new(decoder)
            .map_ok(Frame::data)
            .map_err(BoxError::from);
        StreamBody::new(decoded_stream).boxed()
    }
}
