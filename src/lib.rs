#![deny(missing_docs)]
#![deny(missing_debug_implementations)]
#![cfg_attr(docsrs, feature(doc_cfg))]
#![cfg_attr(test, deny(warnings))]

//! # voyage
//!
//! An HTTP/1.1 and HTTP/2 client engine built around a small set of
//! cooperating stages: a [`Dispatcher`](engine::Dispatcher) that gates how
//! many requests run concurrently, a route planner that turns a URI (plus
//! any configured proxy) into a dialable address, a [`ConnectionPool`
//! (engine::ConnectionPool)] that pools and coalesces connections, an
//! interceptor chain that threads a request through retry/redirect, caching,
//! and connect stages before it ever touches the wire, and a persistent,
//! RFC 7234-flavored on-disk response cache.
//!
//! ## Making a GET request
//!
//! ```rust
//! # async fn run() -> Result<(), voyage::Error> {
//! let body = voyage::Client::new()
//!     .get("https://www.rust-lang.org")
//!     .send()
//!     .await?
//!     .text()
//!     .await?;
//!
//! println!("body = {:?}", body);
//! # Ok(())
//! # }
//! ```
//!
//! **NOTE**: If you plan to perform multiple requests, it is best to create a
//! [`Client`][client] and reuse it, taking advantage of connection pooling.
//!
//! ## Making POST requests (or setting request bodies)
//!
//! ```rust
//! # use voyage::Error;
//! #
//! # async fn run() -> Result<(), Error> {
//! let client = voyage::Client::new();
//! let res = client.post("http://httpbin.org/post")
//!     .body("the exact body that is sent")
//!     .send()
//!     .await?;
//! # Ok(())
//! # }
//! ```
//!
//! ### Forms
//!
//! ```rust
//! # use voyage::Error;
//! #
//! # async fn run() -> Result<(), Error> {
//! // This will POST a body of `foo=bar&baz=quux`
//! let params = [("foo", "bar"), ("baz", "quux")];
//! let client = voyage::Client::new();
//! let res = client.post("http://httpbin.org/post")
//!     .form(&params)
//!     .send()
//!     .await?;
//! # Ok(())
//! # }
//! ```
//!
//! ### JSON
//!
//! ```rust
//! # use voyage::Error;
//! # use std::collections::HashMap;
//! #
//! # #[cfg(feature = "json")]
//! # async fn run() -> Result<(), Error> {
//! let mut map = HashMap::new();
//! map.insert("lang", "rust");
//! map.insert("body", "json");
//!
//! let client = voyage::Client::new();
//! let res = client.post("http://httpbin.org/post")
//!     .json(&map)
//!     .send()
//!     .await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Redirect Policies
//!
//! By default, the client does not follow HTTP redirects. To customize this
//! behavior, use [`redirect::Policy`][redirect] with [`ClientBuilder::redirect`].
//!
//! ## Retries
//!
//! By default, the client retries protocol-level nacks (HTTP/2 REFUSED_STREAM,
//! a graceful GOAWAY) that are known to be safe to resend. See [`retry::Policy`]
//! and [`ClientBuilder::retry`] to customize or disable this.
//!
//! ## Cookies
//!
//! The automatic storing and sending of session cookies can be enabled with
//! [`ClientBuilder::cookie_store`].
//!
//! ## Proxies
//!
//! **NOTE**: System proxies are enabled by default.
//!
//! System proxies look in environment variables to set HTTP or HTTPS proxies.
//! `HTTP_PROXY`/`http_proxy` provide HTTP proxies for HTTP connections while
//! `HTTPS_PROXY`/`https_proxy` provide HTTPS proxies for HTTPS connections.
//! `ALL_PROXY`/`all_proxy` provide proxies for both. If both the all-proxy and
//! a scheme-specific proxy variable are set, the more specific one wins.
//!
//! These can be overridden by adding a [`Proxy`] to [`ClientBuilder`], e.g.
//! `let proxy = voyage::Proxy::http("https://secure.example")?;`, or disabled
//! with [`ClientBuilder::no_proxy`].
//!
//! The `socks` feature is required for SOCKS proxies:
//!
//! ```bash
//! export https_proxy=socks5://127.0.0.1:1086
//! ```
//!
//! * `http://` is the scheme for an HTTP proxy
//! * `https://` is the scheme for an HTTPS proxy
//! * `socks4://`/`socks4a://`/`socks5://`/`socks5h://` select a SOCKS proxy
//!
//! ## Caching
//!
//! A persistent, on-disk response cache honoring `Cache-Control`/`Vary`/
//! conditional revalidation can be enabled with [`ClientBuilder::cache`].
//!
//! ## TLS
//!
//! By default, clients use `rustls` to connect to HTTPS targets, trusting
//! Mozilla's root certificates via the `webpki-roots` crate.
//!
//! ## Optional Features
//!
//! - **cookies**: Provides cookie session support.
//! - **gzip**: Provides response body gzip decompression.
//! - **brotli**: Provides response body brotli decompression.
//! - **zstd**: Provides response body zstd decompression.
//! - **deflate**: Provides response body deflate decompression.
//! - **json**: Provides serialization and deserialization for JSON bodies.
//! - **stream**: Adds support for `futures::Stream` request bodies.
//! - **socks**: Provides SOCKS4/4a/5/5h proxy support.
//! - **hickory-dns**: Use a hickory-dns async resolver instead of the default
//!   threadpool `getaddrinfo` resolver.
//! - **rustls-tls-native-roots**: Use the native system root certificate store
//!   instead of the bundled webpki-roots.
//! - **blocking**: Provides a blocking (synchronous) client.
//!
//! [client]: ./struct.Client.html
//! [redirect]: crate::redirect
//! [Proxy]: ./struct.Proxy.html
//! [`ClientBuilder::redirect`]: crate::ClientBuilder::redirect
//! [`ClientBuilder::retry`]: crate::ClientBuilder::retry
//! [`ClientBuilder::cookie_store`]: crate::ClientBuilder::cookie_store
//! [`ClientBuilder::no_proxy`]: crate::ClientBuilder::no_proxy
//! [`ClientBuilder::cache`]: crate::ClientBuilder::cache
//! [`ClientBuilder`]: crate::ClientBuilder

#[macro_use]
mod macros;

mod config;
mod ext;
pub mod header;
mod into_uri;
pub mod retry;
pub mod sync;

#[cfg(feature = "hickory-dns")]
pub use hickory_resolver;
pub use http::Method;
pub use http::header;
pub use http::{StatusCode, Version};
pub use url::Url;

mod error;
mod into_url;
mod response;

pub use self::error::{Error, Result};
pub use self::into_url::IntoUrl;
pub use self::response::ResponseBuilderExt;

fn _assert_impls() {
    fn assert_send<T: Send>() {}
    fn assert_sync<T: Sync>() {}
    fn assert_clone<T: Clone>() {}

    assert_send::<Client>();
    assert_sync::<Client>();
    assert_clone::<Client>();

    assert_send::<Request>();
    assert_send::<RequestBuilder>();

    assert_send::<Response>();

    assert_send::<Error>();
    assert_sync::<Error>();
}

pub use self::client::{Body, Client, ClientBuilder, Request, RequestBuilder, Response, Upgraded};
pub use self::proxy::{NoProxy, Proxy};

mod client;
#[cfg(feature = "cookies")]
pub mod cookie;
pub mod dns;
pub mod engine;
mod proxy;
pub mod redirect;
pub mod tls;
mod util;
