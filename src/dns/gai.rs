use tower_service::Service;

use crate::dns::{Addrs, Name, Resolve, Resolving};
use crate::error::BoxError;

/// The default DNS resolver, backed by `getaddrinfo` on a blocking thread pool.
///
/// This spawns onto `tokio`'s blocking pool via [`tokio::net::lookup_host`], matching
/// the behavior of the system resolver used by most other HTTP clients.
#[derive(Debug, Default, Clone, Copy)]
pub struct GaiResolver(());

impl GaiResolver {
    /// Creates a new `GaiResolver`.
    pub fn new() -> Self {
        Self(())
    }
}

impl Resolve for GaiResolver {
    fn resolve(&self, name: Name) -> Resolving {
        Box::pin(async move {
            let addrs = tokio::net::lookup_host((name.as_str(), 0))
                .await
                .map_err(|err| Box::new(err) as BoxError)?;
            Ok(Box::new(addrs.map(|addr| addr)) as Addrs)
        })
    }
}

// `Service<Name>` is provided for parity with connectors that expect a Tower
// service rather than the `Resolve` trait object.
impl Service<Name> for GaiResolver {
    type Response = Addrs;
    type Error = BoxError;
    type Future = Resolving;

    fn poll_ready(
        &mut self,
        _cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Result<(), Self::Error>> {
        std::task::Poll::Ready(Ok(()))
    }

    fn call(&mut self, name: Name) -> Self::Future {
        Resolve::resolve(self, name)
    }
}
