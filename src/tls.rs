//! TLS configuration glue.
//!
//! Certificate-chain handling and the handshake itself are provided by
//! `rustls`/`tokio-rustls`; this module only assembles the `ClientConfig`
//! that the engine's connect interceptor dials through, using either the
//! bundled webpki roots or the platform's native trust store.

#[cfg(feature = "__rustls")]
use std::sync::Arc;

#[cfg(feature = "__rustls")]
/// Builds the default `rustls::ClientConfig` used for HTTPS connections,
/// offering both `h2` and `http/1.1` via ALPN.
pub(crate) fn default_tls_config() -> crate::Result<Arc<rustls::ClientConfig>> {
    let mut roots = rustls::RootCertStore::empty();

    #[cfg(feature = "rustls-tls-webpki-roots")]
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

    #[cfg(all(
        feature = "rustls-tls-native-roots",
        not(feature = "rustls-tls-webpki-roots")
    ))]
    {
        let loaded = rustls_native_certs::load_native_certs();
        for err in loaded.errors {
            log::warn!("failed to load a native root certificate: {err}");
        }
        for cert in loaded.certs {
            if let Err(err) = roots.add(cert) {
                log::warn!("failed to trust a native root certificate: {err}");
            }
        }
    }

    let mut config = rustls::ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth();
    config.alpn_protocols = vec![b"h2".to_vec(), b"http/1.1".to_vec()];

    Ok(Arc::new(config))
}
