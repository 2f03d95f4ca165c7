//! Middleware to transparently decompress response bodies.

mod layer;

pub use self::layer::{Decompression, DecompressionLayer};

/// Which content-encodings a request announces via `Accept-Encoding` and
/// will transparently decode in the response.
#[derive(Clone, Debug)]
pub(crate) struct AcceptEncoding {
    #[cfg(feature = "gzip")]
    pub(crate) gzip: bool,
    #[cfg(feature = "brotli")]
    pub(crate) brotli: bool,
    #[cfg(feature = "zstd")]
    pub(crate) zstd: bool,
    #[cfg(feature = "deflate")]
    pub(crate) deflate: bool,
}

impl AcceptEncoding {
    #[cfg(feature = "gzip")]
    pub(crate) fn gzip(&mut self, enabled: bool) {
        self.gzip = enabled;
    }

    #[cfg(feature = "brotli")]
    pub(crate) fn brotli(&mut self, enabled: bool) {
        self.brotli = enabled;
    }

    #[cfg(feature = "zstd")]
    pub(crate) fn zstd(&mut self, enabled: bool) {
        self.zstd = enabled;
    }

    #[cfg(feature = "deflate")]
    pub(crate) fn deflate(&mut self, enabled: bool) {
        self.deflate = enabled;
    }
}

impl Default for AcceptEncoding {
    fn default() -> AcceptEncoding {
        AcceptEncoding {
            #[cfg(feature = "gzip")]
            gzip: true,
            #[cfg(feature = "brotli")]
            brotli: true,
            #[cfg(feature = "zstd")]
            zstd: true,
            #[cfg(feature = "deflate")]
            deflate: true,
        }
    }
}

crate::config::impl_request_config_value!(AcceptEncoding);
