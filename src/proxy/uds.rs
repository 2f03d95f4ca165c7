//! Conversion helpers for `Proxy::unix`'s socket-path argument.

use std::{path::Path, path::PathBuf, sync::Arc};

/// Converts a path-like value into the `Arc<Path>` an `Intercept::Unix`
/// carries around.
pub trait IntoUnixSocket {
    fn unix_socket(self) -> Arc<Path>;
}

impl IntoUnixSocket for &str {
    fn unix_socket(self) -> Arc<Path> {
        Arc::from(Path::new(self))
    }
}

impl IntoUnixSocket for String {
    fn unix_socket(self) -> Arc<Path> {
        Arc::from(PathBuf::from(self))
    }
}

impl IntoUnixSocket for PathBuf {
    fn unix_socket(self) -> Arc<Path> {
        Arc::from(self)
    }
}

impl IntoUnixSocket for &Path {
    fn unix_socket(self) -> Arc<Path> {
        Arc::from(self)
    }
}
