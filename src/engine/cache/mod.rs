//! The persistent, RFC 7234 disk response cache (SPEC_FULL.md §4.9, §4.10).
//!
//! [`strategy`] decides whether a request can be answered from, or must
//! revalidate against, a cached entry; [`disk_lru`] (backed by
//! [`journal`]) is the journaled LRU store those decisions read from and
//! write to; [`entry`] is the metadata record stored per key. [`ResponseCache`]
//! is the facade the cache interceptor drives.

pub mod disk_lru;
pub mod entry;
pub mod journal;
pub mod strategy;

use std::{io, path::PathBuf, time::SystemTime};

use http::{HeaderMap, HeaderValue, Method, Request, StatusCode, Uri, Version, header};

pub use disk_lru::DiskLruCache;
pub use entry::{CacheEntry, TlsCacheInfo, cache_key};
pub use strategy::Decision;

const METADATA_INDEX: usize = 0;
const BODY_INDEX: usize = 1;
const VALUE_COUNT: usize = 2;
const APP_VERSION: u32 = 1;

fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// A cached response body plus the entry metadata it was served from.
pub struct CachedResponse {
    pub entry: CacheEntry,
    pub body: Vec<u8>,
}

/// The per-client disk cache: on-disk LRU store plus the RFC 7234 strategy
/// layered on top.
pub struct ResponseCache {
    store: DiskLruCache,
}

impl ResponseCache {
    pub fn open(dir: PathBuf, max_size: u64) -> io::Result<Self> {
        let store = DiskLruCache::open(dir, max_size, APP_VERSION, VALUE_COUNT)?;
        Ok(ResponseCache { store })
    }

    /// Looks up a cached entry for `request`, honoring `Vary`
    /// (SPEC_FULL.md §6 "Vary handling"). Returns `None` on a miss or a
    /// `Vary` mismatch.
    pub fn lookup(&self, uri: &Uri, request_headers: &HeaderMap) -> Option<CachedResponse> {
        let key = cache_key(&uri.to_string());
        let snapshot = self.store.get(&key)?;
        let metadata_path = snapshot.file_path(METADATA_INDEX);
        let text = std::fs::read_to_string(metadata_path).ok()?;
        let entry = CacheEntry::deserialize(&text).ok()?;
        if !entry.matches_vary(request_headers) {
            return None;
        }
        let body = std::fs::read(snapshot.file_path(BODY_INDEX)).ok()?;
        Some(CachedResponse { entry, body })
    }

    /// Decides what to do with `request` given any matching cached entry
    /// (SPEC_FULL.md §4.9).
    pub fn strategy(&self, uri: &Uri, method: &Method, is_https: bool, request_headers: &HeaderMap) -> Decision {
        let cached = self.lookup(uri, request_headers);
        strategy::compute(
            now_millis(),
            uri,
            method,
            is_https,
            request_headers,
            cached.as_ref().map(|c| &c.entry),
        )
    }

    /// Stores a fresh response, or overwrites an existing entry with a
    /// revalidated one (304 handling refreshes metadata without rewriting
    /// the body the caller already has cached).
    pub fn store(
        &self,
        uri: &Uri,
        request: &Request<impl http_body::Body>,
        status: StatusCode,
        version: Version,
        response_headers: HeaderMap,
        body: &[u8],
        sent_millis: i64,
        received_millis: i64,
        tls: Option<TlsCacheInfo>,
    ) -> io::Result<()> {
        if !strategy::is_storable(request.method(), status, request.headers(), &response_headers) {
            return Ok(());
        }
        let key = cache_key(&uri.to_string());
        let entry = CacheEntry::new(
            &uri.to_string(),
            request.method().as_str(),
            request.headers(),
            status,
            version,
            response_headers,
            sent_millis,
            received_millis,
            tls,
        );
        let Some(mut editor) = self.store.edit(&key) else {
            return Ok(());
        };
        std::fs::write(editor.dirty_path(METADATA_INDEX), entry.serialize())?;
        editor.mark_written(METADATA_INDEX);
        std::fs::write(editor.dirty_path(BODY_INDEX), body)?;
        editor.mark_written(BODY_INDEX);
        editor.commit()
    }

    /// Refreshes a cached entry's metadata after a 304, reusing the body
    /// already on disk, per RFC 7234 §4.3.3 (conditional GET validation).
    pub fn update_after_not_modified(
        &self,
        uri: &Uri,
        response_headers_override: HeaderMap,
        sent_millis: i64,
        received_millis: i64,
    ) -> io::Result<()> {
        let key = cache_key(&uri.to_string());
        let Some(cached) = self.lookup(uri, &HeaderMap::new()) else {
            return Ok(());
        };
        let mut merged = cached.entry.response_headers.clone();
        for (name, value) in response_headers_override.iter() {
            merged.insert(name.clone(), value.clone());
        }
        let entry = CacheEntry {
            response_headers: merged,
            sent_millis,
            received_millis,
            ..cached.entry
        };
        let Some(mut editor) = self.store.edit(&key) else {
            return Ok(());
        };
        std::fs::write(editor.dirty_path(METADATA_INDEX), entry.serialize())?;
        editor.mark_written(METADATA_INDEX);
        std::fs::copy(self.store.clean_path(&key, BODY_INDEX), editor.dirty_path(BODY_INDEX))?;
        editor.mark_written(BODY_INDEX);
        editor.commit()
    }

    /// Removes the cached entry for `uri`, if any (SPEC_FULL.md §6
    /// "Supported methods and caching" — invalidation on an unsafe method).
    pub fn invalidate(&self, uri: &Uri) -> io::Result<()> {
        let key = cache_key(&uri.to_string());
        self.store.remove(&key).map(|_| ())
    }

    pub fn evict_all(&self) -> io::Result<()> {
        self.store.evict_all()
    }

    pub fn size(&self) -> u64 {
        self.store.size()
    }
}

/// Appends `Warning:` header values the strategy computed (SPEC_FULL.md
/// §4.9 step 8) onto a cache-served response.
pub fn apply_warnings(headers: &mut HeaderMap, warnings: &[&'static str]) {
    for code in warnings {
        let value = match *code {
            "110" => "110 - \"Response is Stale\"",
            "113" => "113 - \"Heuristic Expiration\"",
            other => other,
        };
        if let Ok(value) = HeaderValue::from_str(value) {
            headers.append(header::WARNING, value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::Empty;

    fn empty_request(method: Method, uri: &str) -> Request<Empty<bytes::Bytes>> {
        Request::builder().method(method).uri(uri).body(Empty::new()).unwrap()
    }

    #[test]
    fn store_then_lookup_round_trips_status_and_body() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ResponseCache::open(dir.path().to_path_buf(), 1 << 20).unwrap();
        let uri: Uri = "https://example.com/a".parse().unwrap();
        let req = empty_request(Method::GET, "https://example.com/a");

        let mut headers = HeaderMap::new();
        headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("max-age=60"));
        cache
            .store(&uri, &req, StatusCode::OK, Version::HTTP_11, headers, b"hello", 0, 1, None)
            .unwrap();

        let cached = cache.lookup(&uri, &HeaderMap::new()).unwrap();
        assert_eq!(cached.body, b"hello");
        assert_eq!(cached.entry.status, StatusCode::OK);
    }

    #[test]
    fn non_storable_status_is_never_written() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ResponseCache::open(dir.path().to_path_buf(), 1 << 20).unwrap();
        let uri: Uri = "https://example.com/a".parse().unwrap();
        let req = empty_request(Method::GET, "https://example.com/a");
        cache
            .store(
                &uri,
                &req,
                StatusCode::INTERNAL_SERVER_ERROR,
                Version::HTTP_11,
                HeaderMap::new(),
                b"err",
                0,
                1,
                None,
            )
            .unwrap();
        assert!(cache.lookup(&uri, &HeaderMap::new()).is_none());
    }

    #[test]
    fn invalidate_removes_a_stored_entry() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ResponseCache::open(dir.path().to_path_buf(), 1 << 20).unwrap();
        let uri: Uri = "https://example.com/a".parse().unwrap();
        let req = empty_request(Method::GET, "https://example.com/a");
        let mut headers = HeaderMap::new();
        headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("max-age=60"));
        cache
            .store(&uri, &req, StatusCode::OK, Version::HTTP_11, headers, b"hi", 0, 1, None)
            .unwrap();
        assert!(cache.lookup(&uri, &HeaderMap::new()).is_some());

        cache.invalidate(&uri).unwrap();
        assert!(cache.lookup(&uri, &HeaderMap::new()).is_none());
    }

    #[test]
    fn strategy_reports_network_only_on_a_miss() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ResponseCache::open(dir.path().to_path_buf(), 1 << 20).unwrap();
        let uri: Uri = "https://example.com/a".parse().unwrap();
        let decision = cache.strategy(&uri, &Method::GET, true, &HeaderMap::new());
        assert!(matches!(decision, Decision::NetworkOnly));
    }

    #[test]
    fn apply_warnings_appends_known_codes() {
        let mut headers = HeaderMap::new();
        apply_warnings(&mut headers, &["110", "113"]);
        assert_eq!(headers.get_all(header::WARNING).iter().count(), 2);
    }
}
