//! On-disk cache entry metadata: the text format stored as value index 0 of
//! every cache key (SPEC_FULL.md §6 "Cache metadata format"), the URL → key
//! derivation, and `Vary` header matching.
//!
//! Grounded in the teacher's `cookie::Jar` style of hand-rolled, line-based
//! text (de)serialization (`src/cookie.rs`), generalized from cookie
//! attribute lines to the richer request/response/TLS metadata block this
//! cache needs.

use std::fmt::Write as _;

use http::{HeaderMap, HeaderName, HeaderValue, StatusCode, Version};
use md5::{Digest, Md5};

use crate::error::BoxError;

const PREFIX: &str = "Voyage";

/// TLS details recorded for an HTTPS cache entry (SPEC_FULL.md §6, the
/// bracketed "if HTTPS" block).
#[derive(Debug, Clone)]
pub struct TlsCacheInfo {
    pub cipher_suite: String,
    pub peer_certificates: Vec<Vec<u8>>,
    pub local_certificates: Vec<Vec<u8>>,
    pub tls_version: Option<String>,
}

/// One stored response's metadata (value index 0; the body itself is value
/// index 1 and is not represented here).
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub url: String,
    pub request_method: String,
    pub vary_headers: Vec<(String, String)>,
    pub status: StatusCode,
    pub version: Version,
    pub response_headers: HeaderMap,
    pub sent_millis: i64,
    pub received_millis: i64,
    pub tls: Option<TlsCacheInfo>,
}

/// Lowercase-hex MD5 of the request URL string — the cache key, and the
/// filesystem-safe basename for the journal's `K.i`/`K.i.tmp` files
/// (SPEC_FULL.md §3 "Cache entry", §6).
pub fn cache_key(url: &str) -> String {
    let digest = Md5::digest(url.as_bytes());
    hex::encode(digest)
}

/// The response headers named by a comma-separated `Vary` header value.
fn vary_field_names(response_headers: &HeaderMap) -> Vec<String> {
    let mut names = Vec::new();
    for value in response_headers.get_all(http::header::VARY) {
        if let Ok(text) = value.to_str() {
            for field in text.split(',') {
                let field = field.trim();
                if field == "*" {
                    continue;
                }
                if !field.is_empty() {
                    names.push(field.to_ascii_lowercase());
                }
            }
        }
    }
    names
}

impl CacheEntry {
    /// Builds metadata for a freshly-received response, capturing only the
    /// request headers the response's `Vary` asks the cache to key on.
    pub fn new(
        url: &str,
        request_method: &str,
        request_headers: &HeaderMap,
        status: StatusCode,
        version: Version,
        response_headers: HeaderMap,
        sent_millis: i64,
        received_millis: i64,
        tls: Option<TlsCacheInfo>,
    ) -> Self {
        let mut vary_headers = Vec::new();
        for name in vary_field_names(&response_headers) {
            if let Ok(header_name) = HeaderName::try_from(name.as_str()) {
                if let Some(value) = request_headers.get(&header_name) {
                    if let Ok(value) = value.to_str() {
                        vary_headers.push((name, value.to_string()));
                    }
                }
            }
        }
        CacheEntry {
            url: url.to_string(),
            request_method: request_method.to_string(),
            vary_headers,
            status,
            version,
            response_headers,
            sent_millis,
            received_millis,
            tls,
        }
    }

    /// Whether every header named by this entry's `Vary` matches the
    /// incoming request, case-insensitively on both name and value
    /// (SPEC_FULL.md §6 "Vary handling").
    pub fn matches_vary(&self, request_headers: &HeaderMap) -> bool {
        for (name, expected) in &self.vary_headers {
            let Ok(header_name) = HeaderName::try_from(name.as_str()) else {
                return false;
            };
            let actual = request_headers
                .get(&header_name)
                .and_then(|v| v.to_str().ok());
            match actual {
                Some(actual) if actual.eq_ignore_ascii_case(expected) => {}
                _ => return false,
            }
        }
        true
    }

    /// Serializes to the text format of SPEC_FULL.md §6.
    pub fn serialize(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "{}", self.url);
        let _ = writeln!(out, "{}", self.request_method);
        let _ = writeln!(out, "{}", self.vary_headers.len());
        for (name, value) in &self.vary_headers {
            let _ = writeln!(out, "{name}: {value}");
        }
        let _ = writeln!(out, "{} {}", version_str(self.version), self.status.as_str());
        let header_lines: Vec<(String, String)> = self
            .response_headers
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();
        let _ = writeln!(out, "{}", header_lines.len() + 2);
        for (name, value) in &header_lines {
            let _ = writeln!(out, "{name}: {value}");
        }
        let _ = writeln!(out, "{PREFIX}-Sent-Millis: {}", self.sent_millis);
        let _ = writeln!(out, "{PREFIX}-Received-Millis: {}", self.received_millis);
        if let Some(tls) = &self.tls {
            let _ = writeln!(out);
            let _ = writeln!(out, "{}", tls.cipher_suite);
            let _ = writeln!(out, "{}", tls.peer_certificates.len());
            for cert in &tls.peer_certificates {
                let _ = writeln!(out, "{}", base64_encode(cert));
            }
            let _ = writeln!(out, "{}", tls.local_certificates.len());
            for cert in &tls.local_certificates {
                let _ = writeln!(out, "{}", base64_encode(cert));
            }
            let _ = writeln!(out, "{}", tls.tls_version.as_deref().unwrap_or("TLSv1.0"));
        }
        out
    }

    /// Parses the text format written by [`serialize`](Self::serialize).
    pub fn deserialize(text: &str) -> Result<Self, BoxError> {
        let mut lines = text.lines();
        let url = lines.next().ok_or("cache entry: missing url")?.to_string();
        let request_method = lines
            .next()
            .ok_or("cache entry: missing request method")?
            .to_string();
        let vary_count: usize = lines
            .next()
            .ok_or("cache entry: missing vary count")?
            .parse()
            .map_err(|_| "cache entry: bad vary count")?;
        let mut vary_headers = Vec::with_capacity(vary_count);
        for _ in 0..vary_count {
            let line = lines.next().ok_or("cache entry: truncated vary headers")?;
            let (name, value) = split_header_line(line)?;
            vary_headers.push((name.to_ascii_lowercase(), value.to_string()));
        }
        let status_line = lines.next().ok_or("cache entry: missing status line")?;
        let (version, status) = parse_status_line(status_line)?;
        let header_count: usize = lines
            .next()
            .ok_or("cache entry: missing header count")?
            .parse()
            .map_err(|_| "cache entry: bad header count")?;
        let mut response_headers = HeaderMap::new();
        let mut sent_millis = 0i64;
        let mut received_millis = 0i64;
        for _ in 0..header_count {
            let line = lines.next().ok_or("cache entry: truncated headers")?;
            let (name, value) = split_header_line(line)?;
            if name.eq_ignore_ascii_case(&format!("{PREFIX}-Sent-Millis")) {
                sent_millis = value.parse().unwrap_or(0);
                continue;
            }
            if name.eq_ignore_ascii_case(&format!("{PREFIX}-Received-Millis")) {
                received_millis = value.parse().unwrap_or(0);
                continue;
            }
            if let (Ok(name), Ok(value)) = (
                HeaderName::try_from(name),
                HeaderValue::from_str(value),
            ) {
                response_headers.append(name, value);
            }
        }

        let tls = if let Some(blank) = lines.next() {
            if !blank.is_empty() {
                return Err("cache entry: expected blank line before TLS block".into());
            }
            let cipher_suite = lines.next().ok_or("cache entry: missing cipher suite")?.to_string();
            let peer_count: i64 = lines
                .next()
                .ok_or("cache entry: missing peer cert count")?
                .parse()
                .map_err(|_| "cache entry: bad peer cert count")?;
            let mut peer_certificates = Vec::new();
            if peer_count >= 0 {
                for _ in 0..peer_count {
                    let line = lines.next().ok_or("cache entry: truncated peer certs")?;
                    peer_certificates.push(base64_decode(line)?);
                }
            }
            let local_count: usize = lines
                .next()
                .ok_or("cache entry: missing local cert count")?
                .parse()
                .map_err(|_| "cache entry: bad local cert count")?;
            let mut local_certificates = Vec::with_capacity(local_count);
            for _ in 0..local_count {
                let line = lines.next().ok_or("cache entry: truncated local certs")?;
                local_certificates.push(base64_decode(line)?);
            }
            let tls_version = lines.next().map(|s| s.to_string());
            Some(TlsCacheInfo {
                cipher_suite,
                peer_certificates,
                local_certificates,
                tls_version,
            })
        } else {
            None
        };

        Ok(CacheEntry {
            url,
            request_method,
            vary_headers,
            status,
            version,
            response_headers,
            sent_millis,
            received_millis,
            tls,
        })
    }
}

fn split_header_line(line: &str) -> Result<(&str, &str), BoxError> {
    line.split_once(": ")
        .ok_or_else(|| "cache entry: malformed header line".into())
}

fn version_str(version: Version) -> &'static str {
    match version {
        Version::HTTP_09 => "HTTP/0.9",
        Version::HTTP_10 => "HTTP/1.0",
        Version::HTTP_11 => "HTTP/1.1",
        Version::HTTP_2 => "HTTP/2.0",
        Version::HTTP_3 => "HTTP/3.0",
        _ => "HTTP/1.1",
    }
}

fn parse_status_line(line: &str) -> Result<(Version, StatusCode), BoxError> {
    let mut parts = line.splitn(2, ' ');
    let version_part = parts.next().ok_or("cache entry: empty status line")?;
    let status_part = parts.next().ok_or("cache entry: missing status code")?;
    let status_code: u16 = status_part
        .split_whitespace()
        .next()
        .ok_or("cache entry: missing status code")?
        .parse()
        .map_err(|_| "cache entry: bad status code")?;
    let version = match version_part {
        "HTTP/0.9" => Version::HTTP_09,
        "HTTP/1.0" => Version::HTTP_10,
        "HTTP/1.1" => Version::HTTP_11,
        "HTTP/2.0" => Version::HTTP_2,
        "HTTP/3.0" => Version::HTTP_3,
        _ => Version::HTTP_11,
    };
    Ok((version, StatusCode::from_u16(status_code)?))
}

fn base64_encode(bytes: &[u8]) -> String {
    use base64::Engine;
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

fn base64_decode(text: &str) -> Result<Vec<u8>, BoxError> {
    use base64::Engine;
    base64::engine::general_purpose::STANDARD
        .decode(text.trim())
        .map_err(|e| e.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_key_is_stable_lowercase_hex() {
        let key = cache_key("https://example.com/");
        assert_eq!(key.len(), 32);
        assert!(key.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn round_trips_without_tls() {
        let mut headers = HeaderMap::new();
        headers.insert(http::header::CONTENT_TYPE, HeaderValue::from_static("text/plain"));
        let entry = CacheEntry::new(
            "https://example.com/a",
            "GET",
            &HeaderMap::new(),
            StatusCode::OK,
            Version::HTTP_11,
            headers,
            1000,
            1200,
            None,
        );
        let text = entry.serialize();
        let parsed = CacheEntry::deserialize(&text).unwrap();
        assert_eq!(parsed.url, entry.url);
        assert_eq!(parsed.status, StatusCode::OK);
        assert_eq!(parsed.sent_millis, 1000);
        assert_eq!(parsed.received_millis, 1200);
        assert_eq!(
            parsed.response_headers.get(http::header::CONTENT_TYPE).unwrap(),
            "text/plain"
        );
    }

    #[test]
    fn round_trips_with_tls() {
        let entry = CacheEntry::new(
            "https://example.com/b",
            "GET",
            &HeaderMap::new(),
            StatusCode::OK,
            Version::HTTP_2,
            HeaderMap::new(),
            10,
            20,
            Some(TlsCacheInfo {
                cipher_suite: "TLS_AES_128_GCM_SHA256".into(),
                peer_certificates: vec![vec![1, 2, 3]],
                local_certificates: vec![],
                tls_version: Some("TLSv1.3".into()),
            }),
        );
        let text = entry.serialize();
        let parsed = CacheEntry::deserialize(&text).unwrap();
        let tls = parsed.tls.unwrap();
        assert_eq!(tls.cipher_suite, "TLS_AES_128_GCM_SHA256");
        assert_eq!(tls.peer_certificates, vec![vec![1, 2, 3]]);
        assert_eq!(tls.tls_version.as_deref(), Some("TLSv1.3"));
    }

    #[test]
    fn vary_matching_is_case_insensitive_on_name_and_value() {
        let mut response_headers = HeaderMap::new();
        response_headers.insert(http::header::VARY, HeaderValue::from_static("Accept-Encoding"));
        let mut request_headers = HeaderMap::new();
        request_headers.insert(http::header::ACCEPT_ENCODING, HeaderValue::from_static("GZIP"));
        let entry = CacheEntry::new(
            "https://example.com/",
            "GET",
            &request_headers,
            StatusCode::OK,
            Version::HTTP_11,
            response_headers,
            0,
            0,
            None,
        );

        let mut matching = HeaderMap::new();
        matching.insert(http::header::ACCEPT_ENCODING, HeaderValue::from_static("gzip"));
        assert!(entry.matches_vary(&matching));

        let mut mismatching = HeaderMap::new();
        mismatching.insert(http::header::ACCEPT_ENCODING, HeaderValue::from_static("br"));
        assert!(!entry.matches_vary(&mismatching));
    }
}
