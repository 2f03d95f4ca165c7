//! RFC 7234 (private cache) freshness/validation strategy (SPEC_FULL.md
//! §4.9). Pure logic: given the current time, a request, and an optional
//! cached entry, decides whether to answer from cache, issue a conditional
//! request, or go straight to the network.
//!
//! Grounded in the teacher's [`crate::redirect::Policy`] for the
//! "small enum of outcomes computed by a pure function over headers" shape;
//! the actual freshness arithmetic follows RFC 7234 §4.2 directly since
//! there is no equivalent in the teacher to generalize from.

use http::{HeaderMap, HeaderValue, Method, StatusCode, Uri, header};

use super::entry::CacheEntry;

const ONE_DAY_MS: i64 = 24 * 60 * 60 * 1000;

/// Parsed `Cache-Control` (plus related) directives on a request.
#[derive(Debug, Clone, Default)]
pub struct RequestDirectives {
    pub no_cache: bool,
    pub no_store: bool,
    pub max_age: Option<i64>,
    pub max_stale: Option<i64>,
    pub min_fresh: Option<i64>,
    pub only_if_cached: bool,
    pub has_conditional: bool,
}

/// Parsed `Cache-Control` directives on a response.
#[derive(Debug, Clone, Default)]
pub struct ResponseDirectives {
    pub no_cache: bool,
    pub no_store: bool,
    pub must_revalidate: bool,
    pub is_public: bool,
    pub is_private: bool,
    pub max_age: Option<i64>,
}

fn cache_control_tokens(headers: &HeaderMap) -> Vec<String> {
    headers
        .get_all(header::CACHE_CONTROL)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(|t| t.trim().to_ascii_lowercase())
        .collect()
}

fn directive_value(tokens: &[String], name: &str) -> Option<i64> {
    tokens.iter().find_map(|t| {
        let (key, value) = t.split_once('=')?;
        if key.trim() == name {
            value.trim().trim_matches('"').parse().ok()
        } else {
            None
        }
    })
}

pub fn parse_request_directives(headers: &HeaderMap) -> RequestDirectives {
    let tokens = cache_control_tokens(headers);
    RequestDirectives {
        no_cache: tokens.iter().any(|t| t == "no-cache") || headers.contains_key(header::PRAGMA),
        no_store: tokens.iter().any(|t| t == "no-store"),
        max_age: directive_value(&tokens, "max-age"),
        max_stale: directive_value(&tokens, "max-stale"),
        min_fresh: directive_value(&tokens, "min-fresh"),
        only_if_cached: tokens.iter().any(|t| t == "only-if-cached"),
        has_conditional: headers.contains_key(header::IF_MODIFIED_SINCE)
            || headers.contains_key(header::IF_NONE_MATCH),
    }
}

pub fn parse_response_directives(headers: &HeaderMap) -> ResponseDirectives {
    let tokens = cache_control_tokens(headers);
    ResponseDirectives {
        no_cache: tokens.iter().any(|t| t == "no-cache"),
        no_store: tokens.iter().any(|t| t == "no-store"),
        must_revalidate: tokens.iter().any(|t| t == "must-revalidate"),
        is_public: tokens.iter().any(|t| t == "public"),
        is_private: tokens.iter().any(|t| t == "private"),
        max_age: directive_value(&tokens, "max-age"),
    }
}

fn parse_http_date(value: &HeaderValue) -> Option<i64> {
    let text = value.to_str().ok()?;
    httpdate::parse_http_date(text)
        .ok()
        .map(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .flatten()
        .map(|d| d.as_millis() as i64)
}

/// Storable status codes per SPEC_FULL.md §4.9 "Storable codes".
fn is_storable_status(status: StatusCode, response_headers: &HeaderMap) -> bool {
    match status {
        StatusCode::OK
        | StatusCode::NON_AUTHORITATIVE_INFORMATION
        | StatusCode::NO_CONTENT
        | StatusCode::MULTIPLE_CHOICES
        | StatusCode::MOVED_PERMANENTLY
        | StatusCode::NOT_FOUND
        | StatusCode::METHOD_NOT_ALLOWED
        | StatusCode::GONE
        | StatusCode::URI_TOO_LONG
        | StatusCode::NOT_IMPLEMENTED
        | StatusCode::PERMANENT_REDIRECT => true,
        StatusCode::FOUND | StatusCode::TEMPORARY_REDIRECT => {
            response_headers.contains_key(header::EXPIRES)
                || cache_control_tokens(response_headers)
                    .iter()
                    .any(|t| t.starts_with("max-age") || t == "public" || t == "private")
        }
        _ => false,
    }
}

/// Whether a full response may be stored at all (SPEC_FULL.md §4.9
/// "Storable codes", request/response `no-store`).
pub fn is_storable(
    method: &Method,
    status: StatusCode,
    request_headers: &HeaderMap,
    response_headers: &HeaderMap,
) -> bool {
    if method != Method::GET {
        return false;
    }
    if parse_request_directives(request_headers).no_store {
        return false;
    }
    if parse_response_directives(response_headers).no_store {
        return false;
    }
    is_storable_status(status, response_headers)
}

/// The methods that invalidate any cached entry for their URL (SPEC_FULL.md
/// §6 "Supported methods and caching").
pub fn invalidates_on_success(method: &Method) -> bool {
    matches!(
        method.as_str(),
        "POST" | "PUT" | "PATCH" | "DELETE" | "MOVE"
    )
}

/// What the cache strategy decided to do with a request.
#[derive(Debug, Clone)]
pub enum Decision {
    /// Go straight to the network; do not touch the cache.
    NetworkOnly,
    /// Answer entirely from the cached entry. `warnings` holds any
    /// `Warning:` header values to splice onto the served response.
    CacheOnly { warnings: Vec<&'static str> },
    /// Issue a conditional request with the given extra header.
    Conditional {
        header_name: http::HeaderName,
        header_value: HeaderValue,
    },
    /// `only-if-cached` was set but the network would otherwise be needed;
    /// the caller must synthesize a 504-like response instead of making a
    /// request.
    OnlyIfCachedUnsatisfiable,
}

/// Implements the 10-step algorithm of SPEC_FULL.md §4.9.
pub fn compute(
    now_millis: i64,
    uri: &Uri,
    method: &Method,
    request_is_https: bool,
    request_headers: &HeaderMap,
    cached: Option<&CacheEntry>,
) -> Decision {
    let request = parse_request_directives(request_headers);

    // Step 1: no cached response.
    let Some(cached) = cached else {
        return finish_network_only(&request);
    };

    // Step 2: HTTPS request but cached entry lacks a TLS handshake record.
    if request_is_https && cached.tls.is_none() {
        return finish_network_only(&request);
    }

    // Step 3: cached response not storable.
    if !is_storable_status(cached.status, &cached.response_headers) {
        return finish_network_only(&request);
    }

    // Step 4: request forces revalidation.
    if request.no_cache || request.has_conditional {
        return finish_network_only(&request);
    }

    let response = parse_response_directives(&cached.response_headers);

    let date_millis = cached
        .response_headers
        .get(header::DATE)
        .and_then(parse_http_date)
        .unwrap_or(cached.received_millis);
    let age_header_secs: i64 = cached
        .response_headers
        .get(header::AGE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);

    // Step 5: ageMs.
    let apparent_age_ms = (date_millis.saturating_sub(cached.received_millis)).max(0);
    let corrected_age_ms = apparent_age_ms.max(age_header_secs * 1000);
    let response_duration_ms = (cached.received_millis - cached.sent_millis).max(0);
    let resident_duration_ms = (now_millis - cached.received_millis).max(0);
    let age_ms = corrected_age_ms + response_duration_ms + resident_duration_ms;

    // Step 6: freshnessMs. `used_heuristic_freshness` mirrors OkHttp's
    // `isFreshnessLifetimeHeuristic()`: true only when neither an explicit
    // `max-age` nor `Expires` governed the freshness lifetime, i.e. the
    // last-modified-based (or default-zero) branch was taken.
    let has_expires = cached.response_headers.get(header::EXPIRES).and_then(parse_http_date).is_some();
    let used_heuristic_freshness = response.max_age.is_none() && !has_expires;
    let mut freshness_ms = if let Some(max_age) = response.max_age {
        max_age * 1000
    } else if let Some(expires) = cached.response_headers.get(header::EXPIRES).and_then(parse_http_date) {
        (expires - date_millis).max(0)
    } else if let Some(last_modified) = cached
        .response_headers
        .get(header::LAST_MODIFIED)
        .and_then(parse_http_date)
    {
        if uri.query().is_none() && date_millis > last_modified {
            (date_millis - last_modified) / 10
        } else {
            0
        }
    } else {
        0
    };
    if let Some(request_max_age) = request.max_age {
        freshness_ms = freshness_ms.min(request_max_age * 1000);
    }

    // Step 7: minFresh / maxStale.
    let min_fresh_ms = request.min_fresh.map(|s| s * 1000).unwrap_or(0);
    let max_stale_ms = if response.must_revalidate {
        0
    } else {
        request.max_stale.map(|s| s * 1000).unwrap_or(0)
    };

    // Step 8: cache-only hit.
    if !response.no_cache && age_ms + min_fresh_ms < freshness_ms + max_stale_ms {
        let mut warnings = Vec::new();
        if age_ms >= freshness_ms {
            warnings.push("110");
        }
        if used_heuristic_freshness && freshness_ms > ONE_DAY_MS && age_ms > ONE_DAY_MS {
            warnings.push("113");
        }
        return Decision::CacheOnly { warnings };
    }

    if request.only_if_cached {
        return Decision::OnlyIfCachedUnsatisfiable;
    }

    // Step 9: conditional request.
    if let Some(etag) = cached.response_headers.get(header::ETAG) {
        return Decision::Conditional {
            header_name: header::IF_NONE_MATCH,
            header_value: etag.clone(),
        };
    }
    if let Some(last_modified) = cached.response_headers.get(header::LAST_MODIFIED) {
        return Decision::Conditional {
            header_name: header::IF_MODIFIED_SINCE,
            header_value: last_modified.clone(),
        };
    }
    if let Some(date) = cached.response_headers.get(header::DATE) {
        return Decision::Conditional {
            header_name: header::IF_MODIFIED_SINCE,
            header_value: date.clone(),
        };
    }

    finish_network_only(&request)
}

fn finish_network_only(request: &RequestDirectives) -> Decision {
    if request.only_if_cached {
        Decision::OnlyIfCachedUnsatisfiable
    } else {
        Decision::NetworkOnly
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::{HeaderMap, Version};

    fn entry_with_headers(status: StatusCode, headers: HeaderMap, received_millis: i64) -> CacheEntry {
        CacheEntry::new(
            "https://example.com/",
            "GET",
            &HeaderMap::new(),
            status,
            Version::HTTP_11,
            headers,
            received_millis - 5,
            received_millis,
            None,
        )
    }

    #[test]
    fn no_cached_response_goes_to_network() {
        let decision = compute(
            1_000_000,
            &"https://example.com/".parse().unwrap(),
            &Method::GET,
            true,
            &HeaderMap::new(),
            None,
        );
        assert!(matches!(decision, Decision::NetworkOnly));
    }

    #[test]
    fn fresh_max_age_response_is_a_cache_hit() {
        let mut headers = HeaderMap::new();
        headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("max-age=3600"));
        let entry = entry_with_headers(StatusCode::OK, headers, 0);
        let decision = compute(
            1000, // 1 second later, well within 3600s freshness
            &"https://example.com/".parse().unwrap(),
            &Method::GET,
            false,
            &HeaderMap::new(),
            Some(&entry),
        );
        assert!(matches!(decision, Decision::CacheOnly { .. }));
    }

    #[test]
    fn stale_max_age_response_issues_a_conditional_request() {
        let mut headers = HeaderMap::new();
        headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("max-age=1"));
        headers.insert(header::ETAG, HeaderValue::from_static("\"abc\""));
        let entry = entry_with_headers(StatusCode::OK, headers, 0);
        let decision = compute(
            5000,
            &"https://example.com/".parse().unwrap(),
            &Method::GET,
            false,
            &HeaderMap::new(),
            Some(&entry),
        );
        match decision {
            Decision::Conditional { header_name, header_value } => {
                assert_eq!(header_name, header::IF_NONE_MATCH);
                assert_eq!(header_value, "\"abc\"");
            }
            other => panic!("expected conditional request, got {other:?}"),
        }
    }

    #[test]
    fn request_no_cache_forces_network_only() {
        let mut headers = HeaderMap::new();
        headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("max-age=3600"));
        let entry = entry_with_headers(StatusCode::OK, headers, 0);
        let mut request_headers = HeaderMap::new();
        request_headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
        let decision = compute(
            1000,
            &"https://example.com/".parse().unwrap(),
            &Method::GET,
            false,
            &request_headers,
            Some(&entry),
        );
        assert!(matches!(decision, Decision::NetworkOnly));
    }

    #[test]
    fn only_if_cached_without_fresh_entry_is_unsatisfiable() {
        let mut request_headers = HeaderMap::new();
        request_headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("only-if-cached"));
        let decision = compute(
            1000,
            &"https://example.com/".parse().unwrap(),
            &Method::GET,
            false,
            &request_headers,
            None,
        );
        assert!(matches!(decision, Decision::OnlyIfCachedUnsatisfiable));
    }

    #[test]
    fn non_get_is_never_storable() {
        assert!(!is_storable(
            &Method::POST,
            StatusCode::OK,
            &HeaderMap::new(),
            &HeaderMap::new()
        ));
    }

    #[test]
    fn response_no_store_vetoes_storage() {
        let mut headers = HeaderMap::new();
        headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
        assert!(!is_storable(&Method::GET, StatusCode::OK, &HeaderMap::new(), &headers));
    }

    #[test]
    fn long_explicit_max_age_does_not_warn_113() {
        let mut headers = HeaderMap::new();
        headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("max-age=604800"));
        let one_day_ms = 86_400_000;
        let entry = entry_with_headers(StatusCode::OK, headers, 0);
        let decision = compute(
            2 * one_day_ms,
            &"https://example.com/".parse().unwrap(),
            &Method::GET,
            false,
            &HeaderMap::new(),
            Some(&entry),
        );
        match decision {
            Decision::CacheOnly { warnings } => assert!(!warnings.contains(&"113")),
            other => panic!("expected a cache hit, got {other:?}"),
        }
    }

    #[test]
    fn heuristic_freshness_over_a_day_warns_113() {
        let one_day_ms = 86_400_000;
        // Received at the same instant as the Date header below.
        let received_millis: i64 = 1_579_478_400_000; // Mon, 20 Jan 2020 00:00:00 GMT
        let mut headers = HeaderMap::new();
        headers.insert(header::DATE, HeaderValue::from_static("Mon, 20 Jan 2020 00:00:00 GMT"));
        // Last-Modified ~400 days before Date, so the 10% heuristic
        // lifetime is ~40 days: comfortably over a day, with neither
        // max-age nor Expires present.
        headers.insert(header::LAST_MODIFIED, HeaderValue::from_static("Sun, 16 Dec 2018 00:00:00 GMT"));
        let entry = entry_with_headers(StatusCode::OK, headers, received_millis);
        let decision = compute(
            received_millis + 10 * one_day_ms,
            &"https://example.com/".parse().unwrap(),
            &Method::GET,
            false,
            &HeaderMap::new(),
            Some(&entry),
        );
        match decision {
            Decision::CacheOnly { warnings } => assert!(warnings.contains(&"113")),
            other => panic!("expected a cache hit, got {other:?}"),
        }
    }

    #[test]
    fn invalidating_methods_match_spec_list() {
        for method in ["POST", "PUT", "PATCH", "DELETE", "MOVE"] {
            assert!(invalidates_on_success(&Method::from_bytes(method.as_bytes()).unwrap()));
        }
        assert!(!invalidates_on_success(&Method::GET));
        assert!(!invalidates_on_success(&Method::HEAD));
    }
}
