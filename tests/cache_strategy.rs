//! Integration tests for the RFC 7234 freshness/validation strategy wired
//! through the public `Client` (SPEC_FULL.md §4.9).

mod support;

use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

use voyage::{Body, Client};

#[tokio::test]
async fn etag_revalidation_serves_the_cached_body_on_304() {
    let requests = Arc::new(AtomicUsize::new(0));
    let requests_handler = requests.clone();
    let server = support::server::http(move |req| {
        let count = requests_handler.fetch_add(1, Ordering::SeqCst);
        async move {
            if count == 0 {
                http::Response::builder()
                    .status(200)
                    .header(http::header::CACHE_CONTROL, "max-age=0")
                    .header(http::header::ETAG, "\"v1\"")
                    .body(Body::from("etag body"))
                    .unwrap()
            } else {
                assert_eq!(
                    req.headers().get(http::header::IF_NONE_MATCH).unwrap(),
                    "\"v1\""
                );
                http::Response::builder()
                    .status(304)
                    .header(http::header::ETAG, "\"v1\"")
                    .body(Body::from(Vec::<u8>::new()))
                    .unwrap()
            }
        }
    });

    let dir = tempfile::tempdir().unwrap();
    let client = Client::builder().cache(dir.path(), 10 * 1024 * 1024).build().unwrap();
    let uri = format!("http://{}/resource", server.addr());

    let first = client.get(&uri).send().await.unwrap();
    assert_eq!(first.text().await.unwrap(), "etag body");

    // max-age=0 forces a conditional request; the server answers 304 and the
    // client should still hand back the previously-cached body.
    let second = client.get(&uri).send().await.unwrap();
    assert_eq!(second.status(), 200);
    assert_eq!(second.text().await.unwrap(), "etag body");

    assert_eq!(requests.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn max_age_zero_with_no_validator_revalidates_every_time() {
    let requests = Arc::new(AtomicUsize::new(0));
    let requests_handler = requests.clone();
    let server = support::server::http(move |_req| {
        let requests = requests_handler.clone();
        async move {
            let count = requests.fetch_add(1, Ordering::SeqCst);
            http::Response::builder()
                .status(200)
                .header(http::header::CACHE_CONTROL, "max-age=0")
                .body(Body::from(format!("response {count}")))
                .unwrap()
        }
    });

    let dir = tempfile::tempdir().unwrap();
    let client = Client::builder().cache(dir.path(), 10 * 1024 * 1024).build().unwrap();
    let uri = format!("http://{}/resource", server.addr());

    let first = client.get(&uri).send().await.unwrap().text().await.unwrap();
    let second = client.get(&uri).send().await.unwrap().text().await.unwrap();

    // Neither response carries a validator (no ETag/Last-Modified/Date), so
    // there's nothing to revalidate with: every request goes to the network.
    assert_eq!(first, "response 0");
    assert_eq!(second, "response 1");
    assert_eq!(requests.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn only_get_responses_are_cached() {
    let hits = Arc::new(AtomicUsize::new(0));
    let hits_handler = hits.clone();
    let server = support::server::http(move |_req| {
        let hits = hits_handler.clone();
        async move {
            hits.fetch_add(1, Ordering::SeqCst);
            http::Response::builder()
                .status(200)
                .header(http::header::CACHE_CONTROL, "max-age=300")
                .body(Body::from("post response"))
                .unwrap()
        }
    });

    let dir = tempfile::tempdir().unwrap();
    let client = Client::builder().cache(dir.path(), 10 * 1024 * 1024).build().unwrap();
    let uri = format!("http://{}/resource", server.addr());

    client.post(&uri).body("payload").send().await.unwrap();
    client.post(&uri).body("payload").send().await.unwrap();

    assert_eq!(hits.load(Ordering::SeqCst), 2);
}
