//! Integration tests for the retry-and-follow-up interceptor wired through
//! the public `Client` (SPEC_FULL.md §4.8).

mod support;

use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

use voyage::{Body, Client, redirect};

#[tokio::test]
async fn redirect_chain_is_followed_to_the_final_response() {
    let requests = Arc::new(AtomicUsize::new(0));
    let requests_handler = requests.clone();
    let server = support::server::http(move |req| {
        let count = requests_handler.fetch_add(1, Ordering::SeqCst);
        let path = req.uri().path().to_owned();
        async move {
            match path.as_str() {
                "/start" if count == 0 => http::Response::builder()
                    .status(302)
                    .header(http::header::LOCATION, "/next")
                    .body(Body::from(Vec::<u8>::new()))
                    .unwrap(),
                "/next" => http::Response::builder()
                    .status(200)
                    .body(Body::from("arrived"))
                    .unwrap(),
                _ => http::Response::builder().status(500).body(Body::from(Vec::<u8>::new())).unwrap(),
            }
        }
    });

    let client = Client::new();
    let uri = format!("http://{}/start", server.addr());
    let response = client.get(&uri).send().await.unwrap();

    assert_eq!(response.status(), 200);
    assert_eq!(response.text().await.unwrap(), "arrived");
    assert_eq!(requests.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn no_redirect_policy_returns_the_redirect_response_itself() {
    let server = support::server::http(move |_req| async move {
        http::Response::builder()
            .status(302)
            .header(http::header::LOCATION, "/next")
            .body(Body::from(Vec::<u8>::new()))
            .unwrap()
    });

    let client = Client::builder().redirect(redirect::Policy::none()).build().unwrap();
    let uri = format!("http://{}/start", server.addr());
    let response = client.get(&uri).send().await.unwrap();

    assert_eq!(response.status(), 302);
    assert_eq!(
        response.headers().get(http::header::LOCATION).unwrap(),
        "/next"
    );
}

#[tokio::test]
async fn redirect_limit_stops_after_the_configured_number_of_hops() {
    let requests = Arc::new(AtomicUsize::new(0));
    let requests_handler = requests.clone();
    let server = support::server::http(move |_req| {
        let count = requests_handler.fetch_add(1, Ordering::SeqCst);
        async move {
            http::Response::builder()
                .status(302)
                .header(http::header::LOCATION, format!("/hop{}", count + 1))
                .body(Body::from(Vec::<u8>::new()))
                .unwrap()
        }
    });

    let client = Client::builder().redirect(redirect::Policy::limited(2)).build().unwrap();
    let uri = format!("http://{}/start", server.addr());
    let result = client.get(&uri).send().await;

    // Policy::limited(2) stops following after 2 hops; the interceptor
    // should surface either the last redirect response or an error, but
    // must not loop forever chasing `/hopN`.
    match result {
        Ok(response) => assert_eq!(response.status(), 302),
        Err(err) => assert!(err.is_redirect()),
    }
    assert!(requests.load(Ordering::SeqCst) <= 4);
}

#[tokio::test]
async fn service_unavailable_with_retry_after_zero_is_retried_once() {
    let requests = Arc::new(AtomicUsize::new(0));
    let requests_handler = requests.clone();
    let server = support::server::http(move |_req| {
        let count = requests_handler.fetch_add(1, Ordering::SeqCst);
        async move {
            if count == 0 {
                http::Response::builder()
                    .status(503)
                    .header(http::header::RETRY_AFTER, "0")
                    .body(Body::from(Vec::<u8>::new()))
                    .unwrap()
            } else {
                http::Response::builder().status(200).body(Body::from("recovered")).unwrap()
            }
        }
    });

    let client = Client::new();
    let uri = format!("http://{}/flaky", server.addr());
    let response = client.get(&uri).send().await.unwrap();

    assert_eq!(response.status(), 200);
    assert_eq!(response.text().await.unwrap(), "recovered");
    assert_eq!(requests.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn repeated_503_without_retry_after_is_not_retried_forever() {
    let requests = Arc::new(AtomicUsize::new(0));
    let requests_handler = requests.clone();
    let server = support::server::http(move |_req| {
        let requests = requests_handler.clone();
        async move {
            requests.fetch_add(1, Ordering::SeqCst);
            http::Response::builder().status(503).body(Body::from(Vec::<u8>::new())).unwrap()
        }
    });

    let client = Client::new();
    let uri = format!("http://{}/down", server.addr());
    let response = client.get(&uri).send().await.unwrap();

    assert_eq!(response.status(), 503);
    assert_eq!(requests.load(Ordering::SeqCst), 1);
}
