//! Integration tests for the disk-backed RFC 7234 response cache wired
//! through the public `Client` (SPEC_FULL.md §4.9, §6 "Disk LRU cache").

mod support;

use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

use voyage::{Body, Client};

#[tokio::test]
async fn fresh_response_is_served_without_touching_the_network_again() {
    let hits = Arc::new(AtomicUsize::new(0));
    let hits_handler = hits.clone();
    let server = support::server::http(move |_req| {
        let hits = hits_handler.clone();
        async move {
            hits.fetch_add(1, Ordering::SeqCst);
            http::Response::builder()
                .status(200)
                .header(http::header::CACHE_CONTROL, "max-age=300")
                .body(Body::from("cached body"))
                .unwrap()
        }
    });

    let dir = tempfile::tempdir().unwrap();
    let client = Client::builder().cache(dir.path(), 10 * 1024 * 1024).build().unwrap();
    let uri = format!("http://{}/resource", server.addr());

    let first = client.get(&uri).send().await.unwrap();
    assert_eq!(first.status(), 200);
    assert_eq!(first.text().await.unwrap(), "cached body");

    let second = client.get(&uri).send().await.unwrap();
    assert_eq!(second.status(), 200);
    assert_eq!(second.text().await.unwrap(), "cached body");

    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn no_store_response_is_never_served_from_cache() {
    let hits = Arc::new(AtomicUsize::new(0));
    let hits_handler = hits.clone();
    let server = support::server::http(move |_req| {
        let hits = hits_handler.clone();
        async move {
            hits.fetch_add(1, Ordering::SeqCst);
            http::Response::builder()
                .status(200)
                .header(http::header::CACHE_CONTROL, "no-store")
                .body(Body::from("not cached"))
                .unwrap()
        }
    });

    let dir = tempfile::tempdir().unwrap();
    let client = Client::builder().cache(dir.path(), 10 * 1024 * 1024).build().unwrap();
    let uri = format!("http://{}/resource", server.addr());

    client.get(&uri).send().await.unwrap();
    client.get(&uri).send().await.unwrap();

    assert_eq!(hits.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn cache_survives_being_reopened_from_the_same_directory() {
    let hits = Arc::new(AtomicUsize::new(0));
    let hits_handler = hits.clone();
    let server = support::server::http(move |_req| {
        let hits = hits_handler.clone();
        async move {
            hits.fetch_add(1, Ordering::SeqCst);
            http::Response::builder()
                .status(200)
                .header(http::header::CACHE_CONTROL, "max-age=300")
                .body(Body::from("persisted"))
                .unwrap()
        }
    });

    let dir = tempfile::tempdir().unwrap();
    let uri = format!("http://{}/resource", server.addr());

    {
        let client = Client::builder().cache(dir.path(), 10 * 1024 * 1024).build().unwrap();
        let response = client.get(&uri).send().await.unwrap();
        assert_eq!(response.text().await.unwrap(), "persisted");
    }

    {
        let client = Client::builder().cache(dir.path(), 10 * 1024 * 1024).build().unwrap();
        let response = client.get(&uri).send().await.unwrap();
        assert_eq!(response.text().await.unwrap(), "persisted");
    }

    assert_eq!(hits.load(Ordering::SeqCst), 1);
}
