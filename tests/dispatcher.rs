//! Integration tests for `Dispatcher` admission control wired through the
//! public `Client`: SPEC_FULL.md §3 "Dispatcher", §4.1.

mod support;

use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};
use std::time::Duration;

use voyage::{Body, Client};

#[tokio::test]
async fn per_host_cap_serializes_requests_to_the_same_host() {
    let in_flight = Arc::new(AtomicUsize::new(0));
    let max_in_flight = Arc::new(AtomicUsize::new(0));

    let in_flight_handler = in_flight.clone();
    let max_in_flight_handler = max_in_flight.clone();
    let server = support::server::http(move |_req| {
        let in_flight = in_flight_handler.clone();
        let max_in_flight = max_in_flight_handler.clone();
        async move {
            let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            max_in_flight.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(50)).await;
            in_flight.fetch_sub(1, Ordering::SeqCst);
            http::Response::builder().status(200).body(Body::from("ok")).unwrap()
        }
    });

    let client = Client::builder().max_requests_per_host(1).build().unwrap();
    let uri = format!("http://{}/", server.addr());

    let mut handles = Vec::new();
    for _ in 0..4 {
        let client = client.clone();
        let uri = uri.clone();
        handles.push(tokio::spawn(
            async move { client.get(&uri).send().await.unwrap().status() },
        ));
    }
    for handle in handles {
        assert_eq!(handle.await.unwrap(), 200);
    }

    // With a per-host cap of 1 the handler never observed more than one
    // concurrent request, even though four were issued at once.
    assert_eq!(max_in_flight.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn distinct_hosts_are_not_throttled_by_each_other() {
    let a_count = Arc::new(AtomicUsize::new(0));
    let a_count_handler = a_count.clone();
    let server_a = support::server::http(move |_req| {
        let count = a_count_handler.clone();
        async move {
            count.fetch_add(1, Ordering::SeqCst);
            http::Response::builder().status(200).body(Body::from("a")).unwrap()
        }
    });

    let b_count = Arc::new(AtomicUsize::new(0));
    let b_count_handler = b_count.clone();
    let server_b = support::server::http(move |_req| {
        let count = b_count_handler.clone();
        async move {
            count.fetch_add(1, Ordering::SeqCst);
            http::Response::builder().status(200).body(Body::from("b")).unwrap()
        }
    });

    let client = Client::builder().max_requests_per_host(1).build().unwrap();
    let a = client.get(format!("http://{}/", server_a.addr())).send();
    let b = client.get(format!("http://{}/", server_b.addr())).send();
    let (a, b) = tokio::join!(a, b);
    assert_eq!(a.unwrap().status(), 200);
    assert_eq!(b.unwrap().status(), 200);
    assert_eq!(a_count.load(Ordering::SeqCst), 1);
    assert_eq!(b_count.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn global_cap_queues_calls_past_the_limit() {
    let completed = Arc::new(AtomicUsize::new(0));
    let completed_handler = completed.clone();
    let server = support::server::http(move |_req| {
        let completed = completed_handler.clone();
        async move {
            completed.fetch_add(1, Ordering::SeqCst);
            http::Response::builder().status(200).body(Body::from("ok")).unwrap()
        }
    });

    let client = Client::builder().max_requests(2).max_requests_per_host(2).build().unwrap();
    let uri = format!("http://{}/", server.addr());

    let mut handles = Vec::new();
    for _ in 0..6 {
        let client = client.clone();
        let uri = uri.clone();
        handles.push(tokio::spawn(
            async move { client.get(&uri).send().await.unwrap().status() },
        ));
    }
    for handle in handles {
        assert_eq!(handle.await.unwrap(), 200);
    }
    assert_eq!(completed.load(Ordering::SeqCst), 6);
}
