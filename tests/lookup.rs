//! Single-node lookups: coalesced fills, cached hits and request deadlines

use bytes::Bytes;
use meshcache::{Config, Error, FillError, Filled, GroupRegistry, Node, NodeHandle};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

async fn start_single(groups: Arc<GroupRegistry>, request_timeout_ms: u64) -> NodeHandle {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let config = Config {
        node_name: addr.to_string(),
        http_addr: addr,
        gossip_addr: "127.0.0.1:0".parse().unwrap(),
        peer_url_template: "http://{name}".to_string(),
        request_timeout_ms,
        ..Config::default()
    };

    Node::new(config, groups).start_on(listener).await.unwrap()
}

/// Getter that counts invocations and takes `delay` to produce a value
fn slow_counting(fills: Arc<AtomicUsize>, delay: Duration) -> impl meshcache::cache::Getter {
    move |key: String| {
        let fills = fills.clone();
        async move {
            fills.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(delay).await;
            Ok::<_, FillError>(Filled::new(format!("value-{}", key), None))
        }
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_owner_fills_once_then_hits() {
    let fills = Arc::new(AtomicUsize::new(0));
    let groups = Arc::new(GroupRegistry::new());
    let group = groups
        .register("users", 1 << 20, slow_counting(fills.clone(), Duration::from_millis(100)))
        .unwrap();
    let node = start_single(groups, 5_000).await;
    assert_eq!(node.router().peer_count(), 1);

    let lookups: Vec<_> = (0..16)
        .map(|_| {
            let coordinator = node.coordinator().clone();
            tokio::spawn(async move { coordinator.lookup("users", "7").await })
        })
        .collect();

    for lookup in lookups {
        assert_eq!(lookup.await.unwrap().unwrap(), Bytes::from("value-7"));
    }
    assert_eq!(fills.load(Ordering::SeqCst), 1);

    assert_eq!(
        node.coordinator().lookup("users", "7").await.unwrap(),
        Bytes::from("value-7")
    );
    assert_eq!(fills.load(Ordering::SeqCst), 1, "second lookup is a hit");
    assert!(group.stats().hits >= 1);

    node.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_deadline_does_not_cancel_fill() {
    let fills = Arc::new(AtomicUsize::new(0));
    let groups = Arc::new(GroupRegistry::new());
    groups
        .register("slow", 1 << 20, slow_counting(fills.clone(), Duration::from_millis(400)))
        .unwrap();
    let node = start_single(groups, 100).await;

    let result = node.coordinator().lookup("slow", "k").await;
    assert!(matches!(result, Err(Error::Timeout(_))), "{:?}", result);

    tokio::time::sleep(Duration::from_millis(600)).await;

    assert_eq!(
        node.coordinator().lookup("slow", "k").await.unwrap(),
        Bytes::from("value-k")
    );
    assert_eq!(fills.load(Ordering::SeqCst), 1);

    node.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_http_status_codes() {
    let groups = Arc::new(GroupRegistry::new());
    groups
        .register("echo", 1024, |key: String| async move {
            Ok::<_, FillError>(Filled::new(key, None))
        })
        .unwrap();
    let node = start_single(groups, 1_000).await;
    let base = format!("http://{}", node.http_addr());

    let response = reqwest::get(format!("{}/_cache/echo/a%20b", base)).await.unwrap();
    assert_eq!(response.status().as_u16(), 200);
    assert_eq!(
        response.headers()["content-type"],
        "application/octet-stream"
    );
    assert_eq!(response.bytes().await.unwrap(), Bytes::from("a b"));

    let missing = reqwest::get(format!("{}/_cache/nope/1", base)).await.unwrap();
    assert_eq!(missing.status().as_u16(), 404);

    // No users group registered on this node
    let users = reqwest::get(format!("{}/users/1", base)).await.unwrap();
    assert_eq!(users.status().as_u16(), 404);
    assert!(users.headers().contains_key("x-request-id"));

    node.shutdown().await.unwrap();
}
