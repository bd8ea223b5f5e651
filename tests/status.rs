//! Status endpoint and poller

use axum::body::Body;
use axum::http::{Request, StatusCode};
use classcast::status::{fetch_status, router, serve_status};
use classcast::testing::{MockServer, MockTransport};
use classcast::{
    ConnectionState, InboundMessage, RealtimeClient, RealtimeConfig, StatusPoller, StatusSnapshot,
};
use std::time::Duration;
use tower::ServiceExt;

const WAIT: Duration = Duration::from_secs(3);

async fn connected_client() -> (RealtimeClient, MockServer) {
    let (transport, server) = MockTransport::pair();
    let config = RealtimeConfig::socket("ws://mock").primary_channel("public");
    let client = RealtimeClient::new(config, Box::new(transport));
    client.subscribe("leaderboard", |_: &InboundMessage| {}).unwrap();
    client.subscribe("public", |_: &InboundMessage| {}).unwrap();
    client.connect().await.unwrap();
    client
        .wait_for_state(ConnectionState::Connected, WAIT)
        .await
        .unwrap();
    (client, server)
}

#[tokio::test]
async fn test_status_route_returns_snapshot() {
    let (client, _server) = connected_client().await;
    let app = router(client.status_reporter());

    let response = app
        .oneshot(Request::builder().uri("/status").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();

    assert_eq!(json["connected"], true);
    assert_eq!(json["cluster"], "mock");
    assert_eq!(json["channel"], "public");
    assert_eq!(json["socket_id"], "mock.1");
    assert!(json["since"].as_str().unwrap().contains('T'));
    assert!(json.get("error").is_none());

    client.disconnect().await.unwrap();
}

#[tokio::test]
async fn test_health_route() {
    let (client, _server) = connected_client().await;
    let app = router(client.status_reporter());

    let response = app
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    assert_eq!(&body[..], b"ok");

    client.disconnect().await.unwrap();
}

#[tokio::test]
async fn test_fetch_and_poll_over_http() {
    let (client, _server) = connected_client().await;

    // Reserve a free port for the status server
    let probe = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = probe.local_addr().unwrap();
    drop(probe);

    let reporter = client.status_reporter();
    let server = tokio::spawn(async move { serve_status(addr, reporter).await });
    let url = format!("http://{}/status", addr);

    let http = reqwest::Client::new();
    let snapshot = tokio::time::timeout(WAIT, async {
        loop {
            let snapshot = fetch_status(&http, &url).await;
            if snapshot.connected {
                return snapshot;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
    assert_eq!(snapshot, client.status());

    let poller = StatusPoller::spawn(url, Duration::from_millis(20));
    let mut rx = poller.receiver();
    tokio::time::timeout(WAIT, rx.wait_for(|s| s.connected))
        .await
        .unwrap()
        .unwrap();

    client.disconnect().await.unwrap();
    tokio::time::timeout(WAIT, rx.wait_for(|s| !s.connected))
        .await
        .unwrap()
        .unwrap();
    assert!(!poller.latest().connected);

    server.abort();
}

#[tokio::test]
async fn test_poller_reports_unreachable_endpoint() {
    let poller = StatusPoller::spawn("http://127.0.0.1:1/status", Duration::from_millis(20));
    let mut rx = poller.receiver();

    let snapshot = tokio::time::timeout(WAIT, rx.wait_for(|s| s.error.is_some()))
        .await
        .unwrap()
        .unwrap()
        .clone();

    assert_eq!(
        snapshot,
        StatusSnapshot {
            connected: false,
            error: snapshot.error.clone(),
            ..Default::default()
        }
    );
}
