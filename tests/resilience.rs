//! Resilience tests
//!
//! Behavior under failure conditions:
//! - Connection drops while subscriptions are live
//! - Refused connection attempts and backoff growth
//! - Exhausted retry budget
//! - Rapid connect/disconnect cycles

use classcast::backoff::Backoff;
use classcast::testing::{MockServer, MockTransport, RemoteCall};
use classcast::{ConnectionState, InboundMessage, RealtimeClient, RealtimeConfig};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

const WAIT: Duration = Duration::from_secs(3);

fn client_with(config: RealtimeConfig) -> (RealtimeClient, MockServer) {
    let (transport, server) = MockTransport::pair();
    (RealtimeClient::new(config, Box::new(transport)), server)
}

fn fast() -> RealtimeConfig {
    RealtimeConfig::socket("ws://mock")
        .reconnect_delay(Duration::from_millis(5), Duration::from_millis(50))
}

async fn eventually(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(WAIT, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

fn counter() -> (Arc<AtomicUsize>, impl Fn(&InboundMessage) + Send + Sync) {
    let hits = Arc::new(AtomicUsize::new(0));
    let h = hits.clone();
    (hits, move |_: &InboundMessage| {
        h.fetch_add(1, Ordering::SeqCst);
    })
}

/// Both subscriptions keep receiving after a drop without being re-registered
#[tokio::test]
async fn test_subscriptions_survive_reconnect() {
    let (client, server) = client_with(fast());
    let (public_hits, on_public) = counter();
    let (board_hits, on_board) = counter();
    client.subscribe("public", on_public).unwrap();
    client.on_type("leaderboard", "rank-change", on_board).unwrap();

    client.connect().await.unwrap();
    client.wait_for_state(ConnectionState::Connected, WAIT).await.unwrap();

    server.drop_connection();
    eventually(|| server.opens() == 2).await;
    client.wait_for_state(ConnectionState::Connected, WAIT).await.unwrap();

    server.send_message("public", "class-online", json!({}));
    server.send_message("leaderboard", "rank-change", json!({"newRank": 2}));
    eventually(|| public_hits.load(Ordering::SeqCst) == 1 && board_hits.load(Ordering::SeqCst) == 1)
        .await;

    // One subscribe per channel per physical connection
    let subscribes = server
        .calls()
        .into_iter()
        .filter(|c| matches!(c, RemoteCall::Subscribe(_)))
        .count();
    assert_eq!(subscribes, 4);
    assert_eq!(client.status().socket_id.as_deref(), Some("mock.2"));

    client.disconnect().await.unwrap();
}

#[tokio::test]
async fn test_no_duplicate_delivery_after_reconnect() {
    let (client, server) = client_with(fast());
    let (hits, on_message) = counter();
    client.subscribe("public", on_message).unwrap();

    client.connect().await.unwrap();
    client.wait_for_state(ConnectionState::Connected, WAIT).await.unwrap();

    for _ in 0..3 {
        let opens = server.opens();
        server.fail("connection reset by peer");
        eventually(|| server.opens() == opens + 1).await;
        client.wait_for_state(ConnectionState::Connected, WAIT).await.unwrap();
    }

    server.send_message("public", "class-online", json!({}));
    eventually(|| hits.load(Ordering::SeqCst) >= 1).await;
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert_eq!(hits.load(Ordering::SeqCst), 1);
    assert_eq!(server.remote_channels().len(), 1);

    client.disconnect().await.unwrap();
}

#[tokio::test]
async fn test_recovers_after_refused_attempts() {
    let (client, server) = client_with(fast().max_reconnect_attempts(Some(10)));
    server.fail_next_opens(3);

    client.connect().await.unwrap();
    client.wait_for_state(ConnectionState::Connected, WAIT).await.unwrap();

    assert_eq!(server.opens(), 1);
    let status = client.status();
    assert!(status.connected);
    assert!(status.error.is_none());

    client.disconnect().await.unwrap();
}

#[tokio::test]
async fn test_exhausted_retries_settle_disconnected() {
    let (client, server) = client_with(fast().max_reconnect_attempts(Some(3)));
    client.subscribe("public", |_: &InboundMessage| {}).unwrap();
    server.fail_next_opens(usize::MAX);

    client.connect().await.unwrap();
    client.wait_for_state(ConnectionState::Disconnected, WAIT).await.unwrap();

    let status = client.status();
    assert!(!status.connected);
    assert!(status.error.unwrap().contains("refused"));

    // Stays down until the caller asks again
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(client.state(), ConnectionState::Disconnected);

    server.fail_next_opens(0);
    client.connect().await.unwrap();
    client.wait_for_state(ConnectionState::Connected, WAIT).await.unwrap();
    assert_eq!(server.remote_channels().len(), 1);

    client.disconnect().await.unwrap();
}

#[tokio::test]
async fn test_rapid_connect_disconnect_cycles() {
    let (client, server) = client_with(fast());
    client.subscribe("public", |_: &InboundMessage| {}).unwrap();

    for _ in 0..20 {
        client.connect().await.unwrap();
        client.disconnect().await.unwrap();
        assert_eq!(client.state(), ConnectionState::Disconnected);
    }

    assert!(!server.is_open());

    client.connect().await.unwrap();
    client.wait_for_state(ConnectionState::Connected, WAIT).await.unwrap();
    assert!(server.is_open());
    client.disconnect().await.unwrap();
    assert!(!server.is_open());
}

#[test]
fn test_backoff_is_monotonic_and_resets() {
    let mut backoff = Backoff::new(Duration::from_millis(100), Duration::from_secs(5), 2.0);

    let delays: Vec<Duration> = (0..10).filter_map(|_| backoff.next_delay()).collect();
    assert_eq!(delays.len(), 10);
    for pair in delays.windows(2) {
        assert!(pair[1] >= pair[0]);
    }
    assert_eq!(delays[0], Duration::from_millis(100));
    assert_eq!(*delays.last().unwrap(), Duration::from_secs(5));

    backoff.reset();
    assert_eq!(backoff.next_delay(), Some(Duration::from_millis(100)));
}
