//! Feed session state machine tests.
//!
//! Runs the real client task against a scripted connector with a paused
//! clock, so backoff and heartbeat timing are exact.

mod common;

use common::{drain, next_event, next_state, test_config, ScriptedConnector};
use quotewire_feed::{CloseReason, ConnectionState, FeedError, FeedEvent, MarketFeedClient};
use quotewire_ws::SocketState;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tokio_test::{assert_err, assert_ok};

const PONG: &str = r#"{"type":"pong"}"#;
const MARKER: &str = "marker";

fn client_with(connector: &ScriptedConnector, max_retries: u32) -> MarketFeedClient {
    MarketFeedClient::with_connector(test_config(max_retries), Arc::new(connector.clone())).unwrap()
}

/// Connect and accept the first socket.
async fn open_session(
    connector: &ScriptedConnector,
    client: &MarketFeedClient,
    events: &mut tokio::sync::broadcast::Receiver<FeedEvent>,
) {
    assert_ok!(client.connect());
    assert_eq!(next_state(events).await, (ConnectionState::Connecting, 0));
    connector.accept(0);
    assert_eq!(next_state(events).await, (ConnectionState::Open, 0));
}

async fn expect_marker(events: &mut tokio::sync::broadcast::Receiver<FeedEvent>) {
    assert_eq!(
        next_event(events).await,
        FeedEvent::RawMessage(MARKER.to_string())
    );
}

#[tokio::test(start_paused = true)]
async fn test_consecutive_failures_back_off_then_recover() {
    let connector = ScriptedConnector::new();
    let client = client_with(&connector, 5);
    let mut events = client.subscribe();
    open_session(&connector, &client, &mut events).await;

    connector.drop_socket(0, 1006);

    let mut observed = Vec::new();
    // initial * 2^n plus up to 30% jitter, timer resolution is 1ms.
    let bounds = [(500, 651), (1000, 1301), (2000, 2601)];
    for (n, (min_ms, max_ms)) in bounds.into_iter().enumerate() {
        let (state, retry_count) = next_state(&mut events).await;
        assert_eq!(state, ConnectionState::Reconnecting);
        observed.push(retry_count);
        let scheduled_at = Instant::now();

        assert_eq!(
            next_state(&mut events).await,
            (ConnectionState::Connecting, retry_count)
        );
        let waited = Instant::now().duration_since(scheduled_at);
        assert!(
            waited >= Duration::from_millis(min_ms) && waited <= Duration::from_millis(max_ms),
            "retry {} waited {waited:?}",
            n + 1
        );

        if n < 2 {
            connector.fail(n + 1);
        }
    }
    assert_eq!(observed, vec![1, 2, 3]);

    connector.accept(3);
    assert_eq!(next_state(&mut events).await, (ConnectionState::Open, 0));
    assert_eq!(connector.attempts(), 4);

    let status = client.current_status();
    assert_eq!(status.retry_count, 0);
    assert!(!status.reconnecting);
    assert_eq!(status.connection_attempts, 4);

    // Heartbeat runs on the recovered socket.
    sleep(Duration::from_millis(5001)).await;
    assert_eq!(connector.sent(3), vec!["ping".to_string()]);
    sleep(Duration::from_millis(9)).await;
    connector.push(3, PONG);
    assert_eq!(
        next_event(&mut events).await,
        FeedEvent::LatencyChanged { latency_ms: 10 }
    );
}

#[tokio::test(start_paused = true)]
async fn test_zero_retries_makes_single_attempt() {
    let connector = ScriptedConnector::new();
    let client = client_with(&connector, 0);
    let mut events = client.subscribe();

    assert_ok!(client.connect());
    assert_eq!(next_state(&mut events).await, (ConnectionState::Connecting, 0));
    connector.fail(0);

    assert_eq!(
        next_event(&mut events).await,
        FeedEvent::TransportError("connection refused".to_string())
    );
    assert_eq!(
        next_state(&mut events).await,
        (
            ConnectionState::Closed(CloseReason::RetriesExhausted { attempts: 0 }),
            0
        )
    );

    sleep(Duration::from_secs(120)).await;
    assert_eq!(connector.attempts(), 1);
    assert!(drain(&mut events).is_empty());

    let status = client.current_status();
    assert!(status.is_retries_exhausted());
    assert!(!status.reconnecting);
    assert!(client.is_running());
}

#[tokio::test(start_paused = true)]
async fn test_manual_connect_after_retries_exhausted() {
    let connector = ScriptedConnector::new();
    let client = client_with(&connector, 1);
    let mut events = client.subscribe();

    assert_ok!(client.connect());
    assert_eq!(next_state(&mut events).await, (ConnectionState::Connecting, 0));
    connector.fail(0);
    assert_eq!(next_state(&mut events).await, (ConnectionState::Reconnecting, 1));
    assert_eq!(next_state(&mut events).await, (ConnectionState::Connecting, 1));
    connector.fail(1);
    assert_eq!(
        next_state(&mut events).await,
        (
            ConnectionState::Closed(CloseReason::RetriesExhausted { attempts: 1 }),
            1
        )
    );

    // Fresh cycle with the retry count reset.
    assert_ok!(client.connect());
    assert_eq!(next_state(&mut events).await, (ConnectionState::Connecting, 0));
    assert_eq!(connector.attempts(), 3);
    connector.accept(2);
    assert_eq!(next_state(&mut events).await, (ConnectionState::Open, 0));
}

#[tokio::test(start_paused = true)]
async fn test_connect_ignored_while_active() {
    let connector = ScriptedConnector::new();
    let client = client_with(&connector, 5);
    let mut events = client.subscribe();

    assert_ok!(client.connect());
    assert_ok!(client.connect());
    assert_eq!(next_state(&mut events).await, (ConnectionState::Connecting, 0));
    connector.accept(0);
    assert_eq!(next_state(&mut events).await, (ConnectionState::Open, 0));

    assert_ok!(client.connect());
    connector.push(0, MARKER);
    expect_marker(&mut events).await;
    assert_eq!(connector.attempts(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_while_open_stops_heartbeat() {
    let connector = ScriptedConnector::new();
    let client = client_with(&connector, 5);
    let mut events = client.subscribe();
    open_session(&connector, &client, &mut events).await;

    client.disconnect().await;
    assert_eq!(
        next_state(&mut events).await,
        (ConnectionState::Closed(CloseReason::Disconnected), 0)
    );
    assert_eq!(connector.socket_state(0), SocketState::Closed);

    // Late frames from the old socket go nowhere.
    connector.push(0, r#"{"AAPL": 189.23}"#);
    sleep(Duration::from_secs(30)).await;

    assert!(connector.sent(0).is_empty());
    assert!(drain(&mut events).is_empty());
    assert!(client.prices().snapshot().is_empty());
    assert_eq!(connector.attempts(), 1);
    assert!(!client.is_running());
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_while_reconnecting_cancels_timer() {
    let connector = ScriptedConnector::new();
    let client = client_with(&connector, 5);
    let mut events = client.subscribe();
    open_session(&connector, &client, &mut events).await;

    connector.drop_socket(0, 1006);
    assert_eq!(next_state(&mut events).await, (ConnectionState::Reconnecting, 1));

    client.disconnect().await;
    let (state, _) = next_state(&mut events).await;
    assert_eq!(state, ConnectionState::Closed(CloseReason::Disconnected));
    assert!(!client.current_status().reconnecting);

    sleep(Duration::from_secs(60)).await;
    assert_eq!(connector.attempts(), 1);
    assert!(drain(&mut events).is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_while_connecting_drops_attempt() {
    let connector = ScriptedConnector::new();
    let client = client_with(&connector, 5);
    let mut events = client.subscribe();

    assert_ok!(client.connect());
    assert_eq!(next_state(&mut events).await, (ConnectionState::Connecting, 0));

    client.disconnect().await;
    assert_eq!(
        next_state(&mut events).await,
        (ConnectionState::Closed(CloseReason::Disconnected), 0)
    );
    assert_eq!(connector.socket_state(0), SocketState::Closed);

    // Handshake completing after disconnect changes nothing.
    connector.accept(0);
    sleep(Duration::from_secs(30)).await;
    assert!(drain(&mut events).is_empty());
    assert_eq!(connector.attempts(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_from_idle() {
    let connector = ScriptedConnector::new();
    let client = client_with(&connector, 5);
    let mut events = client.subscribe();

    client.disconnect().await;
    assert_eq!(
        next_state(&mut events).await,
        (ConnectionState::Closed(CloseReason::Disconnected), 0)
    );
    client.disconnect().await;

    sleep(Duration::from_secs(10)).await;
    assert_eq!(connector.attempts(), 0);
    assert!(drain(&mut events).is_empty());
    assert!(matches!(client.connect(), Err(FeedError::SessionClosed)));
}

#[tokio::test(start_paused = true)]
async fn test_dropping_last_handle_closes_session() {
    let connector = ScriptedConnector::new();
    let client = client_with(&connector, 5);
    let mut events = client.subscribe();
    open_session(&connector, &client, &mut events).await;

    let other = client.clone();
    drop(client);
    connector.push(0, MARKER);
    expect_marker(&mut events).await;
    assert!(other.is_running());

    drop(other);
    assert_eq!(
        next_state(&mut events).await,
        (ConnectionState::Closed(CloseReason::Disconnected), 0)
    );
    assert!(events.recv().await.is_err());
    assert_eq!(connector.socket_state(0), SocketState::Closed);
}

#[tokio::test(start_paused = true)]
async fn test_pong_is_never_a_price_update() {
    let connector = ScriptedConnector::new();
    let client = client_with(&connector, 5);
    let mut events = client.subscribe();
    open_session(&connector, &client, &mut events).await;

    // Unsolicited pong: no latency sample, nothing forwarded.
    connector.push(0, PONG);
    connector.push(0, MARKER);
    expect_marker(&mut events).await;

    sleep(Duration::from_millis(5001)).await;
    assert_eq!(connector.sent(0), vec!["ping".to_string()]);
    assert!(client.current_status().probe_pending);

    sleep(Duration::from_millis(19)).await;
    connector.push(0, PONG);
    assert_eq!(
        next_event(&mut events).await,
        FeedEvent::LatencyChanged { latency_ms: 20 }
    );

    let status = client.current_status();
    assert_eq!(status.last_latency_ms, Some(20));
    assert!(status.last_pong_at.is_some());
    assert!(!status.probe_pending);
    assert!(client.prices().snapshot().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_unanswered_probe_is_replaced() {
    let connector = ScriptedConnector::new();
    let client = client_with(&connector, 5);
    let mut events = client.subscribe();
    open_session(&connector, &client, &mut events).await;

    sleep(Duration::from_millis(10_001)).await;
    assert_eq!(connector.sent(0).len(), 2);

    sleep(Duration::from_millis(29)).await;
    connector.push(0, PONG);
    // The late reply for the first probe has nothing left to match.
    connector.push(0, PONG);
    connector.push(0, MARKER);

    assert_eq!(
        next_event(&mut events).await,
        FeedEvent::LatencyChanged { latency_ms: 30 }
    );
    expect_marker(&mut events).await;
    assert_eq!(client.current_status().abandoned_probes, 1);
}

#[tokio::test(start_paused = true)]
async fn test_price_frames_merge_into_snapshot() {
    let connector = ScriptedConnector::new();
    let client = client_with(&connector, 5);
    let mut events = client.subscribe();
    open_session(&connector, &client, &mut events).await;
    let store = client.prices();

    connector.push(0, r#"{"AAPL": 189.23}"#);
    match next_event(&mut events).await {
        FeedEvent::PriceUpdated(update) => {
            assert_eq!(update.len(), 1);
            assert_eq!(update.get("AAPL"), Some(189.23));
        }
        other => panic!("expected price update, got {other:?}"),
    }

    connector.push(0, r#"{"GOOG": 141.05}"#);
    match next_event(&mut events).await {
        FeedEvent::PriceUpdated(update) => {
            assert_eq!(update.len(), 1);
            assert_eq!(update.get("GOOG"), Some(141.05));
        }
        other => panic!("expected price update, got {other:?}"),
    }

    let snapshot = store.snapshot();
    assert_eq!(snapshot.get("AAPL"), Some(189.23));
    assert_eq!(snapshot.get("GOOG"), Some(141.05));
    assert!(snapshot.last_updated().is_some());

    // An empty object changes nothing and is not announced.
    connector.push(0, "{}");
    connector.push(0, MARKER);
    expect_marker(&mut events).await;
    assert_eq!(store.snapshot().version(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_multi_instrument_frame_is_one_update() {
    let connector = ScriptedConnector::new();
    let client = client_with(&connector, 5);
    let mut events = client.subscribe();
    open_session(&connector, &client, &mut events).await;

    connector.push(
        0,
        r#"{"AAPL": 189.23, "TSLA": 251.4, "GOOG": 141.05, "AMZN": 178.9}"#,
    );
    match next_event(&mut events).await {
        FeedEvent::PriceUpdated(update) => assert_eq!(update.len(), 4),
        other => panic!("expected price update, got {other:?}"),
    }
    assert_eq!(client.prices().snapshot().len(), 4);
}

#[tokio::test(start_paused = true)]
async fn test_unrecognized_frames_forwarded_raw() {
    let connector = ScriptedConnector::new();
    let client = client_with(&connector, 5);
    let mut events = client.subscribe();
    open_session(&connector, &client, &mut events).await;

    for frame in ["hello", r#"{"AAPL": "n/a"}"#, "[1, 2, 3]", r#"{"type":"ack"}"#] {
        connector.push(0, frame);
        assert_eq!(
            next_event(&mut events).await,
            FeedEvent::RawMessage(frame.to_string())
        );
    }
    assert!(client.prices().snapshot().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_send_requires_open_socket() {
    let connector = ScriptedConnector::new();
    let client = client_with(&connector, 5);
    let mut events = client.subscribe();

    assert!(matches!(
        client.send("subscribe:AAPL").await,
        Err(FeedError::SendWhileNotOpen)
    ));

    open_session(&connector, &client, &mut events).await;
    assert_ok!(client.send("subscribe:AAPL").await);
    assert_eq!(connector.sent(0), vec!["subscribe:AAPL".to_string()]);

    connector.drop_socket(0, 1001);
    assert_eq!(next_state(&mut events).await, (ConnectionState::Reconnecting, 1));
    assert_err!(client.send("subscribe:TSLA").await);
}

#[tokio::test(start_paused = true)]
async fn test_events_from_superseded_socket_ignored() {
    let connector = ScriptedConnector::new();
    let client = client_with(&connector, 5);
    let mut events = client.subscribe();
    open_session(&connector, &client, &mut events).await;

    connector.drop_socket(0, 1006);
    assert_eq!(next_state(&mut events).await, (ConnectionState::Reconnecting, 1));
    connector.push(0, r#"{"STALE": 1.0}"#);
    assert_eq!(next_state(&mut events).await, (ConnectionState::Connecting, 1));
    assert_ne!(connector.conn_id(0), connector.conn_id(1));

    connector.accept(1);
    assert_eq!(next_state(&mut events).await, (ConnectionState::Open, 0));

    connector.push(0, r#"{"STALE": 2.0}"#);
    connector.drop_socket(0, 1006);
    connector.push(1, r#"{"AAPL": 189.23}"#);
    match next_event(&mut events).await {
        FeedEvent::PriceUpdated(update) => assert_eq!(update.get("AAPL"), Some(189.23)),
        other => panic!("expected price update, got {other:?}"),
    }
    assert!(!client.prices().snapshot().contains("STALE"));
    assert!(client.current_status().state.is_open());
}

#[tokio::test(start_paused = true)]
async fn test_transport_error_while_open_is_not_fatal() {
    let connector = ScriptedConnector::new();
    let client = client_with(&connector, 5);
    let mut events = client.subscribe();
    open_session(&connector, &client, &mut events).await;

    connector.error(0, "connection reset");
    assert_eq!(
        next_event(&mut events).await,
        FeedEvent::TransportError("connection reset".to_string())
    );

    let status = client.current_status();
    assert!(status.state.is_open());
    assert_eq!(status.last_transport_error.as_deref(), Some("connection reset"));
    assert_eq!(connector.attempts(), 1);

    // The close that follows is what triggers reconnection.
    connector.drop_socket(0, 1006);
    assert_eq!(next_state(&mut events).await, (ConnectionState::Reconnecting, 1));
}
