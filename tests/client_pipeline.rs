//! End-to-end tests of the monitor client over the mock transport: the
//! heartbeat round trip, latency statistics, $SYS dispatch, and connection
//! lifecycle behavior.

use moqmon::client::{spawn_client, ConnectionState, DispatchResult};
use moqmon::config::{
    Properties, PROP_HEARTBEAT_INTERVAL, PROP_HOST, PROP_MESSAGE_SIZE, PROP_PORT,
};
use moqmon::testing::MockTransport;
use moqmon::transport::TransportEvent;
use serde_json::Value;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::timeout;

const CLIENT_ID: &str = "pipeline-tester";

fn test_properties(heartbeat_secs: u64) -> Properties {
    let mut props = Properties::new();
    props.set(PROP_HOST, "0.0.0.0");
    props.set(PROP_PORT, "1883");
    props.set(PROP_MESSAGE_SIZE, "8092");
    props.set(PROP_HEARTBEAT_INTERVAL, heartbeat_secs.to_string());
    props
}

async fn wait_for_state(rx: &mut watch::Receiver<ConnectionState>, wanted: ConnectionState) {
    let reached = timeout(Duration::from_secs(30), async {
        while *rx.borrow_and_update() != wanted {
            rx.changed().await.expect("state channel closed");
        }
    })
    .await;
    assert!(reached.is_ok(), "never reached state {wanted:?}");
}

async fn next_results(rx: &mut mpsc::UnboundedReceiver<Vec<DispatchResult>>) -> Vec<DispatchResult> {
    timeout(Duration::from_secs(30), rx.recv())
        .await
        .expect("timed out waiting for dispatch results")
        .expect("observer channel closed")
}

#[tokio::test(start_paused = true)]
async fn heartbeat_round_trip_produces_latency_and_statistics() {
    let (transport, events) = MockTransport::with_echo();
    let handle = transport.handle();
    let (observer_tx, mut observer_rx) = mpsc::unbounded_channel();

    let (client, _join) = spawn_client(
        transport,
        events,
        test_properties(5),
        CLIENT_ID.to_string(),
        Some(observer_tx),
    )
    .unwrap();

    let mut state_rx = client.state_receiver();
    client.connect();
    wait_for_state(&mut state_rx, ConnectionState::Connected).await;

    // Heartbeat comes back through the echo and yields a latency result
    let results = next_results(&mut observer_rx).await;
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].pattern, "heartbeat");
    assert_eq!(results[0].values["sender"], CLIENT_ID);
    assert!(results[0].values.contains_key("latency"));

    // The published latency message comes back and yields statistics
    let results = next_results(&mut observer_rx).await;
    assert_eq!(results[0].pattern, "latency");
    assert_eq!(results[0].values["number"], 1);
    assert!(results[0].values.contains_key("mean"));

    let subscriptions = handle.subscriptions();
    assert_eq!(
        subscriptions,
        vec![
            "$SYS/#".to_string(),
            "moquette/heartbeat".to_string(),
            "moquette/latency".to_string()
        ]
    );

    let published = handle.published();
    let topics: Vec<&str> = published.iter().map(|(t, ..)| t.as_str()).collect();
    assert!(topics.contains(&"moquette/heartbeat"));
    assert!(topics.contains(&"moquette/latency"));
    assert!(topics.contains(&"moquette/latencystatistics"));

    let (_, payload, qos, retained) = &published[0];
    let beat: Value = serde_json::from_slice(payload).unwrap();
    assert_eq!(beat["source"], CLIENT_ID);
    assert_eq!(beat["number"], 0);
    assert_eq!(beat["interval"], 5000);
    assert_eq!(*qos, 1);
    assert!(!retained);
}

#[tokio::test(start_paused = true)]
async fn heartbeat_chain_continues_across_intervals() {
    let (transport, events) = MockTransport::with_echo();
    let (observer_tx, mut observer_rx) = mpsc::unbounded_channel();

    let (client, _join) = spawn_client(
        transport,
        events,
        test_properties(5),
        CLIENT_ID.to_string(),
        Some(observer_tx),
    )
    .unwrap();

    let mut state_rx = client.state_receiver();
    client.connect();
    wait_for_state(&mut state_rx, ConnectionState::Connected).await;

    // Two full cycles: each heartbeat receipt yields a latency result, each
    // latency receipt yields statistics with a growing sample count.
    let mut counts = Vec::new();
    for _ in 0..2 {
        let heartbeat = next_results(&mut observer_rx).await;
        assert_eq!(heartbeat[0].pattern, "heartbeat");
        let stats = next_results(&mut observer_rx).await;
        assert_eq!(stats[0].pattern, "latency");
        counts.push(stats[0].values["number"].as_u64().unwrap());
    }
    assert_eq!(counts, vec![1, 2]);
}

#[tokio::test(start_paused = true)]
async fn sys_message_surfaces_broker_diagnostic() {
    let (transport, events) = MockTransport::new();
    let handle = transport.handle();
    let (observer_tx, mut observer_rx) = mpsc::unbounded_channel();

    let (client, _join) = spawn_client(
        transport,
        events,
        test_properties(0),
        CLIENT_ID.to_string(),
        Some(observer_tx),
    )
    .unwrap();

    let mut state_rx = client.state_receiver();
    client.connect();
    wait_for_state(&mut state_rx, ConnectionState::Connected).await;

    handle.inject(TransportEvent::MessageArrived {
        topic: "$SYS/broker/uptime".to_string(),
        payload: b"17".to_vec(),
    });

    let results = next_results(&mut observer_rx).await;
    assert_eq!(results[0].pattern, "$SYS/#");
    assert_eq!(results[0].topic, "$SYS/broker/uptime");
    assert_eq!(results[0].values["value"], 17);
}

#[tokio::test(start_paused = true)]
async fn disconnect_stops_heartbeat_chain() {
    let (transport, events) = MockTransport::with_echo();
    let handle = transport.handle();
    let (observer_tx, mut observer_rx) = mpsc::unbounded_channel();

    let (client, _join) = spawn_client(
        transport,
        events,
        test_properties(5),
        CLIENT_ID.to_string(),
        Some(observer_tx),
    )
    .unwrap();

    let mut state_rx = client.state_receiver();
    client.connect();
    wait_for_state(&mut state_rx, ConnectionState::Connected).await;

    // Let the first round trip complete so a timer is pending
    let _ = next_results(&mut observer_rx).await;
    let _ = next_results(&mut observer_rx).await;

    client.disconnect();
    wait_for_state(&mut state_rx, ConnectionState::Disconnected).await;

    handle.clear_published();
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert!(
        handle.published().is_empty(),
        "no heartbeat may fire after disconnect"
    );
}

#[tokio::test(start_paused = true)]
async fn failed_connect_reports_connect_failed() {
    let (transport, events) = MockTransport::new();
    let handle = transport.handle();
    handle.set_fail_connect(true);

    let (client, _join) = spawn_client(
        transport,
        events,
        test_properties(0),
        CLIENT_ID.to_string(),
        None,
    )
    .unwrap();

    let mut state_rx = client.state_receiver();
    client.connect();
    wait_for_state(&mut state_rx, ConnectionState::ConnectFailed).await;
}

#[tokio::test(start_paused = true)]
async fn lost_connection_reports_connection_lost() {
    let (transport, events) = MockTransport::new();
    let handle = transport.handle();

    let (client, _join) = spawn_client(
        transport,
        events,
        test_properties(0),
        CLIENT_ID.to_string(),
        None,
    )
    .unwrap();

    let mut state_rx = client.state_receiver();
    client.connect();
    wait_for_state(&mut state_rx, ConnectionState::Connected).await;

    handle.inject(TransportEvent::ConnectionLost("broker gone".to_string()));
    wait_for_state(&mut state_rx, ConnectionState::ConnectionLost).await;
}

#[tokio::test(start_paused = true)]
async fn failed_disconnect_reports_disconnect_failed() {
    let (transport, events) = MockTransport::new();
    let handle = transport.handle();

    let (client, _join) = spawn_client(
        transport,
        events,
        test_properties(0),
        CLIENT_ID.to_string(),
        None,
    )
    .unwrap();

    let mut state_rx = client.state_receiver();
    client.connect();
    wait_for_state(&mut state_rx, ConnectionState::Connected).await;

    handle.set_fail_disconnect(true);
    client.disconnect();
    wait_for_state(&mut state_rx, ConnectionState::DisconnectFailed).await;
}
