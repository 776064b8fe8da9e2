//! End-to-end facade scenarios against mock sessions
//!
//! Drive `MqttHandler` through subscribe, delivery, publish and unsubscribe the way an
//! invoking environment would, with the broker replaced by `MockConnector`.

use mqtt_mux::executor::{PAYLOAD_PARAM, TOPIC_PARAM};
use mqtt_mux::testing::{MockConnector, MockSession, RecordingExecutor};
use mqtt_mux::{BrokerKey, ConnectionRegistry, HandlerRef, MqttHandler, MuxError};
use rumqttc::QoS;
use std::sync::Arc;
use std::time::Duration;

const HOST: &str = "broker.example.com";
const PORT: u16 = 8883;
const WAIT: Duration = Duration::from_secs(2);
const QUIET: Duration = Duration::from_millis(100);

struct Harness {
    connector: Arc<MockConnector>,
    executor: Arc<RecordingExecutor>,
    handler: MqttHandler,
}

impl Harness {
    fn new() -> Self {
        let connector = Arc::new(MockConnector::new());
        let executor = Arc::new(RecordingExecutor::new());
        let handler = MqttHandler::new(connector.clone(), executor.clone());
        Self {
            connector,
            executor,
            handler,
        }
    }

    async fn session(&self) -> Arc<MockSession> {
        self.connector
            .session_for(&BrokerKey::new(HOST, PORT).unwrap())
            .await
            .expect("session should exist after first operation")
    }
}

#[tokio::test]
async fn test_delivered_message_invokes_handler_once_with_topic_and_payload() {
    // Arrange
    let harness = Harness::new();
    harness
        .handler
        .subscribe(HOST, PORT, "sensors/temp", HandlerRef::new("H"))
        .await
        .unwrap();

    // Act
    harness.session().await.deliver("sensors/temp", r#"{"t":21.5}"#);

    // Assert
    let calls = harness.executor.wait_for(1, WAIT).await;
    tokio::time::sleep(QUIET).await;
    let calls_after = harness.executor.invocations().await;
    assert_eq!(calls.len(), 1);
    assert_eq!(calls_after.len(), 1);
    assert_eq!(calls[0].handler, HandlerRef::new("H"));
    assert_eq!(calls[0].params[TOPIC_PARAM], "sensors/temp");
    assert_eq!(calls[0].params[PAYLOAD_PARAM], "{\"t\":21.5}");
}

#[tokio::test]
async fn test_publish_sends_exact_bytes_at_exactly_once() {
    let harness = Harness::new();

    harness.handler.publish(HOST, PORT, "cmd/reset", "hello").await.unwrap();

    let published = harness.session().await.published().await;
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].topic, "cmd/reset");
    assert_eq!(published[0].payload, b"hello");
    assert_eq!(published[0].qos, QoS::ExactlyOnce);
}

#[tokio::test]
async fn test_resubscribe_routes_only_to_latest_handler() {
    let harness = Harness::new();
    harness
        .handler
        .subscribe(HOST, PORT, "a/b", HandlerRef::new("H1"))
        .await
        .unwrap();
    harness
        .handler
        .subscribe(HOST, PORT, "a/b", HandlerRef::new("H2"))
        .await
        .unwrap();

    harness.session().await.deliver("a/b", "x");

    let calls = harness.executor.wait_for(1, WAIT).await;
    tokio::time::sleep(QUIET).await;
    assert_eq!(harness.executor.invocations().await.len(), 1);
    assert_eq!(calls[0].handler, HandlerRef::new("H2"));
}

#[tokio::test]
async fn test_unsubscribe_stops_routing_silently() {
    let harness = Harness::new();
    harness
        .handler
        .subscribe(HOST, PORT, "a/b", HandlerRef::new("H"))
        .await
        .unwrap();
    harness.handler.unsubscribe(HOST, PORT, "a/b").await.unwrap();

    let session = harness.session().await;
    session.deliver("a/b", "late");

    tokio::time::sleep(QUIET).await;
    assert!(harness.executor.invocations().await.is_empty());
    assert_eq!(session.unsubscriptions().await, vec!["a/b".to_string()]);
}

#[tokio::test]
async fn test_failing_handler_does_not_block_other_topics() {
    let harness = Harness::new();
    harness.executor.fail_handler("Broken");
    harness
        .handler
        .subscribe(HOST, PORT, "t1", HandlerRef::new("Broken"))
        .await
        .unwrap();
    harness
        .handler
        .subscribe(HOST, PORT, "t2", HandlerRef::new("Healthy"))
        .await
        .unwrap();

    let session = harness.session().await;
    session.deliver("t1", "boom");
    session.deliver("t2", "ok");

    let calls = harness.executor.wait_for(1, WAIT).await;
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].handler, HandlerRef::new("Healthy"));
    assert_eq!(calls[0].params[PAYLOAD_PARAM], "ok");
}

#[tokio::test]
async fn test_panicking_handler_does_not_break_dispatch() {
    let harness = Harness::new();
    harness.executor.panic_handler("Panics");
    harness
        .handler
        .subscribe(HOST, PORT, "t1", HandlerRef::new("Panics"))
        .await
        .unwrap();
    harness
        .handler
        .subscribe(HOST, PORT, "t2", HandlerRef::new("Healthy"))
        .await
        .unwrap();

    let session = harness.session().await;
    session.deliver("t1", "boom");
    session.deliver("t2", "first");
    session.deliver("t2", "second");

    let calls = harness.executor.wait_for(2, WAIT).await;
    assert_eq!(calls.len(), 2);
    assert!(calls.iter().all(|c| c.handler == HandlerRef::new("Healthy")));
}

#[tokio::test]
async fn test_unknown_topic_is_dropped() {
    let harness = Harness::new();
    harness
        .handler
        .subscribe(HOST, PORT, "known", HandlerRef::new("H"))
        .await
        .unwrap();

    harness.session().await.deliver("unknown", "x");

    tokio::time::sleep(QUIET).await;
    assert!(harness.executor.invocations().await.is_empty());
}

#[tokio::test]
async fn test_connection_is_reused_per_broker_and_separate_across_brokers() {
    let harness = Harness::new();

    harness.handler.publish(HOST, PORT, "a", "1").await.unwrap();
    harness.handler.publish(HOST, PORT, "b", "2").await.unwrap();
    harness.handler.publish("other.example.com", PORT, "a", "3").await.unwrap();

    assert_eq!(
        harness.connector.connect_count(&BrokerKey::new(HOST, PORT).unwrap()).await,
        1
    );
    assert_eq!(harness.connector.total_connects().await, 2);
    assert_eq!(harness.handler.registry().len().await, 2);
}

#[tokio::test]
async fn test_connect_failure_is_retried_on_next_call() {
    let harness = Harness::new();
    harness.connector.set_failure(true);

    let first = harness.handler.publish(HOST, PORT, "a", "1").await;
    assert!(matches!(first, Err(MuxError::Transport { .. })));
    assert!(harness.handler.registry().is_empty().await);

    harness.connector.set_failure(false);
    harness.handler.publish(HOST, PORT, "a", "2").await.unwrap();

    let key = BrokerKey::new(HOST, PORT).unwrap();
    assert_eq!(harness.connector.connect_count(&key).await, 2);
    assert_eq!(harness.session().await.published().await.len(), 1);
}

#[tokio::test]
async fn test_operations_fail_after_connection_lost_without_reconnect() {
    let harness = Harness::new();
    harness
        .handler
        .subscribe(HOST, PORT, "a", HandlerRef::new("H"))
        .await
        .unwrap();

    harness.session().await.lose_connection("network unreachable");

    let publish = harness.handler.publish(HOST, PORT, "a", "x").await;
    let unsubscribe = harness.handler.unsubscribe(HOST, PORT, "a").await;

    assert!(matches!(publish, Err(MuxError::Publish { .. })));
    assert!(matches!(unsubscribe, Err(MuxError::Unsubscribe { .. })));
    assert_eq!(harness.connector.total_connects().await, 1);
    assert!(harness.handler.registry().contains(&BrokerKey::new(HOST, PORT).unwrap()).await);
}

#[tokio::test]
async fn test_rejected_subscribe_surfaces_subscribe_error() {
    let harness = Harness::new();
    harness.handler.publish(HOST, PORT, "warmup", "x").await.unwrap();
    harness.session().await.fail_subscribe(true);

    let result = harness
        .handler
        .subscribe(HOST, PORT, "forbidden/#", HandlerRef::new("H"))
        .await;

    assert!(matches!(result, Err(MuxError::Subscribe { ref topic, .. }) if topic == "forbidden/#"));
}

#[tokio::test]
async fn test_handlers_sharing_a_registry_share_connections() {
    let registry = Arc::new(ConnectionRegistry::new());
    let connector = Arc::new(MockConnector::new());
    let first = MqttHandler::with_registry(
        registry.clone(),
        connector.clone(),
        Arc::new(RecordingExecutor::new()),
    );
    let second = MqttHandler::with_registry(
        registry.clone(),
        connector.clone(),
        Arc::new(RecordingExecutor::new()),
    );

    first.publish(HOST, PORT, "a", "1").await.unwrap();
    second.publish(HOST, PORT, "a", "2").await.unwrap();

    assert_eq!(connector.total_connects().await, 1);
    assert_eq!(registry.len().await, 1);
}
