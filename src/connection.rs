//! One shared connection to one broker
//!
//! A [`BrokerConnection`] pairs a live [`BrokerSession`] with the dispatch table for the
//! topics subscribed through it. Entries are only recorded or removed after the broker
//! has confirmed the operation.

use crate::broker::BrokerKey;
use crate::dispatch::{MessageDispatcher, Subscription};
use crate::error::{MuxError, MuxResult};
use crate::executor::{HandlerExecutor, HandlerRef};
use crate::transport::{
    BrokerSession, ConnectionState, MqttError, SessionCallback, SessionConnector,
};
use rumqttc::QoS;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info};

/// QoS requested from the broker for subscriptions
pub const SUBSCRIBE_QOS: QoS = QoS::AtLeastOnce;
/// QoS used for every publish
pub const PUBLISH_QOS: QoS = QoS::ExactlyOnce;

pub struct BrokerConnection {
    key: BrokerKey,
    session: Arc<dyn BrokerSession>,
    dispatcher: Arc<MessageDispatcher>,
    callback_installed: AtomicBool,
}

impl BrokerConnection {
    /// Open a session through `connector` and wrap it
    pub async fn connect(
        key: BrokerKey,
        connector: &dyn SessionConnector,
        executor: Arc<dyn HandlerExecutor>,
    ) -> MuxResult<Self> {
        let session = connector.connect(&key).await?;
        info!("Connected to {}", key);
        Ok(Self::with_session(key, session, executor))
    }

    pub fn with_session(
        key: BrokerKey,
        session: Arc<dyn BrokerSession>,
        executor: Arc<dyn HandlerExecutor>,
    ) -> Self {
        let dispatcher = Arc::new(MessageDispatcher::new(key.clone(), executor));
        Self {
            key,
            session,
            dispatcher,
            callback_installed: AtomicBool::new(false),
        }
    }

    pub fn key(&self) -> &BrokerKey {
        &self.key
    }

    pub fn state(&self) -> ConnectionState {
        self.session.connection_state()
    }

    /// Subscribe at the broker, then route `topic` to `handler`.
    ///
    /// Subscribing an already subscribed topic replaces its handler.
    pub async fn subscribe(&self, topic: &str, handler: HandlerRef) -> MuxResult<()> {
        if topic.is_empty() {
            let error = MqttError::InvalidTopic("empty topic".to_string());
            return Err(MuxError::subscribe(topic, error));
        }

        self.session
            .subscribe(topic, SUBSCRIBE_QOS)
            .await
            .map_err(|e| {
                error!("Subscribe to {} on {} failed: {}", topic, self.key, e);
                MuxError::subscribe(topic, e)
            })?;

        self.install_callback();

        if let Some(previous) = self.dispatcher.insert(Subscription::new(topic, handler.clone())) {
            debug!("Replaced handler {} for {} with {}", previous.handler, topic, handler);
        }
        info!(handler = %handler, "Subscribed to {} on {}", topic, self.key);
        Ok(())
    }

    pub async fn unsubscribe(&self, topic: &str) -> MuxResult<()> {
        if topic.is_empty() {
            let error = MqttError::InvalidTopic("empty topic".to_string());
            return Err(MuxError::unsubscribe(topic, error));
        }

        self.session.unsubscribe(topic).await.map_err(|e| {
            error!("Unsubscribe from {} on {} failed: {}", topic, self.key, e);
            MuxError::unsubscribe(topic, e)
        })?;

        if self.dispatcher.remove(topic).is_none() {
            debug!("Unsubscribed from {} which had no local handler", topic);
        }
        info!("Unsubscribed from {} on {}", topic, self.key);
        Ok(())
    }

    /// Publish `message` at QoS 2. Returns once the transport has queued it.
    pub async fn publish(&self, topic: &str, message: &str) -> MuxResult<()> {
        if topic.is_empty() {
            let error = MqttError::InvalidTopic("empty topic".to_string());
            return Err(MuxError::publish(topic, error));
        }

        self.session
            .publish(topic, message.as_bytes().to_vec(), PUBLISH_QOS)
            .await
            .map_err(|e| {
                error!("Publish to {} on {} failed: {}", topic, self.key, e);
                MuxError::publish(topic, e)
            })?;

        debug!(bytes = message.len(), "Published to {} on {}", topic, self.key);
        Ok(())
    }

    pub fn is_subscribed(&self, topic: &str) -> bool {
        self.dispatcher.contains(topic)
    }

    pub fn subscribed_topics(&self) -> Vec<String> {
        self.dispatcher.topics()
    }

    fn install_callback(&self) {
        if self
            .callback_installed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            let callback: Arc<dyn SessionCallback> = self.dispatcher.clone();
            self.session.set_callback(callback);
            debug!("Installed message callback on {}", self.key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::{PAYLOAD_PARAM, TOPIC_PARAM};
    use crate::testing::{MockSession, RecordingExecutor};
    use std::time::Duration;

    fn key() -> BrokerKey {
        BrokerKey::new("broker.example.com", 8883).unwrap()
    }

    fn connection(session: Arc<MockSession>, executor: Arc<RecordingExecutor>) -> BrokerConnection {
        BrokerConnection::with_session(key(), session, executor)
    }

    #[tokio::test]
    async fn test_subscribe_records_and_installs_callback_once() {
        // Arrange
        let session = Arc::new(MockSession::new());
        let conn = connection(session.clone(), Arc::new(RecordingExecutor::new()));

        // Act
        conn.subscribe("a", HandlerRef::new("H")).await.unwrap();
        conn.subscribe("b", HandlerRef::new("H")).await.unwrap();

        // Assert
        assert!(conn.is_subscribed("a"));
        assert_eq!(conn.subscribed_topics(), vec!["a".to_string(), "b".to_string()]);
        assert_eq!(session.callback_installs(), 1);
        let subs = session.subscriptions().await;
        assert_eq!(subs, vec![("a".to_string(), SUBSCRIBE_QOS), ("b".to_string(), SUBSCRIBE_QOS)]);
    }

    #[tokio::test]
    async fn test_failed_subscribe_records_nothing() {
        let session = Arc::new(MockSession::new());
        session.fail_subscribe(true);
        let conn = connection(session.clone(), Arc::new(RecordingExecutor::new()));

        let result = conn.subscribe("a", HandlerRef::new("H")).await;

        assert!(matches!(result, Err(MuxError::Subscribe { ref topic, .. }) if topic == "a"));
        assert!(!conn.is_subscribed("a"));
    }

    #[tokio::test]
    async fn test_failed_unsubscribe_keeps_entry() {
        let session = Arc::new(MockSession::new());
        let conn = connection(session.clone(), Arc::new(RecordingExecutor::new()));
        conn.subscribe("a", HandlerRef::new("H")).await.unwrap();
        session.fail_unsubscribe(true);

        let result = conn.unsubscribe("a").await;

        assert!(matches!(result, Err(MuxError::Unsubscribe { .. })));
        assert!(conn.is_subscribed("a"));
    }

    #[tokio::test]
    async fn test_publish_uses_exactly_once() {
        let session = Arc::new(MockSession::new());
        let conn = connection(session.clone(), Arc::new(RecordingExecutor::new()));

        conn.publish("cmd/reset", "hello").await.unwrap();

        let published = session.published().await;
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].topic, "cmd/reset");
        assert_eq!(published[0].payload, b"hello".to_vec());
        assert_eq!(published[0].qos, QoS::ExactlyOnce);
    }

    #[tokio::test]
    async fn test_publish_failure_maps_to_publish_error() {
        let session = Arc::new(MockSession::new());
        session.fail_publish(true);
        let conn = connection(session.clone(), Arc::new(RecordingExecutor::new()));

        let result = conn.publish("cmd/reset", "hello").await;

        assert!(matches!(result, Err(MuxError::Publish { .. })));
    }

    #[tokio::test]
    async fn test_empty_topic_rejected_without_io() {
        let session = Arc::new(MockSession::new());
        let conn = connection(session.clone(), Arc::new(RecordingExecutor::new()));

        assert!(matches!(
            conn.subscribe("", HandlerRef::new("H")).await,
            Err(MuxError::Subscribe { .. })
        ));
        assert!(matches!(conn.publish("", "x").await, Err(MuxError::Publish { .. })));
        assert!(matches!(conn.unsubscribe("").await, Err(MuxError::Unsubscribe { .. })));

        assert!(session.subscriptions().await.is_empty());
        assert!(session.published().await.is_empty());
        assert!(session.unsubscriptions().await.is_empty());
    }

    #[tokio::test]
    async fn test_delivered_message_reaches_handler() {
        let session = Arc::new(MockSession::new());
        let executor = Arc::new(RecordingExecutor::new());
        let conn = connection(session.clone(), executor.clone());
        conn.subscribe("sensors/temp", HandlerRef::new("H")).await.unwrap();

        session.deliver("sensors/temp", r#"{"t":21.5}"#);

        let calls = executor.wait_for(1, Duration::from_secs(2)).await;
        assert_eq!(calls[0].params[TOPIC_PARAM], "sensors/temp");
        assert_eq!(calls[0].params[PAYLOAD_PARAM], r#"{"t":21.5}"#);
    }

    #[tokio::test]
    async fn test_state_follows_session() {
        let session = Arc::new(MockSession::new());
        let conn = connection(session.clone(), Arc::new(RecordingExecutor::new()));
        assert!(conn.state().is_connected());

        conn.subscribe("a", HandlerRef::new("H")).await.unwrap();
        session.lose_connection("broker went away");

        assert!(matches!(conn.state(), ConnectionState::Failed(_)));
        assert!(conn.is_subscribed("a"));
        assert_eq!(conn.key(), &key());
    }
}
